use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy of the core. The first four variants map one-to-one onto
/// caller-facing outcomes; `Storage` wraps anything the store itself raises.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn forbidden(why: impl Into<String>) -> Self {
        Error::Forbidden(why.into())
    }

    pub fn conflict(why: impl Into<String>) -> Self {
        Error::Conflict(why.into())
    }

    pub fn invalid(why: impl Into<String>) -> Self {
        Error::InvalidInput(why.into())
    }
}
