//! Core of a multi-tenant project tracker: workspaces own projects, projects
//! own sprints and tasks, tasks carry comments and a field-level change
//! history, and mutations fan out notification records. Identity and
//! delivery live outside this crate; callers pass an authenticated user id.

pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod project;
pub mod sweep;
pub mod task;
pub mod workspace;

pub use db::Database;
pub use error::{Error, Result};
