//! Workspace lifecycle: the top-level tenant container. The creator becomes
//! owner and an admin member; deletion cascades through projects, tasks, and
//! notifications.

use tracing::info;

use crate::auth;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Workspace, WorkspaceMember, WorkspaceRole};

pub fn create_workspace(
    db: &Database,
    actor: i64,
    name: &str,
    description: Option<&str>,
) -> Result<Workspace> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid("workspace name is required"));
    }
    if db.get_user(actor)?.is_none() {
        return Err(Error::not_found("user"));
    }
    if db.workspace_name_taken(name)? {
        return Err(Error::conflict(format!(
            "a workspace named \"{name}\" already exists"
        )));
    }

    let description = description.map(str::trim).filter(|d| !d.is_empty());
    let id = db.insert_workspace(name, description, actor)?;
    info!(workspace_id = id, "workspace created");
    db.get_workspace(id)?
        .ok_or_else(|| Error::not_found("workspace"))
}

pub fn my_workspaces(db: &Database, actor: i64) -> Result<Vec<Workspace>> {
    db.workspaces_for_user(actor)
}

pub fn get_workspace(db: &Database, actor: i64, workspace_id: i64) -> Result<Workspace> {
    let workspace = db
        .get_workspace(workspace_id)?
        .ok_or_else(|| Error::not_found("workspace"))?;
    auth::require_workspace_member(db, workspace_id, actor)?;
    Ok(workspace)
}

pub fn update_workspace(
    db: &Database,
    actor: i64,
    workspace_id: i64,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<Workspace> {
    let workspace = db
        .get_workspace(workspace_id)?
        .ok_or_else(|| Error::not_found("workspace"))?;
    auth::require_workspace_admin(db, workspace_id, actor)?;

    if let Some(new_name) = name {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(Error::invalid("workspace name cannot be empty"));
        }
        if new_name != workspace.name && db.workspace_name_taken(new_name)? {
            return Err(Error::conflict(format!(
                "a workspace named \"{new_name}\" already exists"
            )));
        }
    }

    // An empty description clears the field, matching the task engine's
    // empty-string normalization.
    let description = description.map(|d| {
        let d = d.trim();
        (!d.is_empty()).then_some(d)
    });
    db.update_workspace(workspace_id, name.map(str::trim), description)?;
    db.get_workspace(workspace_id)?
        .ok_or_else(|| Error::not_found("workspace"))
}

pub fn add_member(
    db: &Database,
    actor: i64,
    workspace_id: i64,
    user_id: i64,
    role: WorkspaceRole,
) -> Result<()> {
    if db.get_workspace(workspace_id)?.is_none() {
        return Err(Error::not_found("workspace"));
    }
    auth::require_workspace_admin(db, workspace_id, actor)?;
    if db.get_user(user_id)?.is_none() {
        return Err(Error::not_found("user"));
    }
    if db.workspace_role(workspace_id, user_id)?.is_some() {
        return Err(Error::invalid("user is already a member"));
    }
    db.add_workspace_member(workspace_id, user_id, role)?;
    Ok(())
}

pub fn remove_member(db: &Database, actor: i64, workspace_id: i64, user_id: i64) -> Result<()> {
    let workspace = db
        .get_workspace(workspace_id)?
        .ok_or_else(|| Error::not_found("workspace"))?;
    auth::require_workspace_admin(db, workspace_id, actor)?;
    if user_id == workspace.owner_id {
        return Err(Error::forbidden("cannot remove the workspace owner"));
    }
    if !db.remove_workspace_member(workspace_id, user_id)? {
        return Err(Error::not_found("member"));
    }
    Ok(())
}

pub fn set_member_role(
    db: &Database,
    actor: i64,
    workspace_id: i64,
    user_id: i64,
    role: WorkspaceRole,
) -> Result<()> {
    let workspace = db
        .get_workspace(workspace_id)?
        .ok_or_else(|| Error::not_found("workspace"))?;
    auth::require_workspace_admin(db, workspace_id, actor)?;
    if user_id == workspace.owner_id {
        return Err(Error::forbidden(
            "cannot change the role of the workspace owner",
        ));
    }
    if !db.set_workspace_role(workspace_id, user_id, role)? {
        return Err(Error::not_found("member"));
    }
    Ok(())
}

pub fn list_members(db: &Database, actor: i64, workspace_id: i64) -> Result<Vec<WorkspaceMember>> {
    if db.get_workspace(workspace_id)?.is_none() {
        return Err(Error::not_found("workspace"));
    }
    auth::require_workspace_member(db, workspace_id, actor)?;
    db.workspace_members(workspace_id)
}

/// Deletion requires the owner, not merely an admin. Everything the
/// workspace owns goes with it.
pub fn delete_workspace(db: &Database, actor: i64, workspace_id: i64) -> Result<()> {
    let workspace = db
        .get_workspace(workspace_id)?
        .ok_or_else(|| Error::not_found("workspace"))?;
    auth::require_workspace_admin(db, workspace_id, actor)?;
    auth::require_workspace_owner(&workspace, actor)?;
    db.delete_workspace(workspace_id)?;
    info!(workspace_id, "workspace deleted");
    Ok(())
}
