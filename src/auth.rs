//! Membership and role gates consulted by every mutation. Each gate either
//! passes or returns `Forbidden`; nothing is written before a gate runs.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Project, ProjectRole, Task, Workspace, WorkspaceRole};

pub fn require_workspace_member(db: &Database, workspace_id: i64, user_id: i64) -> Result<()> {
    match db.workspace_role(workspace_id, user_id)? {
        Some(_) => Ok(()),
        None => Err(Error::forbidden("you are not a member of this workspace")),
    }
}

pub fn require_workspace_admin(db: &Database, workspace_id: i64, user_id: i64) -> Result<()> {
    match db.workspace_role(workspace_id, user_id)? {
        Some(WorkspaceRole::Admin) => Ok(()),
        Some(_) => Err(Error::forbidden(
            "only workspace admins can perform this action",
        )),
        None => Err(Error::forbidden("you are not a member of this workspace")),
    }
}

/// Workspace deletion is reserved for the owner, over and above the admin
/// role the owner implicitly holds.
pub fn require_workspace_owner(workspace: &Workspace, user_id: i64) -> Result<()> {
    if workspace.owner_id == user_id {
        Ok(())
    } else {
        Err(Error::forbidden(
            "only the workspace owner can perform this action",
        ))
    }
}

/// Project-level mutations are open to the project owner or any member
/// holding the manager role.
pub fn require_project_manager(db: &Database, project: &Project, user_id: i64) -> Result<()> {
    if project.owner_id == user_id {
        return Ok(());
    }
    match db.project_role(project.id, user_id)? {
        Some(ProjectRole::Manager) => Ok(()),
        _ => Err(Error::forbidden(
            "only project managers or the owner can perform this action",
        )),
    }
}

/// Task deletion: the task's creator, or a manager of its project.
pub fn require_task_delete(db: &Database, task: &Task, user_id: i64) -> Result<()> {
    if task.owner_id == user_id {
        return Ok(());
    }
    match db.project_role(task.project_id, user_id)? {
        Some(ProjectRole::Manager) => Ok(()),
        _ => Err(Error::forbidden(
            "only the task owner or a project manager can delete this task",
        )),
    }
}
