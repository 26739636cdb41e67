//! Project lifecycle inside a workspace: membership with project roles,
//! sprint management, and cascade deletion down to tasks.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::auth;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Project, ProjectMember, ProjectRole, Sprint};

pub fn create_project(
    db: &Database,
    actor: i64,
    workspace_id: i64,
    name: &str,
    description: Option<&str>,
) -> Result<Project> {
    if db.get_workspace(workspace_id)?.is_none() {
        return Err(Error::not_found("workspace"));
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid("project name is required"));
    }
    auth::require_workspace_admin(db, workspace_id, actor)?;
    if db.project_name_taken(workspace_id, name)? {
        return Err(Error::conflict(format!(
            "a project named \"{name}\" already exists in this workspace"
        )));
    }

    let description = description.map(str::trim).filter(|d| !d.is_empty());
    let id = db.insert_project(workspace_id, name, description, actor)?;
    info!(project_id = id, workspace_id, "project created");
    db.get_project(id)?
        .ok_or_else(|| Error::not_found("project"))
}

/// Projects of a workspace the actor belongs to, filtered to those where
/// the actor is a project member.
pub fn list_projects(db: &Database, actor: i64, workspace_id: i64) -> Result<Vec<Project>> {
    if db.get_workspace(workspace_id)?.is_none() {
        return Err(Error::not_found("workspace"));
    }
    auth::require_workspace_member(db, workspace_id, actor)?;
    db.projects_for_member(workspace_id, actor)
}

pub fn get_project(db: &Database, actor: i64, project_id: i64) -> Result<Project> {
    let project = db
        .get_project(project_id)?
        .ok_or_else(|| Error::not_found("project"))?;
    auth::require_workspace_member(db, project.workspace_id, actor)?;
    Ok(project)
}

pub fn update_project(
    db: &Database,
    actor: i64,
    project_id: i64,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<Project> {
    let project = db
        .get_project(project_id)?
        .ok_or_else(|| Error::not_found("project"))?;
    auth::require_project_manager(db, &project, actor)?;

    if let Some(new_name) = name {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(Error::invalid("project name cannot be empty"));
        }
        if new_name != project.name && db.project_name_taken(project.workspace_id, new_name)? {
            return Err(Error::conflict(format!(
                "a project named \"{new_name}\" already exists in this workspace"
            )));
        }
    }

    // An empty description clears the field, matching the task engine's
    // empty-string normalization.
    let description = description.map(|d| {
        let d = d.trim();
        (!d.is_empty()).then_some(d)
    });
    db.update_project(project_id, name.map(str::trim), description)?;
    db.get_project(project_id)?
        .ok_or_else(|| Error::not_found("project"))
}

pub fn add_member(
    db: &Database,
    actor: i64,
    project_id: i64,
    user_id: i64,
    role: ProjectRole,
) -> Result<()> {
    let project = db
        .get_project(project_id)?
        .ok_or_else(|| Error::not_found("project"))?;
    auth::require_project_manager(db, &project, actor)?;

    // Project members are drawn from the workspace roster.
    if db.workspace_role(project.workspace_id, user_id)?.is_none() {
        return Err(Error::invalid(
            "user must be a member of the workspace to join the project",
        ));
    }
    if db.project_role(project_id, user_id)?.is_some() {
        return Err(Error::invalid("user is already a member of the project"));
    }
    db.add_project_member(project_id, user_id, role)?;
    Ok(())
}

pub fn set_member_role(
    db: &Database,
    actor: i64,
    project_id: i64,
    user_id: i64,
    role: ProjectRole,
) -> Result<()> {
    let project = db
        .get_project(project_id)?
        .ok_or_else(|| Error::not_found("project"))?;
    auth::require_project_manager(db, &project, actor)?;
    if user_id == project.owner_id {
        return Err(Error::forbidden(
            "cannot change the role of the project owner",
        ));
    }
    if !db.set_project_role(project_id, user_id, role)? {
        return Err(Error::not_found("member"));
    }
    Ok(())
}

pub fn remove_member(db: &Database, actor: i64, project_id: i64, user_id: i64) -> Result<()> {
    let project = db
        .get_project(project_id)?
        .ok_or_else(|| Error::not_found("project"))?;
    auth::require_project_manager(db, &project, actor)?;
    if user_id == project.owner_id {
        return Err(Error::forbidden("cannot remove the project owner"));
    }
    if user_id == actor {
        return Err(Error::forbidden("managers cannot remove themselves"));
    }
    if !db.remove_project_member(project_id, user_id)? {
        return Err(Error::not_found("member"));
    }
    Ok(())
}

pub fn list_members(db: &Database, actor: i64, project_id: i64) -> Result<Vec<ProjectMember>> {
    let project = db
        .get_project(project_id)?
        .ok_or_else(|| Error::not_found("project"))?;
    auth::require_workspace_member(db, project.workspace_id, actor)?;
    db.project_members(project_id)
}

pub fn add_sprint(
    db: &Database,
    actor: i64,
    project_id: i64,
    name: &str,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
) -> Result<Sprint> {
    let project = db
        .get_project(project_id)?
        .ok_or_else(|| Error::not_found("project"))?;
    auth::require_project_manager(db, &project, actor)?;

    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid("sprint name is required"));
    }
    if db.sprint_name_taken(project_id, name)? {
        return Err(Error::conflict(format!(
            "a sprint named \"{name}\" already exists in this project"
        )));
    }

    let id = db.insert_sprint(project_id, name, start_date, end_date)?;
    db.get_sprint(id)?.ok_or_else(|| Error::not_found("sprint"))
}

pub fn list_sprints(db: &Database, actor: i64, project_id: i64) -> Result<Vec<Sprint>> {
    let project = db
        .get_project(project_id)?
        .ok_or_else(|| Error::not_found("project"))?;
    auth::require_workspace_member(db, project.workspace_id, actor)?;
    db.sprints_for_project(project_id)
}

/// Removes a sprint by name. Tasks that referenced it fall back to the
/// no-sprint scope rather than being deleted.
pub fn remove_sprint(db: &Database, actor: i64, project_id: i64, name: &str) -> Result<()> {
    let project = db
        .get_project(project_id)?
        .ok_or_else(|| Error::not_found("project"))?;
    auth::require_project_manager(db, &project, actor)?;

    let sprint = db
        .find_sprint_by_name(project_id, name.trim())?
        .ok_or_else(|| Error::not_found("sprint"))?;

    // Detached tasks land in the no-sprint scope, where their titles must
    // still be unique. A collision here would abort the delete mid-cascade.
    for task in db.tasks_by_sprint(sprint.id)? {
        if db.task_title_taken(project_id, None, &task.title, Some(task.id))? {
            return Err(Error::conflict(format!(
                "cannot remove sprint \"{}\": a task titled \"{}\" already exists outside a sprint",
                sprint.name, task.title
            )));
        }
    }

    db.delete_sprint(sprint.id)?;
    Ok(())
}

pub fn delete_project(db: &Database, actor: i64, project_id: i64) -> Result<()> {
    let project = db
        .get_project(project_id)?
        .ok_or_else(|| Error::not_found("project"))?;
    auth::require_project_manager(db, &project, actor)?;
    db.delete_project(project_id)?;
    info!(project_id, "project deleted");
    Ok(())
}
