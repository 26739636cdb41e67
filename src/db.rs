use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::Result;
use crate::models::{
    Comment, HistoryEntry, Notification, NotificationType, Priority, Project, ProjectMember,
    ProjectRole, Sprint, Task, TaskStatus, User, Workspace, WorkspaceMember, WorkspaceRole,
};

const SCHEMA_VERSION: i32 = 1;

/// Fields of a task row that do not exist yet. Timestamps are filled in by
/// the store at insert time.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: i64,
    pub sprint_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub owner_id: i64,
    pub assignee_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub updated_by: i64,
    pub updated_at: DateTime<Utc>,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap_or(0);

        if version < SCHEMA_VERSION {
            self.conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS workspaces (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT,
                    owner_id INTEGER NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS workspace_members (
                    workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role TEXT NOT NULL DEFAULT 'member',
                    joined_at TEXT NOT NULL,
                    PRIMARY KEY (workspace_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT,
                    owner_id INTEGER NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL,
                    UNIQUE (workspace_id, name)
                );

                CREATE TABLE IF NOT EXISTS project_members (
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role TEXT NOT NULL DEFAULT 'developer',
                    joined_at TEXT NOT NULL,
                    PRIMARY KEY (project_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS sprints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    start_date TEXT NOT NULL,
                    end_date TEXT NOT NULL,
                    UNIQUE (project_id, name)
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    sprint_id INTEGER REFERENCES sprints(id) ON DELETE SET NULL,
                    title TEXT NOT NULL,
                    description TEXT,
                    priority TEXT NOT NULL DEFAULT 'medium',
                    status TEXT NOT NULL DEFAULT 'pending',
                    due_date TEXT,
                    owner_id INTEGER NOT NULL REFERENCES users(id),
                    assignee_id INTEGER NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    author_id INTEGER NOT NULL REFERENCES users(id),
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS task_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    field TEXT NOT NULL,
                    old_value TEXT,
                    new_value TEXT,
                    updated_by INTEGER NOT NULL REFERENCES users(id),
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipient_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    type TEXT NOT NULL,
                    title TEXT NOT NULL,
                    message TEXT NOT NULL,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    is_read INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                -- SQLite treats NULLs as distinct in unique constraints, so the
                -- no-sprint scope needs an expression index to stay unique.
                CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_title_scope
                    ON tasks(project_id, IFNULL(sprint_id, 0), title);

                CREATE INDEX IF NOT EXISTS idx_projects_workspace ON projects(workspace_id);
                CREATE INDEX IF NOT EXISTS idx_sprints_project ON sprints(project_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(status, due_date);
                CREATE INDEX IF NOT EXISTS idx_comments_task ON comments(task_id);
                CREATE INDEX IF NOT EXISTS idx_history_task ON task_history(task_id);
                CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_notifications_unread ON notifications(recipient_id, is_read);
                "#,
            )?;

            self.conn
                .execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
        }

        self.conn.execute("PRAGMA foreign_keys = ON", [])?;

        Ok(())
    }

    // Users

    /// Insert-or-fetch by email. Re-registering refreshes the display name
    /// and returns the existing id.
    pub fn upsert_user(&self, name: &str, email: &str) -> Result<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row("SELECT id FROM users WHERE email = ?1", [email], |row| {
                row.get(0)
            })
            .optional()?;

        if let Some(id) = existing {
            self.conn
                .execute("UPDATE users SET name = ?1 WHERE id = ?2", params![name, id])?;
            return Ok(id);
        }

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO users (name, email, created_at) VALUES (?1, ?2, ?3)",
            params![name, email, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, name, email, created_at FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        created_at: parse_datetime(row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, name, email, created_at FROM users WHERE email = ?1",
                [email],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        created_at: parse_datetime(row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // Workspaces

    pub fn insert_workspace(
        &self,
        name: &str,
        description: Option<&str>,
        owner_id: i64,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO workspaces (name, description, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, description, owner_id, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at) VALUES (?1, ?2, 'admin', ?3)",
            params![id, owner_id, now],
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get_workspace(&self, id: i64) -> Result<Option<Workspace>> {
        let workspace = self
            .conn
            .query_row(
                "SELECT id, name, description, owner_id, created_at FROM workspaces WHERE id = ?1",
                [id],
                row_to_workspace,
            )
            .optional()?;
        Ok(workspace)
    }

    pub fn workspace_name_taken(&self, name: &str) -> Result<bool> {
        let taken: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM workspaces WHERE name = ?1)",
            [name],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    pub fn workspaces_for_user(&self, user_id: i64) -> Result<Vec<Workspace>> {
        let mut stmt = self.conn.prepare(
            "SELECT w.id, w.name, w.description, w.owner_id, w.created_at
             FROM workspaces w
             JOIN workspace_members m ON m.workspace_id = w.id
             WHERE m.user_id = ?1
             ORDER BY w.id",
        )?;
        let workspaces = stmt
            .query_map([user_id], row_to_workspace)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(workspaces)
    }

    /// `description`: outer `None` leaves the column alone, `Some(None)`
    /// clears it to NULL.
    pub fn update_workspace(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<Option<&str>>,
    ) -> Result<bool> {
        let mut updates = Vec::new();
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(n) = name {
            updates.push(format!("name = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(n.to_string()));
        }

        if let Some(d) = description {
            updates.push(format!("description = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(d.map(str::to_string)));
        }

        if updates.is_empty() {
            return Ok(false);
        }

        params_vec.push(Box::new(id));
        let sql = format!(
            "UPDATE workspaces SET {} WHERE id = ?{}",
            updates.join(", "),
            params_vec.len()
        );

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = self.conn.execute(&sql, params_refs.as_slice())?;
        Ok(rows > 0)
    }

    pub fn delete_workspace(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM workspaces WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    pub fn workspace_role(&self, workspace_id: i64, user_id: i64) -> Result<Option<WorkspaceRole>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(role.and_then(|r| WorkspaceRole::parse(&r)))
    }

    pub fn add_workspace_member(
        &self,
        workspace_id: i64,
        user_id: i64,
        role: WorkspaceRole,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![workspace_id, user_id, role.as_str(), now],
        )?;
        Ok(())
    }

    pub fn remove_workspace_member(&self, workspace_id: i64, user_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn set_workspace_role(
        &self,
        workspace_id: i64,
        user_id: i64,
        role: WorkspaceRole,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE workspace_members SET role = ?1 WHERE workspace_id = ?2 AND user_id = ?3",
            params![role.as_str(), workspace_id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn workspace_members(&self, workspace_id: i64) -> Result<Vec<WorkspaceMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, role, joined_at FROM workspace_members WHERE workspace_id = ?1 ORDER BY joined_at",
        )?;
        let members = stmt
            .query_map([workspace_id], |row| {
                let role: String = row.get(1)?;
                Ok(WorkspaceMember {
                    user_id: row.get(0)?,
                    role: WorkspaceRole::parse(&role).unwrap_or(WorkspaceRole::Member),
                    joined_at: parse_datetime(row.get::<_, String>(2)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(members)
    }

    // Projects

    pub fn insert_project(
        &self,
        workspace_id: i64,
        name: &str,
        description: Option<&str>,
        owner_id: i64,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO projects (workspace_id, name, description, owner_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![workspace_id, name, description, owner_id, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO project_members (project_id, user_id, role, joined_at) VALUES (?1, ?2, 'manager', ?3)",
            params![id, owner_id, now],
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let project = self
            .conn
            .query_row(
                "SELECT id, workspace_id, name, description, owner_id, created_at FROM projects WHERE id = ?1",
                [id],
                row_to_project,
            )
            .optional()?;
        Ok(project)
    }

    pub fn project_name_taken(&self, workspace_id: i64, name: &str) -> Result<bool> {
        let taken: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE workspace_id = ?1 AND name = ?2)",
            params![workspace_id, name],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    pub fn projects_for_member(&self, workspace_id: i64, user_id: i64) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.workspace_id, p.name, p.description, p.owner_id, p.created_at
             FROM projects p
             JOIN project_members m ON m.project_id = p.id
             WHERE p.workspace_id = ?1 AND m.user_id = ?2
             ORDER BY p.id",
        )?;
        let projects = stmt
            .query_map(params![workspace_id, user_id], row_to_project)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    /// `description`: outer `None` leaves the column alone, `Some(None)`
    /// clears it to NULL.
    pub fn update_project(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<Option<&str>>,
    ) -> Result<bool> {
        let mut updates = Vec::new();
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(n) = name {
            updates.push(format!("name = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(n.to_string()));
        }

        if let Some(d) = description {
            updates.push(format!("description = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(d.map(str::to_string)));
        }

        if updates.is_empty() {
            return Ok(false);
        }

        params_vec.push(Box::new(id));
        let sql = format!(
            "UPDATE projects SET {} WHERE id = ?{}",
            updates.join(", "),
            params_vec.len()
        );

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = self.conn.execute(&sql, params_refs.as_slice())?;
        Ok(rows > 0)
    }

    pub fn delete_project(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    pub fn project_role(&self, project_id: i64, user_id: i64) -> Result<Option<ProjectRole>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(role.and_then(|r| ProjectRole::parse(&r)))
    }

    pub fn add_project_member(
        &self,
        project_id: i64,
        user_id: i64,
        role: ProjectRole,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO project_members (project_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![project_id, user_id, role.as_str(), now],
        )?;
        Ok(())
    }

    pub fn set_project_role(
        &self,
        project_id: i64,
        user_id: i64,
        role: ProjectRole,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE project_members SET role = ?1 WHERE project_id = ?2 AND user_id = ?3",
            params![role.as_str(), project_id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn remove_project_member(&self, project_id: i64, user_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM project_members WHERE project_id = ?1 AND user_id = ?2",
            params![project_id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn project_members(&self, project_id: i64) -> Result<Vec<ProjectMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, role, joined_at FROM project_members WHERE project_id = ?1 ORDER BY joined_at",
        )?;
        let members = stmt
            .query_map([project_id], |row| {
                let role: String = row.get(1)?;
                Ok(ProjectMember {
                    user_id: row.get(0)?,
                    role: ProjectRole::parse(&role).unwrap_or(ProjectRole::Developer),
                    joined_at: parse_datetime(row.get::<_, String>(2)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(members)
    }

    // Sprints

    pub fn insert_sprint(
        &self,
        project_id: i64,
        name: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sprints (project_id, name, start_date, end_date) VALUES (?1, ?2, ?3, ?4)",
            params![
                project_id,
                name,
                start_date.to_rfc3339(),
                end_date.to_rfc3339()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn sprint_name_taken(&self, project_id: i64, name: &str) -> Result<bool> {
        let taken: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sprints WHERE project_id = ?1 AND name = ?2)",
            params![project_id, name],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    pub fn get_sprint(&self, id: i64) -> Result<Option<Sprint>> {
        let sprint = self
            .conn
            .query_row(
                "SELECT id, project_id, name, start_date, end_date FROM sprints WHERE id = ?1",
                [id],
                row_to_sprint,
            )
            .optional()?;
        Ok(sprint)
    }

    pub fn find_sprint_by_name(&self, project_id: i64, name: &str) -> Result<Option<Sprint>> {
        let sprint = self
            .conn
            .query_row(
                "SELECT id, project_id, name, start_date, end_date FROM sprints WHERE project_id = ?1 AND name = ?2",
                params![project_id, name],
                row_to_sprint,
            )
            .optional()?;
        Ok(sprint)
    }

    pub fn sprints_for_project(&self, project_id: i64) -> Result<Vec<Sprint>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, name, start_date, end_date FROM sprints WHERE project_id = ?1 ORDER BY id",
        )?;
        let sprints = stmt
            .query_map([project_id], row_to_sprint)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sprints)
    }

    pub fn delete_sprint(&self, id: i64) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM sprints WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    // Tasks

    pub fn insert_task(&self, task: &NewTask) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO tasks (project_id, sprint_id, title, description, priority, status, due_date, owner_id, assignee_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                task.project_id,
                task.sprint_id,
                task.title,
                task.description,
                task.priority.as_str(),
                task.status.as_str(),
                task.due_date.map(|d| d.to_rfc3339()),
                task.owner_id,
                task.assignee_id,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let task = self
            .conn
            .query_row(&format!("{TASK_SELECT} WHERE id = ?1"), [id], row_to_task)
            .optional()?;
        Ok(task)
    }

    /// Whether another task already occupies the `(project, sprint, title)`
    /// scope. `exclude` skips the task being updated.
    pub fn task_title_taken(
        &self,
        project_id: i64,
        sprint_id: Option<i64>,
        title: &str,
        exclude: Option<i64>,
    ) -> Result<bool> {
        let taken: bool = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM tasks
                WHERE project_id = ?1
                  AND IFNULL(sprint_id, 0) = IFNULL(?2, 0)
                  AND title = ?3
                  AND (?4 IS NULL OR id != ?4)
            )",
            params![project_id, sprint_id, title, exclude],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    /// Write back a mutated task aggregate. The whole mutable row is saved,
    /// matching the load-whole/mutate/save-whole boundary of the mutation
    /// engine.
    pub fn save_task(&self, task: &Task) -> Result<()> {
        self.conn.execute(
            "UPDATE tasks SET sprint_id = ?1, title = ?2, description = ?3, priority = ?4, status = ?5, due_date = ?6, assignee_id = ?7, updated_at = ?8 WHERE id = ?9",
            params![
                task.sprint_id,
                task.title,
                task.description,
                task.priority.as_str(),
                task.status.as_str(),
                task.due_date.map(|d| d.to_rfc3339()),
                task.assignee_id,
                task.updated_at.to_rfc3339(),
                task.id
            ],
        )?;
        Ok(())
    }

    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    pub fn tasks_by_project(&self, project_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT} WHERE project_id = ?1 ORDER BY id"))?;
        let tasks = stmt
            .query_map([project_id], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn tasks_by_sprint(&self, sprint_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT} WHERE sprint_id = ?1 ORDER BY id"))?;
        let tasks = stmt
            .query_map([sprint_id], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn tasks_by_assignee(&self, user_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT} WHERE assignee_id = ?1 ORDER BY id"))?;
        let tasks = stmt
            .query_map([user_id], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Open tasks whose due date falls inside `[from, to]`. RFC3339 UTC
    /// strings sort lexicographically, so the range compare happens in SQL.
    pub fn tasks_due_within(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TASK_SELECT} WHERE status != 'completed' AND due_date IS NOT NULL AND due_date >= ?1 AND due_date <= ?2 ORDER BY due_date"
        ))?;
        let tasks = stmt
            .query_map(params![from.to_rfc3339(), to.to_rfc3339()], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    // Comments & history

    pub fn insert_comment(
        &self,
        task_id: i64,
        author_id: i64,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO comments (task_id, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![task_id, author_id, content, created_at.to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn comments_for_task(&self, task_id: i64) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, author_id, content, created_at FROM comments WHERE task_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let comments = stmt
            .query_map([task_id], |row| {
                Ok(Comment {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    author_id: row.get(2)?,
                    content: row.get(3)?,
                    created_at: parse_datetime(row.get::<_, String>(4)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    pub fn append_history(&self, task_id: i64, entries: &[NewHistoryEntry]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for entry in entries {
            tx.execute(
                "INSERT INTO task_history (task_id, field, old_value, new_value, updated_by, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    task_id,
                    entry.field,
                    entry.old_value,
                    entry.new_value,
                    entry.updated_by,
                    entry.updated_at.to_rfc3339()
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn history_for_task(&self, task_id: i64) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, field, old_value, new_value, updated_by, updated_at FROM task_history WHERE task_id = ?1 ORDER BY updated_at DESC, id DESC",
        )?;
        let history = stmt
            .query_map([task_id], |row| {
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    field: row.get(2)?,
                    old_value: row.get(3)?,
                    new_value: row.get(4)?,
                    updated_by: row.get(5)?,
                    updated_at: parse_datetime(row.get::<_, String>(6)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(history)
    }

    // Notifications

    pub fn insert_notification(
        &self,
        recipient_id: i64,
        kind: NotificationType,
        title: &str,
        message: &str,
        task_id: i64,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO notifications (recipient_id, type, title, message, task_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![recipient_id, kind.as_str(), title, message, task_id, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn due_soon_exists(&self, recipient_id: i64, task_id: i64) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM notifications WHERE recipient_id = ?1 AND type = 'task_due_soon' AND task_id = ?2)",
            params![recipient_id, task_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn mark_notification_read(&self, id: i64, recipient_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2",
            params![id, recipient_id],
        )?;
        Ok(rows > 0)
    }

    pub fn mark_all_read(&self, recipient_id: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1 AND is_read = 0",
            [recipient_id],
        )?;
        Ok(rows)
    }

    pub fn notifications_for_user(&self, recipient_id: i64) -> Result<Vec<Notification>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NOTIFICATION_SELECT} WHERE recipient_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let notifications = stmt
            .query_map([recipient_id], row_to_notification)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    pub fn notifications_for_task(&self, task_id: i64) -> Result<Vec<Notification>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NOTIFICATION_SELECT} WHERE task_id = ?1 ORDER BY id"
        ))?;
        let notifications = stmt
            .query_map([task_id], row_to_notification)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notifications)
    }
}

const TASK_SELECT: &str = "SELECT id, project_id, sprint_id, title, description, priority, status, due_date, owner_id, assignee_id, created_at, updated_at FROM tasks";

const NOTIFICATION_SELECT: &str =
    "SELECT id, recipient_id, type, title, message, task_id, is_read, created_at FROM notifications";

fn row_to_workspace(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner_id: row.get(3)?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        owner_id: row.get(4)?,
        created_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

fn row_to_sprint(row: &Row<'_>) -> rusqlite::Result<Sprint> {
    Ok(Sprint {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        start_date: parse_datetime(row.get::<_, String>(3)?),
        end_date: parse_datetime(row.get::<_, String>(4)?),
    })
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let priority: String = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        sprint_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        priority: Priority::parse(&priority).unwrap_or(Priority::Medium),
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        due_date: row.get::<_, Option<String>>(7)?.map(parse_datetime),
        owner_id: row.get(8)?,
        assignee_id: row.get(9)?,
        created_at: parse_datetime(row.get::<_, String>(10)?),
        updated_at: parse_datetime(row.get::<_, String>(11)?),
    })
}

fn row_to_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(2)?;
    Ok(Notification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        kind: NotificationType::parse(&kind).unwrap_or(NotificationType::TaskUpdated),
        title: row.get(3)?,
        message: row.get(4)?,
        task_id: row.get(5)?,
        is_read: row.get(6)?,
        created_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_upsert_user_anchors_on_email() {
        let (db, _dir) = setup_test_db();
        let id = db.upsert_user("Ana", "ana@example.com").unwrap();

        // re-registering the same email refreshes the name, keeps the id
        let again = db.upsert_user("Ana Maria", "ana@example.com").unwrap();
        assert_eq!(again, id);

        let user = db.get_user_by_email("ana@example.com").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.name, "Ana Maria");
        assert!(db.get_user_by_email("bob@example.com").unwrap().is_none());
    }
}
