//! Task mutation engine: create, partial update with field-level history,
//! comments, deletion, and the read-side queries. Every operation re-reads
//! the task from the store, mutates the loaded aggregate, and writes it back
//! whole.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::auth;
use crate::db::{Database, NewHistoryEntry, NewTask};
use crate::error::{Error, Result};
use crate::models::{Comment, Priority, SprintRef, Task, TaskDetail, TaskStatus};
use crate::notify;

#[derive(Debug, Clone)]
pub struct CreateTask {
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee_id: i64,
    pub sprint_id: Option<i64>,
}

/// A partial update. Present fields are requested changes; absent fields are
/// untouched. Values arrive as raw strings (the wire shape) and are parsed
/// and normalized here: empty strings mean "clear this field".
#[derive(Debug, Default, Clone)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub due_date: Option<String>,
    pub assignee_id: Option<String>,
    pub sprint_id: Option<String>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.due_date.is_none()
            && self.assignee_id.is_none()
            && self.sprint_id.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub task: Task,
    /// Names of the fields that actually changed, in patch order. One
    /// history entry was appended per name.
    pub changed: Vec<String>,
}

pub fn create_task(db: &Database, actor: i64, input: CreateTask) -> Result<Task> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(Error::invalid("title is required"));
    }

    let project = db
        .get_project(input.project_id)?
        .ok_or_else(|| Error::not_found("project"))?;

    if db.get_user(input.assignee_id)?.is_none() {
        return Err(Error::not_found("assignee"));
    }

    if let Some(sprint_id) = input.sprint_id {
        let sprint = db
            .get_sprint(sprint_id)?
            .ok_or_else(|| Error::not_found("sprint"))?;
        if sprint.project_id != project.id {
            return Err(Error::not_found("sprint"));
        }
    }

    if db.task_title_taken(project.id, input.sprint_id, title, None)? {
        return Err(Error::conflict(format!(
            "a task titled \"{title}\" already exists in this sprint scope"
        )));
    }

    let id = db.insert_task(&NewTask {
        project_id: project.id,
        sprint_id: input.sprint_id,
        title: title.to_string(),
        description: input.description.filter(|d| !d.trim().is_empty()),
        priority: input.priority,
        status: input.status,
        due_date: input.due_date,
        owner_id: actor,
        assignee_id: input.assignee_id,
    })?;

    let task = db
        .get_task(id)?
        .ok_or_else(|| Error::not_found("task"))?;

    notify::task_created(db, &task);

    Ok(task)
}

pub fn update_task(
    db: &Database,
    actor: i64,
    task_id: i64,
    patch: &TaskPatch,
) -> Result<UpdateOutcome> {
    let mut task = db
        .get_task(task_id)?
        .ok_or_else(|| Error::not_found("task"))?;

    let now = Utc::now();
    let old_status = task.status;
    let mut changes: Vec<NewHistoryEntry> = Vec::new();
    let mut scope_changed = false;

    let mut record = |field: &str, old: Option<String>, new: Option<String>| {
        changes.push(NewHistoryEntry {
            field: field.to_string(),
            old_value: old,
            new_value: new,
            updated_by: actor,
            updated_at: now,
        });
    };

    if let Some(raw) = &patch.title {
        let new = match normalize(raw) {
            Some(t) => t,
            None => return Err(Error::invalid("title cannot be empty")),
        };
        if task.title != new {
            record("title", Some(task.title.clone()), Some(new.to_string()));
            task.title = new.to_string();
            scope_changed = true;
        }
    }

    if let Some(raw) = &patch.description {
        let new = normalize(raw).map(str::to_string);
        if task.description != new {
            record("description", task.description.clone(), new.clone());
            task.description = new;
        }
    }

    if let Some(raw) = &patch.priority {
        let new = Priority::parse(raw.trim())
            .ok_or_else(|| Error::invalid(format!("unknown priority '{}'", raw.trim())))?;
        if task.priority != new {
            record(
                "priority",
                Some(task.priority.as_str().to_string()),
                Some(new.as_str().to_string()),
            );
            task.priority = new;
        }
    }

    if let Some(raw) = &patch.status {
        let new = TaskStatus::parse(raw.trim())
            .ok_or_else(|| Error::invalid(format!("unknown status '{}'", raw.trim())))?;
        if task.status != new {
            record(
                "status",
                Some(task.status.as_str().to_string()),
                Some(new.as_str().to_string()),
            );
            task.status = new;
        }
    }

    if let Some(raw) = &patch.due_date {
        let new = match normalize(raw) {
            Some(v) => Some(parse_date(v)?),
            None => None,
        };
        // Calendar-date comparison: a timezone-formatting difference on the
        // same day is not a change.
        let old_day = task.due_date.map(|d| d.date_naive());
        let new_day = new.map(|d| d.date_naive());
        if old_day != new_day {
            record(
                "due_date",
                old_day.map(|d| d.to_string()),
                new_day.map(|d| d.to_string()),
            );
            task.due_date = new;
        }
    }

    if let Some(raw) = &patch.assignee_id {
        let new = parse_id(raw, "assignee_id")?;
        if db.get_user(new)?.is_none() {
            return Err(Error::not_found("assignee"));
        }
        if task.assignee_id != new {
            record(
                "assignee_id",
                Some(task.assignee_id.to_string()),
                Some(new.to_string()),
            );
            task.assignee_id = new;
        }
    }

    if let Some(raw) = &patch.sprint_id {
        let new = match normalize(raw) {
            Some(v) => {
                let id = parse_id(v, "sprint_id")?;
                let sprint = db
                    .get_sprint(id)?
                    .ok_or_else(|| Error::not_found("sprint"))?;
                if sprint.project_id != task.project_id {
                    return Err(Error::not_found("sprint"));
                }
                Some(id)
            }
            None => None,
        };
        if task.sprint_id != new {
            record(
                "sprint_id",
                task.sprint_id.map(|v| v.to_string()),
                new.map(|v| v.to_string()),
            );
            task.sprint_id = new;
            scope_changed = true;
        }
    }

    if changes.is_empty() {
        debug!(task_id, "update was a no-op");
        return Ok(UpdateOutcome {
            task,
            changed: Vec::new(),
        });
    }

    // Moving the title or sprint can collide with another task in the
    // target scope.
    if scope_changed
        && db.task_title_taken(task.project_id, task.sprint_id, &task.title, Some(task.id))?
    {
        return Err(Error::conflict(format!(
            "a task titled \"{}\" already exists in this sprint scope",
            task.title
        )));
    }

    task.updated_at = now;
    db.save_task(&task)?;
    db.append_history(task.id, &changes)?;

    if old_status != TaskStatus::Completed && task.status == TaskStatus::Completed {
        notify::task_completed(db, &task);
    } else {
        notify::task_updated(db, &task);
    }

    Ok(UpdateOutcome {
        changed: changes.iter().map(|c| c.field.clone()).collect(),
        task,
    })
}

pub fn add_comment(db: &Database, actor: i64, task_id: i64, content: &str) -> Result<Comment> {
    let task = db
        .get_task(task_id)?
        .ok_or_else(|| Error::not_found("task"))?;

    let content = content.trim();
    if content.is_empty() {
        return Err(Error::invalid("comment content is required"));
    }

    let now = Utc::now();
    let id = db.insert_comment(task.id, actor, content, now)?;
    db.append_history(
        task.id,
        &[NewHistoryEntry {
            field: "comments".to_string(),
            old_value: None,
            new_value: Some(content.to_string()),
            updated_by: actor,
            updated_at: now,
        }],
    )?;

    notify::comment_added(db, &task, actor);

    Ok(Comment {
        id,
        task_id: task.id,
        author_id: actor,
        content: content.to_string(),
        created_at: now,
    })
}

pub fn delete_task(db: &Database, actor: i64, task_id: i64) -> Result<()> {
    let task = db
        .get_task(task_id)?
        .ok_or_else(|| Error::not_found("task"))?;

    auth::require_task_delete(db, &task, actor)?;

    // Notifications, comments, and history ride out with the task row via
    // the store's cascade edges, so nothing is left orphaned.
    db.delete_task(task.id)?;
    Ok(())
}

/// Task detail with the sprint reference resolved live against the sprint
/// table, and comments/history newest-first.
pub fn task_detail(db: &Database, task_id: i64) -> Result<TaskDetail> {
    let task = db
        .get_task(task_id)?
        .ok_or_else(|| Error::not_found("task"))?;

    let sprint = match task.sprint_id {
        Some(id) => db.get_sprint(id)?.map(|s| SprintRef {
            id: s.id,
            name: s.name,
        }),
        None => None,
    };

    let comments = db.comments_for_task(task.id)?;
    let history = db.history_for_task(task.id)?;

    Ok(TaskDetail {
        task,
        sprint,
        comments,
        history,
    })
}

pub fn tasks_by_project(db: &Database, project_id: i64) -> Result<Vec<Task>> {
    if db.get_project(project_id)?.is_none() {
        return Err(Error::not_found("project"));
    }
    db.tasks_by_project(project_id)
}

pub fn tasks_by_sprint(db: &Database, sprint_id: i64) -> Result<Vec<Task>> {
    if db.get_sprint(sprint_id)?.is_none() {
        return Err(Error::not_found("sprint"));
    }
    db.tasks_by_sprint(sprint_id)
}

pub fn tasks_by_assignee(db: &Database, user_id: i64) -> Result<Vec<Task>> {
    db.tasks_by_assignee(user_id)
}

fn normalize(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_id(raw: &str, field: &str) -> Result<i64> {
    raw.trim()
        .parse()
        .map_err(|_| Error::invalid(format!("malformed {field} '{}'", raw.trim())))
}

/// Dates arrive either as a bare calendar date or a full RFC3339 timestamp;
/// a bare date lands on UTC midnight of that day.
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| Error::invalid(format!("malformed date '{raw}'")))?;
        return Ok(DateTime::from_naive_utc_and_offset(midnight, Utc));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| Error::invalid(format!("malformed date '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationType;
    use proptest::prelude::*;
    use tempfile::tempdir;

    struct Fixture {
        db: Database,
        _dir: tempfile::TempDir,
        owner: i64,
        assignee: i64,
        project: i64,
        sprint: i64,
    }

    fn setup() -> Fixture {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        let owner = db.upsert_user("Ana", "ana@example.com").unwrap();
        let assignee = db.upsert_user("Bob", "bob@example.com").unwrap();
        let ws = db.insert_workspace("Acme", None, owner).unwrap();
        let project = db.insert_project(ws, "Alpha", None, owner).unwrap();
        let sprint = db
            .insert_sprint(project, "Sprint 1", Utc::now(), Utc::now())
            .unwrap();
        Fixture {
            db,
            _dir: dir,
            owner,
            assignee,
            project,
            sprint,
        }
    }

    fn create_input(f: &Fixture, title: &str, sprint_id: Option<i64>) -> CreateTask {
        CreateTask {
            project_id: f.project,
            title: title.to_string(),
            description: None,
            priority: Priority::Medium,
            status: TaskStatus::Pending,
            due_date: None,
            assignee_id: f.assignee,
            sprint_id,
        }
    }

    // ==================== Create ====================

    #[test]
    fn test_create_task() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();
        assert_eq!(task.title, "Fix bug");
        assert_eq!(task.owner_id, f.owner);
        assert_eq!(task.assignee_id, f.assignee);
        assert!(f.db.history_for_task(task.id).unwrap().is_empty());
        assert!(f.db.comments_for_task(task.id).unwrap().is_empty());
    }

    #[test]
    fn test_create_duplicate_title_same_scope_conflicts() {
        let f = setup();
        create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();
        let err = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_create_duplicate_title_different_sprint_ok() {
        let f = setup();
        create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();
        let in_sprint =
            create_task(&f.db, f.owner, create_input(&f, "Fix bug", Some(f.sprint))).unwrap();
        assert_eq!(in_sprint.sprint_id, Some(f.sprint));
    }

    #[test]
    fn test_create_missing_project() {
        let f = setup();
        let mut input = create_input(&f, "Fix bug", None);
        input.project_id = 9999;
        let err = create_task(&f.db, f.owner, input).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_create_missing_assignee() {
        let f = setup();
        let mut input = create_input(&f, "Fix bug", None);
        input.assignee_id = 9999;
        let err = create_task(&f.db, f.owner, input).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_create_sprint_from_other_project_rejected() {
        let f = setup();
        let other_project = f
            .db
            .insert_project(
                f.db.get_project(f.project).unwrap().unwrap().workspace_id,
                "Beta",
                None,
                f.owner,
            )
            .unwrap();
        let foreign_sprint = f
            .db
            .insert_sprint(other_project, "S1", Utc::now(), Utc::now())
            .unwrap();

        let err = create_task(
            &f.db,
            f.owner,
            create_input(&f, "Fix bug", Some(foreign_sprint)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_create_emits_created_and_assigned() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();

        let owner_inbox = f.db.notifications_for_user(f.owner).unwrap();
        let assignee_inbox = f.db.notifications_for_user(f.assignee).unwrap();
        assert_eq!(owner_inbox.len(), 1);
        assert_eq!(owner_inbox[0].kind, NotificationType::TaskCreated);
        assert_eq!(owner_inbox[0].task_id, task.id);
        assert_eq!(assignee_inbox.len(), 1);
        assert_eq!(assignee_inbox[0].kind, NotificationType::TaskAssigned);
    }

    // ==================== Update ====================

    #[test]
    fn test_update_single_field_appends_one_entry() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();

        let outcome = update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                title: Some("Fix crash".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(outcome.changed, vec!["title"]);
        let history = f.db.history_for_task(task.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].field, "title");
        assert_eq!(history[0].old_value.as_deref(), Some("Fix bug"));
        assert_eq!(history[0].new_value.as_deref(), Some("Fix crash"));
        assert_eq!(history[0].updated_by, f.owner);
    }

    #[test]
    fn test_update_three_fields_shares_instant() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();

        let outcome = update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                title: Some("Fix crash".to_string()),
                priority: Some("high".to_string()),
                status: Some("in-progress".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(outcome.changed.len(), 3);
        let history = f.db.history_for_task(task.id).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|h| h.updated_at == history[0].updated_at));
    }

    #[test]
    fn test_update_to_same_value_is_noop() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();

        let outcome = update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                title: Some("Fix bug".to_string()),
                priority: Some("medium".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(outcome.changed.is_empty());
        assert!(f.db.history_for_task(task.id).unwrap().is_empty());
        // create emitted two; a no-op update must not add more
        let total: usize = [f.owner, f.assignee]
            .iter()
            .map(|u| f.db.notifications_for_user(*u).unwrap().len())
            .sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_update_empty_patch_is_noop() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();
        let before = f.db.get_task(task.id).unwrap().unwrap();

        let outcome = update_task(&f.db, f.owner, task.id, &TaskPatch::default()).unwrap();

        assert!(outcome.changed.is_empty());
        let after = f.db.get_task(task.id).unwrap().unwrap();
        assert_eq!(before.updated_at, after.updated_at);
    }

    #[test]
    fn test_update_empty_string_clears_description() {
        let f = setup();
        let mut input = create_input(&f, "Fix bug", None);
        input.description = Some("old text".to_string());
        let task = create_task(&f.db, f.owner, input).unwrap();

        let outcome = update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                description: Some(String::new()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(outcome.changed, vec!["description"]);
        assert_eq!(outcome.task.description, None);
        let history = f.db.history_for_task(task.id).unwrap();
        assert_eq!(history[0].old_value.as_deref(), Some("old text"));
        assert_eq!(history[0].new_value, None);
    }

    #[test]
    fn test_update_due_date_same_day_different_format_is_noop() {
        let f = setup();
        let mut input = create_input(&f, "Fix bug", None);
        input.due_date = Some(
            DateTime::parse_from_rfc3339("2026-09-15T08:30:00+00:00")
                .unwrap()
                .with_timezone(&Utc),
        );
        let task = create_task(&f.db, f.owner, input).unwrap();

        let outcome = update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                due_date: Some("2026-09-15T17:45:00+07:00".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(outcome.changed.is_empty());

        let outcome = update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                due_date: Some("2026-09-16".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(outcome.changed, vec!["due_date"]);
    }

    #[test]
    fn test_update_completion_edge_emits_completed() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();

        update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                status: Some("completed".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let owner_inbox = f.db.notifications_for_user(f.owner).unwrap();
        assert_eq!(owner_inbox[0].kind, NotificationType::TaskCompleted);
        let assignee_inbox = f.db.notifications_for_user(f.assignee).unwrap();
        assert_eq!(assignee_inbox[0].kind, NotificationType::TaskCompleted);
    }

    #[test]
    fn test_update_completed_to_completed_emits_nothing() {
        let f = setup();
        let mut input = create_input(&f, "Fix bug", None);
        input.status = TaskStatus::Completed;
        let task = create_task(&f.db, f.owner, input).unwrap();
        let before = f.db.notifications_for_user(f.owner).unwrap().len();

        let outcome = update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                status: Some("completed".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(outcome.changed.is_empty());
        assert_eq!(f.db.notifications_for_user(f.owner).unwrap().len(), before);
    }

    #[test]
    fn test_update_priority_only_emits_updated() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();

        update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                priority: Some("high".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let owner_inbox = f.db.notifications_for_user(f.owner).unwrap();
        assert_eq!(owner_inbox[0].kind, NotificationType::TaskUpdated);
    }

    #[test]
    fn test_update_leaving_completed_emits_updated() {
        let f = setup();
        let mut input = create_input(&f, "Fix bug", None);
        input.status = TaskStatus::Completed;
        let task = create_task(&f.db, f.owner, input).unwrap();

        update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                status: Some("pending".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let owner_inbox = f.db.notifications_for_user(f.owner).unwrap();
        assert_eq!(owner_inbox[0].kind, NotificationType::TaskUpdated);
    }

    #[test]
    fn test_update_invalid_priority() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();

        let err = update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                priority: Some("urgent".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_update_malformed_assignee_id() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();

        let err = update_task(
            &f.db,
            f.owner,
            task.id,
            &TaskPatch {
                assignee_id: Some("not-a-number".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_update_move_into_occupied_scope_conflicts() {
        let f = setup();
        create_task(&f.db, f.owner, create_input(&f, "Fix bug", Some(f.sprint))).unwrap();
        let loose = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();

        let err = update_task(
            &f.db,
            f.owner,
            loose.id,
            &TaskPatch {
                sprint_id: Some(f.sprint.to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_update_missing_task() {
        let f = setup();
        let err = update_task(
            &f.db,
            f.owner,
            9999,
            &TaskPatch {
                title: Some("x".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    // ==================== Comments ====================

    #[test]
    fn test_comment_appends_synthetic_history() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();

        let comment = add_comment(&f.db, f.assignee, task.id, "looks done to me").unwrap();
        assert_eq!(comment.author_id, f.assignee);

        let history = f.db.history_for_task(task.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].field, "comments");
        assert_eq!(history[0].old_value, None);
        assert_eq!(history[0].new_value.as_deref(), Some("looks done to me"));
    }

    #[test]
    fn test_comment_by_third_party_notifies_owner_and_assignee() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();
        let third = f.db.upsert_user("Cleo", "cleo@example.com").unwrap();
        let owner_before = f.db.notifications_for_user(f.owner).unwrap().len();
        let assignee_before = f.db.notifications_for_user(f.assignee).unwrap().len();

        add_comment(&f.db, third, task.id, "ping").unwrap();

        assert_eq!(
            f.db.notifications_for_user(f.owner).unwrap().len(),
            owner_before + 1
        );
        assert_eq!(
            f.db.notifications_for_user(f.assignee).unwrap().len(),
            assignee_before + 1
        );
        assert!(f.db.notifications_for_user(third).unwrap().is_empty());
    }

    #[test]
    fn test_comment_empty_content_rejected() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();
        let err = add_comment(&f.db, f.owner, task.id, "   ").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    // ==================== Delete ====================

    #[test]
    fn test_delete_by_owner_removes_notifications() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();
        assert!(!f.db.notifications_for_task(task.id).unwrap().is_empty());

        delete_task(&f.db, f.owner, task.id).unwrap();

        assert!(f.db.get_task(task.id).unwrap().is_none());
        assert!(f.db.notifications_for_task(task.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_by_developer_forbidden() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();
        // assignee is not a project member at all, let alone a manager
        let err = delete_task(&f.db, f.assignee, task.id).unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert!(f.db.get_task(task.id).unwrap().is_some());
    }

    #[test]
    fn test_delete_by_manager_allowed() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", None)).unwrap();
        let manager = f.db.upsert_user("Mia", "mia@example.com").unwrap();
        f.db.add_project_member(f.project, manager, crate::models::ProjectRole::Manager)
            .unwrap();

        delete_task(&f.db, manager, task.id).unwrap();
        assert!(f.db.get_task(task.id).unwrap().is_none());
    }

    // ==================== Queries ====================

    #[test]
    fn test_detail_resolves_sprint_and_sorts_newest_first() {
        let f = setup();
        let task = create_task(&f.db, f.owner, create_input(&f, "Fix bug", Some(f.sprint))).unwrap();

        add_comment(&f.db, f.owner, task.id, "first").unwrap();
        add_comment(&f.db, f.owner, task.id, "second").unwrap();

        let detail = task_detail(&f.db, task.id).unwrap();
        assert_eq!(detail.sprint.as_ref().unwrap().name, "Sprint 1");
        assert_eq!(detail.comments.len(), 2);
        assert_eq!(detail.comments[0].content, "second");
        assert_eq!(detail.history.len(), 2);
        assert_eq!(detail.history[0].new_value.as_deref(), Some("second"));
    }

    #[test]
    fn test_queries_by_scope() {
        let f = setup();
        let in_sprint =
            create_task(&f.db, f.owner, create_input(&f, "A", Some(f.sprint))).unwrap();
        create_task(&f.db, f.owner, create_input(&f, "B", None)).unwrap();

        assert_eq!(tasks_by_project(&f.db, f.project).unwrap().len(), 2);
        let sprint_tasks = tasks_by_sprint(&f.db, f.sprint).unwrap();
        assert_eq!(sprint_tasks.len(), 1);
        assert_eq!(sprint_tasks[0].id, in_sprint.id);
        assert_eq!(tasks_by_assignee(&f.db, f.assignee).unwrap().len(), 2);
        assert!(tasks_by_assignee(&f.db, f.owner).unwrap().is_empty());
    }

    // ==================== Properties ====================

    proptest! {
        #[test]
        fn prop_history_count_matches_changed_fields(
            title in "[a-zA-Z0-9][a-zA-Z0-9 ]{0,29}",
            new_title in "[a-zA-Z0-9][a-zA-Z0-9 ]{0,29}"
        ) {
            let f = setup();
            let task = create_task(&f.db, f.owner, create_input(&f, &title, None)).unwrap();

            let outcome = update_task(&f.db, f.owner, task.id, &TaskPatch {
                title: Some(new_title.clone()),
                ..Default::default()
            }).unwrap();

            let expected = usize::from(title.trim() != new_title.trim());
            prop_assert_eq!(outcome.changed.len(), expected);
            prop_assert_eq!(f.db.history_for_task(task.id).unwrap().len(), expected);
        }

        #[test]
        fn prop_duplicate_title_in_scope_conflicts(title in "[a-zA-Z0-9]{1,20}") {
            let f = setup();
            create_task(&f.db, f.owner, create_input(&f, &title, None)).unwrap();
            let result = create_task(&f.db, f.owner, create_input(&f, &title, None));
            prop_assert!(matches!(result, Err(Error::Conflict(_))));
        }
    }
}
