//! Notification dispatcher. Derives notification records from task mutation
//! outcomes and the due-date sweep. Fan-out writes are best-effort: a failed
//! notification insert is logged and swallowed, never failing the mutation
//! that triggered it.

use tracing::warn;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Notification, NotificationType, Task};

pub fn emit(
    db: &Database,
    recipient_id: i64,
    kind: NotificationType,
    title: &str,
    message: &str,
    task_id: i64,
) -> Result<i64> {
    Ok(db.insert_notification(recipient_id, kind, title, message, task_id)?)
}

fn emit_or_log(
    db: &Database,
    recipient_id: i64,
    kind: NotificationType,
    title: &str,
    message: &str,
    task_id: i64,
) {
    if let Err(err) = emit(db, recipient_id, kind, title, message, task_id) {
        warn!(
            recipient_id,
            task_id,
            kind = kind.as_str(),
            %err,
            "failed to write notification"
        );
    }
}

/// Fan-out for a freshly created task: the creator always hears about it,
/// and the assignee gets a separate assignment notice when distinct.
pub fn task_created(db: &Database, task: &Task) {
    emit_or_log(
        db,
        task.owner_id,
        NotificationType::TaskCreated,
        "Task created",
        &format!("You created task \"{}\"", task.title),
        task.id,
    );
    if task.assignee_id != task.owner_id {
        emit_or_log(
            db,
            task.assignee_id,
            NotificationType::TaskAssigned,
            "Task assigned",
            &format!("You have been assigned task \"{}\"", task.title),
            task.id,
        );
    }
}

/// Fan-out after an effective update: owner plus assignee when distinct.
pub fn task_updated(db: &Database, task: &Task) {
    let message = format!("Task \"{}\" was updated", task.title);
    emit_or_log(
        db,
        task.owner_id,
        NotificationType::TaskUpdated,
        "Task updated",
        &message,
        task.id,
    );
    if task.assignee_id != task.owner_id {
        emit_or_log(
            db,
            task.assignee_id,
            NotificationType::TaskUpdated,
            "Task updated",
            &message,
            task.id,
        );
    }
}

/// Fan-out for the one special status edge: entering `completed`.
pub fn task_completed(db: &Database, task: &Task) {
    let message = format!("Task \"{}\" was marked completed", task.title);
    emit_or_log(
        db,
        task.owner_id,
        NotificationType::TaskCompleted,
        "Task completed",
        &message,
        task.id,
    );
    if task.assignee_id != task.owner_id {
        emit_or_log(
            db,
            task.assignee_id,
            NotificationType::TaskCompleted,
            "Task completed",
            &message,
            task.id,
        );
    }
}

/// Comment fan-out: owner (unless they wrote it) and assignee (unless they
/// are the author or the owner). At most two recipients, never the author.
pub fn comment_added(db: &Database, task: &Task, author_id: i64) {
    let message = format!("New comment on task \"{}\"", task.title);
    if task.owner_id != author_id {
        emit_or_log(
            db,
            task.owner_id,
            NotificationType::CommentAdded,
            "New comment",
            &message,
            task.id,
        );
    }
    if task.assignee_id != author_id && task.assignee_id != task.owner_id {
        emit_or_log(
            db,
            task.assignee_id,
            NotificationType::CommentAdded,
            "New comment",
            &message,
            task.id,
        );
    }
}

/// Due-soon path. Unlike every other emit this one is idempotent per
/// (recipient, task): an existing due-soon record suppresses the insert.
/// Returns whether a notification was actually written.
pub fn emit_due_soon(db: &Database, recipient_id: i64, task: &Task, title: &str) -> Result<bool> {
    if db.due_soon_exists(recipient_id, task.id)? {
        return Ok(false);
    }
    let due = task
        .due_date
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "soon".to_string());
    emit(
        db,
        recipient_id,
        NotificationType::TaskDueSoon,
        title,
        &format!("Task \"{}\" is due at {}", task.title, due),
        task.id,
    )?;
    Ok(true)
}

pub fn mark_read(db: &Database, actor: i64, notification_id: i64) -> Result<()> {
    if db.mark_notification_read(notification_id, actor)? {
        Ok(())
    } else {
        Err(Error::not_found("notification"))
    }
}

/// Bulk-marks every unread notification of `actor`. Zero affected rows is a
/// normal outcome, not an error.
pub fn mark_all_read(db: &Database, actor: i64) -> Result<usize> {
    db.mark_all_read(actor)
}

pub fn list_for_user(db: &Database, actor: i64) -> Result<Vec<Notification>> {
    db.notifications_for_user(actor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewTask;
    use crate::models::{Priority, TaskStatus};
    use tempfile::tempdir;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        (db, dir)
    }

    fn seed_task(db: &Database, owner: i64, assignee: i64) -> Task {
        let ws = db.insert_workspace("Acme", None, owner).unwrap();
        let project = db.insert_project(ws, "Alpha", None, owner).unwrap();
        let task_id = db
            .insert_task(&NewTask {
                project_id: project,
                sprint_id: None,
                title: "Fix bug".to_string(),
                description: None,
                priority: Priority::Medium,
                status: TaskStatus::Pending,
                due_date: None,
                owner_id: owner,
                assignee_id: assignee,
            })
            .unwrap();
        db.get_task(task_id).unwrap().unwrap()
    }

    #[test]
    fn test_created_fanout_to_distinct_assignee() {
        let (db, _dir) = setup_test_db();
        let owner = db.upsert_user("Ana", "ana@example.com").unwrap();
        let assignee = db.upsert_user("Bob", "bob@example.com").unwrap();
        let task = seed_task(&db, owner, assignee);

        task_created(&db, &task);

        let owner_inbox = db.notifications_for_user(owner).unwrap();
        let assignee_inbox = db.notifications_for_user(assignee).unwrap();
        assert_eq!(owner_inbox.len(), 1);
        assert_eq!(owner_inbox[0].kind, NotificationType::TaskCreated);
        assert_eq!(assignee_inbox.len(), 1);
        assert_eq!(assignee_inbox[0].kind, NotificationType::TaskAssigned);
    }

    #[test]
    fn test_self_assigned_create_emits_once() {
        let (db, _dir) = setup_test_db();
        let owner = db.upsert_user("Ana", "ana@example.com").unwrap();
        let task = seed_task(&db, owner, owner);

        task_created(&db, &task);

        let inbox = db.notifications_for_user(owner).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationType::TaskCreated);
    }

    #[test]
    fn test_comment_fanout_skips_author() {
        let (db, _dir) = setup_test_db();
        let owner = db.upsert_user("Ana", "ana@example.com").unwrap();
        let assignee = db.upsert_user("Bob", "bob@example.com").unwrap();
        let author = db.upsert_user("Cleo", "cleo@example.com").unwrap();
        let task = seed_task(&db, owner, assignee);

        comment_added(&db, &task, author);

        assert_eq!(db.notifications_for_user(owner).unwrap().len(), 1);
        assert_eq!(db.notifications_for_user(assignee).unwrap().len(), 1);
        assert!(db.notifications_for_user(author).unwrap().is_empty());
    }

    #[test]
    fn test_due_soon_dedup() {
        let (db, _dir) = setup_test_db();
        let owner = db.upsert_user("Ana", "ana@example.com").unwrap();
        let task = seed_task(&db, owner, owner);

        assert!(emit_due_soon(&db, owner, &task, "Task due soon").unwrap());
        assert!(!emit_due_soon(&db, owner, &task, "Task due soon").unwrap());
        assert_eq!(db.notifications_for_user(owner).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_read_requires_ownership() {
        let (db, _dir) = setup_test_db();
        let owner = db.upsert_user("Ana", "ana@example.com").unwrap();
        let other = db.upsert_user("Bob", "bob@example.com").unwrap();
        let task = seed_task(&db, owner, owner);
        let id = emit(
            &db,
            owner,
            NotificationType::TaskUpdated,
            "Task updated",
            "msg",
            task.id,
        )
        .unwrap();

        let err = mark_read(&db, other, id).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        mark_read(&db, owner, id).unwrap();
        let inbox = db.notifications_for_user(owner).unwrap();
        assert!(inbox[0].is_read);
    }

    #[test]
    fn test_mark_all_read_counts() {
        let (db, _dir) = setup_test_db();
        let owner = db.upsert_user("Ana", "ana@example.com").unwrap();
        let task = seed_task(&db, owner, owner);
        for _ in 0..3 {
            emit(
                &db,
                owner,
                NotificationType::TaskUpdated,
                "Task updated",
                "msg",
                task.id,
            )
            .unwrap();
        }

        assert_eq!(mark_all_read(&db, owner).unwrap(), 3);
        assert_eq!(mark_all_read(&db, owner).unwrap(), 0);
    }

    #[test]
    fn test_list_newest_first() {
        let (db, _dir) = setup_test_db();
        let owner = db.upsert_user("Ana", "ana@example.com").unwrap();
        let task = seed_task(&db, owner, owner);
        for i in 0..3 {
            emit(
                &db,
                owner,
                NotificationType::TaskUpdated,
                "Task updated",
                &format!("msg {i}"),
                task.id,
            )
            .unwrap();
        }

        let inbox = list_for_user(&db, owner).unwrap();
        assert_eq!(inbox.len(), 3);
        assert_eq!(inbox[0].message, "msg 2");
        assert_eq!(inbox[2].message, "msg 0");
    }
}
