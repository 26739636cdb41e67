//! Due-date sweep: scans open tasks due within the next 24 hours and raises
//! `task_due_soon` notifications once per (task, recipient). The recurring
//! worker owns its own store connection and an explicit start/stop lifecycle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Duration as TimeDelta, Utc};
use tracing::{error, info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::notify;

/// How far ahead of the due date a task counts as "due soon".
const DUE_SOON_WINDOW_HOURS: i64 = 24;

/// Hourly, matching the cadence the notification volume was tuned for.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// One sweep pass. Returns how many notifications were actually written;
/// zero qualifying tasks is a normal, silent outcome. A failed emit for one
/// recipient is logged and does not stop the rest of the pass.
pub fn run_once(db: &Database, now: DateTime<Utc>) -> Result<usize> {
    let until = now + TimeDelta::hours(DUE_SOON_WINDOW_HOURS);
    let tasks = db.tasks_due_within(now, until)?;

    let mut emitted = 0;
    for task in &tasks {
        match notify::emit_due_soon(db, task.owner_id, task, "Task due soon") {
            Ok(true) => emitted += 1,
            Ok(false) => {}
            Err(err) => warn!(task_id = task.id, %err, "due-soon notification failed"),
        }
        if task.assignee_id != task.owner_id {
            match notify::emit_due_soon(db, task.assignee_id, task, "Assigned task due soon") {
                Ok(true) => emitted += 1,
                Ok(false) => {}
                Err(err) => warn!(task_id = task.id, %err, "due-soon notification failed"),
            }
        }
    }
    Ok(emitted)
}

/// Recurring sweep worker. Runs on its own thread with its own database
/// connection; one failed pass is logged and the loop keeps going.
pub struct DueSoonSweeper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DueSoonSweeper {
    pub fn start(db_path: PathBuf, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let db = match Database::open(&db_path) {
                Ok(db) => db,
                Err(err) => {
                    error!(%err, "sweeper could not open the database, exiting");
                    return;
                }
            };

            while !flag.load(Ordering::Relaxed) {
                match run_once(&db, Utc::now()) {
                    Ok(emitted) => info!(emitted, "due-soon sweep finished"),
                    Err(err) => error!(%err, "due-soon sweep failed"),
                }

                // Sleep in short slices so stop() takes effect promptly.
                let mut remaining = interval;
                while !flag.load(Ordering::Relaxed) && remaining > Duration::ZERO {
                    let step = remaining.min(Duration::from_millis(200));
                    thread::sleep(step);
                    remaining = remaining.saturating_sub(step);
                }
            }
        });

        DueSoonSweeper {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DueSoonSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
