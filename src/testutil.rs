//! Fixtures shared by unit tests.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::{schema, task_repo};
use crate::id::TaskId;
use crate::types::{Priority, Task, TaskStatus};

/// A Todo task with a fresh id and no edges.
pub fn task(title: &str) -> Task {
    let now = Utc::now();
    Task {
        id: TaskId::new(),
        parent_id: None,
        title: title.to_string(),
        description: None,
        status: TaskStatus::Todo,
        priority: Priority::Medium,
        due_at: None,
        estimated_duration_minutes: None,
        allow_parent_auto_complete: true,
        scheduled_start: None,
        scheduled_end: None,
        recurrence: None,
        completed_at: None,
        created_at: now,
        updated_at: now,
        version: 1,
        blocked_by: Vec::new(),
        blocks: Vec::new(),
    }
}

pub fn task_in(status: TaskStatus) -> Task {
    Task {
        status,
        ..task("Probe")
    }
}

pub fn memory_db() -> Connection {
    schema::open_in_memory().unwrap()
}

/// Insert a task straight into storage, bypassing the engine.
pub fn insert(conn: &Connection, title: &str, parent: Option<&TaskId>) -> TaskId {
    let task = Task {
        parent_id: parent.cloned(),
        ..task(title)
    };
    task_repo::insert_task(conn, &task).unwrap();
    task.id
}
