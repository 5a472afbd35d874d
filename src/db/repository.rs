//! Storage port used by the engine, with the SQLite implementation.

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::db::task_repo;
use crate::error::{Result, TgError};
use crate::id::TaskId;
use crate::types::{ListTasksFilter, Task};

/// Task storage. Implementations enforce nothing beyond storage; every domain
/// invariant is checked by the engine before a write is issued.
pub trait TaskRepository {
    fn get_by_id(&self, id: &TaskId) -> Result<Option<Task>>;

    fn get_children(&self, parent_id: &TaskId) -> Result<Vec<Task>>;

    /// Ids `task_id` depends on.
    fn get_blockers(&self, task_id: &TaskId) -> Result<Vec<TaskId>>;

    /// Ids that depend on `task_id`.
    fn get_dependents(&self, task_id: &TaskId) -> Result<Vec<TaskId>>;

    fn list(&self, filter: &ListTasksFilter) -> Result<Vec<Task>>;

    fn insert(&self, task: &Task) -> Result<()>;

    /// Version-checked update; fails with `Conflict` on a stale version.
    fn save(&self, task: &Task) -> Result<Task>;

    fn batch_save(&self, tasks: &[Task]) -> Result<Vec<Task>> {
        tasks.iter().map(|task| self.save(task)).collect()
    }

    /// Removes the task and every dependency edge touching it.
    fn delete(&self, id: &TaskId) -> Result<()>;

    fn add_blocker(&self, task_id: &TaskId, blocker_id: &TaskId) -> Result<()>;

    fn remove_blocker(&self, task_id: &TaskId, blocker_id: &TaskId) -> Result<()>;

    fn set_blockers(&self, task_id: &TaskId, blocker_ids: &[TaskId]) -> Result<()>;

    /// Run `f` as one unit: all of its writes commit, or none do.
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>;
}

pub struct SqliteTaskRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteTaskRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn get_by_id(&self, id: &TaskId) -> Result<Option<Task>> {
        task_repo::get_task(self.conn, id)
    }

    fn get_children(&self, parent_id: &TaskId) -> Result<Vec<Task>> {
        task_repo::get_children(self.conn, parent_id)
    }

    fn get_blockers(&self, task_id: &TaskId) -> Result<Vec<TaskId>> {
        task_repo::get_blockers(self.conn, task_id)
    }

    fn get_dependents(&self, task_id: &TaskId) -> Result<Vec<TaskId>> {
        task_repo::get_dependents(self.conn, task_id)
    }

    fn list(&self, filter: &ListTasksFilter) -> Result<Vec<Task>> {
        task_repo::list_tasks(self.conn, filter)
    }

    fn insert(&self, task: &Task) -> Result<()> {
        task_repo::insert_task(self.conn, task)
    }

    fn save(&self, task: &Task) -> Result<Task> {
        task_repo::save_task(self.conn, task)
    }

    fn delete(&self, id: &TaskId) -> Result<()> {
        task_repo::delete_task(self.conn, id)
    }

    fn add_blocker(&self, task_id: &TaskId, blocker_id: &TaskId) -> Result<()> {
        task_repo::add_dependency(self.conn, task_id, blocker_id)
    }

    fn remove_blocker(&self, task_id: &TaskId, blocker_id: &TaskId) -> Result<()> {
        task_repo::remove_dependency(self.conn, task_id, blocker_id)
    }

    fn set_blockers(&self, task_id: &TaskId, blocker_ids: &[TaskId]) -> Result<()> {
        task_repo::set_dependencies(self.conn, task_id, blocker_ids)
    }

    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        // IMMEDIATE takes the write lock up front so concurrent writers
        // queue instead of validating against the same snapshot. A writer
        // still waiting after the busy timeout gets StoreBusy.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(TgError::from_write_lock)?;
        let value = f()?;
        tx.commit().map_err(TgError::from_write_lock)?;
        Ok(value)
    }
}
