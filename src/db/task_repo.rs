use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, TgError};
use crate::id::TaskId;
use crate::types::{ListTasksFilter, Recurrence, Task};

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn ts(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|dt| dt.to_rfc3339())
}

fn recurrence_from_row(row: &Row) -> rusqlite::Result<Option<Recurrence>> {
    let Some(raw) = row.get::<_, Option<String>>("recurrence")? else {
        return Ok(None);
    };
    serde_json::from_str(&raw).map(Some).map_err(|e| {
        let idx = row.as_ref().column_index("recurrence").unwrap_or(0);
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

fn recurrence_to_sql(recurrence: Option<&Recurrence>) -> Result<Option<String>> {
    Ok(recurrence.map(serde_json::to_string).transpose()?)
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        parent_id: row.get("parent_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: row.get("status")?,
        priority: row.get("priority")?,
        due_at: parse_ts(row.get("due_at")?),
        estimated_duration_minutes: row.get("estimated_duration_minutes")?,
        allow_parent_auto_complete: row.get::<_, i32>("allow_parent_auto_complete")? != 0,
        scheduled_start: parse_ts(row.get("scheduled_start")?),
        scheduled_end: parse_ts(row.get("scheduled_end")?),
        recurrence: recurrence_from_row(row)?,
        completed_at: parse_ts(row.get("completed_at")?),
        created_at: parse_ts(row.get("created_at")?).unwrap_or_else(Utc::now),
        updated_at: parse_ts(row.get("updated_at")?).unwrap_or_else(Utc::now),
        version: row.get("version")?,
        blocked_by: Vec::new(),
        blocks: Vec::new(),
    })
}

fn with_edges(conn: &Connection, mut tasks: Vec<Task>) -> Result<Vec<Task>> {
    for task in &mut tasks {
        task.blocked_by = get_blockers(conn, &task.id)?;
        task.blocks = get_dependents(conn, &task.id)?;
    }
    Ok(tasks)
}

pub fn insert_task(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tasks (
            id, parent_id, title, description, status, priority, due_at,
            estimated_duration_minutes, allow_parent_auto_complete, scheduled_start,
            scheduled_end, recurrence, completed_at, created_at, updated_at, version
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        "#,
        params![
            &task.id,
            task.parent_id.as_ref(),
            task.title,
            task.description,
            task.status,
            task.priority,
            ts(task.due_at),
            task.estimated_duration_minutes,
            task.allow_parent_auto_complete as i32,
            ts(task.scheduled_start),
            ts(task.scheduled_end),
            recurrence_to_sql(task.recurrence.as_ref())?,
            ts(task.completed_at),
            task.created_at.to_rfc3339(),
            task.updated_at.to_rfc3339(),
            task.version,
        ],
    )?;
    Ok(())
}

pub fn get_task(conn: &Connection, id: &TaskId) -> Result<Option<Task>> {
    let task: Option<Task> = conn
        .query_row("SELECT * FROM tasks WHERE id = ?1", params![id], row_to_task)
        .optional()?;

    match task {
        Some(task) => Ok(with_edges(conn, vec![task])?.pop()),
        None => Ok(None),
    }
}

pub fn task_exists(conn: &Connection, id: &TaskId) -> Result<bool> {
    let count: i32 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Ids this task depends on.
pub fn get_blockers(conn: &Connection, task_id: &TaskId) -> Result<Vec<TaskId>> {
    let mut stmt = conn.prepare(
        "SELECT depends_on_id FROM task_dependencies WHERE task_id = ?1 ORDER BY depends_on_id",
    )?;
    let ids = stmt
        .query_map(params![task_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<TaskId>>>()?;
    Ok(ids)
}

/// Ids of tasks that depend on this one.
pub fn get_dependents(conn: &Connection, blocker_id: &TaskId) -> Result<Vec<TaskId>> {
    let mut stmt = conn.prepare(
        "SELECT task_id FROM task_dependencies WHERE depends_on_id = ?1 ORDER BY task_id",
    )?;
    let ids = stmt
        .query_map(params![blocker_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<TaskId>>>()?;
    Ok(ids)
}

/// Children ordered by priority DESC, created_at ASC, id ASC
pub fn get_children(conn: &Connection, parent_id: &TaskId) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT * FROM tasks WHERE parent_id = ?1
        ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END,
                 created_at ASC, id ASC
        "#,
    )?;
    let tasks = stmt
        .query_map(params![parent_id], row_to_task)?
        .collect::<rusqlite::Result<Vec<Task>>>()?;
    with_edges(conn, tasks)
}

pub fn list_tasks(conn: &Connection, filter: &ListTasksFilter) -> Result<Vec<Task>> {
    let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref parent_id) = filter.parent_id {
        sql.push_str(" AND parent_id = ?");
        params_vec.push(Box::new(parent_id.clone()));
    } else if filter.roots_only {
        sql.push_str(" AND parent_id IS NULL");
    }

    if let Some(status) = filter.status {
        sql.push_str(" AND status = ?");
        params_vec.push(Box::new(status));
    }

    if let Some(priority) = filter.priority {
        sql.push_str(" AND priority = ?");
        params_vec.push(Box::new(priority));
    }

    sql.push_str(
        " ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END, created_at ASC, id ASC",
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let tasks = stmt
        .query_map(params_refs.as_slice(), row_to_task)?
        .collect::<rusqlite::Result<Vec<Task>>>()?;
    with_edges(conn, tasks)
}

/// Write every mutable column, guarded by the version the caller read.
/// Returns the task with its bumped version.
pub fn save_task(conn: &Connection, task: &Task) -> Result<Task> {
    let changed = conn.execute(
        r#"
        UPDATE tasks SET
            parent_id = ?1, title = ?2, description = ?3, status = ?4, priority = ?5,
            due_at = ?6, estimated_duration_minutes = ?7, allow_parent_auto_complete = ?8,
            scheduled_start = ?9, scheduled_end = ?10, recurrence = ?11, completed_at = ?12,
            updated_at = ?13, version = version + 1
        WHERE id = ?14 AND version = ?15
        "#,
        params![
            task.parent_id.as_ref(),
            task.title,
            task.description,
            task.status,
            task.priority,
            ts(task.due_at),
            task.estimated_duration_minutes,
            task.allow_parent_auto_complete as i32,
            ts(task.scheduled_start),
            ts(task.scheduled_end),
            recurrence_to_sql(task.recurrence.as_ref())?,
            ts(task.completed_at),
            task.updated_at.to_rfc3339(),
            &task.id,
            task.version,
        ],
    )?;

    if changed == 0 {
        if task_exists(conn, &task.id)? {
            return Err(TgError::Conflict(task.id.clone()));
        }
        return Err(TgError::TaskNotFound(task.id.clone()));
    }

    let mut saved = task.clone();
    saved.version += 1;
    Ok(saved)
}

/// Delete the row; dependency edges in both directions go with it.
pub fn delete_task(conn: &Connection, id: &TaskId) -> Result<()> {
    conn.execute(
        "DELETE FROM task_dependencies WHERE task_id = ?1 OR depends_on_id = ?1",
        params![id],
    )?;
    conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn add_dependency(conn: &Connection, task_id: &TaskId, depends_on: &TaskId) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?1, ?2)",
        params![task_id, depends_on],
    )?;
    Ok(())
}

pub fn remove_dependency(conn: &Connection, task_id: &TaskId, depends_on: &TaskId) -> Result<()> {
    conn.execute(
        "DELETE FROM task_dependencies WHERE task_id = ?1 AND depends_on_id = ?2",
        params![task_id, depends_on],
    )?;
    Ok(())
}

pub fn set_dependencies(conn: &Connection, task_id: &TaskId, depends_on: &[TaskId]) -> Result<()> {
    conn.execute(
        "DELETE FROM task_dependencies WHERE task_id = ?1",
        params![task_id],
    )?;
    for blocker in depends_on {
        add_dependency(conn, task_id, blocker)?;
    }
    Ok(())
}
