use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

const SCHEMA_VERSION: i32 = 1;

/// How long a connection waits on another writer's lock before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current_version == 0 {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY CHECK (id LIKE 'task_%'),
                parent_id TEXT REFERENCES tasks(id) ON DELETE RESTRICT CHECK (parent_id LIKE 'task_%'),
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'todo'
                    CHECK (status IN ('todo', 'in_progress', 'blocked', 'completed', 'canceled')),
                priority TEXT NOT NULL DEFAULT 'medium'
                    CHECK (priority IN ('low', 'medium', 'high')),
                due_at TEXT,
                estimated_duration_minutes INTEGER CHECK (estimated_duration_minutes >= 0),
                allow_parent_auto_complete INTEGER NOT NULL DEFAULT 1,
                scheduled_start TEXT,
                scheduled_end TEXT,
                recurrence TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS task_dependencies (
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE CHECK (task_id LIKE 'task_%'),
                depends_on_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE CHECK (depends_on_id LIKE 'task_%'),
                PRIMARY KEY (task_id, depends_on_id),
                CHECK (task_id <> depends_on_id)
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON task_dependencies(depends_on_id);

            PRAGMA journal_mode = WAL;
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }

    Ok(())
}

pub fn open_db(path: &std::path::Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    init_schema(&conn)?;
    Ok(conn)
}

/// In-memory database with the schema applied.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    init_schema(&conn)?;
    Ok(conn)
}
