use std::fs;
use std::path::{Path, PathBuf};

use clap::Subcommand;
use rusqlite::Connection;

use crate::config::EngineConfig;
use crate::core::TaskService;
use crate::error::Result;
use crate::types::{ImportBatch, Task};

#[derive(Subcommand, Clone)]
pub enum DataCommand {
    /// Create tasks and dependencies from a JSON file, all or nothing
    Import {
        /// File with `tasks` (each optionally carrying a `ref`) and `edges`
        file: PathBuf,
    },
}

pub enum DataResult {
    Imported(Vec<Task>),
}

pub fn handle(conn: &Connection, config: EngineConfig, cmd: DataCommand) -> Result<DataResult> {
    match cmd {
        DataCommand::Import { file } => import_data(conn, config, &file),
    }
}

pub(crate) fn import_data(conn: &Connection, config: EngineConfig, file: &Path) -> Result<DataResult> {
    let json = fs::read_to_string(file)?;
    let batch: ImportBatch = serde_json::from_str(&json)?;

    let svc = TaskService::sqlite(conn, config);
    let tasks = svc.bulk_import(&batch.tasks, &batch.edges)?;
    Ok(DataResult::Imported(tasks))
}
