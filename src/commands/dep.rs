use clap::{Args, Subcommand};
use rusqlite::Connection;

use crate::commands::task::parse_task_id;
use crate::config::EngineConfig;
use crate::core::TaskService;
use crate::error::Result;
use crate::id::TaskId;
use crate::types::Task;

#[derive(Subcommand, Clone)]
pub enum DepCommand {
    /// Make a task wait for another
    Add(EdgeArgs),
    /// Drop one blocker from a task
    Remove(EdgeArgs),
    /// Replace every blocker of a task
    Set(SetArgs),
}

#[derive(Args, Clone)]
pub struct EdgeArgs {
    #[arg(value_parser = parse_task_id)]
    pub id: TaskId,

    /// The blocker
    #[arg(long, value_parser = parse_task_id)]
    pub on: TaskId,
}

#[derive(Args, Clone)]
pub struct SetArgs {
    #[arg(value_parser = parse_task_id)]
    pub id: TaskId,

    /// Comma-separated blockers; omit to clear
    #[arg(long, value_delimiter = ',', value_parser = parse_task_id)]
    pub on: Vec<TaskId>,
}

pub fn handle(conn: &Connection, config: EngineConfig, cmd: DepCommand) -> Result<Task> {
    let svc = TaskService::sqlite(conn, config);

    match cmd {
        DepCommand::Add(args) => svc.add_dependency(&args.id, &args.on),
        DepCommand::Remove(args) => svc.remove_dependency(&args.id, &args.on),
        DepCommand::Set(args) => svc.set_dependencies(&args.id, &args.on),
    }
}
