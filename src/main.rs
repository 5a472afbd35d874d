use std::io;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::EnvFilter;

use taskgraph::commands::{
    data, dep, task, DataCommand, DataResult, DepCommand, TaskCommand, TaskResult,
};
use taskgraph::config::{self, EngineConfig};
use taskgraph::db;
use taskgraph::error::{self, TgError};

mod output;

use output::Printer;

#[derive(Parser)]
#[command(name = "tg")]
#[command(version)]
#[command(
    about = "taskgraph - task hierarchy, dependencies and completion cascades",
    long_about = r#"
taskgraph (tg) - tasks with subtasks, blockers and recurrence.

Features:
  • Parent/subtask hierarchy with automatic parent completion
  • Dependencies with cycle detection across both graphs
  • Recurring tasks spawn their next instance on completion
  • All-or-nothing bulk import

Environment:
  TASKGRAPH_DB_PATH                 Override database location
  TASKGRAPH_AUTO_COMPLETE_PARENTS   Default for new tasks (true)
  TASKGRAPH_CUSTOM_RECURRENCE_UNIT  Unit for custom recurrence (day|week|month|year)
  TASKGRAPH_MAX_CASCADE_DEPTH       Parent cascade limit (64)
  TASKGRAPH_CONFLICT_RETRIES        Retries after a concurrent write (1)
  TASKGRAPH_LOG                     Log filter, e.g. taskgraph=debug (warn)
  NO_COLOR                          Disable colored output
"#
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output in JSON format (for programmatic use)
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Override database path (default: CWD/.taskgraph/tasks.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Command {
    /// Task management (CRUD, completion, hierarchy)
    #[command(subcommand)]
    Task(TaskCommand),

    /// Dependency edges between tasks
    #[command(subcommand)]
    Dep(DepCommand),

    /// Bulk import
    #[command(subcommand)]
    Data(DataCommand),

    /// Generate shell completions
    #[command(
        about = "Generate shell completions",
        long_about = r#"
Generate shell completions for tg CLI.

Examples:
  tg completions bash > ~/.local/share/bash-completion/completions/tg
  tg completions zsh > ~/.zfunc/_tg
  tg completions fish > ~/.config/fish/completions/tg.fish
"#
    )]
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },

    /// Initialize database
    #[command(
        about = "Initialize database",
        long_about = r#"
Initialize the taskgraph database.

The database is created at:
  1. --db (if given)
  2. TASKGRAPH_DB_PATH (if set)
  3. CWD/.taskgraph/tasks.db (fallback)

Usually runs automatically on first command.
"#
    )]
    Init,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(config::ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();

    // Shell scripts go straight to stdout, no database involved
    if let Command::Completions { shell } = &cli.command {
        generate(*shell, &mut Cli::command(), "tg", &mut io::stdout());
        return;
    }

    init_tracing();

    let db_path = cli.db.clone().unwrap_or_else(config::default_db_path);
    match run(cli.command.clone(), &db_path) {
        Ok(output) if cli.json => println!("{output}"),
        Ok(output) => Printer::new(cli.no_color).print(&cli.command, &output),
        Err(e) => {
            report(&e, cli.json, cli.no_color);
            std::process::exit(1);
        }
    }
}

fn report(e: &TgError, json: bool, no_color: bool) {
    tracing::debug!(error = ?e, "command failed");
    let kind = e.kind();
    if json {
        let body = serde_json::json!({
            "error": e.to_string(),
            "kind": format!("{kind:?}"),
            "status": kind.status_code(),
        });
        eprintln!("{body}");
    } else {
        Printer::new_for_stderr(no_color).print_error(&format!("Error: {e}"));
    }
}

fn pretty<T: serde::Serialize>(value: &T) -> error::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn run(command: Command, db_path: &Path) -> error::Result<String> {
    let conn = db::open_db(db_path)?;
    match command {
        Command::Init => Ok(serde_json::json!({ "initialized": true, "path": db_path }).to_string()),
        Command::Task(cmd) => match task::handle(&conn, EngineConfig::from_env()?, cmd)? {
            TaskResult::One(task) => pretty(&task),
            TaskResult::Many(tasks) => pretty(&tasks),
            TaskResult::Deleted => Ok(serde_json::json!({ "deleted": true }).to_string()),
            TaskResult::Completion(outcome) => pretty(&outcome),
            TaskResult::Tree(tree) => pretty(&tree),
            TaskResult::Trees(trees) => pretty(&trees),
        },
        Command::Dep(cmd) => pretty(&dep::handle(&conn, EngineConfig::from_env()?, cmd)?),
        Command::Data(cmd) => match data::handle(&conn, EngineConfig::from_env()?, cmd)? {
            DataResult::Imported(tasks) => pretty(&serde_json::json!({
                "imported": tasks.len(),
                "tasks": tasks,
            })),
        },
        Command::Completions { .. } => unreachable!("completions handled before run()"),
    }
}
