use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use rusqlite::Connection;

use crate::config::EngineConfig;
use crate::core::TaskService;
use crate::error::Result;
use crate::id::TaskId;
use crate::types::{
    CompletionMode, CompletionOutcome, CreateTaskInput, ListTasksFilter, Priority, Recurrence,
    RecurrenceKind, Task, TaskStatus, TaskTree, UpdateTaskInput,
};

/// Parse TaskId from CLI string (requires prefix)
pub(crate) fn parse_task_id(s: &str) -> std::result::Result<TaskId, String> {
    s.parse().map_err(|e| format!("{e}"))
}

#[derive(Subcommand, Clone)]
pub enum TaskCommand {
    Create(CreateArgs),
    Get {
        #[arg(value_parser = parse_task_id)]
        id: TaskId,
    },
    List(ListArgs),
    Update(UpdateArgs),
    Delete {
        #[arg(value_parser = parse_task_id)]
        id: TaskId,
    },
    /// Create a task under an existing parent
    Subtask(SubtaskArgs),
    Complete(CompleteArgs),
    Reopen(ReopenArgs),
    Cancel {
        #[arg(value_parser = parse_task_id)]
        id: TaskId,
    },
    Tree(TreeArgs),
}

/// Repeat options shared by create and update.
#[derive(Args, Clone, Default)]
pub struct RecurrenceArgs {
    /// daily, weekly, monthly, yearly or custom
    #[arg(long)]
    pub repeat: Option<RecurrenceKind>,

    /// Units between occurrences
    #[arg(long, default_value_t = 1, requires = "repeat")]
    pub every: u32,

    /// First occurrence (RFC 3339, default: due date or now)
    #[arg(long, requires = "repeat")]
    pub repeat_start: Option<DateTime<Utc>>,

    /// No instances after this date (RFC 3339)
    #[arg(long, requires = "repeat")]
    pub repeat_until: Option<DateTime<Utc>>,
}

impl RecurrenceArgs {
    fn pattern(&self, fallback_start: Option<DateTime<Utc>>) -> Option<Recurrence> {
        let kind = self.repeat?;
        Some(Recurrence {
            kind,
            interval: self.every,
            start_date: self
                .repeat_start
                .or(fallback_start)
                .unwrap_or_else(Utc::now),
            end_date: self.repeat_until,
        })
    }
}

#[derive(Args, Clone)]
pub struct CreateArgs {
    pub title: String,

    #[arg(short = 'd', long)]
    pub description: Option<String>,

    #[arg(long, value_parser = parse_task_id)]
    pub parent: Option<TaskId>,

    /// low, medium or high
    #[arg(short, long)]
    pub priority: Option<Priority>,

    #[arg(long)]
    pub status: Option<TaskStatus>,

    /// Due date (RFC 3339)
    #[arg(long)]
    pub due: Option<DateTime<Utc>>,

    /// Estimated duration in minutes
    #[arg(long)]
    pub estimate: Option<i64>,

    #[arg(long)]
    pub scheduled_start: Option<DateTime<Utc>>,

    #[arg(long)]
    pub scheduled_end: Option<DateTime<Utc>>,

    /// Keep the parent open when this task completes
    #[arg(long)]
    pub no_parent_auto_complete: bool,

    #[arg(long = "blocked-by", value_delimiter = ',', value_parser = parse_task_id)]
    pub blocked_by: Vec<TaskId>,

    #[command(flatten)]
    pub recurrence: RecurrenceArgs,
}

impl CreateArgs {
    fn into_input(self) -> CreateTaskInput {
        let recurrence = self
            .recurrence
            .pattern(self.scheduled_start.or(self.due));
        CreateTaskInput {
            title: self.title,
            description: self.description,
            status: self.status,
            priority: self.priority,
            due_at: self.due,
            estimated_duration_minutes: self.estimate,
            allow_parent_auto_complete: self.no_parent_auto_complete.then_some(false),
            parent_id: self.parent,
            scheduled_start: self.scheduled_start,
            scheduled_end: self.scheduled_end,
            recurrence,
            blocked_by: self.blocked_by,
        }
    }
}

#[derive(Args, Clone)]
pub struct SubtaskArgs {
    #[arg(value_parser = parse_task_id)]
    pub parent: TaskId,

    #[command(flatten)]
    pub task: CreateArgs,
}

#[derive(Args, Clone)]
pub struct ListArgs {
    #[arg(long, value_parser = parse_task_id, conflicts_with = "roots")]
    pub parent: Option<TaskId>,

    #[arg(long)]
    pub status: Option<TaskStatus>,

    #[arg(short, long)]
    pub priority: Option<Priority>,

    /// Only tasks without a parent
    #[arg(long)]
    pub roots: bool,
}

#[derive(Args, Clone)]
pub struct UpdateArgs {
    #[arg(value_parser = parse_task_id)]
    pub id: TaskId,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(short = 'd', long)]
    pub description: Option<String>,

    #[arg(long)]
    pub status: Option<TaskStatus>,

    #[arg(short, long)]
    pub priority: Option<Priority>,

    #[arg(long)]
    pub due: Option<DateTime<Utc>>,

    #[arg(long)]
    pub estimate: Option<i64>,

    #[arg(long)]
    pub scheduled_start: Option<DateTime<Utc>>,

    #[arg(long)]
    pub scheduled_end: Option<DateTime<Utc>>,

    #[arg(long)]
    pub parent_auto_complete: Option<bool>,

    #[arg(long, value_parser = parse_task_id, conflicts_with = "detach")]
    pub parent: Option<TaskId>,

    /// Make the task a root task
    #[arg(long)]
    pub detach: bool,

    #[command(flatten)]
    pub recurrence: RecurrenceArgs,

    /// Remove the recurrence pattern
    #[arg(long, conflicts_with = "repeat")]
    pub no_repeat: bool,
}

impl UpdateArgs {
    fn into_input(self) -> UpdateTaskInput {
        let recurrence = self
            .recurrence
            .pattern(self.scheduled_start.or(self.due));
        UpdateTaskInput {
            title: self.title,
            description: self.description,
            status: self.status,
            priority: self.priority,
            due_at: self.due,
            estimated_duration_minutes: self.estimate,
            allow_parent_auto_complete: self.parent_auto_complete,
            parent_id: self.parent,
            detach_parent: self.detach,
            scheduled_start: self.scheduled_start,
            scheduled_end: self.scheduled_end,
            recurrence,
            clear_recurrence: self.no_repeat,
        }
    }
}

#[derive(Args, Clone)]
pub struct CompleteArgs {
    #[arg(value_parser = parse_task_id)]
    pub id: TaskId,

    /// Complete even if subtasks are still open (blockers still apply)
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Clone)]
pub struct ReopenArgs {
    #[arg(value_parser = parse_task_id)]
    pub id: TaskId,

    /// Reopen as in_progress instead of todo
    #[arg(long)]
    pub in_progress: bool,
}

#[derive(Args, Clone)]
pub struct TreeArgs {
    #[arg(value_parser = parse_task_id)]
    pub id: Option<TaskId>,
}

pub enum TaskResult {
    One(Task),
    Many(Vec<Task>),
    Deleted,
    Completion(CompletionOutcome),
    Tree(TaskTree),
    Trees(Vec<TaskTree>),
}

pub fn handle(conn: &Connection, config: EngineConfig, cmd: TaskCommand) -> Result<TaskResult> {
    let svc = TaskService::sqlite(conn, config);

    match cmd {
        TaskCommand::Create(args) => Ok(TaskResult::One(svc.create_task(&args.into_input())?)),

        TaskCommand::Get { id } => Ok(TaskResult::One(svc.get_task(&id)?)),

        TaskCommand::List(args) => {
            let filter = ListTasksFilter {
                parent_id: args.parent,
                status: args.status,
                priority: args.priority,
                roots_only: args.roots,
            };
            Ok(TaskResult::Many(svc.list_tasks(&filter)?))
        }

        TaskCommand::Update(args) => {
            let id = args.id.clone();
            Ok(TaskResult::One(svc.update_task(&id, &args.into_input())?))
        }

        TaskCommand::Delete { id } => {
            svc.delete_task(&id)?;
            Ok(TaskResult::Deleted)
        }

        TaskCommand::Subtask(args) => Ok(TaskResult::One(
            svc.add_subtask(&args.parent, &args.task.into_input())?,
        )),

        TaskCommand::Complete(args) => {
            let mode = if args.force {
                CompletionMode::ForceParentAutoComplete
            } else {
                CompletionMode::Normal
            };
            Ok(TaskResult::Completion(svc.complete_task(&args.id, mode)?))
        }

        TaskCommand::Reopen(args) => {
            let to = args.in_progress.then_some(TaskStatus::InProgress);
            Ok(TaskResult::One(svc.reopen_task(&args.id, to)?))
        }

        TaskCommand::Cancel { id } => Ok(TaskResult::Completion(svc.cancel_task(&id)?)),

        TaskCommand::Tree(args) => match args.id {
            Some(id) => Ok(TaskResult::Tree(svc.task_tree(&id)?)),
            None => {
                let roots = svc.list_tasks(&ListTasksFilter {
                    roots_only: true,
                    ..Default::default()
                })?;
                let trees = roots
                    .iter()
                    .map(|root| svc.task_tree(&root.id))
                    .collect::<Result<Vec<_>>>()?;
                Ok(TaskResult::Trees(trees))
            }
        },
    }
}
