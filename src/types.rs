use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::id::TaskId;

pub const TITLE_MIN_CHARS: usize = 3;
pub const TITLE_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    /// Advisory: at least one blocker is unresolved
    Blocked,
    Completed,
    Canceled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Blocked,
        TaskStatus::Completed,
        TaskStatus::Canceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Canceled => "canceled",
        }
    }

    /// Completed and Canceled both satisfy a dependent's blocker check.
    pub fn is_resolved(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Canceled)
    }

    pub fn is_terminal(self) -> bool {
        self.is_resolved()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" | "inprogress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "completed" | "done" => Ok(TaskStatus::Completed),
            "canceled" | "cancelled" => Ok(TaskStatus::Canceled),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

// Status and priority are stored as their lowercase names.
macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

sql_text_enum!(TaskStatus);
sql_text_enum!(Priority);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// Unit supplied by an `IntervalResolver` or configuration
    Custom,
}

impl FromStr for RecurrenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(RecurrenceKind::Daily),
            "weekly" => Ok(RecurrenceKind::Weekly),
            "monthly" => Ok(RecurrenceKind::Monthly),
            "yearly" => Ok(RecurrenceKind::Yearly),
            "custom" => Ok(RecurrenceKind::Custom),
            other => Err(format!("unknown recurrence type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    #[serde(rename = "type")]
    pub kind: RecurrenceKind,
    pub interval: u32,
    pub start_date: DateTime<Utc>,
    /// Upper bound for spawned instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// task -> blocker
    Dependency,
    /// parent -> child
    Hierarchy,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Dependency => f.write_str("dependency"),
            EdgeKind::Hierarchy => f.write_str("hierarchy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Blockers and children must already be resolved
    #[default]
    Normal,
    /// Skips the children check; dependency blockers are still enforced
    ForceParentAutoComplete,
}

impl FromStr for CompletionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "normal" => Ok(CompletionMode::Normal),
            "force_parent_auto_complete" | "force" => Ok(CompletionMode::ForceParentAutoComplete),
            other => Err(format!("unknown completion mode '{other}'")),
        }
    }
}

impl fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionMode::Normal => f.write_str("normal"),
            CompletionMode::ForceParentAutoComplete => f.write_str("force_parent_auto_complete"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub parent_id: Option<TaskId>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_minutes: Option<i64>,
    pub allow_parent_auto_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped by every save
    pub version: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<TaskId>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateTaskInput {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub due_at: Option<DateTime<Utc>>,
    pub estimated_duration_minutes: Option<i64>,
    pub allow_parent_auto_complete: Option<bool>,
    pub parent_id: Option<TaskId>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    pub blocked_by: Vec<TaskId>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTaskInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub due_at: Option<DateTime<Utc>>,
    pub estimated_duration_minutes: Option<i64>,
    pub allow_parent_auto_complete: Option<bool>,
    pub parent_id: Option<TaskId>,
    /// Make the task a root; ignored when `parent_id` is set
    pub detach_parent: bool,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    pub clear_recurrence: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListTasksFilter {
    pub parent_id: Option<TaskId>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    /// Only tasks without a parent
    pub roots_only: bool,
}

/// One record of a bulk import. `key` is the batch-local name other records
/// use in `parent`/`dependencies`; it defaults to the array position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    #[serde(rename = "ref", default)]
    pub key: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_duration_minutes: Option<i64>,
    #[serde(default)]
    pub allow_parent_auto_complete: Option<bool>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ImportRecord {
    /// Field values of the record; references are resolved separately.
    pub fn to_input(&self) -> CreateTaskInput {
        CreateTaskInput {
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
            priority: self.priority,
            due_at: self.due_at,
            estimated_duration_minutes: self.estimated_duration_minutes,
            allow_parent_auto_complete: self.allow_parent_auto_complete,
            parent_id: None,
            scheduled_start: self.scheduled_start,
            scheduled_end: self.scheduled_end,
            recurrence: self.recurrence.clone(),
            blocked_by: Vec::new(),
        }
    }
}

/// `task` depends on `depends_on`; both are batch keys or stored task ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportEdge {
    pub task: String,
    pub depends_on: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub tasks: Vec<ImportRecord>,
    #[serde(default)]
    pub edges: Vec<ImportEdge>,
}

/// Result of a completion request, including everything the cascade touched.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub task: Task,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub auto_completed: Vec<TaskId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub spawned: Vec<Task>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskTree {
    pub task: Task,
    pub children: Vec<TaskTree>,
}
