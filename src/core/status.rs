//! Status transitions for a single task.
//!
//! ```text
//! Todo | InProgress | Blocked  <-> Todo | InProgress | Blocked   (Update)
//! Todo | InProgress | Blocked  --> Completed                    (Complete)
//! Todo | InProgress | Blocked  --> Canceled                     (Cancel or Update)
//! Completed                    --> Todo | InProgress            (Reopen)
//! Canceled                     terminal
//! ```

use crate::error::{Result, TgError};
use crate::types::{Task, TaskStatus};

/// What is asking for the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Update,
    Complete,
    Reopen,
    Cancel,
}

pub fn check_transition(task: &Task, to: TaskStatus, trigger: Trigger) -> Result<()> {
    let from = task.status;
    let invalid = || TgError::InvalidTransition {
        task_id: task.id.clone(),
        from,
        to,
    };

    if trigger == Trigger::Reopen {
        if from != TaskStatus::Completed {
            return Err(TgError::CannotReopen {
                task_id: task.id.clone(),
                status: from,
            });
        }
        return match to {
            TaskStatus::Todo | TaskStatus::InProgress => Ok(()),
            _ => Err(invalid()),
        };
    }

    if from.is_terminal() {
        return Err(invalid());
    }

    match (to, trigger) {
        (TaskStatus::Completed, Trigger::Complete) => Ok(()),
        (TaskStatus::Completed, _) => Err(invalid()),
        (TaskStatus::Canceled, Trigger::Cancel | Trigger::Update) => Ok(()),
        (TaskStatus::Todo | TaskStatus::InProgress | TaskStatus::Blocked, Trigger::Update) => Ok(()),
        _ => Err(invalid()),
    }
}

/// Advisory Blocked bookkeeping: the status a task should move to given
/// whether it has an unresolved blocker, or `None` to leave it alone.
/// InProgress and terminal tasks are never touched.
pub fn advisory_status(current: TaskStatus, has_unresolved_blocker: bool) -> Option<TaskStatus> {
    match (current, has_unresolved_blocker) {
        (TaskStatus::Todo, true) => Some(TaskStatus::Blocked),
        (TaskStatus::Blocked, false) => Some(TaskStatus::Todo),
        _ => None,
    }
}
