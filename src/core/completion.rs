//! Completion, cancellation and the parent auto-complete cascade.
//!
//! The cascade is an iterative worklist: each task that resolves may queue
//! its parent in `ForceParentAutoComplete` mode once all of the parent's
//! children are resolved. A visited set keeps a task from being processed
//! twice and the configured depth limit bounds the chain. Recurrence
//! instances are spawned only after the whole cascade has been applied.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::core::graph::GraphIndex;
use crate::core::recurrence::RecurrenceEngine;
use crate::core::status::{advisory_status, check_transition, Trigger};
use crate::db::TaskRepository;
use crate::error::{Result, TgError};
use crate::id::TaskId;
use crate::types::{CompletionMode, CompletionOutcome, Task, TaskStatus};

pub struct Propagator<'a, 'r, R: TaskRepository> {
    graph: &'a mut GraphIndex<'r, R>,
    config: &'a EngineConfig,
    recurrence: &'a RecurrenceEngine,
}

impl<'a, 'r, R: TaskRepository> Propagator<'a, 'r, R> {
    pub fn new(
        graph: &'a mut GraphIndex<'r, R>,
        config: &'a EngineConfig,
        recurrence: &'a RecurrenceEngine,
    ) -> Self {
        Self {
            graph,
            config,
            recurrence,
        }
    }

    pub fn graph(&mut self) -> &mut GraphIndex<'r, R> {
        self.graph
    }

    /// A Completed task may only gain blockers that are already resolved.
    pub fn guard_new_blockers(&mut self, task: &Task, added: &[TaskId]) -> Result<()> {
        if task.status != TaskStatus::Completed {
            return Ok(());
        }
        let mut unresolved = Vec::new();
        for blocker in added {
            if !self.graph.task(blocker)?.status.is_resolved() {
                unresolved.push(blocker.clone());
            }
        }
        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(TgError::UnresolvedBlockers {
                task_id: task.id.clone(),
                blockers: unresolved,
            })
        }
    }

    /// Blockers of `id` that are neither Completed nor Canceled.
    pub fn unresolved_blockers(&mut self, id: &TaskId) -> Result<Vec<TaskId>> {
        let mut unresolved = Vec::new();
        for blocker in self.graph.blockers(id)? {
            if !self.graph.task(&blocker)?.status.is_resolved() {
                unresolved.push(blocker);
            }
        }
        Ok(unresolved)
    }

    pub fn incomplete_children(&mut self, id: &TaskId) -> Result<Vec<TaskId>> {
        let mut incomplete = Vec::new();
        for child in self.graph.children(id)? {
            if !self.graph.task(&child)?.status.is_resolved() {
                incomplete.push(child);
            }
        }
        Ok(incomplete)
    }

    /// Re-derive the advisory Blocked flag of `id`. Returns the saved task
    /// when its status changed.
    pub fn refresh(&mut self, id: &TaskId) -> Result<Option<Task>> {
        let mut task = self.graph.task(id)?;
        let has_unresolved = !self.unresolved_blockers(id)?.is_empty();
        let Some(status) = advisory_status(task.status, has_unresolved) else {
            return Ok(None);
        };

        debug!(task_id = %id, from = %task.status, to = %status, "advisory status");
        task.status = status;
        task.updated_at = Utc::now();
        Ok(Some(self.graph.save(&task)?))
    }

    pub fn refresh_dependents(&mut self, id: &TaskId) -> Result<()> {
        for dependent in self.graph.dependents(id)? {
            self.refresh(&dependent)?;
        }
        Ok(())
    }

    pub fn complete(&mut self, id: &TaskId, mode: CompletionMode) -> Result<CompletionOutcome> {
        let task = self.graph.task(id)?;
        check_transition(&task, TaskStatus::Completed, Trigger::Complete)?;

        let blockers = self.unresolved_blockers(id)?;
        if !blockers.is_empty() {
            return Err(TgError::UnresolvedBlockers {
                task_id: id.clone(),
                blockers,
            });
        }
        if mode == CompletionMode::Normal {
            let children = self.incomplete_children(id)?;
            if !children.is_empty() {
                return Err(TgError::IncompleteChildren {
                    task_id: id.clone(),
                    children,
                });
            }
        }

        let now = Utc::now();
        let task = self.mark_completed(task, now)?;
        info!(task_id = %id, %mode, "task completed");

        let cascaded = self.cascade(&task, now)?;
        let spawned = self.spawn_recurrences(std::iter::once(&task).chain(&cascaded), now)?;

        Ok(CompletionOutcome {
            task,
            auto_completed: cascaded.into_iter().map(|t| t.id).collect(),
            spawned,
        })
    }

    pub fn cancel(&mut self, id: &TaskId) -> Result<CompletionOutcome> {
        let mut task = self.graph.task(id)?;
        check_transition(&task, TaskStatus::Canceled, Trigger::Cancel)?;

        let now = Utc::now();
        task.status = TaskStatus::Canceled;
        task.updated_at = now;
        let task = self.graph.save(&task)?;
        self.refresh_dependents(id)?;
        info!(task_id = %id, "task canceled");

        let cascaded = self.cascade(&task, now)?;
        let spawned = self.spawn_recurrences(&cascaded, now)?;

        Ok(CompletionOutcome {
            task,
            auto_completed: cascaded.into_iter().map(|t| t.id).collect(),
            spawned,
        })
    }

    fn mark_completed(&mut self, mut task: Task, now: DateTime<Utc>) -> Result<Task> {
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.updated_at = now;
        let saved = self.graph.save(&task)?;
        self.refresh_dependents(&saved.id)?;
        Ok(saved)
    }

    /// Parent of `task`, if it should be auto-completed now that `task`
    /// resolved.
    fn parent_to_complete(&mut self, task: &Task) -> Result<Option<TaskId>> {
        if !task.allow_parent_auto_complete {
            return Ok(None);
        }
        let Some(parent_id) = &task.parent_id else {
            return Ok(None);
        };
        if self.graph.task(parent_id)?.status.is_resolved() {
            return Ok(None);
        }
        if !self.incomplete_children(parent_id)?.is_empty() {
            return Ok(None);
        }
        Ok(Some(parent_id.clone()))
    }

    /// Walk up from `origin`, completing each parent whose children are all
    /// resolved. Returns the auto-completed tasks in cascade order.
    ///
    /// A parent that still has unresolved blockers is left open: the cascade
    /// stops there without failing the triggering completion, and the
    /// parent's advisory status is refreshed (Todo becomes Blocked).
    fn cascade(&mut self, origin: &Task, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let limit = self.config.max_cascade_depth;
        let mut completed = Vec::new();
        let mut visited = HashSet::from([origin.id.clone()]);
        let mut queue = VecDeque::new();

        if let Some(parent) = self.parent_to_complete(origin)? {
            queue.push_back((parent, 1usize));
        }

        while let Some((id, depth)) = queue.pop_front() {
            if depth > limit {
                return Err(TgError::CascadeDepthExceeded {
                    task_id: origin.id.clone(),
                    limit,
                });
            }
            if !visited.insert(id.clone()) {
                continue;
            }

            let task = self.graph.task(&id)?;
            check_transition(&task, TaskStatus::Completed, Trigger::Complete)?;

            let blockers = self.unresolved_blockers(&id)?;
            if !blockers.is_empty() {
                debug!(
                    task_id = %id,
                    blockers = blockers.len(),
                    "cascade stopped at parent with unresolved blockers"
                );
                self.refresh(&id)?;
                continue;
            }

            let task = self.mark_completed(task, now)?;
            info!(task_id = %id, depth, "parent auto-completed");

            if let Some(parent) = self.parent_to_complete(&task)? {
                queue.push_back((parent, depth + 1));
            }
            completed.push(task);
        }

        Ok(completed)
    }

    fn spawn_recurrences<'t>(
        &mut self,
        completed: impl IntoIterator<Item = &'t Task>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let mut spawned = Vec::new();
        for task in completed {
            let Some(next) = self.recurrence.next_instance(task, now) else {
                continue;
            };
            self.graph.repo().insert(&next)?;
            self.graph.stage(next.clone());
            info!(task_id = %task.id, next_id = %next.id, "spawned recurrence instance");
            spawned.push(next);
        }
        Ok(spawned)
    }
}
