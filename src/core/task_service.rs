use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::completion::Propagator;
use crate::core::cycle::{self, ProposedEdge};
use crate::core::graph::GraphIndex;
use crate::core::recurrence::{IntervalResolver, RecurrenceEngine};
use crate::core::status::{check_transition, Trigger};
use crate::core::validate;
use crate::db::{SqliteTaskRepository, TaskRepository};
use crate::error::{ErrorKind, Result, TgError};
use crate::id::TaskId;
use crate::types::{
    CompletionMode, CompletionOutcome, CreateTaskInput, EdgeKind, ImportEdge, ImportRecord,
    ListTasksFilter, Task, TaskStatus, TaskTree, UpdateTaskInput,
};

/// Entry point for every task mutation. Each mutating call runs in one
/// repository transaction against a fresh `GraphIndex`.
pub struct TaskService<R: TaskRepository> {
    repo: R,
    config: EngineConfig,
    recurrence: RecurrenceEngine,
}

impl<'a> TaskService<SqliteTaskRepository<'a>> {
    pub fn sqlite(conn: &'a Connection, config: EngineConfig) -> Self {
        Self::new(SqliteTaskRepository::new(conn), config)
    }
}

impl<R: TaskRepository> TaskService<R> {
    pub fn new(repo: R, config: EngineConfig) -> Self {
        let recurrence = RecurrenceEngine::new(&config);
        Self {
            repo,
            config,
            recurrence,
        }
    }

    /// Spacing for `Custom` recurrence patterns.
    pub fn with_interval_resolver(mut self, resolver: Box<dyn IntervalResolver>) -> Self {
        self.recurrence = std::mem::take(&mut self.recurrence).with_resolver(resolver);
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn propagator<'g, 'r>(&'g self, graph: &'g mut GraphIndex<'r, R>) -> Propagator<'g, 'r, R> {
        Propagator::new(graph, &self.config, &self.recurrence)
    }

    fn mutate<'s, T, F>(&'s self, mut op: F) -> Result<T>
    where
        F: FnMut(&mut GraphIndex<'s, R>) -> Result<T>,
    {
        retry_on_conflict(self.config.conflict_retries, || {
            self.repo.transaction(|| {
                let mut graph = GraphIndex::new(&self.repo);
                op(&mut graph)
            })
        })
    }

    // ---- reads ----

    pub fn get_task(&self, id: &TaskId) -> Result<Task> {
        reload(&self.repo, id)
    }

    pub fn list_tasks(&self, filter: &ListTasksFilter) -> Result<Vec<Task>> {
        self.repo.list(filter)
    }

    pub fn task_tree(&self, id: &TaskId) -> Result<TaskTree> {
        let task = self.get_task(id)?;
        self.subtree(task)
    }

    fn subtree(&self, task: Task) -> Result<TaskTree> {
        let children = self
            .repo
            .get_children(&task.id)?
            .into_iter()
            .map(|child| self.subtree(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(TaskTree { task, children })
    }

    // ---- create / update / delete ----

    /// Validated record for a new task. References are not checked here.
    fn new_task(&self, input: &CreateTaskInput, now: DateTime<Utc>) -> Result<Task> {
        let title = validate::title(&input.title)?;
        validate::duration(input.estimated_duration_minutes)?;
        validate::schedule(input.scheduled_start, input.scheduled_end)?;
        validate::recurrence(input.recurrence.as_ref())?;

        let status = input.status.unwrap_or_default();
        Ok(Task {
            id: TaskId::new(),
            parent_id: None,
            title,
            description: input.description.clone(),
            status,
            priority: input.priority.unwrap_or_default(),
            due_at: input.due_at,
            estimated_duration_minutes: input.estimated_duration_minutes,
            allow_parent_auto_complete: input
                .allow_parent_auto_complete
                .unwrap_or(self.config.default_allow_parent_auto_complete),
            scheduled_start: input.scheduled_start,
            scheduled_end: input.scheduled_end,
            recurrence: input.recurrence.clone(),
            completed_at: (status == TaskStatus::Completed).then_some(now),
            created_at: now,
            updated_at: now,
            version: 1,
            blocked_by: Vec::new(),
            blocks: Vec::new(),
        })
    }

    pub fn create_task(&self, input: &CreateTaskInput) -> Result<Task> {
        self.mutate(|graph| {
            let mut task = self.new_task(input, Utc::now())?;

            if let Some(parent_id) = &input.parent_id {
                if graph.find(parent_id)?.is_none() {
                    return Err(TgError::ParentNotFound(parent_id.clone()));
                }
                task.parent_id = Some(parent_id.clone());
            }

            let blockers = dedupe(&input.blocked_by);
            for blocker in &blockers {
                if graph.find(blocker)?.is_none() {
                    return Err(TgError::BlockerNotFound(blocker.clone()));
                }
            }

            graph.stage(task.clone());
            let mut edges: Vec<ProposedEdge> = blockers
                .iter()
                .map(|blocker| ProposedEdge::dependency(&task.id, blocker))
                .collect();
            if let Some(parent_id) = &task.parent_id {
                edges.push(ProposedEdge::hierarchy(parent_id, &task.id));
            }
            cycle::ensure_acyclic(graph, &edges)?;

            let unresolved = self.propagator(graph).unresolved_blockers(&task.id)?;
            settle_initial_status(&mut task, input.status.is_some(), unresolved, Vec::new())?;

            graph.repo().insert(&task)?;
            graph.repo().set_blockers(&task.id, &blockers)?;
            info!(task_id = %task.id, parent = ?task.parent_id, blockers = blockers.len(), "task created");

            reload(graph.repo(), &task.id)
        })
    }

    pub fn add_subtask(&self, parent_id: &TaskId, input: &CreateTaskInput) -> Result<Task> {
        let input = CreateTaskInput {
            parent_id: Some(parent_id.clone()),
            ..input.clone()
        };
        self.create_task(&input)
    }

    pub fn update_task(&self, id: &TaskId, input: &UpdateTaskInput) -> Result<Task> {
        self.mutate(|graph| {
            let mut task = graph.task(id)?;

            if let Some(title) = &input.title {
                task.title = validate::title(title)?;
            }
            if let Some(description) = &input.description {
                task.description = Some(description.clone()).filter(|d| !d.is_empty());
            }
            if let Some(priority) = input.priority {
                task.priority = priority;
            }
            if input.due_at.is_some() {
                task.due_at = input.due_at;
            }
            if input.estimated_duration_minutes.is_some() {
                validate::duration(input.estimated_duration_minutes)?;
                task.estimated_duration_minutes = input.estimated_duration_minutes;
            }
            if let Some(allow) = input.allow_parent_auto_complete {
                task.allow_parent_auto_complete = allow;
            }
            if input.scheduled_start.is_some() {
                task.scheduled_start = input.scheduled_start;
            }
            if input.scheduled_end.is_some() {
                task.scheduled_end = input.scheduled_end;
            }
            validate::schedule(task.scheduled_start, task.scheduled_end)?;
            if input.clear_recurrence {
                task.recurrence = None;
            } else if let Some(pattern) = &input.recurrence {
                validate::recurrence(Some(pattern))?;
                task.recurrence = Some(pattern.clone());
            }

            let new_parent = match (&input.parent_id, input.detach_parent) {
                (Some(parent_id), _) => Some(Some(parent_id.clone())),
                (None, true) => Some(None),
                (None, false) => None,
            };
            if let Some(new_parent) = new_parent {
                if new_parent != task.parent_id {
                    reparent(graph, &task, new_parent.as_ref())?;
                    task.parent_id = new_parent;
                }
            }

            // Completion and cancellation go through the propagator once
            // the field changes are saved.
            let target = input.status.filter(|status| *status != task.status);
            match target {
                Some(TaskStatus::Completed) => {
                    check_transition(&task, TaskStatus::Completed, Trigger::Complete)?
                }
                Some(TaskStatus::Canceled) => {
                    check_transition(&task, TaskStatus::Canceled, Trigger::Cancel)?
                }
                Some(status) => {
                    check_transition(&task, status, Trigger::Update)?;
                    task.status = status;
                }
                None => {}
            }

            task.updated_at = Utc::now();
            graph.save(&task)?;

            match target {
                Some(TaskStatus::Completed) => {
                    self.propagator(graph).complete(id, CompletionMode::Normal)?;
                }
                Some(TaskStatus::Canceled) => {
                    self.propagator(graph).cancel(id)?;
                }
                _ => {}
            }
            debug!(task_id = %id, "task updated");

            reload(graph.repo(), id)
        })
    }

    /// Deletes a childless task. Dependents lose it from their blocker sets.
    pub fn delete_task(&self, id: &TaskId) -> Result<()> {
        self.mutate(|graph| {
            graph.task(id)?;
            if !graph.children(id)?.is_empty() {
                return Err(TgError::HasChildren(id.clone()));
            }

            let dependents = graph.dependents(id)?;
            for blocker in graph.blockers(id)? {
                graph.unlink(EdgeKind::Dependency, id, &blocker)?;
            }
            for dependent in &dependents {
                graph.unlink(EdgeKind::Dependency, dependent, id)?;
            }
            graph.repo().delete(id)?;

            let mut propagator = self.propagator(graph);
            for dependent in &dependents {
                propagator.refresh(dependent)?;
            }
            info!(task_id = %id, dependents = dependents.len(), "task deleted");
            Ok(())
        })
    }

    // ---- dependencies ----

    /// `task_id` becomes blocked by `depends_on`. Adding an existing edge is
    /// a no-op.
    pub fn add_dependency(&self, task_id: &TaskId, depends_on: &TaskId) -> Result<Task> {
        self.mutate(|graph| {
            let task = graph.task(task_id)?;
            if graph.find(depends_on)?.is_none() {
                return Err(TgError::BlockerNotFound(depends_on.clone()));
            }
            if graph.blockers(task_id)?.contains(depends_on) {
                return reload(graph.repo(), task_id);
            }

            cycle::ensure_acyclic(graph, &[ProposedEdge::dependency(task_id, depends_on)])?;
            let mut propagator = self.propagator(graph);
            propagator.guard_new_blockers(&task, std::slice::from_ref(depends_on))?;

            propagator.graph().repo().add_blocker(task_id, depends_on)?;
            propagator.refresh(task_id)?;
            info!(task_id = %task_id, depends_on = %depends_on, "dependency added");

            reload(graph.repo(), task_id)
        })
    }

    /// Replace the full blocker set of `task_id`.
    pub fn set_dependencies(&self, task_id: &TaskId, depends_on: &[TaskId]) -> Result<Task> {
        self.mutate(|graph| {
            let task = graph.task(task_id)?;
            let wanted = dedupe(depends_on);
            for blocker in &wanted {
                if graph.find(blocker)?.is_none() {
                    return Err(TgError::BlockerNotFound(blocker.clone()));
                }
            }

            let current = graph.blockers(task_id)?;
            let added: Vec<TaskId> = wanted
                .iter()
                .filter(|b| !current.contains(b))
                .cloned()
                .collect();
            let removed: Vec<TaskId> = current
                .iter()
                .filter(|b| !wanted.contains(b))
                .cloned()
                .collect();
            if added.is_empty() && removed.is_empty() {
                return reload(graph.repo(), task_id);
            }

            for blocker in &removed {
                graph.unlink(EdgeKind::Dependency, task_id, blocker)?;
            }
            let edges: Vec<ProposedEdge> = added
                .iter()
                .map(|blocker| ProposedEdge::dependency(task_id, blocker))
                .collect();
            cycle::ensure_acyclic(graph, &edges)?;

            let mut propagator = self.propagator(graph);
            propagator.guard_new_blockers(&task, &added)?;
            propagator.graph().repo().set_blockers(task_id, &wanted)?;
            propagator.refresh(task_id)?;
            info!(
                task_id = %task_id,
                added = added.len(),
                removed = removed.len(),
                "dependencies replaced"
            );

            reload(graph.repo(), task_id)
        })
    }

    /// Removing an edge that does not exist is a no-op.
    pub fn remove_dependency(&self, task_id: &TaskId, depends_on: &TaskId) -> Result<Task> {
        self.mutate(|graph| {
            graph.task(task_id)?;
            if !graph.blockers(task_id)?.contains(depends_on) {
                return reload(graph.repo(), task_id);
            }

            graph.repo().remove_blocker(task_id, depends_on)?;
            graph.unlink(EdgeKind::Dependency, task_id, depends_on)?;
            self.propagator(graph).refresh(task_id)?;
            info!(task_id = %task_id, depends_on = %depends_on, "dependency removed");

            reload(graph.repo(), task_id)
        })
    }

    // ---- lifecycle ----

    pub fn complete_task(&self, id: &TaskId, mode: CompletionMode) -> Result<CompletionOutcome> {
        self.mutate(|graph| self.propagator(graph).complete(id, mode))
    }

    pub fn cancel_task(&self, id: &TaskId) -> Result<CompletionOutcome> {
        self.mutate(|graph| self.propagator(graph).cancel(id))
    }

    /// Completed -> Todo (or InProgress). Parents and spawned recurrence
    /// instances are left alone; dependents may become Blocked again.
    pub fn reopen_task(&self, id: &TaskId, to: Option<TaskStatus>) -> Result<Task> {
        self.mutate(|graph| {
            let mut task = graph.task(id)?;
            let target = to.unwrap_or(TaskStatus::Todo);
            check_transition(&task, target, Trigger::Reopen)?;

            task.status = target;
            task.completed_at = None;
            task.updated_at = Utc::now();
            graph.save(&task)?;

            let mut propagator = self.propagator(graph);
            propagator.refresh(id)?;
            propagator.refresh_dependents(id)?;
            info!(task_id = %id, status = %target, "task reopened");

            reload(graph.repo(), id)
        })
    }

    // ---- bulk import ----

    /// Create every record and edge of a batch, or nothing. References in
    /// `parent`, `dependencies` and `edges` name a record's key (its `ref`, or
    /// its array position when absent) or an existing task id.
    pub fn bulk_import(&self, records: &[ImportRecord], edges: &[ImportEdge]) -> Result<Vec<Task>> {
        self.mutate(|graph| {
            let now = Utc::now();

            let mut tasks = Vec::with_capacity(records.len());
            let mut keys: HashMap<String, TaskId> = HashMap::new();
            for (position, record) in records.iter().enumerate() {
                let task = self.new_task(&record.to_input(), now)?;
                let key = record.key.clone().unwrap_or_else(|| position.to_string());
                if keys.insert(key.clone(), task.id.clone()).is_some() {
                    return Err(TgError::validation("ref", format!("duplicate key '{key}'")));
                }
                tasks.push(task);
            }

            for (record, task) in records.iter().zip(tasks.iter_mut()) {
                if let Some(parent) = &record.parent {
                    task.parent_id = Some(resolve_ref(graph, &keys, parent, TgError::ParentNotFound)?);
                }
            }

            let mut blocker_edges: Vec<(TaskId, TaskId)> = Vec::new();
            for (record, task) in records.iter().zip(&tasks) {
                for dependency in &record.dependencies {
                    let blocker = resolve_ref(graph, &keys, dependency, TgError::BlockerNotFound)?;
                    blocker_edges.push((task.id.clone(), blocker));
                }
            }
            for edge in edges {
                let task = resolve_ref(graph, &keys, &edge.task, TgError::TaskNotFound)?;
                let blocker = resolve_ref(graph, &keys, &edge.depends_on, TgError::BlockerNotFound)?;
                blocker_edges.push((task, blocker));
            }
            let mut seen = HashSet::new();
            blocker_edges.retain(|edge| seen.insert(edge.clone()));

            for task in &tasks {
                graph.stage(task.clone());
            }
            let mut proposed: Vec<ProposedEdge> = tasks
                .iter()
                .filter_map(|task| {
                    task.parent_id
                        .as_ref()
                        .map(|parent| ProposedEdge::hierarchy(parent, &task.id))
                })
                .collect();
            proposed.extend(
                blocker_edges
                    .iter()
                    .map(|(task, blocker)| ProposedEdge::dependency(task, blocker)),
            );
            cycle::ensure_acyclic(graph, &proposed)?;

            let new_ids: HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
            let mut propagator = self.propagator(graph);
            for (record, task) in records.iter().zip(tasks.iter_mut()) {
                let unresolved = propagator.unresolved_blockers(&task.id)?;
                let incomplete = propagator.incomplete_children(&task.id)?;
                settle_initial_status(task, record.status.is_some(), unresolved, incomplete)?;
            }

            // Stored tasks named on the dependent side of an edge
            let mut existing: Vec<TaskId> = Vec::new();
            for (task_id, blocker) in &blocker_edges {
                if new_ids.contains(task_id) {
                    continue;
                }
                let task = propagator.graph().task(task_id)?;
                propagator.guard_new_blockers(&task, std::slice::from_ref(blocker))?;
                if !existing.contains(task_id) {
                    existing.push(task_id.clone());
                }
            }

            // Parents before children
            let repo = propagator.graph().repo();
            let mut inserted: HashSet<TaskId> = HashSet::new();
            let mut pending: Vec<&Task> = tasks.iter().collect();
            while !pending.is_empty() {
                let before = pending.len();
                let mut rest = Vec::new();
                for task in pending {
                    let ready = task
                        .parent_id
                        .as_ref()
                        .map_or(true, |p| !new_ids.contains(p) || inserted.contains(p));
                    if ready {
                        repo.insert(task)?;
                        inserted.insert(task.id.clone());
                    } else {
                        rest.push(task);
                    }
                }
                if rest.len() == before {
                    return Err(TgError::validation("parent", "parent references form a loop"));
                }
                pending = rest;
            }
            for (task_id, blocker) in &blocker_edges {
                repo.add_blocker(task_id, blocker)?;
            }
            for task_id in &existing {
                propagator.refresh(task_id)?;
            }

            info!(
                tasks = tasks.len(),
                edges = blocker_edges.len(),
                "bulk import applied"
            );
            tasks.iter().map(|task| reload(repo, &task.id)).collect()
        })
    }
}

/// Run `op`, retrying up to `retries` more times while it fails with a
/// conflict: a stale version or a write lock held by another connection.
pub(crate) fn retry_on_conflict<T>(retries: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(err) if err.kind() == ErrorKind::Conflict && attempt < retries => {
                attempt += 1;
                warn!(error = %err, attempt, "conflict, retrying");
            }
            result => return result,
        }
    }
}

fn reload<R: TaskRepository>(repo: &R, id: &TaskId) -> Result<Task> {
    repo.get_by_id(id)?
        .ok_or_else(|| TgError::TaskNotFound(id.clone()))
}

fn dedupe(ids: &[TaskId]) -> Vec<TaskId> {
    let mut seen = HashSet::new();
    ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
}

/// Check a new task's requested status against its blockers and children.
/// Without an explicit status a blocked task starts out Blocked.
fn settle_initial_status(
    task: &mut Task,
    explicit: bool,
    unresolved_blockers: Vec<TaskId>,
    incomplete_children: Vec<TaskId>,
) -> Result<()> {
    match task.status {
        TaskStatus::Completed if !unresolved_blockers.is_empty() => Err(TgError::UnresolvedBlockers {
            task_id: task.id.clone(),
            blockers: unresolved_blockers,
        }),
        TaskStatus::Completed if !incomplete_children.is_empty() => {
            Err(TgError::IncompleteChildren {
                task_id: task.id.clone(),
                children: incomplete_children,
            })
        }
        TaskStatus::Todo if !explicit && !unresolved_blockers.is_empty() => {
            task.status = TaskStatus::Blocked;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn reparent<R: TaskRepository>(
    graph: &mut GraphIndex<'_, R>,
    task: &Task,
    new_parent: Option<&TaskId>,
) -> Result<()> {
    if let Some(parent_id) = new_parent {
        if graph.find(parent_id)?.is_none() {
            return Err(TgError::ParentNotFound(parent_id.clone()));
        }
    }
    if let Some(old) = &task.parent_id {
        graph.unlink(EdgeKind::Hierarchy, old, &task.id)?;
    }
    if let Some(parent_id) = new_parent {
        cycle::ensure_acyclic(graph, &[ProposedEdge::hierarchy(parent_id, &task.id)])?;
    }
    Ok(())
}

fn resolve_ref<R: TaskRepository>(
    graph: &mut GraphIndex<'_, R>,
    keys: &HashMap<String, TaskId>,
    raw: &str,
    missing: fn(TaskId) -> TgError,
) -> Result<TaskId> {
    if let Some(id) = keys.get(raw) {
        return Ok(id.clone());
    }
    let id: TaskId = raw
        .parse()
        .map_err(|_| TgError::UnknownReference(raw.to_string()))?;
    if graph.find(&id)?.is_none() {
        return Err(missing(id));
    }
    Ok(id)
}
