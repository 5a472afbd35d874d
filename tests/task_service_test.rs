//! Integration tests for TaskService.
//!
//! Tests cover:
//! - CRUD operations and field validation
//! - Dependency edges, cycle detection across hierarchy and dependencies
//! - Completion modes and the parent auto-complete cascade
//! - Cancel, reopen and advisory Blocked bookkeeping
//! - Recurrence instances
//! - Bulk import atomicity
//! - Optimistic concurrency

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use taskgraph::config::EngineConfig;
use taskgraph::core::TaskService;
use taskgraph::db::{schema, task_repo, SqliteTaskRepository};
use taskgraph::error::{ErrorKind, TgError};
use taskgraph::id::TaskId;
use taskgraph::types::{
    CompletionMode, CreateTaskInput, EdgeKind, ImportEdge, ImportRecord, ListTasksFilter,
    Priority, Recurrence, RecurrenceKind, TaskStatus, UpdateTaskInput,
};

fn setup_db() -> Connection {
    schema::open_in_memory().unwrap()
}

fn service(conn: &Connection) -> TaskService<SqliteTaskRepository<'_>> {
    TaskService::sqlite(conn, EngineConfig::default())
}

fn input(title: &str) -> CreateTaskInput {
    CreateTaskInput {
        title: title.to_string(),
        ..Default::default()
    }
}

fn create(svc: &TaskService<SqliteTaskRepository<'_>>, title: &str) -> TaskId {
    svc.create_task(&input(title)).unwrap().id
}

fn subtask(svc: &TaskService<SqliteTaskRepository<'_>>, parent: &TaskId, title: &str) -> TaskId {
    svc.add_subtask(parent, &input(title)).unwrap().id
}

fn status(svc: &TaskService<SqliteTaskRepository<'_>>, id: &TaskId) -> TaskStatus {
    svc.get_task(id).unwrap().status
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn record(key: &str, title: &str) -> ImportRecord {
    ImportRecord {
        key: Some(key.to_string()),
        title: title.to_string(),
        ..Default::default()
    }
}

// ==================== CRUD Operations ====================

#[test]
fn test_create_task_defaults() {
    let conn = setup_db();
    let svc = service(&conn);

    let task = svc.create_task(&input("  Write the report  ")).unwrap();

    assert_eq!(task.title, "Write the report");
    assert_eq!(task.status, TaskStatus::Todo);
    assert_eq!(task.priority, Priority::Medium);
    assert!(task.allow_parent_auto_complete);
    assert_eq!(task.version, 1);
    assert!(task.completed_at.is_none());
}

#[test]
fn test_create_rejects_short_title() {
    let conn = setup_db();
    let svc = service(&conn);

    let err = svc.create_task(&input("ab")).unwrap_err();
    assert!(matches!(err, TgError::Validation { field: "title", .. }));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.kind().status_code(), 422);
}

#[test]
fn test_create_rejects_negative_duration() {
    let conn = setup_db();
    let svc = service(&conn);

    let err = svc
        .create_task(&CreateTaskInput {
            estimated_duration_minutes: Some(-5),
            ..input("Negative")
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(svc.list_tasks(&ListTasksFilter::default()).unwrap().is_empty());
}

#[test]
fn test_create_with_missing_parent() {
    let conn = setup_db();
    let svc = service(&conn);

    let err = svc
        .create_task(&CreateTaskInput {
            parent_id: Some(TaskId::new()),
            ..input("Orphan")
        })
        .unwrap_err();
    assert!(matches!(err, TgError::ParentNotFound(_)));
    assert_eq!(err.kind().status_code(), 404);
}

#[test]
fn test_create_with_missing_blocker() {
    let conn = setup_db();
    let svc = service(&conn);

    let err = svc
        .create_task(&CreateTaskInput {
            blocked_by: vec![TaskId::new()],
            ..input("Waiting")
        })
        .unwrap_err();
    assert!(matches!(err, TgError::BlockerNotFound(_)));
}

#[test]
fn test_get_missing_task() {
    let conn = setup_db();
    let svc = service(&conn);

    let err = svc.get_task(&TaskId::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_update_fields_bumps_version() {
    let conn = setup_db();
    let svc = service(&conn);
    let id = create(&svc, "Original");

    let updated = svc
        .update_task(
            &id,
            &UpdateTaskInput {
                title: Some("Renamed".to_string()),
                priority: Some(Priority::High),
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.priority, Priority::High);
    assert_eq!(updated.status, TaskStatus::InProgress);
    assert_eq!(updated.version, 2);
}

#[test]
fn test_update_cannot_complete_directly_with_open_blocker() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    svc.add_dependency(&a, &b).unwrap();

    let err = svc
        .update_task(
            &a,
            &UpdateTaskInput {
                title: Some("Renamed A".to_string()),
                status: Some(TaskStatus::Completed),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, TgError::UnresolvedBlockers { .. }));
    // Field changes roll back with the failed completion
    assert_eq!(svc.get_task(&a).unwrap().title, "Task A");
}

#[test]
fn test_update_schedule_end_before_start() {
    let conn = setup_db();
    let svc = service(&conn);
    let id = create(&svc, "Scheduled");

    let err = svc
        .update_task(
            &id,
            &UpdateTaskInput {
                scheduled_start: Some(at(2024, 5, 2)),
                scheduled_end: Some(at(2024, 5, 1)),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, TgError::Validation { field: "scheduledEnd", .. }));
}

#[test]
fn test_list_filters_by_status_and_roots() {
    let conn = setup_db();
    let svc = service(&conn);
    let root = create(&svc, "Root");
    let child = subtask(&svc, &root, "Child");
    svc.complete_task(&child, CompletionMode::Normal).unwrap();

    let roots = svc
        .list_tasks(&ListTasksFilter {
            roots_only: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].id, root);

    let completed = svc
        .list_tasks(&ListTasksFilter {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(completed.len(), 2);
}

// ==================== Delete ====================

#[test]
fn test_delete_with_child_fails() {
    let conn = setup_db();
    let svc = service(&conn);
    let parent = create(&svc, "Parent");
    subtask(&svc, &parent, "Child");

    let err = svc.delete_task(&parent).unwrap_err();
    assert!(matches!(err, TgError::HasChildren(_)));
    assert_eq!(err.kind(), ErrorKind::BusinessRule);
    assert!(svc.get_task(&parent).is_ok());
}

#[test]
fn test_delete_with_dependent_cleans_edge() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Dependent");
    let b = create(&svc, "Blocker");
    svc.add_dependency(&a, &b).unwrap();
    assert_eq!(status(&svc, &a), TaskStatus::Blocked);

    svc.delete_task(&b).unwrap();

    let a_task = svc.get_task(&a).unwrap();
    assert!(a_task.blocked_by.is_empty());
    assert_eq!(a_task.status, TaskStatus::Todo);
    assert!(matches!(svc.get_task(&b), Err(TgError::TaskNotFound(_))));
}

#[test]
fn test_delete_missing_task() {
    let conn = setup_db();
    let svc = service(&conn);
    assert!(matches!(
        svc.delete_task(&TaskId::new()),
        Err(TgError::TaskNotFound(_))
    ));
}

// ==================== Dependencies & Cycles ====================

#[test]
fn test_self_dependency_is_cycle() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");

    let err = svc.add_dependency(&a, &a).unwrap_err();
    assert!(matches!(err, TgError::DependencyCycle { .. }));
    assert_eq!(err.kind(), ErrorKind::DependencyCycle);
}

#[test]
fn test_chain_closing_edge_is_cycle() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    let c = create(&svc, "Task C");
    svc.add_dependency(&a, &b).unwrap();
    svc.add_dependency(&b, &c).unwrap();

    let err = svc.add_dependency(&c, &a).unwrap_err();
    match err {
        TgError::DependencyCycle { kind, from, to } => {
            assert_eq!(kind, EdgeKind::Dependency);
            assert_eq!(from, c);
            assert_eq!(to, a);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(svc.get_task(&c).unwrap().blocked_by.is_empty());
}

#[test]
fn test_child_blocked_by_ancestor_is_cycle() {
    let conn = setup_db();
    let svc = service(&conn);
    let root = create(&svc, "Root");
    let leaf = subtask(&svc, &root, "Leaf");

    let err = svc.add_dependency(&leaf, &root).unwrap_err();
    assert!(matches!(err, TgError::DependencyCycle { .. }));
}

#[test]
fn test_reparent_into_dependency_cycle() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    // a waits on b; as a's parent, b would also wait on a
    svc.add_dependency(&a, &b).unwrap();

    let err = svc
        .update_task(
            &a,
            &UpdateTaskInput {
                parent_id: Some(b.clone()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, TgError::DependencyCycle { kind: EdgeKind::Hierarchy, .. }));
}

#[test]
fn test_add_dependency_is_idempotent() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");

    let first = svc.add_dependency(&a, &b).unwrap();
    let second = svc.add_dependency(&a, &b).unwrap();
    assert_eq!(first.blocked_by, vec![b.clone()]);
    assert_eq!(second.blocked_by, vec![b]);
    assert_eq!(first.version, second.version);
}

#[test]
fn test_set_dependencies_twice_is_idempotent() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    let c = create(&svc, "Task C");

    let first = svc.set_dependencies(&a, &[b.clone(), c.clone()]).unwrap();
    let second = svc.set_dependencies(&a, &[c.clone(), b.clone()]).unwrap();

    let mut first_set = first.blocked_by.clone();
    let mut second_set = second.blocked_by.clone();
    first_set.sort();
    second_set.sort();
    assert_eq!(first_set, second_set);
    assert_eq!(first.version, second.version);
}

#[test]
fn test_set_dependencies_rejects_whole_batch_on_cycle() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    let c = create(&svc, "Task C");
    svc.add_dependency(&c, &a).unwrap();

    let err = svc.set_dependencies(&a, &[b.clone(), c.clone()]).unwrap_err();
    assert!(matches!(err, TgError::DependencyCycle { .. }));
    assert!(svc.get_task(&a).unwrap().blocked_by.is_empty());
}

#[test]
fn test_set_dependencies_replaces_and_refreshes() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    svc.add_dependency(&a, &b).unwrap();
    assert_eq!(status(&svc, &a), TaskStatus::Blocked);

    let task = svc.set_dependencies(&a, &[]).unwrap();
    assert!(task.blocked_by.is_empty());
    assert_eq!(task.status, TaskStatus::Todo);
}

#[test]
fn test_remove_dependency() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    svc.add_dependency(&a, &b).unwrap();

    let task = svc.remove_dependency(&a, &b).unwrap();
    assert!(task.blocked_by.is_empty());
    assert_eq!(task.status, TaskStatus::Todo);

    // Removing again is a no-op
    let again = svc.remove_dependency(&a, &b).unwrap();
    assert_eq!(again.version, task.version);
}

#[test]
fn test_completed_task_cannot_gain_open_blocker() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    svc.complete_task(&a, CompletionMode::Normal).unwrap();

    let err = svc.add_dependency(&a, &b).unwrap_err();
    assert!(matches!(err, TgError::UnresolvedBlockers { .. }));
}

// ==================== Completion ====================

#[test]
fn test_complete_blocked_by_open_dependency() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    svc.add_dependency(&a, &b).unwrap();

    let err = svc.complete_task(&a, CompletionMode::Normal).unwrap_err();
    assert!(matches!(err, TgError::UnresolvedBlockers { .. }));
    assert_eq!(err.kind().status_code(), 409);

    svc.complete_task(&b, CompletionMode::Normal).unwrap();
    let outcome = svc.complete_task(&a, CompletionMode::Normal).unwrap();
    assert_eq!(outcome.task.status, TaskStatus::Completed);
    assert!(outcome.task.completed_at.is_some());
}

#[test]
fn test_completing_blocker_clears_advisory_blocked() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    svc.add_dependency(&a, &b).unwrap();
    assert_eq!(status(&svc, &a), TaskStatus::Blocked);

    svc.complete_task(&b, CompletionMode::Normal).unwrap();
    assert_eq!(status(&svc, &a), TaskStatus::Todo);
}

#[test]
fn test_in_progress_is_not_marked_blocked() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    svc.update_task(
        &a,
        &UpdateTaskInput {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        },
    )
    .unwrap();

    svc.add_dependency(&a, &b).unwrap();
    assert_eq!(status(&svc, &a), TaskStatus::InProgress);
}

#[test]
fn test_normal_mode_rejects_open_children() {
    let conn = setup_db();
    let svc = service(&conn);
    let parent = create(&svc, "Parent");
    let child = subtask(&svc, &parent, "Child");

    let err = svc.complete_task(&parent, CompletionMode::Normal).unwrap_err();
    match err {
        TgError::IncompleteChildren { children, .. } => assert_eq!(children, vec![child]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_force_mode_still_respects_blockers() {
    let conn = setup_db();
    let svc = service(&conn);
    let parent = create(&svc, "Parent");
    let child = subtask(&svc, &parent, "Child");
    let blocker = create(&svc, "Blocker");
    svc.add_dependency(&parent, &blocker).unwrap();
    // child completes, but the parent has its own open blocker
    svc.complete_task(&child, CompletionMode::Normal).unwrap();

    let err = svc
        .complete_task(&parent, CompletionMode::ForceParentAutoComplete)
        .unwrap_err();
    assert!(matches!(err, TgError::UnresolvedBlockers { .. }));
}

#[test]
fn test_force_mode_skips_children_check() {
    let conn = setup_db();
    let svc = service(&conn);
    let parent = create(&svc, "Parent");
    let child = subtask(&svc, &parent, "Child");

    let outcome = svc
        .complete_task(&parent, CompletionMode::ForceParentAutoComplete)
        .unwrap();
    assert_eq!(outcome.task.status, TaskStatus::Completed);
    assert_eq!(status(&svc, &child), TaskStatus::Todo);
}

#[test]
fn test_complete_twice_is_invalid_transition() {
    let conn = setup_db();
    let svc = service(&conn);
    let id = create(&svc, "Once");
    svc.complete_task(&id, CompletionMode::Normal).unwrap();

    let err = svc.complete_task(&id, CompletionMode::Normal).unwrap_err();
    assert!(matches!(err, TgError::InvalidTransition { .. }));
}

// ==================== Cascade ====================

#[test]
fn test_cascade_across_two_levels() {
    let conn = setup_db();
    let svc = service(&conn);
    let root = create(&svc, "Root");
    let mid = subtask(&svc, &root, "Middle");
    let leaf = subtask(&svc, &mid, "Leaf");

    let outcome = svc.complete_task(&leaf, CompletionMode::Normal).unwrap();

    assert_eq!(outcome.auto_completed, vec![mid.clone(), root.clone()]);
    assert_eq!(status(&svc, &mid), TaskStatus::Completed);
    assert_eq!(status(&svc, &root), TaskStatus::Completed);
}

#[test]
fn test_cascade_waits_for_all_children() {
    let conn = setup_db();
    let svc = service(&conn);
    let parent = create(&svc, "Parent");
    let a = subtask(&svc, &parent, "Child A");
    let b = subtask(&svc, &parent, "Child B");

    svc.complete_task(&a, CompletionMode::Normal).unwrap();
    assert_eq!(status(&svc, &parent), TaskStatus::Todo);

    svc.cancel_task(&b).unwrap();
    assert_eq!(status(&svc, &parent), TaskStatus::Completed);
}

#[test]
fn test_cascade_stops_at_parent_with_open_blocker() {
    let conn = setup_db();
    let svc = service(&conn);
    let parent = create(&svc, "Parent");
    let child = subtask(&svc, &parent, "Child");
    let blocker = create(&svc, "Blocker");
    svc.add_dependency(&parent, &blocker).unwrap();

    let outcome = svc.complete_task(&child, CompletionMode::Normal).unwrap();

    assert!(outcome.auto_completed.is_empty());
    assert_eq!(status(&svc, &child), TaskStatus::Completed);
    assert_eq!(status(&svc, &parent), TaskStatus::Blocked);
}

#[test]
fn test_cascade_respects_child_opt_out() {
    let conn = setup_db();
    let svc = service(&conn);
    let parent = create(&svc, "Parent");
    let child = svc
        .add_subtask(
            &parent,
            &CreateTaskInput {
                allow_parent_auto_complete: Some(false),
                ..input("Quiet child")
            },
        )
        .unwrap();

    svc.complete_task(&child.id, CompletionMode::Normal).unwrap();
    assert_eq!(status(&svc, &parent), TaskStatus::Todo);
}

#[test]
fn test_cascade_depth_limit_rolls_back() {
    let conn = setup_db();
    let svc = TaskService::sqlite(
        &conn,
        EngineConfig {
            max_cascade_depth: 1,
            ..EngineConfig::default()
        },
    );
    let root = create(&svc, "Root");
    let mid = subtask(&svc, &root, "Middle");
    let leaf = subtask(&svc, &mid, "Leaf");

    let err = svc.complete_task(&leaf, CompletionMode::Normal).unwrap_err();
    assert!(matches!(err, TgError::CascadeDepthExceeded { .. }));
    assert_eq!(status(&svc, &leaf), TaskStatus::Todo);
    assert_eq!(status(&svc, &mid), TaskStatus::Todo);
}

// ==================== Cancel & Reopen ====================

#[test]
fn test_canceled_blocker_counts_as_resolved() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Task A");
    let b = create(&svc, "Task B");
    svc.add_dependency(&a, &b).unwrap();

    svc.cancel_task(&b).unwrap();
    let outcome = svc.complete_task(&a, CompletionMode::Normal).unwrap();
    assert_eq!(outcome.task.status, TaskStatus::Completed);
}

#[test]
fn test_canceled_is_terminal() {
    let conn = setup_db();
    let svc = service(&conn);
    let id = create(&svc, "Dropped");
    svc.cancel_task(&id).unwrap();

    assert!(matches!(
        svc.complete_task(&id, CompletionMode::Normal),
        Err(TgError::InvalidTransition { .. })
    ));
    assert!(matches!(
        svc.reopen_task(&id, None),
        Err(TgError::CannotReopen { .. })
    ));
}

#[test]
fn test_reopen_requires_completed() {
    let conn = setup_db();
    let svc = service(&conn);
    let id = create(&svc, "Open");

    let err = svc.reopen_task(&id, None).unwrap_err();
    assert!(matches!(err, TgError::CannotReopen { .. }));
    assert_eq!(err.kind(), ErrorKind::BusinessRule);
}

#[test]
fn test_reopen_does_not_reopen_parent() {
    let conn = setup_db();
    let svc = service(&conn);
    let parent = create(&svc, "Parent");
    let child = subtask(&svc, &parent, "Child");
    svc.complete_task(&child, CompletionMode::Normal).unwrap();
    assert_eq!(status(&svc, &parent), TaskStatus::Completed);

    let reopened = svc.reopen_task(&child, None).unwrap();
    assert_eq!(reopened.status, TaskStatus::Todo);
    assert!(reopened.completed_at.is_none());
    assert_eq!(status(&svc, &parent), TaskStatus::Completed);
}

#[test]
fn test_reopen_reblocks_dependents() {
    let conn = setup_db();
    let svc = service(&conn);
    let a = create(&svc, "Dependent");
    let b = create(&svc, "Blocker");
    svc.add_dependency(&a, &b).unwrap();
    svc.complete_task(&b, CompletionMode::Normal).unwrap();
    assert_eq!(status(&svc, &a), TaskStatus::Todo);

    svc.reopen_task(&b, Some(TaskStatus::InProgress)).unwrap();
    assert_eq!(status(&svc, &b), TaskStatus::InProgress);
    assert_eq!(status(&svc, &a), TaskStatus::Blocked);
}

// ==================== Recurrence ====================

#[test]
fn test_weekly_recurrence_spawns_next_instance() {
    let conn = setup_db();
    let svc = service(&conn);
    let task = svc
        .create_task(&CreateTaskInput {
            recurrence: Some(Recurrence {
                kind: RecurrenceKind::Weekly,
                interval: 1,
                start_date: at(2024, 1, 1),
                end_date: None,
            }),
            ..input("Water the plants")
        })
        .unwrap();

    let outcome = svc.complete_task(&task.id, CompletionMode::Normal).unwrap();

    assert_eq!(outcome.spawned.len(), 1);
    let next = svc.get_task(&outcome.spawned[0].id).unwrap();
    assert_eq!(next.title, "Water the plants");
    assert_eq!(next.status, TaskStatus::Todo);
    assert_eq!(next.recurrence.unwrap().start_date, at(2024, 1, 8));
    assert_ne!(next.id, task.id);
}

#[test]
fn test_recurrence_instance_does_not_copy_dependencies() {
    let conn = setup_db();
    let svc = service(&conn);
    let blocker = create(&svc, "Blocker");
    let task = svc
        .create_task(&CreateTaskInput {
            recurrence: Some(Recurrence {
                kind: RecurrenceKind::Daily,
                interval: 1,
                start_date: at(2024, 1, 1),
                end_date: None,
            }),
            blocked_by: vec![blocker.clone()],
            ..input("Daily standup")
        })
        .unwrap();
    svc.complete_task(&blocker, CompletionMode::Normal).unwrap();

    let outcome = svc.complete_task(&task.id, CompletionMode::Normal).unwrap();
    let next = svc.get_task(&outcome.spawned[0].id).unwrap();
    assert!(next.blocked_by.is_empty());
}

#[test]
fn test_recurrence_past_end_date_spawns_nothing() {
    let conn = setup_db();
    let svc = service(&conn);
    let task = svc
        .create_task(&CreateTaskInput {
            recurrence: Some(Recurrence {
                kind: RecurrenceKind::Monthly,
                interval: 1,
                start_date: at(2024, 1, 31),
                end_date: Some(at(2024, 2, 15)),
            }),
            ..input("Monthly review")
        })
        .unwrap();

    let outcome = svc.complete_task(&task.id, CompletionMode::Normal).unwrap();
    assert!(outcome.spawned.is_empty());
}

#[test]
fn test_auto_completed_parent_recurs_too() {
    let conn = setup_db();
    let svc = service(&conn);
    let parent = svc
        .create_task(&CreateTaskInput {
            recurrence: Some(Recurrence {
                kind: RecurrenceKind::Weekly,
                interval: 1,
                start_date: at(2024, 1, 1),
                end_date: None,
            }),
            ..input("Weekly chores")
        })
        .unwrap();
    let child = subtask(&svc, &parent.id, "Vacuum");

    let outcome = svc.complete_task(&child, CompletionMode::Normal).unwrap();
    assert_eq!(outcome.auto_completed, vec![parent.id.clone()]);
    assert_eq!(outcome.spawned.len(), 1);
    assert_eq!(outcome.spawned[0].title, "Weekly chores");
}

// ==================== Bulk Import ====================

#[test]
fn test_bulk_import_resolves_keys_and_positions() {
    let conn = setup_db();
    let svc = service(&conn);
    let existing = create(&svc, "Existing");

    let records = vec![
        record("epic", "Epic"),
        ImportRecord {
            parent: Some("epic".to_string()),
            dependencies: vec![existing.to_string()],
            ..record("story", "Story")
        },
        ImportRecord {
            title: "Unnamed".to_string(),
            ..Default::default()
        },
    ];
    let edges = vec![ImportEdge {
        task: "2".to_string(),
        depends_on: "story".to_string(),
    }];

    let tasks = svc.bulk_import(&records, &edges).unwrap();

    assert_eq!(tasks.len(), 3);
    assert_eq!(tasks[1].parent_id, Some(tasks[0].id.clone()));
    assert_eq!(tasks[1].blocked_by, vec![existing]);
    assert_eq!(tasks[1].status, TaskStatus::Blocked);
    assert_eq!(tasks[2].blocked_by, vec![tasks[1].id.clone()]);
}

#[test]
fn test_bulk_import_cycle_persists_nothing() {
    let conn = setup_db();
    let svc = service(&conn);

    let records = vec![
        ImportRecord {
            dependencies: vec!["b".to_string()],
            ..record("a", "Task A")
        },
        ImportRecord {
            dependencies: vec!["c".to_string()],
            ..record("b", "Task B")
        },
        ImportRecord {
            dependencies: vec!["a".to_string()],
            ..record("c", "Task C")
        },
    ];

    let err = svc.bulk_import(&records, &[]).unwrap_err();
    assert!(matches!(err, TgError::DependencyCycle { .. }));
    assert!(svc.list_tasks(&ListTasksFilter::default()).unwrap().is_empty());
}

#[test]
fn test_bulk_import_hierarchy_plus_dependency_cycle() {
    let conn = setup_db();
    let svc = service(&conn);

    // the parent already waits on its child, so the child cannot wait on it
    let records = vec![
        record("parent", "Parent"),
        ImportRecord {
            parent: Some("parent".to_string()),
            dependencies: vec!["parent".to_string()],
            ..record("child", "Child")
        },
    ];

    let err = svc.bulk_import(&records, &[]).unwrap_err();
    assert!(matches!(err, TgError::DependencyCycle { .. }));
    assert!(svc.list_tasks(&ListTasksFilter::default()).unwrap().is_empty());
}

#[test]
fn test_bulk_import_unknown_reference() {
    let conn = setup_db();
    let svc = service(&conn);

    let records = vec![ImportRecord {
        dependencies: vec!["missing".to_string()],
        ..record("a", "Task A")
    }];

    let err = svc.bulk_import(&records, &[]).unwrap_err();
    assert!(matches!(err, TgError::UnknownReference(ref r) if r == "missing"));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_bulk_import_invalid_record_rolls_back_batch() {
    let conn = setup_db();
    let svc = service(&conn);

    let records = vec![record("ok", "Valid record"), record("bad", "no")];

    let err = svc.bulk_import(&records, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(svc.list_tasks(&ListTasksFilter::default()).unwrap().is_empty());
}

#[test]
fn test_bulk_import_duplicate_key() {
    let conn = setup_db();
    let svc = service(&conn);

    let records = vec![record("same", "First"), record("same", "Second")];
    let err = svc.bulk_import(&records, &[]).unwrap_err();
    assert!(matches!(err, TgError::Validation { field: "ref", .. }));
}

#[test]
fn test_bulk_import_completed_record_with_open_blocker() {
    let conn = setup_db();
    let svc = service(&conn);

    let records = vec![
        record("open", "Still open"),
        ImportRecord {
            status: Some(TaskStatus::Completed),
            dependencies: vec!["open".to_string()],
            ..record("done", "Claims done")
        },
    ];
    let err = svc.bulk_import(&records, &[]).unwrap_err();
    assert!(matches!(err, TgError::UnresolvedBlockers { .. }));
}

// ==================== Tree ====================

#[test]
fn test_task_tree() {
    let conn = setup_db();
    let svc = service(&conn);
    let root = create(&svc, "Root");
    let a = subtask(&svc, &root, "Child A");
    subtask(&svc, &a, "Grandchild");
    subtask(&svc, &root, "Child B");

    let tree = svc.task_tree(&root).unwrap();
    assert_eq!(tree.children.len(), 2);
    let a_tree = tree.children.iter().find(|t| t.task.id == a).unwrap();
    assert_eq!(a_tree.children.len(), 1);
}

// ==================== Concurrency ====================

#[test]
fn test_stale_save_is_conflict() {
    let conn = setup_db();
    let svc = service(&conn);
    let id = create(&svc, "Contended");
    let stale = svc.get_task(&id).unwrap();

    svc.update_task(
        &id,
        &UpdateTaskInput {
            title: Some("First writer".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    let err = task_repo::save_task(&conn, &stale).unwrap_err();
    assert!(matches!(err, TgError::Conflict(_)));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.kind().status_code(), 409);
}

#[test]
fn test_operations_on_disk_database() {
    let tmp = tempfile::TempDir::new().unwrap();
    let conn = schema::open_db(&tmp.path().join("nested").join("tasks.db")).unwrap();
    let svc = service(&conn);

    let a = create(&svc, "Persisted");
    svc.complete_task(&a, CompletionMode::Normal).unwrap();
    assert_eq!(status(&svc, &a), TaskStatus::Completed);
}

#[test]
fn test_locked_database_reports_conflict() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("tasks.db");
    let holder = schema::open_db(&path).unwrap();
    let writer = schema::open_db(&path).unwrap();
    let svc = service(&writer);

    holder.execute_batch("BEGIN IMMEDIATE").unwrap();
    let err = svc.create_task(&input("Waits on the lock")).unwrap_err();
    assert!(matches!(err, TgError::StoreBusy));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.kind().status_code(), 409);

    holder.execute_batch("ROLLBACK").unwrap();
    let id = create(&svc, "After the lock");
    assert_eq!(status(&svc, &id), TaskStatus::Todo);
}
