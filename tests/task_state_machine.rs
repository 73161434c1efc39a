//! Integration tests for the task/lock state machine: CAS transitions,
//! dependency gating, non-overlapping resource locks, and the append-only
//! event log.

use semantic_memory::Error;
use semantic_memory::models::{TaskState, TransitionRequest};
use semantic_memory::storage::{Database, TaskStore, normalize_resource};

fn open_tasks() -> TaskStore {
    let db = Database::in_memory().expect("open in-memory db");
    TaskStore::new(&db)
}

fn request(
    task_id: &str,
    from: TaskState,
    to: TaskState,
    expected_version: i64,
) -> TransitionRequest {
    TransitionRequest {
        task_id: task_id.to_string(),
        from_state: from,
        to_state: to,
        actor: "agent-1".to_string(),
        reason: "test".to_string(),
        evidence: String::new(),
        expected_version,
    }
}

#[tokio::test]
async fn test_create_and_transition_happy_path() {
    let tasks = open_tasks();
    let task = tasks.create_task("build feature", "agent-1", None).await.unwrap();
    assert_eq!(task.status, TaskState::Todo);
    assert_eq!(task.version, 0);
    assert_eq!(task.retry_count, 0);

    let result = tasks
        .transition(request(&task.task_id, TaskState::Todo, TaskState::InProgress, 0))
        .await
        .unwrap();
    assert_eq!(result.task.status, TaskState::InProgress);
    assert_eq!(result.task.version, 1);

    // The transition event landed in the same transaction
    let events = tasks.list_events(&task.task_id, 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "state_transition");
    assert_eq!(events[0].id, result.event_id);
    assert_eq!(events[0].payload["from_state"], "todo");
    assert_eq!(events[0].payload["to_state"], "in_progress");
}

#[tokio::test]
async fn test_duplicate_task_id_rejected() {
    let tasks = open_tasks();
    tasks
        .create_task("one", "", Some("fixed-id".to_string()))
        .await
        .unwrap();
    let dup = tasks
        .create_task("two", "", Some("fixed-id".to_string()))
        .await;
    assert!(matches!(dup, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_transition_unknown_task() {
    let tasks = open_tasks();
    let err = tasks
        .transition(request("ghost", TaskState::Todo, TaskState::InProgress, 0))
        .await;
    assert!(matches!(err, Err(Error::TaskNotFound { .. })));
}

#[tokio::test]
async fn test_version_mismatch_is_concurrency_conflict() {
    let tasks = open_tasks();
    let task = tasks.create_task("raced", "", None).await.unwrap();

    tasks
        .transition(request(&task.task_id, TaskState::Todo, TaskState::InProgress, 0))
        .await
        .unwrap();

    // Second writer raced with stale expected_version
    let err = tasks
        .transition(request(&task.task_id, TaskState::Todo, TaskState::InProgress, 0))
        .await;
    match err {
        Err(Error::ConcurrencyConflict {
            expected, found, ..
        }) => {
            assert_eq!(expected, 0);
            assert_eq!(found, 1);
        },
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_cas_exactly_one_winner() {
    let tasks = open_tasks();
    let task = tasks.create_task("contended", "", None).await.unwrap();

    let a = tasks.transition(request(
        &task.task_id,
        TaskState::Todo,
        TaskState::InProgress,
        0,
    ));
    let b = tasks.transition(request(
        &task.task_id,
        TaskState::Todo,
        TaskState::InProgress,
        0,
    ));
    let (a, b) = tokio::join!(a, b);

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one transition wins");
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(Error::ConcurrencyConflict { .. })));

    let current = tasks.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(current.status, TaskState::InProgress);
}

#[tokio::test]
async fn test_status_mismatch_is_invalid_transition() {
    let tasks = open_tasks();
    let task = tasks.create_task("wrong-state", "", None).await.unwrap();
    tasks
        .transition(request(&task.task_id, TaskState::Todo, TaskState::InProgress, 0))
        .await
        .unwrap();

    // Correct version, wrong expected status
    let err = tasks
        .transition(request(&task.task_id, TaskState::Todo, TaskState::Canceled, 1))
        .await;
    assert!(matches!(err, Err(Error::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_state_machine_rejects_forbidden_edges() {
    let tasks = open_tasks();
    let task = tasks.create_task("forbidden", "", None).await.unwrap();

    // todo -> done is not in the transition table; the DB trigger aborts
    let err = tasks
        .transition(request(&task.task_id, TaskState::Todo, TaskState::Done, 0))
        .await;
    assert!(matches!(err, Err(Error::InvalidTransition { .. })));

    // The failed attempt neither bumped the version nor logged an event
    let current = tasks.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(current.version, 0);
    assert!(tasks.list_events(&task.task_id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dependency_gating() {
    let tasks = open_tasks();
    let dep = tasks.create_task("dependency", "", None).await.unwrap();
    let task = tasks.create_task("gated", "", None).await.unwrap();
    tasks
        .add_dependencies(&task.task_id, vec![dep.task_id.clone()])
        .await
        .unwrap();

    // Dependency still todo: entry to in_progress is rejected
    let err = tasks
        .transition(request(&task.task_id, TaskState::Todo, TaskState::InProgress, 0))
        .await;
    assert!(matches!(err, Err(Error::DependencyNotMet { .. })));

    // Drive the dependency to done, then the gated task may start
    tasks
        .transition(request(&dep.task_id, TaskState::Todo, TaskState::InProgress, 0))
        .await
        .unwrap();
    tasks
        .transition(request(&dep.task_id, TaskState::InProgress, TaskState::Done, 1))
        .await
        .unwrap();

    let result = tasks
        .transition(request(&task.task_id, TaskState::Todo, TaskState::InProgress, 0))
        .await
        .unwrap();
    assert_eq!(result.task.status, TaskState::InProgress);
}

#[tokio::test]
async fn test_retry_count_increments_on_blocked() {
    let tasks = open_tasks();
    let task = tasks.create_task("retries", "", None).await.unwrap();

    tasks
        .transition(request(&task.task_id, TaskState::Todo, TaskState::InProgress, 0))
        .await
        .unwrap();
    let blocked = tasks
        .transition(request(&task.task_id, TaskState::InProgress, TaskState::Blocked, 1))
        .await
        .unwrap();
    assert_eq!(blocked.task.retry_count, 1);

    let back = tasks
        .transition(request(&task.task_id, TaskState::Blocked, TaskState::Todo, 2))
        .await
        .unwrap();
    assert_eq!(back.task.retry_count, 1, "leaving blocked does not increment");

    // Versions are strictly monotonic through the chain
    assert_eq!(back.task.version, 3);
}

#[tokio::test]
async fn test_lock_prefix_conflict_and_release_retry() {
    let tasks = open_tasks();
    let a = tasks.create_task("task-a", "", None).await.unwrap();
    let b = tasks.create_task("task-b", "", None).await.unwrap();

    tasks
        .assign_locks(&a.task_id, vec!["src/".to_string()])
        .await
        .unwrap();

    // Path-prefix overlap with a different task fails
    let err = tasks
        .assign_locks(&b.task_id, vec!["src/api/handler.py".to_string()])
        .await;
    match err {
        Err(Error::LockConflict { resource, .. }) => {
            assert_eq!(resource, "src/api/handler.py");
        },
        other => panic!("expected LockConflict, got {other:?}"),
    }

    // A releases; B's retry succeeds
    let released = tasks.release_locks(&a.task_id).await.unwrap();
    assert_eq!(released, 1);

    let lock_ids = tasks
        .assign_locks(&b.task_id, vec!["src/api/handler.py".to_string()])
        .await
        .unwrap();
    assert_eq!(lock_ids.len(), 1);
}

#[tokio::test]
async fn test_disjoint_locks_coexist() {
    let tasks = open_tasks();
    let a = tasks.create_task("task-a", "", None).await.unwrap();
    let b = tasks.create_task("task-b", "", None).await.unwrap();

    tasks
        .assign_locks(&a.task_id, vec!["src/api".to_string()])
        .await
        .unwrap();
    // Sibling paths do not overlap: "src/apiary" is not under "src/api"
    tasks
        .assign_locks(&b.task_id, vec!["src/apiary".to_string(), "docs".to_string()])
        .await
        .unwrap();

    let locks = tasks.list_locks(&b.task_id).await.unwrap();
    assert_eq!(locks.len(), 2);
    assert!(locks.iter().all(|lock| lock.active));
}

#[tokio::test]
async fn test_lock_resources_are_normalized() {
    let tasks = open_tasks();
    let a = tasks.create_task("task-a", "", None).await.unwrap();
    let b = tasks.create_task("task-b", "", None).await.unwrap();

    tasks
        .assign_locks(&a.task_id, vec!["src\\api\\".to_string()])
        .await
        .unwrap();
    let locks = tasks.list_locks(&a.task_id).await.unwrap();
    assert_eq!(locks[0].resource, "src/api");

    // Normalized forms collide even when spellings differ
    let err = tasks
        .assign_locks(&b.task_id, vec!["./src/api/".to_string()])
        .await;
    assert!(matches!(err, Err(Error::LockConflict { .. })));

    // Empty resources are skipped entirely
    let none = tasks
        .assign_locks(&b.task_id, vec!["   ".to_string()])
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_events_list_newest_first() {
    let tasks = open_tasks();
    let task = tasks.create_task("evented", "", None).await.unwrap();

    for kind in ["dispatched", "heartbeat", "completed"] {
        tasks
            .append_event(&task.task_id, kind, "agent-1", serde_json::json!({"k": kind}))
            .await
            .unwrap();
    }

    let events = tasks.list_events(&task.task_id, 10).await.unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].event_type, "completed");
    assert_eq!(events[2].event_type, "dispatched");

    let limited = tasks.list_events(&task.task_id, 2).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_list_tasks_by_status() {
    let tasks = open_tasks();
    let a = tasks.create_task("a", "", None).await.unwrap();
    tasks.create_task("b", "", None).await.unwrap();
    tasks
        .transition(request(&a.task_id, TaskState::Todo, TaskState::InProgress, 0))
        .await
        .unwrap();

    let todo = tasks.list_tasks(Some(TaskState::Todo), 10).await.unwrap();
    assert_eq!(todo.len(), 1);
    assert_eq!(todo[0].title, "b");

    let all = tasks.list_tasks(None, 10).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn test_normalize_resource_examples() {
    assert_eq!(normalize_resource("src/"), "src");
    assert_eq!(normalize_resource("src\\api"), "src/api");
    assert_eq!(normalize_resource("./a//b/"), "a/b");
    assert_eq!(normalize_resource("/"), "/");
}
