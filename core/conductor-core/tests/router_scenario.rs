//! Integration tests for the router against real filesystem locks.

use std::thread;
use std::time::Duration;

use conductor_core::config::AgentSpec;
use conductor_core::testing::ScriptedMux;
use conductor_core::{DirectoryLockManager, Priority, RouterStore, TaskRouter, TaskStatus};

fn roster() -> Vec<AgentSpec> {
    vec![
        AgentSpec {
            name: "worker-1".to_string(),
            role: "worker".to_string(),
            session: None,
        },
        AgentSpec {
            name: "worker-2".to_string(),
            role: "worker".to_string(),
            session: None,
        },
    ]
}

fn mux() -> ScriptedMux {
    let mux = ScriptedMux::new();
    mux.set_screen("worker-1", ">");
    mux.set_screen("worker-2", ">");
    mux
}

#[test]
fn test_locked_directory_is_queued_then_assigned_after_release() {
    let temp = tempfile::tempdir().unwrap();
    let lock_dir = temp.path().join("locks");
    let project = temp.path().join("projectX");
    std::fs::create_dir_all(&project).unwrap();

    let alice = DirectoryLockManager::open("alice", &lock_dir);
    assert!(alice.acquire(&project, Duration::ZERO, false).unwrap());

    let mux = mux();
    let router_locks = DirectoryLockManager::open("router", &lock_dir);
    let mut router = TaskRouter::new(mux.clone(), &router_locks, &roster());

    thread::sleep(Duration::from_millis(20));
    let assigned = router
        .assign("do X", &project, None, Some("worker"), Priority::Normal)
        .unwrap();
    assert!(!assigned);
    assert_eq!(router.state().pending.len(), 1);
    assert!(router.state().agents.iter().all(|a| a.active_task.is_none()));
    assert!(mux.sent().is_empty());

    assert!(alice.release(&project).unwrap());

    assert_eq!(router.process_queue(), 1);
    let worker = &router.state().agents[0];
    let task = worker.active_task.as_ref().unwrap();
    assert_eq!(task.description, "do X");
    assert_eq!(task.status, TaskStatus::Assigned);
    assert!(mux.typed("worker-1").starts_with("do X"));

    // The router only queried; it never took the lock itself.
    assert!(router_locks.held_directories().is_empty());
}

#[test]
fn test_router_state_survives_between_invocations() {
    let temp = tempfile::tempdir().unwrap();
    let store = RouterStore::new(temp.path().join("router_state.json"));
    let lock_dir = temp.path().join("locks");
    let mux = mux();

    store
        .update(|state| {
            state.reconcile(&roster());
            let locks = DirectoryLockManager::open("cli", &lock_dir);
            let mut router = TaskRouter::from_state(mux.clone(), &locks, std::mem::take(state));
            router.assign("first", temp.path(), Some("worker-2"), None, Priority::High)?;
            router.assign("second", temp.path(), Some("worker-2"), None, Priority::Low)?;
            *state = router.into_state();
            Ok(())
        })
        .unwrap();

    let completed = store
        .update(|state| {
            state.reconcile(&roster());
            let locks = DirectoryLockManager::open("cli", &lock_dir);
            let mut router = TaskRouter::from_state(mux.clone(), &locks, std::mem::take(state));
            let done = router.mark_complete("worker-2")?;
            *state = router.into_state();
            Ok(done)
        })
        .unwrap()
        .unwrap();
    assert_eq!(completed.description, "first");

    let state = store.load().unwrap();
    assert!(state.pending.is_empty());
    assert_eq!(state.completed.len(), 1);
    let active = state.agents[1].active_task.as_ref().unwrap();
    assert_eq!(active.description, "second");
}
