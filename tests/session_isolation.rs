//! Integration test: many sessions over one engine.
//!
//! Sessions share nothing but the engine; each owns its own transaction,
//! cursors and interrupt state.

mod common;

use std::sync::Arc;
use std::thread;

use boltsm::{Request, State};
use serde_json::json;

use common::*;

// ---------------------------------------------------------------------------
// Two sessions, one thread
// ---------------------------------------------------------------------------

#[test]
fn test_uncommitted_writes_are_invisible_to_others() {
    let engine = memory_engine();
    let mut alice = ready_session(engine.clone());
    let mut bob = ready_session(engine.clone());

    send(&mut alice, Request::begin());
    send(&mut alice, Request::run("CREATE (n:Draft)"));

    assert_eq!(count_nodes(&mut bob, "Draft"), 0);

    send(&mut alice, Request::Commit);
    assert_eq!(count_nodes(&mut bob, "Draft"), 1);
}

#[test]
fn test_snapshot_taken_at_begin() {
    let engine = memory_engine();
    let mut alice = ready_session(engine.clone());
    let mut bob = ready_session(engine.clone());

    send(&mut bob, Request::begin());
    auto_commit(&mut alice, "CREATE (n:Late)");

    send(&mut bob, Request::run("MATCH (n:Late) RETURN count(n)"));
    let pull = send(&mut bob, Request::pull_all());
    assert_eq!(records(&pull), vec![vec![json!(0)]]);
}

#[test]
fn test_cursors_are_per_session() {
    let engine = memory_engine();
    let mut alice = ready_session(engine.clone());
    let mut bob = ready_session(engine.clone());

    send(&mut alice, Request::begin());
    send(&mut bob, Request::begin());
    send(&mut alice, Request::run("UNWIND range(1, 4) AS x RETURN x"));
    send(&mut bob, Request::run("UNWIND range(10, 11) AS x RETURN x"));

    let a = send(&mut alice, Request::pull(2, Some(0)));
    let b = send(&mut bob, Request::pull(2, Some(0)));
    assert_eq!(records(&a), vec![vec![json!(1)], vec![json!(2)]]);
    assert_eq!(records(&b), vec![vec![json!(10)], vec![json!(11)]]);

    send(&mut bob, Request::Rollback);
    assert_eq!(bob.state(), State::Ready);

    let rest = send(&mut alice, Request::pull_all());
    assert_eq!(records(&rest), vec![vec![json!(3)], vec![json!(4)]]);
    assert_eq!(alice.state(), State::InTransaction);
}

#[test]
fn test_interrupt_is_per_session() {
    let engine = memory_engine();
    let mut alice = ready_session(engine.clone());
    let mut bob = ready_session(engine.clone());

    alice.interrupt_handle().interrupt();
    assert!(is_ignored(&send(&mut alice, Request::run("RETURN 1"))));

    let pull = auto_commit(&mut bob, "RETURN 1");
    assert!(pull.last().unwrap().is_success());
    assert_eq!(bob.interrupt_handle().pending(), 0);
}

#[test]
fn test_failure_is_per_session() {
    let engine = memory_engine();
    let mut alice = ready_session(engine.clone());
    let mut bob = ready_session(engine.clone());

    send(&mut alice, Request::run("RETRUN"));
    assert_eq!(alice.state(), State::Failed);
    assert_eq!(bob.state(), State::Ready);
    assert!(auto_commit(&mut bob, "RETURN 1").last().unwrap().is_success());
}

// ---------------------------------------------------------------------------
// Sessions on their own threads
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_sessions_commit_independently() {
    const SESSIONS: usize = 8;
    const WRITES: usize = 25;

    let engine = memory_engine();
    let mut workers = Vec::new();
    for _ in 0..SESSIONS {
        let engine = Arc::clone(&engine);
        workers.push(thread::spawn(move || {
            let mut session = ready_session(engine);
            for i in 0..WRITES {
                send(&mut session, Request::begin());
                send(&mut session, Request::run(format!("CREATE (n:Load {{i: {}}})", i)));
                let commit = send(&mut session, Request::Commit);
                assert!(commit[0].is_success(), "commit failed: {:?}", commit);
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let mut session = ready_session(engine.clone());
    assert_eq!(count_nodes(&mut session, "Load"), (SESSIONS * WRITES) as i64);
    assert_eq!(
        boltsm::engine::QueryEngine::last_applied_tx_id(engine.as_ref(), DB).unwrap(),
        (SESSIONS * WRITES) as u64
    );
}
