//! Integration test: bookmarks and causal consistency across sessions.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use boltsm::auth::NoAuth;
use boltsm::bookmark;
use boltsm::config::SessionConfig;
use boltsm::engine::{MemoryEngine, QueryEngine};
use boltsm::error::Status;
use boltsm::messages::Parameters;
use boltsm::{Request, Session, State};

use common::*;

fn run_after(statement: &str, bookmarks: Vec<String>) -> Request {
    Request::Run {
        statement: statement.to_string(),
        parameters: Parameters::new(),
        db: None,
        bookmarks,
        mode: None,
    }
}

fn write_bookmark(session: &mut Session, statement: &str) -> String {
    let pull = auto_commit(session, statement);
    success(&pull)["bookmark"]
        .as_str()
        .expect("write should produce a bookmark")
        .to_string()
}

fn default_db_id(engine: &MemoryEngine) -> String {
    engine.database_id(DB).unwrap()
}

// ---------------------------------------------------------------------------
// Producing bookmarks
// ---------------------------------------------------------------------------

#[test]
fn test_bookmarks_track_committed_tx_ids() {
    let (engine, mut session) = ready();
    let id = default_db_id(&engine);

    assert_eq!(write_bookmark(&mut session, "CREATE (n)"), bookmark::encode(&id, 1));
    assert_eq!(write_bookmark(&mut session, "CREATE (n)"), bookmark::encode(&id, 2));

    send(&mut session, Request::begin());
    send(&mut session, Request::run("CREATE (n)"));
    let commit = send(&mut session, Request::Commit);
    assert_eq!(success(&commit)["bookmark"], serde_json::json!(bookmark::encode(&id, 3)));
}

#[test]
fn test_reads_produce_no_bookmark() {
    let (_engine, mut session) = ready();
    let pull = auto_commit(&mut session, "MATCH (n) RETURN count(n)");
    assert!(!success(&pull).contains_key("bookmark"));
}

// ---------------------------------------------------------------------------
// Waiting on bookmarks
// ---------------------------------------------------------------------------

#[test]
fn test_bookmark_from_other_session_is_honoured() {
    let engine = memory_engine();
    let mut reader = ready_session(engine.clone());
    let mut writer = ready_session(engine.clone());

    let bookmark = write_bookmark(&mut writer, "CREATE (n:Shared)");

    // The reader opened before the write, so it has to consult the engine
    let begin = send(&mut reader, Request::begin_after(vec![bookmark.clone()]));
    assert!(begin[0].is_success());
    send(&mut reader, Request::run("MATCH (n:Shared) RETURN count(n)"));
    let pull = send(&mut reader, Request::pull_all());
    assert_eq!(records(&pull), vec![vec![serde_json::json!(1)]]);
    send(&mut reader, Request::Commit);

    let run = send(&mut reader, run_after("RETURN 1", vec![bookmark]));
    assert!(run[0].is_success());
}

#[test]
fn test_future_bookmark_times_out() {
    let (engine, mut session) = ready();
    let future = bookmark::encode(&default_db_id(&engine), 42);

    let started = Instant::now();
    let begin = send(&mut session, Request::begin_after(vec![future]));
    assert!(started.elapsed() >= Duration::from_millis(150));

    assert_eq!(failure_code(&begin), Status::BookmarkTimeout.code());
    assert_eq!(session.state(), State::Failed);
    assert!(!session.has_transaction());
}

#[test]
fn test_future_bookmark_on_run_times_out() {
    let (engine, mut session) = ready();
    let future = bookmark::encode(&default_db_id(&engine), 7);

    let run = send(&mut session, run_after("RETURN 1", vec![future]));
    assert_eq!(failure_code(&run), Status::BookmarkTimeout.code());
    assert!(!session.has_transaction());
}

#[test]
fn test_wait_wakes_on_commit() {
    let engine = memory_engine();
    let dyn_engine: Arc<dyn QueryEngine> = engine.clone();
    let mut waiter = Session::new(
        2,
        dyn_engine,
        Arc::new(NoAuth),
        SessionConfig::default().with_bookmark_timeout(Duration::from_secs(10)),
    );
    send(&mut waiter, Request::hello("waiter/1.0"));
    let expected = bookmark::encode(&default_db_id(&engine), 1);

    let handle = thread::spawn(move || {
        let responses = send(&mut waiter, Request::begin_after(vec![expected]));
        (waiter, responses)
    });

    thread::sleep(Duration::from_millis(50));
    let mut writer = ready_session(engine.clone());
    write_bookmark(&mut writer, "CREATE (n)");

    let (waiter, responses) = handle.join().unwrap();
    assert!(responses[0].is_success());
    assert_eq!(waiter.state(), State::InTransaction);
}

#[test]
fn test_invalid_bookmark_is_recoverable() {
    for text in ["no-separator", ":5", "neo4j-00000001:abc"] {
        let (_engine, mut session) = ready();
        let begin = send(&mut session, Request::begin_after(vec![text.to_string()]));
        assert_eq!(failure_code(&begin), Status::InvalidBookmark.code(), "bookmark {:?}", text);
        assert_eq!(session.state(), State::Failed);
    }
}

#[test]
fn test_bookmarks_for_other_databases_are_ignored() {
    let engine = memory_engine();
    engine.create_database("other").unwrap();
    let other_id = engine.database_id("other").unwrap();
    let mut session = ready_session(engine);

    let begin = send(&mut session, Request::begin_after(vec![bookmark::encode(&other_id, 99)]));
    assert!(begin[0].is_success());
    assert_eq!(session.state(), State::InTransaction);
}

#[test]
fn test_named_database_waits_on_its_own_bookmarks() {
    let engine = memory_engine();
    engine.create_database("archive").unwrap();
    let archive_id = engine.database_id("archive").unwrap();
    let mut session = ready_session(engine);

    let begin = send(
        &mut session,
        Request::Begin {
            bookmarks: vec![bookmark::encode(&archive_id, 3)],
            db: Some("archive".to_string()),
            mode: None,
        },
    );
    assert_eq!(failure_code(&begin), Status::BookmarkTimeout.code());
}
