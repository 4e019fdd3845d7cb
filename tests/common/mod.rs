//! Shared helpers for the session integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use boltsm::auth::NoAuth;
use boltsm::cancel::CancellationToken;
use boltsm::config::SessionConfig;
use boltsm::engine::{
    EngineTransaction, MemoryEngine, PeriodicCommitResult, QueryEngine, QueryResult,
};
use boltsm::error::{EngineError, EngineResult};
use boltsm::messages::{AccessMode, Parameters};
use boltsm::response::{Metadata, Response, ResponseRecorder};
use boltsm::{ConnectionFatality, Request, Session, State};

pub const DB: &str = "neo4j";

/// Statement that streams for a very long time unless cancelled
pub const ENDLESS: &str = "UNWIND range(1, 1000000000000) AS x RETURN x";

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub fn memory_engine() -> Arc<MemoryEngine> {
    Arc::new(MemoryEngine::new(DB).expect("default database"))
}

pub fn config() -> SessionConfig {
    SessionConfig::default().with_bookmark_timeout(Duration::from_millis(200))
}

/// Session in CONNECTED state over `engine`
pub fn connect(engine: Arc<dyn QueryEngine>, id: usize) -> Session {
    Session::new(id, engine, Arc::new(NoAuth), config())
}

/// Session that already completed HELLO
pub fn ready_session(engine: Arc<dyn QueryEngine>) -> Session {
    let mut session = connect(engine, 1);
    let responses = send(&mut session, Request::hello("itest/1.0"));
    assert!(responses[0].is_success());
    assert_eq!(session.state(), State::Ready);
    session
}

/// Fresh engine plus a READY session on it
pub fn ready() -> (Arc<MemoryEngine>, Session) {
    let engine = memory_engine();
    let session = ready_session(engine.clone());
    (engine, session)
}

/// Process a request that must not kill the connection.
pub fn send(session: &mut Session, request: Request) -> Vec<Response> {
    let name = request.name();
    let mut sink = ResponseRecorder::new();
    if let Err(fatal) = session.process(request, &mut sink) {
        panic!("{} killed the session: {} ({:?})", name, fatal, sink.responses());
    }
    sink.take()
}

/// Process a request that must kill the connection.
pub fn send_fatal(session: &mut Session, request: Request) -> (ConnectionFatality, Vec<Response>) {
    let mut sink = ResponseRecorder::new();
    match session.process(request, &mut sink) {
        Ok(()) => panic!("expected a fatal outcome, got {:?}", sink.responses()),
        Err(fatal) => (fatal, sink.take()),
    }
}

/// Last summary of a request, which must be a success
pub fn success(responses: &[Response]) -> &Metadata {
    match responses.last() {
        Some(Response::Success { metadata }) => metadata,
        other => panic!("expected success, got {:?}", other),
    }
}

pub fn failure_code(responses: &[Response]) -> &str {
    responses
        .last()
        .and_then(Response::failure_code)
        .unwrap_or_else(|| panic!("expected failure, got {:?}", responses))
}

pub fn is_ignored(responses: &[Response]) -> bool {
    responses.len() == 1 && responses[0].is_ignored()
}

pub fn records(responses: &[Response]) -> Vec<Vec<serde_json::Value>> {
    responses.iter().filter_map(|r| r.values().map(|v| v.to_vec())).collect()
}

/// Run a statement in auto-commit mode and pull everything.
pub fn auto_commit(session: &mut Session, statement: &str) -> Vec<Response> {
    let run = send(session, Request::run(statement));
    assert!(run[0].is_success(), "RUN {} failed: {:?}", statement, run);
    send(session, Request::pull_all())
}

/// Count nodes through a fresh auto-commit query.
pub fn count_nodes(session: &mut Session, label: &str) -> i64 {
    let pull = auto_commit(session, &format!("MATCH (n:{}) RETURN count(n)", label));
    records(&pull)[0][0].as_i64().expect("count")
}

// ---------------------------------------------------------------------------
// Faulty engine
// ---------------------------------------------------------------------------

/// Wraps the memory engine and fails commits, rollbacks or begins on demand.
pub struct FaultyEngine {
    inner: Arc<MemoryEngine>,
    fail_commit: Arc<AtomicBool>,
    fail_rollback: Arc<AtomicBool>,
    fail_begin: AtomicBool,
    /// Start failing begins once a periodic commit has run
    fail_begin_after_periodic: AtomicBool,
}

impl FaultyEngine {
    pub fn new(inner: Arc<MemoryEngine>) -> Self {
        Self {
            inner,
            fail_commit: Arc::new(AtomicBool::new(false)),
            fail_rollback: Arc::new(AtomicBool::new(false)),
            fail_begin: AtomicBool::new(false),
            fail_begin_after_periodic: AtomicBool::new(false),
        }
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rollbacks(&self, fail: bool) {
        self.fail_rollback.store(fail, Ordering::SeqCst);
    }

    pub fn fail_begins(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn fail_begins_after_periodic_commit(&self, fail: bool) {
        self.fail_begin_after_periodic.store(fail, Ordering::SeqCst);
    }
}

struct FaultyTransaction {
    inner: Box<dyn EngineTransaction>,
    fail_commit: Arc<AtomicBool>,
    fail_rollback: Arc<AtomicBool>,
}

impl EngineTransaction for FaultyTransaction {
    fn execute(
        &mut self,
        statement: &str,
        parameters: &Parameters,
        token: &CancellationToken,
    ) -> EngineResult<Box<dyn QueryResult>> {
        self.inner.execute(statement, parameters, token)
    }

    fn commit(self: Box<Self>) -> EngineResult<Option<u64>> {
        if self.fail_commit.load(Ordering::SeqCst) {
            self.inner.rollback()?;
            return Err(EngineError::Internal("disk full".to_string()));
        }
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> EngineResult<()> {
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(EngineError::Internal("rollback log unavailable".to_string()));
        }
        self.inner.rollback()
    }
}

impl QueryEngine for FaultyEngine {
    fn default_database(&self) -> String {
        self.inner.default_database()
    }

    fn database_id(&self, database: &str) -> EngineResult<String> {
        self.inner.database_id(database)
    }

    fn begin(&self, database: &str, mode: AccessMode) -> EngineResult<Box<dyn EngineTransaction>> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(EngineError::Internal("transaction log unavailable".to_string()));
        }
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin(database, mode)?,
            fail_commit: Arc::clone(&self.fail_commit),
            fail_rollback: Arc::clone(&self.fail_rollback),
        }))
    }

    fn last_applied_tx_id(&self, database: &str) -> EngineResult<u64> {
        self.inner.last_applied_tx_id(database)
    }

    fn await_tx_id(&self, database: &str, tx_id: u64, timeout: Duration) -> EngineResult<bool> {
        self.inner.await_tx_id(database, tx_id, timeout)
    }

    fn is_periodic_commit(&self, statement: &str) -> bool {
        self.inner.is_periodic_commit(statement)
    }

    fn execute_periodic_commit(
        &self,
        database: &str,
        statement: &str,
        parameters: &Parameters,
        mode: AccessMode,
        token: &CancellationToken,
    ) -> EngineResult<PeriodicCommitResult> {
        let outcome = self.inner.execute_periodic_commit(database, statement, parameters, mode, token)?;
        if self.fail_begin_after_periodic.load(Ordering::SeqCst) {
            self.fail_begin.store(true, Ordering::SeqCst);
        }
        Ok(outcome)
    }
}
