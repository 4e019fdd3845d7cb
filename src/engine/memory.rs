//! MemoryEngine - in-process reference query engine
//!
//! A small transactional graph store that implements the engine traits well
//! enough to exercise every path of the session state machine.
//!
//! # Architecture
//!
//! - `MemoryEngine` is a thread-safe catalogue of named databases
//! - Each `Database` keeps its committed graph behind a `Mutex` together with
//!   the last applied transaction id; a `Condvar` wakes causal waiters
//! - A transaction reads from the snapshot taken at `begin` plus its own
//!   writes, and logs every write as a [`WriteOp`]
//! - Commit replays the log onto the latest committed graph, validates it and
//!   publishes the result under a fresh transaction id
//!
//! # Usage
//!
//! ```
//! use boltsm::engine::{EngineTransaction, MemoryEngine, QueryEngine};
//! use boltsm::messages::{AccessMode, Parameters};
//! use boltsm::cancel::CancellationToken;
//!
//! let engine = MemoryEngine::new("neo4j").unwrap();
//! let mut tx = engine.begin("neo4j", AccessMode::Write).unwrap();
//! tx.execute("CREATE (:Person {name: 'Ada'})", &Parameters::new(), &CancellationToken::new())
//!     .unwrap();
//! let tx_id = tx.commit().unwrap();
//! assert_eq!(tx_id, Some(1));
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};

use regex_lite::Regex;
use tracing::debug;

use super::exec::{self, Graph, IdAllocator, Row, Store, StreamingResult, WriteOp};
use super::statement::{self, Clause, Statement};
use super::{BufferedResult, EngineTransaction, PeriodicCommitResult, QueryEngine, QueryResult};
use crate::cancel::CancellationToken;
use crate::error::{EngineError, EngineResult};
use crate::messages::{AccessMode, Parameters};

fn periodic_commit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*USING\s+PERIODIC\s+COMMIT\b").expect("periodic commit pattern is valid")
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Committed state of one database
struct Committed {
    graph: Arc<Graph>,
    last_tx_id: u64,
}

/// Database entry in the engine
pub struct Database {
    /// Database name (for identification)
    pub name: String,
    /// Store id, unique per engine; bookmark prefix
    pub id: String,
    state: Mutex<Committed>,
    applied: Condvar,
    ids: IdAllocator,
}

impl Database {
    fn new(name: String, id: String) -> Self {
        Self {
            name,
            id,
            state: Mutex::new(Committed { graph: Arc::new(Graph::default()), last_tx_id: 0 }),
            applied: Condvar::new(),
            ids: IdAllocator::default(),
        }
    }

    fn snapshot(&self) -> Arc<Graph> {
        Arc::clone(&lock(&self.state).graph)
    }

    pub fn last_tx_id(&self) -> u64 {
        lock(&self.state).last_tx_id
    }

    pub fn node_count(&self) -> usize {
        self.snapshot().node_count()
    }

    pub fn relationship_count(&self) -> usize {
        self.snapshot().relationship_count()
    }

    /// Replay `ops` onto the latest graph and publish it under a new tx id.
    fn apply(&self, ops: &[WriteOp]) -> EngineResult<u64> {
        let mut state = lock(&self.state);

        let mut graph = Graph::clone(&state.graph);
        for op in ops {
            graph.apply(op);
        }
        graph.validate(ops)?;

        state.graph = Arc::new(graph);
        state.last_tx_id += 1;
        let tx_id = state.last_tx_id;
        drop(state);

        self.applied.notify_all();
        debug!(database = %self.name, tx_id, writes = ops.len(), "committed");
        Ok(tx_id)
    }

    fn await_tx_id(&self, tx_id: u64, timeout: Duration) -> bool {
        let state = lock(&self.state);
        let (state, _) = self
            .applied
            .wait_timeout_while(state, timeout, |s| s.last_tx_id < tx_id)
            .unwrap_or_else(PoisonError::into_inner);
        state.last_tx_id >= tx_id
    }
}

/// Database information for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub id: String,
    pub node_count: usize,
    pub relationship_count: usize,
    pub last_tx_id: u64,
}

/// In-memory multi-database engine
pub struct MemoryEngine {
    databases: RwLock<HashMap<String, Arc<Database>>>,
    default_database: String,
    next_store: AtomicU64,
}

impl MemoryEngine {
    /// Create an engine holding one (default) database
    pub fn new(default_database: &str) -> EngineResult<Self> {
        let engine = Self {
            databases: RwLock::new(HashMap::new()),
            default_database: default_database.to_string(),
            next_store: AtomicU64::new(1),
        };
        engine.create_database(default_database)?;
        Ok(engine)
    }

    /// Validate database name
    ///
    /// Allowed characters: [a-zA-Z0-9_-]
    /// Length: 1-128 characters
    fn validate_name(name: &str) -> EngineResult<()> {
        if name.is_empty() || name.len() > 128 {
            return Err(EngineError::InvalidDatabaseName(
                "Name must be 1-128 characters".to_string(),
            ));
        }

        let valid = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(EngineError::InvalidDatabaseName(
                "Name can only contain a-z, A-Z, 0-9, _, -".to_string(),
            ));
        }

        Ok(())
    }

    pub fn create_database(&self, name: &str) -> EngineResult<()> {
        Self::validate_name(name)?;

        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        if databases.contains_key(name) {
            return Err(EngineError::DatabaseExists(name.to_string()));
        }

        let store = self.next_store.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{:08x}", name, store);
        databases.insert(name.to_string(), Arc::new(Database::new(name.to_string(), id)));
        Ok(())
    }

    pub fn database(&self, name: &str) -> EngineResult<Arc<Database>> {
        let databases = self.databases.read().unwrap_or_else(PoisonError::into_inner);
        databases
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::DatabaseNotFound(name.to_string()))
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn list_databases(&self) -> Vec<DatabaseInfo> {
        let databases = self.databases.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<DatabaseInfo> = databases
            .values()
            .map(|db| DatabaseInfo {
                name: db.name.clone(),
                id: db.id.clone(),
                node_count: db.node_count(),
                relationship_count: db.relationship_count(),
                last_tx_id: db.last_tx_id(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

fn split_return(statement: &Statement) -> (&[Clause], Vec<statement::ReturnItem>) {
    match statement.clauses.split_last() {
        Some((Clause::Return(items), rest)) => (rest, items.clone()),
        _ => (&statement.clauses[..], Vec::new()),
    }
}

impl QueryEngine for MemoryEngine {
    fn default_database(&self) -> String {
        self.default_database.clone()
    }

    fn database_id(&self, database: &str) -> EngineResult<String> {
        Ok(self.database(database)?.id.clone())
    }

    fn begin(&self, database: &str, mode: AccessMode) -> EngineResult<Box<dyn EngineTransaction>> {
        let db = self.database(database)?;
        let base = db.snapshot();
        Ok(Box::new(MemoryTransaction { db, mode, base, working: None, ops: Vec::new() }))
    }

    fn last_applied_tx_id(&self, database: &str) -> EngineResult<u64> {
        Ok(self.database(database)?.last_tx_id())
    }

    fn await_tx_id(&self, database: &str, tx_id: u64, timeout: Duration) -> EngineResult<bool> {
        Ok(self.database(database)?.await_tx_id(tx_id, timeout))
    }

    fn is_periodic_commit(&self, statement: &str) -> bool {
        periodic_commit_pattern().is_match(statement)
    }

    fn execute_periodic_commit(
        &self,
        database: &str,
        statement: &str,
        parameters: &Parameters,
        mode: AccessMode,
        token: &CancellationToken,
    ) -> EngineResult<PeriodicCommitResult> {
        let db = self.database(database)?;
        let parsed = statement::parse(statement)?;
        parsed.check_parameters(parameters)?;

        let batch_size = parsed.periodic_commit.ok_or_else(|| {
            EngineError::Internal("statement does not use periodic commit".to_string())
        })?;
        if parsed.is_write() && !mode.is_write() {
            return Err(EngineError::ReadOnlyMode);
        }

        let (clauses, items) = split_return(&parsed);
        let started = Instant::now();
        let mut committed_tx_id = None;
        let mut produced: Vec<Row> = Vec::new();

        let mut run_batch = |input: Vec<Row>, body: &[Clause]| -> EngineResult<()> {
            let base = db.snapshot();
            let mut graph = Graph::clone(&base);
            let mut ops = Vec::new();
            let mut store = Store::Write { graph: &mut graph, ops: &mut ops, ids: &db.ids };
            let rows = exec::run_clauses(body, input, &mut store, parameters, token)?;
            if !ops.is_empty() {
                committed_tx_id = Some(db.apply(&ops)?);
            }
            produced.extend(rows);
            Ok(())
        };

        match clauses.split_first() {
            Some((Clause::Unwind { expr, alias }, body)) => {
                let driving = exec::driving_values(expr, &db.snapshot(), parameters)?;
                let mut batch = Vec::new();
                for value in driving {
                    token.check()?;
                    let mut row = Row::new();
                    row.insert(alias.clone(), value);
                    batch.push(row);
                    if batch.len() as u64 >= batch_size {
                        run_batch(std::mem::take(&mut batch), body)?;
                    }
                }
                if !batch.is_empty() {
                    run_batch(batch, body)?;
                }
            }
            _ => run_batch(vec![Row::new()], clauses)?,
        }

        let columns: Vec<String> = items.iter().map(|i| i.name.clone()).collect();
        let graph = db.snapshot();
        let rows = exec::project(&items, &produced, &graph, parameters, token)?;
        debug!(
            database,
            batch_size,
            committed_tx_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "periodic commit finished"
        );

        Ok(PeriodicCommitResult {
            result: Box::new(BufferedResult::new(columns, rows, token.clone())),
            committed_tx_id,
        })
    }
}

/// Live transaction over one database
struct MemoryTransaction {
    db: Arc<Database>,
    mode: AccessMode,
    /// Committed graph as of `begin`
    base: Arc<Graph>,
    /// Base plus own writes, created on first write
    working: Option<Graph>,
    ops: Vec<WriteOp>,
}

impl MemoryTransaction {
    fn view(&self) -> &Graph {
        self.working.as_ref().unwrap_or(&self.base)
    }
}

impl EngineTransaction for MemoryTransaction {
    fn execute(
        &mut self,
        statement: &str,
        parameters: &Parameters,
        token: &CancellationToken,
    ) -> EngineResult<Box<dyn QueryResult>> {
        token.check()?;
        let parsed = statement::parse(statement)?;

        if parsed.periodic_commit.is_some() && !parsed.explain {
            return Err(EngineError::Semantic(
                "Executing queries that use periodic commit in an open transaction is not possible."
                    .to_string(),
            ));
        }
        parsed.check_parameters(parameters)?;

        let (clauses, items) = split_return(&parsed);
        let columns: Vec<String> = items.iter().map(|i| i.name.clone()).collect();

        if parsed.explain {
            return Ok(Box::new(BufferedResult::empty(columns)));
        }

        if parsed.is_write() {
            if !self.mode.is_write() {
                return Err(EngineError::ReadOnlyMode);
            }
            let base = &self.base;
            let working = self.working.get_or_insert_with(|| Graph::clone(base));
            let mut store = Store::Write { graph: working, ops: &mut self.ops, ids: &self.db.ids };
            let rows = exec::run_clauses(clauses, vec![Row::new()], &mut store, parameters, token)?;
            let projected = exec::project(&items, &rows, self.view(), parameters, token)?;
            return Ok(Box::new(BufferedResult::new(columns, projected, token.clone())));
        }

        if items.iter().any(|i| i.expr.is_aggregate()) {
            let graph = self.view();
            let rows = exec::run_clauses(clauses, vec![Row::new()], &mut Store::Read(graph), parameters, token)?;
            let projected = exec::project(&items, &rows, graph, parameters, token)?;
            return Ok(Box::new(BufferedResult::new(columns, projected, token.clone())));
        }

        let snapshot = match &self.working {
            Some(working) => Arc::new(working.clone()),
            None => Arc::clone(&self.base),
        };
        Ok(Box::new(StreamingResult::new(clauses, items, snapshot, parameters.clone(), token.clone())))
    }

    fn commit(self: Box<Self>) -> EngineResult<Option<u64>> {
        if self.ops.is_empty() {
            return Ok(None);
        }
        self.db.apply(&self.ops).map(Some)
    }

    fn rollback(self: Box<Self>) -> EngineResult<()> {
        debug!(database = %self.db.name, discarded = self.ops.len(), "rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    fn engine() -> MemoryEngine {
        MemoryEngine::new("neo4j").unwrap()
    }

    fn run(tx: &mut dyn EngineTransaction, statement: &str) -> EngineResult<Vec<Vec<serde_json::Value>>> {
        let mut result = tx.execute(statement, &Parameters::new(), &CancellationToken::new())?;
        let mut rows = Vec::new();
        while let Some(row) = result.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    // ============================================================================
    // Database catalogue
    // ============================================================================

    #[test]
    fn test_default_database_exists() {
        let engine = engine();
        assert_eq!(engine.default_database(), "neo4j");
        assert!(engine.database_exists("neo4j"));
        assert_eq!(engine.last_applied_tx_id("neo4j").unwrap(), 0);
    }

    #[test]
    fn test_create_database_rules() {
        let engine = engine();
        assert!(engine.create_database("other_db-1").is_ok());
        assert!(matches!(engine.create_database("neo4j"), Err(EngineError::DatabaseExists(_))));
        assert!(matches!(engine.create_database(""), Err(EngineError::InvalidDatabaseName(_))));
        assert!(matches!(engine.create_database("a.b"), Err(EngineError::InvalidDatabaseName(_))));
        assert!(matches!(engine.create_database(&"a".repeat(129)), Err(EngineError::InvalidDatabaseName(_))));
        assert!(matches!(engine.begin("missing", AccessMode::Write), Err(EngineError::DatabaseNotFound(_))));
    }

    #[test]
    fn test_store_ids_are_unique() {
        let engine = engine();
        engine.create_database("second").unwrap();
        let first = engine.database_id("neo4j").unwrap();
        let second = engine.database_id("second").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("neo4j-"));

        let names: Vec<String> = engine.list_databases().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["neo4j".to_string(), "second".to_string()]);
    }

    // ============================================================================
    // Transactions
    // ============================================================================

    #[test]
    fn test_read_only_commit_has_no_tx_id() {
        let engine = engine();
        let mut tx = engine.begin("neo4j", AccessMode::Write).unwrap();
        assert_eq!(run(tx.as_mut(), "RETURN 1").unwrap(), vec![vec![json!(1)]]);
        assert_eq!(tx.commit().unwrap(), None);
        assert_eq!(engine.last_applied_tx_id("neo4j").unwrap(), 0);
    }

    #[test]
    fn test_write_commit_advances_tx_id() {
        let engine = engine();
        let mut tx = engine.begin("neo4j", AccessMode::Write).unwrap();
        run(tx.as_mut(), "CREATE (:Person {name: 'Ada'})").unwrap();
        assert_eq!(tx.commit().unwrap(), Some(1));
        assert_eq!(engine.last_applied_tx_id("neo4j").unwrap(), 1);
        assert_eq!(engine.database("neo4j").unwrap().node_count(), 1);
    }

    #[test]
    fn test_uncommitted_writes_are_isolated() {
        let engine = engine();
        let mut writer = engine.begin("neo4j", AccessMode::Write).unwrap();
        run(writer.as_mut(), "CREATE (:Secret)").unwrap();

        assert_eq!(run(writer.as_mut(), "MATCH (n:Secret) RETURN count(*)").unwrap(), vec![vec![json!(1)]]);

        let mut reader = engine.begin("neo4j", AccessMode::Read).unwrap();
        assert_eq!(run(reader.as_mut(), "MATCH (n:Secret) RETURN count(*)").unwrap(), vec![vec![json!(0)]]);

        writer.rollback().unwrap();
        assert_eq!(engine.database("neo4j").unwrap().node_count(), 0);
    }

    #[test]
    fn test_delete_with_relationships_fails_at_commit() {
        let engine = engine();
        let mut tx = engine.begin("neo4j", AccessMode::Write).unwrap();
        run(tx.as_mut(), "CREATE (n:Victim)-[:REL]->()").unwrap();
        run(tx.as_mut(), "MATCH (n:Victim) DELETE n").unwrap();

        match tx.commit() {
            Err(EngineError::ConstraintViolation(message)) => {
                assert!(message.contains("still has relationships"))
            }
            other => panic!("Expected ConstraintViolation, got {:?}", other),
        }
        assert_eq!(engine.last_applied_tx_id("neo4j").unwrap(), 0);
    }

    #[test]
    fn test_read_mode_rejects_writes() {
        let engine = engine();
        let mut tx = engine.begin("neo4j", AccessMode::Read).unwrap();
        assert!(matches!(run(tx.as_mut(), "CREATE (n)"), Err(EngineError::ReadOnlyMode)));
    }

    #[test]
    fn test_explain_plans_without_executing() {
        let engine = engine();
        let mut tx = engine.begin("neo4j", AccessMode::Write).unwrap();
        let result = tx
            .execute("EXPLAIN CREATE (n) RETURN n", &Parameters::new(), &CancellationToken::new())
            .unwrap();
        assert_eq!(result.columns(), &["n".to_string()]);
        assert_eq!(tx.commit().unwrap(), None);
    }

    #[test]
    fn test_periodic_commit_rejected_inside_transaction() {
        let engine = engine();
        let mut tx = engine.begin("neo4j", AccessMode::Write).unwrap();
        let err = tx
            .execute(
                "USING PERIODIC COMMIT 10 UNWIND range(1, 5) AS x CREATE (:Row {v: x})",
                &Parameters::new(),
                &CancellationToken::new(),
            )
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Semantic(_)));
    }

    #[test]
    fn test_parameters_are_used() {
        let engine = engine();
        let mut tx = engine.begin("neo4j", AccessMode::Write).unwrap();
        let mut params = Parameters::new();
        params.insert("x".to_string(), json!(41));
        let mut result = tx.execute("RETURN $x + 1 AS y", &params, &CancellationToken::new()).unwrap();
        assert_eq!(result.next_row().unwrap(), Some(vec![json!(42)]));

        assert!(matches!(
            tx.execute("RETURN $missing", &Parameters::new(), &CancellationToken::new()).err(),
            Some(EngineError::ParameterMissing(_))
        ));
    }

    #[test]
    fn test_cancelled_token_terminates_execute() {
        let engine = engine();
        let mut tx = engine.begin("neo4j", AccessMode::Write).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            tx.execute("RETURN 1", &Parameters::new(), &token).err(),
            Some(EngineError::Terminated)
        ));
    }

    // ============================================================================
    // Periodic commit
    // ============================================================================

    #[test]
    fn test_periodic_commit_classification() {
        let engine = engine();
        assert!(engine.is_periodic_commit("USING PERIODIC COMMIT 40 UNWIND [1] AS x CREATE (n)"));
        assert!(engine.is_periodic_commit("  using periodic commit\nUNWIND [1] AS x CREATE (n)"));
        assert!(!engine.is_periodic_commit("EXPLAIN USING PERIODIC COMMIT UNWIND [1] AS x CREATE (n)"));
        assert!(!engine.is_periodic_commit("RETURN 1"));
    }

    #[test]
    fn test_periodic_commit_commits_in_batches() {
        let engine = engine();
        let result = engine
            .execute_periodic_commit(
                "neo4j",
                "USING PERIODIC COMMIT 40 UNWIND range(1, 150) AS x CREATE (s:Sample {v: x}) RETURN count(*) AS c",
                &Parameters::new(),
                AccessMode::Write,
                &CancellationToken::new(),
            )
            .unwrap();

        // 150 rows in batches of 40: 40, 40, 40, 30
        assert_eq!(result.committed_tx_id, Some(4));
        assert_eq!(engine.last_applied_tx_id("neo4j").unwrap(), 4);
        assert_eq!(engine.database("neo4j").unwrap().node_count(), 150);

        let mut rows = result.result;
        assert_eq!(rows.columns(), &["c".to_string()]);
        assert_eq!(rows.next_row().unwrap(), Some(vec![json!(150)]));
        assert_eq!(rows.next_row().unwrap(), None);
    }

    #[test]
    fn test_periodic_commit_read_mode() {
        let engine = engine();
        let err = engine
            .execute_periodic_commit(
                "neo4j",
                "USING PERIODIC COMMIT UNWIND [1] AS x CREATE (n)",
                &Parameters::new(),
                AccessMode::Read,
                &CancellationToken::new(),
            )
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::ReadOnlyMode));
    }

    // ============================================================================
    // Causal waits
    // ============================================================================

    #[test]
    fn test_await_tx_id_times_out() {
        let engine = engine();
        assert!(engine.await_tx_id("neo4j", 0, Duration::from_millis(1)).unwrap());
        assert!(!engine.await_tx_id("neo4j", 1, Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn test_await_tx_id_wakes_on_commit() {
        let engine = Arc::new(engine());
        let waiter = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.await_tx_id("neo4j", 1, Duration::from_secs(10)).unwrap())
        };

        thread::sleep(Duration::from_millis(20));
        let mut tx = engine.begin("neo4j", AccessMode::Write).unwrap();
        run(tx.as_mut(), "CREATE (n)").unwrap();
        tx.commit().unwrap();

        assert!(waiter.join().unwrap());
    }
}
