//! Transaction context
//!
//! Owns one engine transaction plus the result cursors opened inside it.
//! Cursors are keyed by qid in an ordered map, so "most recent" is simply the
//! highest open key.
//!
//! # Lifecycle
//!
//! - Implicit (auto-commit): created by `RUN` in READY, holds exactly one
//!   cursor with qid 0 and is committed once that cursor is drained.
//! - Explicit: created by `BEGIN`, allocates qids 0, 1, 2, ... and is
//!   finished by `COMMIT` or `ROLLBACK`.
//!
//! `commit` and `rollback` consume the context. Dropping a context that still
//! owns an engine transaction rolls it back.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bookmark::Bookmark;
use crate::cancel::CancellationToken;
use crate::cursor::ResultCursor;
use crate::engine::{EngineTransaction, QueryEngine};
use crate::error::{BoltError, EngineError, Fault, FaultResult, Result, Status};
use crate::messages::{AccessMode, FetchSize, Parameters, ResultTarget};
use crate::response::ResponseSink;

pub const PERIODIC_COMMIT_IN_OPEN_TRANSACTION: &str =
    "Executing queries that use periodic commit in an open transaction is not possible.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Auto-commit around a single statement
    Implicit,
    /// Bounded by BEGIN and COMMIT/ROLLBACK
    Explicit,
}

/// Columns and qid of a freshly opened result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub qid: u64,
    pub columns: Vec<String>,
    /// Milliseconds until the result was available
    pub t_first: u64,
}

/// Outcome of one PULL/DISCARD batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    pub qid: u64,
    pub has_more: bool,
}

pub struct TransactionContext {
    kind: TransactionKind,
    database: String,
    database_id: String,
    mode: AccessMode,
    engine: Arc<dyn QueryEngine>,
    tx: Option<Box<dyn EngineTransaction>>,
    cursors: BTreeMap<u64, ResultCursor>,
    next_qid: u64,
    periodic_commit_active: bool,
    /// Highest tx id committed by a periodic-commit statement
    periodic_tx_id: Option<u64>,
    token: CancellationToken,
}

impl TransactionContext {
    /// Open a context over a fresh engine transaction on `database`.
    pub fn begin(
        engine: Arc<dyn QueryEngine>,
        kind: TransactionKind,
        database: &str,
        mode: AccessMode,
        token: CancellationToken,
    ) -> Result<Self> {
        let database_id = engine.database_id(database)?;
        let tx = engine.begin(database, mode)?;
        debug!(database, ?kind, mode = mode.as_str(), "transaction opened");

        Ok(Self {
            kind,
            database: database.to_string(),
            database_id,
            mode,
            engine,
            tx: Some(tx),
            cursors: BTreeMap::new(),
            next_qid: 0,
            periodic_commit_active: false,
            periodic_tx_id: None,
            token,
        })
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn is_implicit(&self) -> bool {
        self.kind == TransactionKind::Implicit
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn open_cursor_count(&self) -> usize {
        self.cursors.len()
    }

    /// Highest qid still open
    pub fn most_recent_qid(&self) -> Option<u64> {
        self.cursors.keys().next_back().copied()
    }

    pub fn open_qids(&self) -> Vec<u64> {
        self.cursors.keys().copied().collect()
    }

    pub fn is_periodic_commit_active(&self) -> bool {
        self.periodic_commit_active
    }

    /// Execute `statement` and register its cursor under the next qid.
    pub fn run(&mut self, statement: &str, parameters: &Parameters) -> FaultResult<RunOutcome> {
        if self.periodic_commit_active {
            return Err(Fault::breach(
                "A periodic commit statement is still running in this transaction",
            ));
        }
        if self.is_implicit() && !self.cursors.is_empty() {
            return Err(Fault::breach("Auto-commit transaction already holds an open result"));
        }

        let started = std::time::Instant::now();
        let cursor = if self.engine.is_periodic_commit(statement) {
            self.run_periodic(statement, parameters)?
        } else {
            let tx = self.tx.as_mut().ok_or(EngineError::TransactionClosed)?;
            let result = tx.execute(statement, parameters, &self.token)?;
            ResultCursor::new(self.next_qid, result)
        };

        let qid = cursor.qid();
        let columns = cursor.columns().to_vec();
        self.cursors.insert(qid, cursor);
        self.next_qid += 1;

        Ok(RunOutcome { qid, columns, t_first: started.elapsed().as_millis() as u64 })
    }

    /// Release the engine transaction, let the engine commit in batches, then
    /// reopen so later work sees a fresh transaction.
    fn run_periodic(&mut self, statement: &str, parameters: &Parameters) -> FaultResult<ResultCursor> {
        match self.kind {
            TransactionKind::Explicit => {
                return Err(Fault::recoverable(
                    Status::SemanticError,
                    PERIODIC_COMMIT_IN_OPEN_TRANSACTION,
                ));
            }
            TransactionKind::Implicit if !self.cursors.is_empty() => {
                return Err(Fault::breach(
                    "Periodic commit must be the only statement of its transaction",
                ));
            }
            TransactionKind::Implicit => {}
        }

        if let Some(tx) = self.tx.take() {
            tx.rollback()?;
        }

        self.periodic_commit_active = true;
        let executed = self.engine.execute_periodic_commit(
            &self.database,
            statement,
            parameters,
            self.mode,
            &self.token,
        );
        let reopened = self.engine.begin(&self.database, self.mode);

        let outcome = match executed {
            Ok(outcome) => outcome,
            Err(err) => {
                self.periodic_commit_active = false;
                self.tx = reopened.ok();
                return Err(err.into());
            }
        };
        match reopened {
            Ok(tx) => self.tx = Some(tx),
            Err(err) => {
                warn!(
                    database = %self.database,
                    committed_tx_id = outcome.committed_tx_id,
                    error = %err,
                    "periodic commit batches committed but transaction could not be reopened"
                );
                self.periodic_commit_active = false;
                return Err(err.into());
            }
        }
        self.periodic_tx_id = self.periodic_tx_id.max(outcome.committed_tx_id);
        debug!(
            database = %self.database,
            committed_tx_id = outcome.committed_tx_id,
            "periodic commit executed"
        );

        Ok(ResultCursor::new(self.next_qid, outcome.result))
    }

    /// Emit up to `size` records from the addressed result.
    pub fn pull(
        &mut self,
        target: ResultTarget,
        size: FetchSize,
        sink: &mut dyn ResponseSink,
    ) -> FaultResult<StreamOutcome> {
        let qid = self.resolve(target)?;
        let streamed = match self.cursors.get_mut(&qid) {
            Some(cursor) => cursor.pull(size, sink),
            None => return Err(result_not_found(qid)),
        };
        self.settle_cursor(qid, streamed)
    }

    /// Throw away up to `size` records from the addressed result.
    pub fn discard(&mut self, target: ResultTarget, size: FetchSize) -> FaultResult<StreamOutcome> {
        let qid = self.resolve(target)?;
        let streamed = match self.cursors.get_mut(&qid) {
            Some(cursor) => cursor.discard(size),
            None => return Err(result_not_found(qid)),
        };
        self.settle_cursor(qid, streamed)
    }

    /// Drop the cursor once it is drained or broken.
    fn settle_cursor(&mut self, qid: u64, streamed: FaultResult<bool>) -> FaultResult<StreamOutcome> {
        match streamed {
            Ok(true) => Ok(StreamOutcome { qid, has_more: true }),
            Ok(false) => {
                self.close_cursor(qid);
                Ok(StreamOutcome { qid, has_more: false })
            }
            Err(fault) => {
                self.close_cursor(qid);
                Err(fault)
            }
        }
    }

    fn close_cursor(&mut self, qid: u64) {
        if self.cursors.remove(&qid).is_some() {
            self.periodic_commit_active = false;
        }
    }

    fn resolve(&self, target: ResultTarget) -> FaultResult<u64> {
        match target {
            ResultTarget::MostRecent => self.most_recent_qid().ok_or_else(|| {
                Fault::recoverable(Status::ResultNotFound, "No open result to stream from")
            }),
            ResultTarget::Qid(qid) if self.cursors.contains_key(&qid) => Ok(qid),
            ResultTarget::Qid(qid) => Err(result_not_found(qid)),
        }
    }

    /// Close open cursors and commit.
    ///
    /// Returns a bookmark when the engine reports a write, either from this
    /// transaction or from the batches of a periodic-commit statement.
    pub fn commit(mut self) -> Result<Option<Bookmark>> {
        self.cursors.clear();
        let committed = match self.tx.take() {
            Some(tx) => tx.commit().map_err(|err| {
                BoltError::with_cause(err.commit_status(), err.to_string(), err)
            })?,
            None => None,
        };

        let tx_id = committed.max(self.periodic_tx_id);
        debug!(database = %self.database, ?tx_id, kind = ?self.kind, "transaction committed");
        Ok(tx_id.map(|id| Bookmark::new(self.database_id.clone(), id)))
    }

    pub fn rollback(mut self) -> Result<()> {
        self.cursors.clear();
        if let Some(tx) = self.tx.take() {
            tx.rollback().map_err(|err| {
                BoltError::with_cause(
                    Status::RollbackFailed,
                    format!("Transaction rollback failed: {}", err),
                    err,
                )
            })?;
        }
        debug!(database = %self.database, kind = ?self.kind, "transaction rolled back");
        Ok(())
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(err) = tx.rollback() {
                warn!(database = %self.database, error = %err, "rollback of dropped transaction failed");
            }
        }
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("kind", &self.kind)
            .field("database", &self.database)
            .field("mode", &self.mode)
            .field("cursors", &self.open_qids())
            .field("next_qid", &self.next_qid)
            .field("periodic_commit_active", &self.periodic_commit_active)
            .finish()
    }
}

fn result_not_found(qid: u64) -> Fault {
    Fault::recoverable(
        Status::ResultNotFound,
        format!("No open result with qid {}", qid),
    )
}
