//! Query engine collaborator
//!
//! The session never parses or executes statements itself. It drives an
//! engine through three object-safe traits:
//!
//! - [`QueryEngine`]: database catalogue, transaction factory, causal-wait
//!   support and periodic-commit execution
//! - [`EngineTransaction`]: one live engine transaction
//! - [`QueryResult`]: lazily produced rows of one statement
//!
//! [`memory::MemoryEngine`] is the in-process reference implementation used
//! by the tests, the bench and the demo server.

mod exec;
pub mod memory;
pub mod statement;

use std::time::Duration;

use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::error::EngineResult;
use crate::messages::{AccessMode, Parameters};

pub use memory::MemoryEngine;

/// Factory and catalogue side of an engine. Shared by every session.
pub trait QueryEngine: Send + Sync {
    /// Database used when a request names none
    fn default_database(&self) -> String;

    /// Stable store identifier of a database; the prefix of its bookmarks.
    fn database_id(&self, database: &str) -> EngineResult<String>;

    fn begin(&self, database: &str, mode: AccessMode) -> EngineResult<Box<dyn EngineTransaction>>;

    /// Id of the last transaction applied to `database`.
    fn last_applied_tx_id(&self, database: &str) -> EngineResult<u64>;

    /// Block until `tx_id` is applied to `database`. `Ok(false)` on timeout.
    fn await_tx_id(&self, database: &str, tx_id: u64, timeout: Duration) -> EngineResult<bool>;

    /// Syntax-level check; `EXPLAIN` forms are never periodic.
    fn is_periodic_commit(&self, statement: &str) -> bool;

    /// Run a periodic-commit statement outside any session transaction.
    ///
    /// The engine opens and commits its own batch transactions.
    fn execute_periodic_commit(
        &self,
        database: &str,
        statement: &str,
        parameters: &Parameters,
        mode: AccessMode,
        token: &CancellationToken,
    ) -> EngineResult<PeriodicCommitResult>;
}

/// One live engine transaction, exclusively owned by a transaction context.
pub trait EngineTransaction: Send {
    fn execute(
        &mut self,
        statement: &str,
        parameters: &Parameters,
        token: &CancellationToken,
    ) -> EngineResult<Box<dyn QueryResult>>;

    /// Commit; `Some(tx_id)` only when the transaction wrote something.
    fn commit(self: Box<Self>) -> EngineResult<Option<u64>>;

    fn rollback(self: Box<Self>) -> EngineResult<()>;
}

/// Rows of one executed statement.
pub trait QueryResult: Send {
    fn columns(&self) -> &[String];

    /// Next row, `None` once exhausted. Polls cancellation.
    fn next_row(&mut self) -> EngineResult<Option<Vec<Value>>>;
}

/// Outcome of a periodic-commit execution
pub struct PeriodicCommitResult {
    pub result: Box<dyn QueryResult>,
    /// Highest transaction id committed by the batches
    pub committed_tx_id: Option<u64>,
}

impl std::fmt::Debug for PeriodicCommitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicCommitResult")
            .field("columns", &self.result.columns())
            .field("committed_tx_id", &self.committed_tx_id)
            .finish()
    }
}

/// Buffered [`QueryResult`] over already computed rows.
pub struct BufferedResult {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Vec<Value>>,
    token: CancellationToken,
}

impl BufferedResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>, token: CancellationToken) -> Self {
        Self { columns, rows: rows.into_iter(), token }
    }

    pub fn empty(columns: Vec<String>) -> Self {
        Self::new(columns, Vec::new(), CancellationToken::new())
    }
}

impl QueryResult for BufferedResult {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> EngineResult<Option<Vec<Value>>> {
        self.token.check()?;
        Ok(self.rows.next())
    }
}
