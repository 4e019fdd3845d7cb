//! Session - per-connection protocol state machine
//!
//! One [`Session`] per client connection. It validates every request against
//! the current [`State`], drives the owned [`TransactionContext`] and writes
//! response events into the caller's sink.
//!
//! # Dispatch
//!
//! `dispatch` is a single exhaustive `match` over `(state, request)`. Each arm
//! either runs a handler, answers `ignored`, or raises a protocol breach.
//! Handlers return a [`Fault`] instead of reporting failures themselves;
//! `settle` turns the fault into exactly one `failure` event and the matching
//! transition:
//!
//! - recoverable: implicit transaction destroyed, session moves to FAILED
//! - fatal: transaction rolled back, session CLOSED, caller gets an error
//! - output: nothing can be reported, session CLOSED, caller gets an error
//!
//! # Interrupts
//!
//! Interrupts arrive through an [`InterruptHandle`] from another thread. Before
//! each request the session checks the pending counter and, if non-zero,
//! enters INTERRUPTED. A reset then retires every interrupt it observed.

mod interrupt;
mod state;

pub use interrupt::InterruptHandle;
pub use state::State;

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthToken, Authenticator};
use crate::bookmark;
use crate::config::SessionConfig;
use crate::engine::QueryEngine;
use crate::error::{BoltError, ConnectionFatality, Fault, FaultResult};
use crate::messages::{AccessMode, FetchSize, Parameters, Request, ResultTarget};
use crate::metrics::Metrics;
use crate::response::{Metadata, ResponseSink, SinkError};
use crate::transaction::{TransactionContext, TransactionKind};

/// Unique id of a client session
pub type SessionId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Pull,
    Discard,
}

pub struct Session {
    id: SessionId,
    state: State,
    engine: Arc<dyn QueryEngine>,
    authenticator: Arc<dyn Authenticator>,
    config: SessionConfig,
    transaction: Option<TransactionContext>,
    interrupts: InterruptHandle,
    user: Option<String>,
    user_agent: Option<String>,
    /// Store id of the default database, captured at HELLO
    default_database_id: Option<String>,
    /// Last applied tx id of the default database, captured at HELLO
    last_applied_at_open: u64,
    metrics: Option<Arc<Metrics>>,
}

impl Session {
    /// Create a session in state CONNECTED.
    pub fn new(
        id: SessionId,
        engine: Arc<dyn QueryEngine>,
        authenticator: Arc<dyn Authenticator>,
        config: SessionConfig,
    ) -> Self {
        Self {
            id,
            state: State::Connected,
            engine,
            authenticator,
            config,
            transaction: None,
            interrupts: InterruptHandle::new(),
            user: None,
            user_agent: None,
            default_database_id: None,
            last_applied_at_open: 0,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn transaction(&self) -> Option<&TransactionContext> {
        self.transaction.as_ref()
    }

    /// Authenticated user, once HELLO succeeded
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Control handle for the transport's out-of-band path.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupts.clone()
    }

    /// Process one request, writing its responses into `sink`.
    ///
    /// `Err` means the connection must be torn down. The failure event, if
    /// one could be written, has already been emitted.
    pub fn process(
        &mut self,
        request: Request,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), ConnectionFatality> {
        if self.state == State::Closed {
            return Err(ConnectionFatality::Closed(self.id));
        }
        if self.interrupts.is_terminated() {
            info!(session = self.id, "session terminated");
            self.close();
            return Err(ConnectionFatality::Terminated(self.id));
        }

        let started = Instant::now();
        let message = request.name();
        let before = self.state;

        let outcome = match self.observe_interrupts() {
            Ok(()) => self.dispatch(request, sink),
            Err(fault) => Err(fault),
        };
        let result = match outcome {
            Ok(()) => Ok(()),
            Err(fault) => self.settle(fault, sink),
        };

        if before != self.state {
            debug!(session = self.id, request = message, from = %before, to = %self.state, "transition");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_request(message, started.elapsed().as_millis() as u64);
        }
        result
    }

    /// Report a failure raised outside the state machine, e.g. a request
    /// that could not be decoded.
    pub fn handle_external_failure(
        &mut self,
        error: BoltError,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), ConnectionFatality> {
        match self.state {
            State::Closed => Err(ConnectionFatality::Closed(self.id)),
            State::Failed | State::Interrupted => {
                debug!(session = self.id, error = %error, "external failure ignored");
                match sink.on_ignored() {
                    Ok(()) => Ok(()),
                    Err(err) => self.settle(Fault::from(err), sink),
                }
            }
            _ => self.settle(Fault::from(error), sink),
        }
    }

    /// In-band interrupt, for callers that own the session between requests.
    ///
    /// Same effect as [`InterruptHandle::interrupt`] followed by the check the
    /// next request would make, answered with an empty success.
    pub fn interrupt(&mut self, sink: &mut dyn ResponseSink) -> Result<(), ConnectionFatality> {
        if self.state == State::Closed {
            return Err(ConnectionFatality::Closed(self.id));
        }
        self.interrupts.interrupt();
        match self.observe_interrupts() {
            Ok(()) => match sink.on_success(Metadata::new()) {
                Ok(()) => Ok(()),
                Err(err) => self.settle(Fault::from(err), sink),
            },
            Err(fault) => self.settle(fault, sink),
        }
    }

    /// Roll back any transaction and enter CLOSED. Idempotent.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.release_transaction("close");
        self.state = State::Closed;
        info!(session = self.id, "session closed");
    }

    /// Move into INTERRUPTED when the control path has raised interrupts.
    fn observe_interrupts(&mut self) -> FaultResult<()> {
        if self.interrupts.pending() == 0 {
            return Ok(());
        }
        match self.state {
            State::Interrupted => Ok(()),
            State::Connected => Err(Fault::breach(
                "Interrupt received before the session was authenticated",
            )),
            state if state.accepts_interrupt() => {
                debug!(session = self.id, from = %state, "interrupted");
                if let Some(metrics) = &self.metrics {
                    metrics.record_interrupt();
                }
                self.state = State::Interrupted;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn dispatch(&mut self, request: Request, sink: &mut dyn ResponseSink) -> FaultResult<()> {
        use Request::*;

        match (self.state, request) {
            // process() never dispatches on a closed session
            (State::Closed, request) => Err(self.illegal(&request)),

            (State::Connected, Hello { user_agent, auth }) => self.hello(user_agent, auth, sink),
            (State::Connected, request) => Err(self.illegal(&request)),

            (State::Ready, Run { statement, parameters, db, bookmarks, mode }) => {
                self.run_auto_commit(&statement, &parameters, db, &bookmarks, mode, sink)
            }
            (State::Ready, Begin { bookmarks, db, mode }) => self.begin(&bookmarks, db, mode, sink),
            (State::Ready, Reset) => self.reset(sink),
            (State::Ready, Goodbye) => {
                self.close();
                Ok(())
            }
            (State::Ready, request @ (Hello { .. } | Pull { .. } | Discard { .. } | Commit | Rollback)) => {
                Err(self.illegal(&request))
            }

            (State::AutoCommitStreaming, Pull { n, qid }) => {
                self.stream_auto_commit(StreamKind::Pull, n, qid, sink)
            }
            (State::AutoCommitStreaming, Discard { n, qid }) => {
                self.stream_auto_commit(StreamKind::Discard, n, qid, sink)
            }
            (State::AutoCommitStreaming, Reset) => self.reset(sink),
            (State::AutoCommitStreaming, request) => Err(self.illegal(&request)),

            (State::InTransaction, Run { statement, parameters, .. }) => {
                self.run_in_transaction(&statement, &parameters, sink)
            }
            (State::InTransaction, Pull { n, qid }) => {
                self.stream_in_transaction(StreamKind::Pull, n, qid, sink)
            }
            (State::InTransaction, Discard { n, qid }) => {
                self.stream_in_transaction(StreamKind::Discard, n, qid, sink)
            }
            (State::InTransaction, Commit) => self.commit(sink),
            (State::InTransaction, Rollback) => self.rollback(sink),
            (State::InTransaction, Reset) => self.reset(sink),
            (State::InTransaction, request @ (Hello { .. } | Begin { .. } | Goodbye)) => {
                Err(self.illegal(&request))
            }

            (State::Failed, Run { .. } | Pull { .. } | Discard { .. } | Commit | Rollback) => {
                Ok(sink.on_ignored()?)
            }
            (State::Failed, Reset) => self.reset(sink),
            (State::Failed, request @ (Hello { .. } | Begin { .. } | Goodbye)) => {
                Err(self.illegal(&request))
            }

            (State::Interrupted, Reset) => self.reset(sink),
            (State::Interrupted, _) => Ok(sink.on_ignored()?),
        }
    }

    fn illegal(&self, request: &Request) -> Fault {
        Fault::breach(format!(
            "Message '{}' cannot be handled by a session in the {} state.",
            request, self.state
        ))
    }

    /// Report `fault` and apply its transition.
    fn settle(&mut self, fault: Fault, sink: &mut dyn ResponseSink) -> Result<(), ConnectionFatality> {
        match fault {
            Fault::Recoverable(err) => {
                warn!(session = self.id, error = %err, "request failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure();
                }
                self.discard_implicit();
                self.state = State::Failed;

                match sink.on_failure(&err) {
                    Ok(()) => Ok(()),
                    Err(SinkError::Rejected(reason)) => {
                        error!(session = self.id, reason = %reason, "failure response could not be published");
                        Ok(())
                    }
                    Err(SinkError::Broken(io)) => self.abandon(io),
                }
            }
            Fault::Fatal(err) => {
                error!(session = self.id, error = %err, "fatal protocol failure");
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure();
                }
                if let Err(sink_err) = sink.on_failure(&err) {
                    warn!(session = self.id, error = %sink_err, "could not report fatal failure");
                }
                self.close();
                Err(ConnectionFatality::from_error(&err))
            }
            Fault::Output(io) => self.abandon(io),
        }
    }

    fn abandon(&mut self, io: std::io::Error) -> Result<(), ConnectionFatality> {
        error!(session = self.id, error = %io, "output channel broken, abandoning connection");
        self.close();
        Err(ConnectionFatality::OutputBroken(io))
    }

    /// Roll back and drop whatever transaction the session owns.
    fn release_transaction(&mut self, reason: &str) {
        let Some(context) = self.transaction.take() else {
            return;
        };
        match context.rollback() {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_rollback();
                }
            }
            Err(err) => warn!(session = self.id, reason, error = %err, "rollback failed"),
        }
    }

    /// Implicit transactions never outlive a failure; explicit ones wait for
    /// ROLLBACK or reset.
    fn discard_implicit(&mut self) {
        if self.transaction.as_ref().is_some_and(TransactionContext::is_implicit) {
            self.release_transaction("failure");
        }
    }

    fn context(&mut self) -> FaultResult<&mut TransactionContext> {
        let state = self.state;
        self.transaction
            .as_mut()
            .ok_or_else(|| Fault::breach(format!("No transaction is open in the {} state", state)))
    }

    fn resolve_database(&self, db: Option<String>) -> String {
        db.filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.engine.default_database())
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    fn hello(&mut self, user_agent: String, auth: AuthToken, sink: &mut dyn ResponseSink) -> FaultResult<()> {
        let user = self.authenticator.authenticate(&auth)?;

        let default_database = self.engine.default_database();
        self.default_database_id = self.engine.database_id(&default_database).ok();
        self.last_applied_at_open = match self.engine.last_applied_tx_id(&default_database) {
            Ok(tx_id) => tx_id,
            Err(err) => {
                warn!(session = self.id, error = %err, "could not read last applied transaction");
                0
            }
        };

        info!(session = self.id, user = %user, user_agent = %user_agent, "authenticated");
        self.user = Some(user);
        self.user_agent = Some(user_agent);
        self.state = State::Ready;

        let mut metadata = Metadata::new();
        metadata.insert("server".into(), Value::from(self.config.server_agent.clone()));
        metadata.insert("connection_id".into(), Value::from(format!("bolt-{}", self.id)));
        Ok(sink.on_success(metadata)?)
    }

    /// Causal gate. Bookmarks already covered by the id seen at HELLO
    /// need no wait.
    fn await_bookmarks(&self, database: &str, bookmarks: &[String]) -> FaultResult<()> {
        if bookmarks.is_empty() {
            return Ok(());
        }

        if database == self.engine.default_database() {
            if let Some(database_id) = &self.default_database_id {
                let required = bookmark::required_tx_id(database_id, bookmarks)?;
                if required.map_or(true, |tx_id| tx_id <= self.last_applied_at_open) {
                    return Ok(());
                }
            }
        }

        Ok(bookmark::await_up_to(
            self.engine.as_ref(),
            database,
            bookmarks,
            self.config.bookmark_timeout,
        )?)
    }

    fn open(&mut self, kind: TransactionKind, database: &str, mode: AccessMode) -> FaultResult<()> {
        let context = TransactionContext::begin(
            Arc::clone(&self.engine),
            kind,
            database,
            mode,
            self.interrupts.token().clone(),
        )?;
        self.transaction = Some(context);
        Ok(())
    }

    fn run_auto_commit(
        &mut self,
        statement: &str,
        parameters: &Parameters,
        db: Option<String>,
        bookmarks: &[String],
        mode: Option<AccessMode>,
        sink: &mut dyn ResponseSink,
    ) -> FaultResult<()> {
        let database = self.resolve_database(db);
        self.await_bookmarks(&database, bookmarks)?;
        self.open(TransactionKind::Implicit, &database, mode.unwrap_or_default())?;

        let outcome = self.context()?.run(statement, parameters)?;
        self.state = State::AutoCommitStreaming;

        let mut metadata = Metadata::new();
        metadata.insert("fields".into(), Value::from(outcome.columns));
        metadata.insert("t_first".into(), Value::from(outcome.t_first));
        Ok(sink.on_success(metadata)?)
    }

    fn begin(
        &mut self,
        bookmarks: &[String],
        db: Option<String>,
        mode: Option<AccessMode>,
        sink: &mut dyn ResponseSink,
    ) -> FaultResult<()> {
        let database = self.resolve_database(db);
        self.await_bookmarks(&database, bookmarks)?;
        self.open(TransactionKind::Explicit, &database, mode.unwrap_or_default())?;
        self.state = State::InTransaction;
        Ok(sink.on_success(Metadata::new())?)
    }

    fn run_in_transaction(
        &mut self,
        statement: &str,
        parameters: &Parameters,
        sink: &mut dyn ResponseSink,
    ) -> FaultResult<()> {
        let context = self.context()?;
        let outcome = context.run(statement, parameters)?;
        let concurrent = context.open_cursor_count() > 1;

        let mut metadata = Metadata::new();
        metadata.insert("fields".into(), Value::from(outcome.columns));
        metadata.insert("t_first".into(), Value::from(outcome.t_first));
        if concurrent {
            metadata.insert("qid".into(), Value::from(outcome.qid));
        }
        Ok(sink.on_success(metadata)?)
    }

    /// Stream one batch from the addressed cursor of the current context.
    fn stream(
        &mut self,
        kind: StreamKind,
        n: i64,
        qid: Option<i64>,
        sink: &mut dyn ResponseSink,
    ) -> FaultResult<(bool, u64)> {
        let size = FetchSize::from_wire(n)
            .ok_or_else(|| Fault::breach(format!("Invalid fetch size {}", n)))?;
        let target = ResultTarget::from_wire(qid)
            .ok_or_else(|| Fault::breach(format!("Invalid statement id {:?}", qid)))?;

        let started = Instant::now();
        let context = self.context()?;
        let outcome = match kind {
            StreamKind::Pull => context.pull(target, size, sink)?,
            StreamKind::Discard => context.discard(target, size)?,
        };
        Ok((outcome.has_more, started.elapsed().as_millis() as u64))
    }

    fn stream_auto_commit(
        &mut self,
        kind: StreamKind,
        n: i64,
        qid: Option<i64>,
        sink: &mut dyn ResponseSink,
    ) -> FaultResult<()> {
        let (has_more, t_last) = self.stream(kind, n, qid, sink)?;

        let mut metadata = Metadata::new();
        if has_more {
            metadata.insert("has_more".into(), Value::Bool(true));
            return Ok(sink.on_success(metadata)?);
        }

        let context = self
            .transaction
            .take()
            .ok_or_else(|| Fault::breach("Auto-commit transaction vanished"))?;
        self.state = State::Ready;
        let bookmark = context.commit()?;
        if let Some(metrics) = &self.metrics {
            metrics.record_commit();
        }

        metadata.insert("t_last".into(), Value::from(t_last));
        if let Some(bookmark) = bookmark {
            metadata.insert("bookmark".into(), Value::from(bookmark.encode()));
        }
        Ok(sink.on_success(metadata)?)
    }

    fn stream_in_transaction(
        &mut self,
        kind: StreamKind,
        n: i64,
        qid: Option<i64>,
        sink: &mut dyn ResponseSink,
    ) -> FaultResult<()> {
        let (has_more, t_last) = self.stream(kind, n, qid, sink)?;

        let mut metadata = Metadata::new();
        if has_more {
            metadata.insert("has_more".into(), Value::Bool(true));
        } else {
            metadata.insert("t_last".into(), Value::from(t_last));
            let database = self.context()?.database().to_string();
            metadata.insert("db".into(), Value::from(database));
        }
        Ok(sink.on_success(metadata)?)
    }

    fn commit(&mut self, sink: &mut dyn ResponseSink) -> FaultResult<()> {
        let context = self.transaction.take().ok_or_else(|| Fault::breach("No transaction to commit"))?;
        self.state = State::Ready;
        let bookmark = context.commit()?;
        if let Some(metrics) = &self.metrics {
            metrics.record_commit();
        }

        let mut metadata = Metadata::new();
        if let Some(bookmark) = bookmark {
            metadata.insert("bookmark".into(), Value::from(bookmark.encode()));
        }
        Ok(sink.on_success(metadata)?)
    }

    fn rollback(&mut self, sink: &mut dyn ResponseSink) -> FaultResult<()> {
        let context = self.transaction.take().ok_or_else(|| Fault::breach("No transaction to roll back"))?;
        self.state = State::Ready;
        context.rollback()?;
        if let Some(metrics) = &self.metrics {
            metrics.record_rollback();
        }
        Ok(sink.on_success(Metadata::new())?)
    }

    /// Roll back, retire observed interrupts, and return to READY unless more
    /// interrupts arrived meanwhile.
    fn reset(&mut self, sink: &mut dyn ResponseSink) -> FaultResult<()> {
        let observed = self.interrupts.pending();
        self.release_transaction("reset");

        let remaining = self.interrupts.acknowledge(observed);
        if remaining > 0 {
            debug!(session = self.id, remaining, "reset overtaken by a later interrupt");
            self.state = State::Interrupted;
            return Ok(sink.on_ignored()?);
        }

        self.state = State::Ready;
        Ok(sink.on_success(Metadata::new())?)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("transaction", &self.transaction)
            .field("pending_interrupts", &self.interrupts.pending())
            .finish()
    }
}
