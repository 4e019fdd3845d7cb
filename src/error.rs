//! Error types for the Bolt session engine
//!
//! Every failure that reaches a client is a [`BoltError`]: an immutable
//! `(status, message, cause)` record. The [`Status`] is fine-grained (it maps
//! to the wire code), while [`StatusKind`] is the closed taxonomy the state
//! machine branches on.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::response::SinkError;
use crate::session::SessionId;

pub type Result<T> = std::result::Result<T, BoltError>;

/// Result alias for query engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result alias for steps inside request processing.
pub type FaultResult<T> = std::result::Result<T, Fault>;

/// Closed failure taxonomy the session state machine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Illegal message for the current state. Always fatal.
    ClientProtocolViolation,
    /// Authentication rejected during HELLO. Always fatal.
    Unauthorized,
    /// Parse, semantic or runtime failure of a submitted statement.
    StatementError,
    /// Commit/rollback failure; the transaction context is destroyed.
    TransactionError,
    /// Causal-consistency wait exceeded its bound.
    BookmarkTimeout,
    /// Anything unexpected raised while executing or publishing.
    InternalUnknownError,
}

impl StatusKind {
    /// Fatal kinds kill the connection after one failure response.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StatusKind::ClientProtocolViolation | StatusKind::Unauthorized)
    }
}

/// Fine-grained status attached to every [`BoltError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    RequestInvalid,
    Unauthorized,

    SyntaxError,
    SemanticError,
    ParameterMissing,
    ArithmeticError,
    DatabaseNotFound,
    ForbiddenOnReadOnly,
    ExecutionFailed,
    ResultNotFound,

    ConstraintViolation,
    CommitFailed,
    RollbackFailed,
    Terminated,
    InvalidBookmark,

    BookmarkTimeout,

    UnknownError,
}

impl Status {
    /// Taxonomy bucket of this status
    pub fn kind(&self) -> StatusKind {
        match self {
            Status::RequestInvalid => StatusKind::ClientProtocolViolation,
            Status::Unauthorized => StatusKind::Unauthorized,
            Status::SyntaxError
            | Status::SemanticError
            | Status::ParameterMissing
            | Status::ArithmeticError
            | Status::DatabaseNotFound
            | Status::ForbiddenOnReadOnly
            | Status::ExecutionFailed
            | Status::ResultNotFound => StatusKind::StatementError,
            Status::ConstraintViolation
            | Status::CommitFailed
            | Status::RollbackFailed
            | Status::Terminated
            | Status::InvalidBookmark => StatusKind::TransactionError,
            Status::BookmarkTimeout => StatusKind::BookmarkTimeout,
            Status::UnknownError => StatusKind::InternalUnknownError,
        }
    }

    /// Get error code for wire protocol
    pub fn code(&self) -> &'static str {
        match self {
            Status::RequestInvalid => "Neo.ClientError.Request.Invalid",
            Status::Unauthorized => "Neo.ClientError.Security.Unauthorized",
            Status::SyntaxError => "Neo.ClientError.Statement.SyntaxError",
            Status::SemanticError => "Neo.ClientError.Statement.SemanticError",
            Status::ParameterMissing => "Neo.ClientError.Statement.ParameterMissing",
            Status::ArithmeticError => "Neo.ClientError.Statement.ArithmeticError",
            Status::DatabaseNotFound => "Neo.ClientError.Database.DatabaseNotFound",
            Status::ForbiddenOnReadOnly => "Neo.ClientError.Statement.AccessMode",
            Status::ExecutionFailed => "Neo.DatabaseError.Statement.ExecutionFailed",
            Status::ResultNotFound => "Neo.ClientError.Request.ResultNotFound",
            Status::ConstraintViolation => "Neo.ClientError.Schema.ConstraintValidationFailed",
            Status::CommitFailed => "Neo.TransientError.Transaction.CommitFailed",
            Status::RollbackFailed => "Neo.DatabaseError.Transaction.TransactionRollbackFailed",
            Status::Terminated => "Neo.TransientError.Transaction.Terminated",
            Status::InvalidBookmark => "Neo.ClientError.Transaction.InvalidBookmark",
            Status::BookmarkTimeout => "Neo.TransientError.Transaction.BookmarkTimeout",
            Status::UnknownError => "Neo.DatabaseError.General.UnknownError",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Immutable error record carried from the point of failure to the sink.
#[derive(Error, Debug, Clone)]
#[error("{status}: {message}")]
pub struct BoltError {
    status: Status,
    message: String,
    #[source]
    cause: Option<Arc<EngineError>>,
}

impl BoltError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), cause: None }
    }

    pub fn with_cause(status: Status, message: impl Into<String>, cause: EngineError) -> Self {
        Self { status, message: message.into(), cause: Some(Arc::new(cause)) }
    }

    /// Illegal request for the current state
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(Status::RequestInvalid, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(Status::Unauthorized, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Status::UnknownError, message)
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn kind(&self) -> StatusKind {
        self.status.kind()
    }

    pub fn code(&self) -> &'static str {
        self.status.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&EngineError> {
        self.cause.as_deref()
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

/// Errors raised by the query engine collaborator.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    Syntax(String),

    #[error("{0}")]
    Semantic(String),

    #[error("Expected parameter(s): {0}")]
    ParameterMissing(String),

    #[error("{0}")]
    Arithmetic(String),

    #[error("Database '{0}' not found")]
    DatabaseNotFound(String),

    #[error("Database '{0}' already exists")]
    DatabaseExists(String),

    #[error("Invalid database name: {0}")]
    InvalidDatabaseName(String),

    #[error("Writing in read access mode not allowed")]
    ReadOnlyMode,

    #[error("{0}")]
    ConstraintViolation(String),

    #[error("The transaction has been terminated")]
    Terminated,

    #[error("Transaction is no longer open")]
    TransactionClosed,

    #[error("Authentication failure: {0}")]
    AuthenticationFailed(String),

    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Status reported when this error surfaces while executing a statement
    pub fn statement_status(&self) -> Status {
        match self {
            EngineError::Syntax(_) => Status::SyntaxError,
            EngineError::Semantic(_) => Status::SemanticError,
            EngineError::ParameterMissing(_) => Status::ParameterMissing,
            EngineError::Arithmetic(_) => Status::ArithmeticError,
            EngineError::DatabaseNotFound(_)
            | EngineError::InvalidDatabaseName(_) => Status::DatabaseNotFound,
            EngineError::DatabaseExists(_) => Status::ExecutionFailed,
            EngineError::ReadOnlyMode => Status::ForbiddenOnReadOnly,
            EngineError::ConstraintViolation(_) => Status::ConstraintViolation,
            EngineError::Terminated => Status::Terminated,
            EngineError::TransactionClosed => Status::ExecutionFailed,
            EngineError::AuthenticationFailed(_) => Status::Unauthorized,
            EngineError::Internal(_) => Status::UnknownError,
        }
    }

    /// Status reported when this error surfaces while committing
    pub fn commit_status(&self) -> Status {
        match self {
            EngineError::ConstraintViolation(_) => Status::ConstraintViolation,
            EngineError::Terminated => Status::Terminated,
            _ => Status::CommitFailed,
        }
    }
}

impl From<EngineError> for BoltError {
    fn from(err: EngineError) -> Self {
        let status = err.statement_status();
        BoltError::with_cause(status, err.to_string(), err)
    }
}

/// Why a session was torn down instead of answering normally.
#[derive(Error, Debug)]
pub enum ConnectionFatality {
    #[error("Protocol breach: {0}")]
    ProtocolBreach(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Response channel broken: {0}")]
    OutputBroken(#[source] std::io::Error),

    #[error("Session {0} is closed")]
    Closed(SessionId),

    #[error("Session {0} was terminated")]
    Terminated(SessionId),
}

impl ConnectionFatality {
    /// Build the fatality matching a fatal error record
    pub fn from_error(error: &BoltError) -> Self {
        match error.kind() {
            StatusKind::Unauthorized => ConnectionFatality::Unauthorized(error.message().to_string()),
            _ => ConnectionFatality::ProtocolBreach(error.message().to_string()),
        }
    }
}

/// A failed step inside request processing, before it has been reported.
#[derive(Error, Debug)]
pub enum Fault {
    /// Reported as a failure; the session moves to FAILED.
    #[error(transparent)]
    Recoverable(BoltError),

    /// Reported as a failure; the connection is killed.
    #[error(transparent)]
    Fatal(BoltError),

    /// The sink is gone. Nothing can be reported.
    #[error("Output channel broken: {0}")]
    Output(#[source] std::io::Error),
}

impl Fault {
    pub fn recoverable(status: Status, message: impl Into<String>) -> Self {
        Fault::Recoverable(BoltError::new(status, message))
    }

    pub fn breach(message: impl Into<String>) -> Self {
        Fault::Fatal(BoltError::protocol_violation(message))
    }
}

impl From<BoltError> for Fault {
    fn from(err: BoltError) -> Self {
        if err.is_fatal() {
            Fault::Fatal(err)
        } else {
            Fault::Recoverable(err)
        }
    }
}

impl From<EngineError> for Fault {
    fn from(err: EngineError) -> Self {
        Fault::from(BoltError::from(err))
    }
}

impl From<SinkError> for Fault {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Broken(io) => Fault::Output(io),
            SinkError::Rejected(reason) => Fault::Recoverable(BoltError::unknown(reason)),
        }
    }
}
