//! Request messages consumed by the session state machine
//!
//! Logical shape only; framing is the transport's concern. The enum is
//! internally tagged so the demo server can decode it straight from a
//! MessagePack map (`{"msg": "run", "statement": ...}`).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `n` value meaning "stream every remaining record".
pub const PULL_ALL: i64 = -1;

/// `qid` value meaning "the most recently opened result".
pub const LAST_QID: i64 = -1;

/// Statement parameters.
pub type Parameters = serde_json::Map<String, Value>;

/// Access mode requested for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccessMode {
    /// Read-only access - write statements will be rejected
    #[serde(rename = "r")]
    Read,
    /// Read-write access (default)
    #[default]
    #[serde(rename = "w")]
    Write,
}

impl AccessMode {
    /// Parse access mode from string
    pub fn from_str(s: &str) -> Self {
        match s {
            "r" | "read" | "ro" | "readonly" => AccessMode::Read,
            _ => AccessMode::Write,
        }
    }

    /// Convert to wire protocol string
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "w",
        }
    }

    /// Check if write statements are allowed
    pub fn is_write(&self) -> bool {
        matches!(self, AccessMode::Write)
    }
}

/// Request from client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum Request {
    /// Authenticate and establish identity
    Hello {
        #[serde(default, rename = "userAgent")]
        user_agent: String,
        #[serde(default)]
        auth: HashMap<String, String>,
    },

    /// Run a statement, in the open explicit transaction or auto-commit
    Run {
        statement: String,
        #[serde(default)]
        parameters: Parameters,
        #[serde(default)]
        db: Option<String>,
        #[serde(default)]
        bookmarks: Vec<String>,
        #[serde(default)]
        mode: Option<AccessMode>,
    },

    /// Stream up to `n` records from a result
    Pull {
        #[serde(default = "default_n")]
        n: i64,
        #[serde(default)]
        qid: Option<i64>,
    },

    /// Throw away up to `n` records from a result
    Discard {
        #[serde(default = "default_n")]
        n: i64,
        #[serde(default)]
        qid: Option<i64>,
    },

    /// Open an explicit transaction
    Begin {
        #[serde(default)]
        bookmarks: Vec<String>,
        #[serde(default)]
        db: Option<String>,
        #[serde(default)]
        mode: Option<AccessMode>,
    },

    Commit,
    Rollback,
    Reset,
    Goodbye,
}

fn default_n() -> i64 {
    PULL_ALL
}

impl Request {
    /// Shorthand for an auto-commit or in-transaction statement without extras
    pub fn run(statement: impl Into<String>) -> Self {
        Request::Run {
            statement: statement.into(),
            parameters: Parameters::new(),
            db: None,
            bookmarks: Vec::new(),
            mode: None,
        }
    }

    pub fn run_with_params(statement: impl Into<String>, parameters: Parameters) -> Self {
        Request::Run {
            statement: statement.into(),
            parameters,
            db: None,
            bookmarks: Vec::new(),
            mode: None,
        }
    }

    pub fn pull_all() -> Self {
        Request::Pull { n: PULL_ALL, qid: None }
    }

    pub fn pull(n: i64, qid: Option<i64>) -> Self {
        Request::Pull { n, qid }
    }

    pub fn discard_all() -> Self {
        Request::Discard { n: PULL_ALL, qid: None }
    }

    pub fn discard(n: i64, qid: Option<i64>) -> Self {
        Request::Discard { n, qid }
    }

    pub fn begin() -> Self {
        Request::Begin { bookmarks: Vec::new(), db: None, mode: None }
    }

    pub fn begin_after(bookmarks: Vec<String>) -> Self {
        Request::Begin { bookmarks, db: None, mode: None }
    }

    pub fn hello(user_agent: impl Into<String>) -> Self {
        Request::Hello { user_agent: user_agent.into(), auth: HashMap::new() }
    }

    /// Message name used in logs, metrics and failure messages.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "HELLO",
            Request::Run { .. } => "RUN",
            Request::Pull { .. } => "PULL",
            Request::Discard { .. } => "DISCARD",
            Request::Begin { .. } => "BEGIN",
            Request::Commit => "COMMIT",
            Request::Rollback => "ROLLBACK",
            Request::Reset => "RESET",
            Request::Goodbye => "GOODBYE",
        }
    }

    /// RESET arriving on the wire also raises an interrupt on the control path.
    pub fn is_reset(&self) -> bool {
        matches!(self, Request::Reset)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated batch size for PULL/DISCARD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSize {
    All,
    Limit(u64),
}

impl FetchSize {
    /// `-1` means all, positive values are limits, anything else is invalid.
    pub fn from_wire(n: i64) -> Option<Self> {
        match n {
            PULL_ALL => Some(FetchSize::All),
            n if n > 0 => Some(FetchSize::Limit(n as u64)),
            _ => None,
        }
    }

    pub fn allows(&self, emitted: u64) -> bool {
        match self {
            FetchSize::All => true,
            FetchSize::Limit(limit) => emitted < *limit,
        }
    }
}

/// Which result a PULL/DISCARD addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultTarget {
    MostRecent,
    Qid(u64),
}

impl ResultTarget {
    /// Absent or `-1` resolves to the most recent open result.
    pub fn from_wire(qid: Option<i64>) -> Option<Self> {
        match qid {
            None | Some(LAST_QID) => Some(ResultTarget::MostRecent),
            Some(q) if q >= 0 => Some(ResultTarget::Qid(q as u64)),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_names() {
        assert_eq!(Request::run("RETURN 1").name(), "RUN");
        assert_eq!(Request::pull_all().name(), "PULL");
        assert_eq!(Request::discard_all().name(), "DISCARD");
        assert_eq!(Request::begin().name(), "BEGIN");
        assert_eq!(Request::Commit.to_string(), "COMMIT");
        assert!(Request::Reset.is_reset());
        assert!(!Request::Goodbye.is_reset());
    }

    #[test]
    fn test_decode_run_with_defaults() {
        let json = r#"{"msg":"run","statement":"RETURN 1"}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert_eq!(request, Request::run("RETURN 1"));
    }

    #[test]
    fn test_decode_pull_defaults_to_all() {
        let request: Request = serde_json::from_str(r#"{"msg":"pull"}"#).unwrap();
        assert_eq!(request, Request::Pull { n: PULL_ALL, qid: None });

        let request: Request = serde_json::from_str(r#"{"msg":"discard","n":3,"qid":1}"#).unwrap();
        assert_eq!(request, Request::Discard { n: 3, qid: Some(1) });
    }

    #[test]
    fn test_decode_begin_with_mode() {
        let json = r#"{"msg":"begin","bookmarks":["db:4"],"mode":"r"}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        match request {
            Request::Begin { bookmarks, db, mode } => {
                assert_eq!(bookmarks, vec!["db:4".to_string()]);
                assert_eq!(db, None);
                assert_eq!(mode, Some(AccessMode::Read));
            }
            other => panic!("Expected Begin, got {:?}", other),
        }
    }

    #[test]
    fn test_fetch_size() {
        assert_eq!(FetchSize::from_wire(-1), Some(FetchSize::All));
        assert_eq!(FetchSize::from_wire(3), Some(FetchSize::Limit(3)));
        assert_eq!(FetchSize::from_wire(0), None);
        assert_eq!(FetchSize::from_wire(-2), None);

        assert!(FetchSize::Limit(2).allows(1));
        assert!(!FetchSize::Limit(2).allows(2));
        assert!(FetchSize::All.allows(u64::MAX));
    }

    #[test]
    fn test_result_target() {
        assert_eq!(ResultTarget::from_wire(None), Some(ResultTarget::MostRecent));
        assert_eq!(ResultTarget::from_wire(Some(-1)), Some(ResultTarget::MostRecent));
        assert_eq!(ResultTarget::from_wire(Some(2)), Some(ResultTarget::Qid(2)));
        assert_eq!(ResultTarget::from_wire(Some(-5)), None);
    }

    #[test]
    fn test_access_mode_from_str() {
        assert_eq!(AccessMode::from_str("r"), AccessMode::Read);
        assert_eq!(AccessMode::from_str("readonly"), AccessMode::Read);
        assert_eq!(AccessMode::from_str("w"), AccessMode::Write);
        assert_eq!(AccessMode::from_str("anything-else"), AccessMode::Write);
        assert!(AccessMode::default().is_write());
        assert_eq!(AccessMode::Read.as_str(), "r");
    }
}
