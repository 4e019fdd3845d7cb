//! Bookmark codec and causal-consistency gate
//!
//! A bookmark is the opaque string `<database-id>:<tx-id>`. It is produced
//! after a committing write and handed back by clients on `BEGIN`/`RUN` so
//! the transaction only starts once that write is visible.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::engine::QueryEngine;
use crate::error::{BoltError, Result, Status};

/// Separator between database id and transaction id
const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bookmark {
    database_id: String,
    tx_id: u64,
}

impl Bookmark {
    pub fn new(database_id: impl Into<String>, tx_id: u64) -> Self {
        Self { database_id: database_id.into(), tx_id }
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    pub fn tx_id(&self) -> u64 {
        self.tx_id
    }

    pub fn encode(&self) -> String {
        encode(&self.database_id, self.tx_id)
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.database_id, SEPARATOR, self.tx_id)
    }
}

impl FromStr for Bookmark {
    type Err = BoltError;

    fn from_str(s: &str) -> Result<Self> {
        decode(s)
    }
}

pub fn encode(database_id: &str, tx_id: u64) -> String {
    format!("{}{}{}", database_id, SEPARATOR, tx_id)
}

/// Split on the last separator; database ids may themselves contain `:`.
pub fn decode(text: &str) -> Result<Bookmark> {
    let invalid = |reason: &str| {
        BoltError::new(
            Status::InvalidBookmark,
            format!("Supplied bookmark '{}' does not conform to pattern <db>:<tx>: {}", text, reason),
        )
    };

    let (database_id, tx) = text
        .rsplit_once(SEPARATOR)
        .ok_or_else(|| invalid("missing separator"))?;
    if database_id.is_empty() {
        return Err(invalid("empty database id"));
    }
    let tx_id = tx
        .parse::<u64>()
        .map_err(|_| invalid("transaction id is not a number"))?;

    Ok(Bookmark::new(database_id, tx_id))
}

/// Highest transaction id among the bookmarks for `database_id`.
///
/// Every bookmark is decoded, so a malformed one fails even when it names
/// another database.
pub fn required_tx_id(database_id: &str, bookmarks: &[String]) -> Result<Option<u64>> {
    let mut required = None;
    for text in bookmarks {
        let bookmark = decode(text)?;
        if bookmark.database_id() == database_id {
            required = required.max(Some(bookmark.tx_id()));
        }
    }
    Ok(required)
}

/// Block until every bookmark for `database` is applied, bounded by `timeout`.
///
/// Bookmarks for other databases are ignored. Exceeding the bound is the
/// recoverable `BookmarkTimeout` error.
pub fn await_up_to(
    engine: &dyn QueryEngine,
    database: &str,
    bookmarks: &[String],
    timeout: Duration,
) -> Result<()> {
    let database_id = engine.database_id(database)?;
    let Some(tx_id) = required_tx_id(&database_id, bookmarks)? else {
        return Ok(());
    };

    debug!(database, tx_id, timeout_ms = timeout.as_millis() as u64, "awaiting bookmark");
    if engine.await_tx_id(database, tx_id, timeout)? {
        return Ok(());
    }

    let latest = engine.last_applied_tx_id(database)?;
    Err(BoltError::new(
        Status::BookmarkTimeout,
        format!(
            "Database '{}' not up to the requested version: {}. Latest database version is {}",
            database, tx_id, latest
        ),
    ))
}
