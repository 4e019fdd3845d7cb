//! Server and session configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Default bound for causal waits on supplied bookmarks.
pub const DEFAULT_BOOKMARK_TIMEOUT: Duration = Duration::from_secs(30);

/// Agent string reported in the HELLO success metadata.
pub const DEFAULT_SERVER_AGENT: &str = concat!("boltsm/", env!("CARGO_PKG_VERSION"));

/// Per-session settings shared by every session a server creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long BEGIN/RUN wait for bookmarked transactions to be applied
    pub bookmark_timeout: Duration,
    pub server_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bookmark_timeout: DEFAULT_BOOKMARK_TIMEOUT,
            server_agent: DEFAULT_SERVER_AGENT.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn with_bookmark_timeout(mut self, timeout: Duration) -> Self {
        self.bookmark_timeout = timeout;
        self
    }
}

/// Command line of the `bolt-server` binary
#[derive(Debug, Clone, Parser)]
#[command(name = "bolt-server", about = "Bolt session server over a Unix socket", version)]
pub struct ServerConfig {
    /// Unix socket path to listen on
    #[arg(long, env = "BOLT_SOCKET", default_value = "/tmp/bolt.sock")]
    pub socket: PathBuf,

    /// Database used when a request names none
    #[arg(long = "default-db", default_value = "neo4j")]
    pub default_database: String,

    /// Additional databases to create at startup
    #[arg(long = "database", value_name = "NAME")]
    pub databases: Vec<String>,

    /// Bound for bookmark waits, in milliseconds
    #[arg(long = "bookmark-timeout-ms", default_value_t = 30_000)]
    pub bookmark_timeout_ms: u64,

    /// Require this user on HELLO (needs --password)
    #[arg(long, env = "BOLT_USER", requires = "password")]
    pub user: Option<String>,

    #[arg(long, env = "BOLT_PASSWORD", requires = "user")]
    pub password: Option<String>,

    /// Enable metrics collection and periodic reporting
    #[arg(long)]
    pub metrics: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default().with_bookmark_timeout(Duration::from_millis(self.bookmark_timeout_ms))
    }

    /// Static credentials when both user and password were given.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some((user, password)),
            _ => None,
        }
    }
}
