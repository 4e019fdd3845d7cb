//! bolt-server - Bolt session server over a Unix socket
//!
//! Serves the in-memory reference engine. One thread pair per connection;
//! see `boltsm::transport` for the framing.

use std::os::unix::net::UnixListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use boltsm::auth::{Authenticator, NoAuth, StaticCredentials};
use boltsm::config::ServerConfig;
use boltsm::engine::MemoryEngine;
use boltsm::metrics::{Metrics, SLOW_REQUEST_THRESHOLD_MS};
use boltsm::registry::SessionRegistry;
use boltsm::transport;

const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn report_metrics(metrics: &Metrics) {
    let snapshot = metrics.snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => info!(metrics = %json, "metrics snapshot"),
        Err(e) => warn!(error = %e, "metrics snapshot could not be encoded"),
    }
    for slow in &snapshot.top_slow_requests {
        warn!(
            message_type = %slow.message,
            duration_ms = slow.duration_ms,
            threshold_ms = SLOW_REQUEST_THRESHOLD_MS,
            "slow request"
        );
    }
}

fn main() -> Result<()> {
    let config = ServerConfig::parse();
    init_logging(&config.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting bolt-server");

    let engine = Arc::new(MemoryEngine::new(&config.default_database)?);
    for name in &config.databases {
        engine
            .create_database(name)
            .with_context(|| format!("creating database '{}'", name))?;
    }
    for db in engine.list_databases() {
        info!(database = %db.name, id = %db.id, "database ready");
    }

    let authenticator: Arc<dyn Authenticator> = match config.credentials() {
        Some((user, password)) => Arc::new(StaticCredentials::new(user, password)),
        None => Arc::new(NoAuth),
    };

    let metrics = config.metrics.then(|| Arc::new(Metrics::new()));
    let mut registry = SessionRegistry::new(engine, authenticator, config.session_config());
    if let Some(metrics) = &metrics {
        info!("metrics collection enabled");
        registry = registry.with_metrics(Arc::clone(metrics));

        let metrics = Arc::clone(metrics);
        thread::spawn(move || loop {
            thread::sleep(METRICS_REPORT_INTERVAL);
            report_metrics(&metrics);
        });
    }
    let registry = Arc::new(registry);

    // Remove stale socket file
    let _ = std::fs::remove_file(&config.socket);
    let listener = UnixListener::bind(&config.socket)
        .with_context(|| format!("binding {}", config.socket.display()))?;
    info!(socket = %config.socket.display(), "listening");

    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("registering signal handlers")?;
    {
        let registry = Arc::clone(&registry);
        let metrics = metrics.clone();
        let socket = config.socket.clone();
        thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "shutting down");
                let terminated = registry.terminate_all();
                info!(sessions = terminated, "sessions terminated");
                if let Some(metrics) = &metrics {
                    report_metrics(metrics);
                }
                let _ = std::fs::remove_file(&socket);
                std::process::exit(0);
            }
        });
    }

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    if let Err(e) = transport::serve_connection(stream, registry) {
                        error!(error = %e, "connection failed");
                    }
                });
            }
            Err(e) => error!(error = %e, "accept failed"),
        }
    }

    Ok(())
}
