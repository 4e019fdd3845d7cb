//! Request metrics for the Bolt session server
//!
//! Lightweight, thread-safe counters shared by every session of a server.
//! Sessions take an `Option<Arc<Metrics>>`, so nothing is recorded when
//! metrics are disabled.
//!
//! # Overview
//!
//! Tracked per server:
//! - Request latencies with percentiles (p50, p95, p99)
//! - Slow request detection
//! - Per-message-type counts and average latency
//! - Transaction outcomes: commits, rollbacks, failures, interrupts
//!
//! # Design Decisions
//!
//! - **Thread-safe**: every counter is an `AtomicU64`
//! - **Bounded memory**: fixed-size latency window and slow-request ring
//! - **O(1) per request**: recording never scans the window
//!
//! # Example
//!
//! ```
//! use boltsm::metrics::Metrics;
//!
//! let metrics = Metrics::new();
//! metrics.record_request("RUN", 15);
//! metrics.record_commit();
//!
//! let stats = metrics.snapshot();
//! assert_eq!(stats.request_count, 1);
//! assert_eq!(stats.commit_count, 1);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use sysinfo::System;

/// Rolling window of request latencies used for percentiles.
const LATENCY_WINDOW_SIZE: usize = 1000;

/// Only the most recent slow requests are kept.
const MAX_SLOW_REQUESTS: usize = 10;

/// Requests at or above this duration are recorded as slow.
pub const SLOW_REQUEST_THRESHOLD_MS: u64 = 100;

/// Message names with a dedicated counter, in reporting order.
const MESSAGE_TYPES: [&str; 9] = [
    "HELLO", "RUN", "PULL", "DISCARD", "BEGIN", "COMMIT", "ROLLBACK", "RESET", "GOODBYE",
];

/// Slot for anything outside [`MESSAGE_TYPES`]
const OTHER: usize = MESSAGE_TYPES.len();

pub struct Metrics {
    // ========================================================================
    // Request Metrics
    // ========================================================================
    request_count: AtomicU64,
    slow_request_count: AtomicU64,
    latencies_ms: Mutex<VecDeque<u64>>,
    /// Sum of latencies currently in the window
    latency_sum_ms: AtomicU64,

    // ========================================================================
    // Per-message Counters
    // ========================================================================
    message_counts: [AtomicU64; OTHER + 1],
    message_latency_sums: [AtomicU64; OTHER + 1],

    // ========================================================================
    // Transaction Outcomes
    // ========================================================================
    commit_count: AtomicU64,
    rollback_count: AtomicU64,
    failure_count: AtomicU64,
    interrupt_count: AtomicU64,

    slow_requests: Mutex<VecDeque<SlowRequest>>,
    started_at: Instant,
}

/// A request that exceeded [`SLOW_REQUEST_THRESHOLD_MS`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SlowRequest {
    /// Message name (e.g. "PULL")
    pub message: String,
    pub duration_ms: u64,
    /// Milliseconds since metrics started
    pub timestamp_ms: u64,
}

/// Point-in-time copy of all metrics.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub slow_request_count: u64,
    pub request_p50_ms: u64,
    pub request_p95_ms: u64,
    pub request_p99_ms: u64,
    pub request_avg_ms: u64,

    pub commit_count: u64,
    pub rollback_count: u64,
    pub failure_count: u64,
    pub interrupt_count: u64,

    /// The most recent slow requests (up to MAX_SLOW_REQUESTS)
    pub top_slow_requests: Vec<SlowRequest>,

    pub uptime_secs: u64,

    /// Host memory in use, percent
    pub memory_percent: f32,

    /// Message types seen so far, most frequent first
    pub message_stats: Vec<MessageStat>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MessageStat {
    pub message: String,
    pub count: u64,
    pub avg_ms: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn slot(message: &str) -> usize {
    MESSAGE_TYPES
        .iter()
        .position(|m| *m == message)
        .unwrap_or(OTHER)
}

/// Host memory usage in percent, 0.0 when it cannot be read.
pub fn memory_usage_percent() -> f32 {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return 0.0;
    }
    let used = sys.used_memory();
    (used as f64 / total as f64 * 100.0) as f32
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            slow_request_count: AtomicU64::new(0),
            latencies_ms: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
            latency_sum_ms: AtomicU64::new(0),
            message_counts: Default::default(),
            message_latency_sums: Default::default(),
            commit_count: AtomicU64::new(0),
            rollback_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            interrupt_count: AtomicU64::new(0),
            slow_requests: Mutex::new(VecDeque::with_capacity(MAX_SLOW_REQUESTS)),
            started_at: Instant::now(),
        }
    }

    /// Record one processed request.
    ///
    /// `message` is the request name as returned by `Request::name()`;
    /// unknown names are counted under "OTHER".
    pub fn record_request(&self, message: &str, duration_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let index = slot(message);
        self.message_counts[index].fetch_add(1, Ordering::Relaxed);
        self.message_latency_sums[index].fetch_add(duration_ms, Ordering::Relaxed);

        {
            let mut latencies = lock(&self.latencies_ms);
            if latencies.len() >= LATENCY_WINDOW_SIZE {
                if let Some(old) = latencies.pop_front() {
                    self.latency_sum_ms.fetch_sub(old, Ordering::Relaxed);
                }
            }
            latencies.push_back(duration_ms);
            self.latency_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        }

        if duration_ms >= SLOW_REQUEST_THRESHOLD_MS {
            self.slow_request_count.fetch_add(1, Ordering::Relaxed);

            let slow = SlowRequest {
                message: message.to_string(),
                duration_ms,
                timestamp_ms: self.started_at.elapsed().as_millis() as u64,
            };

            let mut slow_requests = lock(&self.slow_requests);
            if slow_requests.len() >= MAX_SLOW_REQUESTS {
                slow_requests.pop_front();
            }
            slow_requests.push_back(slow);
        }
    }

    pub fn record_commit(&self) {
        self.commit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollback_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interrupt(&self) {
        self.interrupt_count.fetch_add(1, Ordering::Relaxed);
    }

    /// O(LATENCY_WINDOW_SIZE): sorts the window for percentiles.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (p50, p95, p99, avg) = {
            let latencies = lock(&self.latencies_ms);
            if latencies.is_empty() {
                (0, 0, 0, 0)
            } else {
                let mut sorted: Vec<u64> = latencies.iter().copied().collect();
                sorted.sort_unstable();

                let len = sorted.len();
                let p50 = sorted[len * 50 / 100];
                let p95 = sorted[len * 95 / 100];
                let p99 = sorted.get(len * 99 / 100).copied().unwrap_or(sorted[len - 1]);
                let avg = self.latency_sum_ms.load(Ordering::Relaxed) / len as u64;

                (p50, p95, p99, avg)
            }
        };

        let top_slow_requests = lock(&self.slow_requests).iter().cloned().collect();

        MetricsSnapshot {
            request_count: self.request_count.load(Ordering::Relaxed),
            slow_request_count: self.slow_request_count.load(Ordering::Relaxed),
            request_p50_ms: p50,
            request_p95_ms: p95,
            request_p99_ms: p99,
            request_avg_ms: avg,
            commit_count: self.commit_count.load(Ordering::Relaxed),
            rollback_count: self.rollback_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            interrupt_count: self.interrupt_count.load(Ordering::Relaxed),
            top_slow_requests,
            uptime_secs: self.started_at.elapsed().as_secs(),
            memory_percent: memory_usage_percent(),
            message_stats: self.message_stats(),
        }
    }

    fn message_stats(&self) -> Vec<MessageStat> {
        let names = MESSAGE_TYPES.iter().copied().chain(std::iter::once("OTHER"));
        let mut stats: Vec<MessageStat> = names
            .enumerate()
            .filter_map(|(index, name)| {
                let count = self.message_counts[index].load(Ordering::Relaxed);
                if count == 0 {
                    return None;
                }
                let sum = self.message_latency_sums[index].load(Ordering::Relaxed);
                Some(MessageStat { message: name.to_string(), count, avg_ms: sum / count })
            })
            .collect();

        stats.sort_by(|a, b| b.count.cmp(&a.count));
        stats
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
