//! Out-of-band interrupt path
//!
//! The transport's reader thread holds an [`InterruptHandle`] and fires it
//! while the worker may be blocked inside a long statement. The handle never
//! touches session state directly: it bumps a counter and cancels the token
//! the engine polls. The worker notices the counter before its next request.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cancel::CancellationToken;

#[derive(Debug, Default)]
struct Flags {
    pending: AtomicUsize,
    terminated: AtomicBool,
}

/// Cloneable, thread-safe control handle of one session.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flags: Arc<Flags>,
    token: CancellationToken,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything up to the next reset and cancel running work.
    pub fn interrupt(&self) {
        self.flags.pending.fetch_add(1, Ordering::SeqCst);
        self.token.cancel();
    }

    /// Close the session before its next request.
    pub fn terminate(&self) {
        self.flags.terminated.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    pub fn pending(&self) -> usize {
        self.flags.pending.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.flags.terminated.load(Ordering::SeqCst)
    }

    /// Token handed to every statement the session executes
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Retire `observed` interrupts after a reset has cleaned up.
    ///
    /// Returns how many interrupts arrived since `observed` was read. When
    /// that is non-zero the token stays cancelled.
    pub(crate) fn acknowledge(&self, observed: usize) -> usize {
        if !self.is_terminated() {
            self.token.clear();
        }
        let remaining = self.flags.pending.fetch_sub(observed, Ordering::SeqCst) - observed;
        if remaining > 0 {
            self.token.cancel();
        }
        remaining
    }
}
