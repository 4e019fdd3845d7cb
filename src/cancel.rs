//! Cooperative cancellation token
//!
//! Long-running statements poll the token at every row; once it is cancelled
//! the engine stops with [`EngineError::Terminated`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Re-arm the token after the owner has recovered from a cancellation.
    pub fn clear(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Cooperative check point.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(EngineError::Terminated);
        }
        Ok(())
    }
}
