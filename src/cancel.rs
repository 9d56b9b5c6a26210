//! Cooperative cancellation
//!
//! A [`CancellationToken`] is shared between the thread that requests a
//! shutdown (typically a signal handler) and the workers, which poll it
//! between nodes and at every buffer refill.

use crate::error::{CheckpointError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared shutdown flag
///
/// Cloning yields a handle to the same flag. Once cancelled, a token stays
/// cancelled.
///
/// # Examples
///
/// ```rust
/// use checkpoint::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_view = token.clone();
///
/// assert!(worker_view.check().is_ok());
/// token.cancel();
/// assert!(worker_view.check().unwrap_err().is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token which is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return [`CheckpointError::Cancelled`] if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CheckpointError::Cancelled)
        } else {
            Ok(())
        }
    }
}
