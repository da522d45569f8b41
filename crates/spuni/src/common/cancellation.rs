//! Cooperative cancellation for long-running decoding loops.
//!
//! A [`CancellationToken`] is handed to the generator, which checks it once
//! per decode step. The matching [`CancellationHandle`] stays with the caller
//! and can flip the shared flag from another task at any time. Cancellation
//! is cooperative: a step that is already inside a model forward call runs to
//! completion before the flag is observed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Raised when a decoding loop observes its token in the cancelled state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationError;

impl fmt::Display for CancellationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation was cancelled")
    }
}

impl std::error::Error for CancellationError {}

/// Read side of the cancellation flag, owned by the decoding loop.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh token together with the handle that cancels it.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use spuni::common::CancellationToken;
    ///
    /// let (token, handle) = CancellationToken::new();
    /// handle.cancel();
    /// assert!(token.is_cancelled());
    /// ```
    pub fn new() -> (CancellationToken, CancellationHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            CancellationToken {
                cancelled: flag.clone(),
            },
            CancellationHandle { cancelled: flag },
        )
    }

    /// A token that can never be cancelled, for callers that do not care.
    pub fn never() -> Self {
        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A token born in the cancelled state. Useful in tests.
    pub fn already_cancelled() -> Self {
        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Error if cancelled, so call sites can use `?`.
    pub fn check(&self) -> Result<(), CancellationError> {
        if self.is_cancelled() {
            Err(CancellationError)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        CancellationToken::never()
    }
}

/// Write side of the cancellation flag, kept by the caller.
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Cancel after a delay, from a spawned task.
    pub fn cancel_after(self, duration: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            self.cancel();
        });
    }
}
