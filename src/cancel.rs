//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is created by the pipeline controller and handed to every stage.
//! Nothing here interrupts blocking work: each stage polls the token at its own checkpoints
//! (see [`CancellationToken::checkpoint`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{PipelineError, PipelineResult};

/// Token for cooperative cancellation of a pipeline run.
///
/// Uses an `AtomicBool` internally. Clone is cheap and shares state, so the copy held by a
/// presentation layer and the copy polled by the background worker observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reset to not-cancelled.
    ///
    /// Only the controller calls this, once, at the start of a run.
    pub fn clear(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Request cancellation. Safe to call from any thread; never blocks.
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Suspension point: returns [`PipelineError::Cancelled`] once cancellation was requested.
    pub fn checkpoint(&self) -> PipelineResult<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
