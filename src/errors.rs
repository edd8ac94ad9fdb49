//! Error types for pipeline runs.
//!
//! All three embedder callbacks (source, transformer, sink) report failures
//! as [`anyhow::Error`]; the pipeline wraps them in a [`PipelineError`] that
//! records which stage failed. Errors are fatal: the pipeline never retries,
//! and [`Pipeline::wait_for_finish`](crate::Pipeline::wait_for_finish)
//! surfaces the first error recorded by any thread.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type for pipeline runs.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source failed while producing an item. `produced` is the number
    /// of items successfully produced before the failure.
    #[error("source failed after {produced} items: {cause}")]
    Source {
        /// Items produced before the failure.
        produced: u64,
        /// The underlying source error.
        cause: anyhow::Error,
    },

    /// The transformer failed on an item.
    #[error("transform failed: {0}")]
    Transform(anyhow::Error),

    /// The sink failed while consuming an item.
    #[error("sink failed: {0}")]
    Sink(anyhow::Error),

    /// A pipeline thread panicked.
    #[error("{thread} thread panicked: {message}")]
    Panic {
        /// Which thread panicked (e.g. "producer", "worker 3").
        thread: String,
        /// The panic payload, if it was a string.
        message: String,
    },
}

/// First-error storage shared by all pipeline threads.
///
/// The flag allows lock-free `has_error` checks from hot loops; the slot
/// keeps the first error recorded so later failures (usually knock-on
/// effects of the first) do not mask the root cause.
#[derive(Debug, Default)]
pub(crate) struct ErrorCell {
    flag: AtomicBool,
    slot: Mutex<Option<PipelineError>>,
}

impl ErrorCell {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record an error; keeps the first one if called more than once.
    pub(crate) fn set(&self, error: PipelineError) {
        self.flag.store(true, Ordering::SeqCst);
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Check whether an error has been recorded.
    pub(crate) fn has_error(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Take the stored error.
    pub(crate) fn take(&self) -> Option<PipelineError> {
        self.slot.lock().take()
    }
}

/// Extract a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
