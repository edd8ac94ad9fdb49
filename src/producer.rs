//! Producer half of the pipeline: one thread filling the input buffer.
//!
//! The producer owns the [`Source`] and, once started, a dedicated thread
//! that keeps the input slot array topped up: find an empty slot, pull one
//! item from the source, publish it, signal the workers. On end-of-input it
//! stores the EOF flag (release) and *then* broadcasts one wakeup per slot
//! so every potentially blocked worker re-checks the flag and exits.
//!
//! The worker-facing side of the same buffer lives here too:
//! [`InputBuffer::withdraw_blocking`] implements the shutdown-aware
//! withdraw protocol (read EOF before scanning, so any publication made
//! before EOF was set is visible during the scan).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::errors::{panic_message, ErrorCell, PipelineError};
use crate::pipeline::PipelineConfig;
use crate::slots::SlotArray;
use crate::source::Source;
use crate::wakeup::{create_wakeup, AbortFlag, Wakeup};

/// Shared state between the producer thread and the worker threads.
pub(crate) struct InputBuffer<T> {
    slots: SlotArray<T>,
    eof: AtomicBool,
    produced: AtomicU64,
    item_available: Arc<dyn Wakeup>,
    slot_empty: Arc<dyn Wakeup>,
    abort: Arc<AbortFlag>,
}

impl<T: Send> InputBuffer<T> {
    fn new(capacity: usize, config: &PipelineConfig, abort: Arc<AbortFlag>) -> Self {
        let item_available = create_wakeup(config.wakeup(), config.poll_interval());
        let slot_empty = create_wakeup(config.wakeup(), config.poll_interval());
        // Any of the N workers may wait on item_available, the producer on
        // slot_empty; capacity + 1 covers both.
        abort.register(Arc::clone(&item_available), capacity + 1);
        abort.register(Arc::clone(&slot_empty), capacity + 1);
        Self {
            slots: SlotArray::new(capacity),
            eof: AtomicBool::new(false),
            produced: AtomicU64::new(0),
            item_available,
            slot_empty,
            abort,
        }
    }

    /// Worker side: take one item, blocking until one is available or the
    /// producer has signalled EOF and the buffer is drained. Returns `None`
    /// on end-of-input or abort.
    pub(crate) fn withdraw_blocking(&self) -> Option<Box<T>> {
        loop {
            if self.abort.is_raised() {
                return None;
            }
            // Load EOF before the scan: a publication made before EOF was
            // stored is then guaranteed visible to the scan, so we never
            // exit with an item still resident.
            let eof = self.eof.load(Ordering::Acquire);
            if let Some(item) = self.slots.try_withdraw() {
                self.slot_empty.signal();
                return Some(item);
            }
            if eof {
                return None;
            }
            self.item_available.wait();
        }
    }

    /// Store EOF (release) and wake every worker that may be blocked.
    fn set_eof(&self) {
        self.eof.store(true, Ordering::Release);
        self.item_available.signal_many(self.slots.capacity());
    }

    fn eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    fn is_idle(&self) -> bool {
        self.eof() && self.slots.is_empty()
    }
}

/// Owns the source and the thread that feeds the input buffer.
///
/// Construction and thread start are separate steps: a producer that was
/// never started is inert, and dropping it is a no-op. Once started, drop
/// joins the thread.
pub struct Producer<T> {
    source: Option<Box<dyn Source<Item = T>>>,
    buffer: Option<Arc<InputBuffer<T>>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Default + Send + 'static> Producer<T> {
    /// Create a producer over `source`. No thread is spawned until the
    /// pipeline starts.
    pub fn new<S>(source: S) -> Self
    where
        S: Source<Item = T> + 'static,
    {
        Self { source: Some(Box::new(source)), buffer: None, handle: None }
    }

    /// Allocate the input buffer with `slots` slots and spawn the feed
    /// thread. Called by the pipeline coordinator.
    pub(crate) fn start(
        &mut self,
        slots: usize,
        config: &PipelineConfig,
        abort: &Arc<AbortFlag>,
        errors: &Arc<ErrorCell>,
    ) {
        let source = self.source.take().expect("producer already started");
        let buffer = Arc::new(InputBuffer::new(slots, config, Arc::clone(abort)));
        self.buffer = Some(Arc::clone(&buffer));

        let errors = Arc::clone(errors);
        self.handle = Some(thread::spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| run(source, &buffer, &errors)));
            if let Err(payload) = result {
                errors.set(PipelineError::Panic {
                    thread: "producer".to_string(),
                    message: panic_message(payload),
                });
            }
            // The EOF broadcast must happen on every exit path, or workers
            // blocked on item_available would never be joined.
            buffer.set_eof();
        }));
    }

    /// Shared handle to the input buffer; valid after `start`.
    pub(crate) fn buffer(&self) -> Arc<InputBuffer<T>> {
        Arc::clone(self.buffer.as_ref().expect("producer not started"))
    }

    /// Join the feed thread if it is running.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Advisory: has the source reported end-of-input?
    #[must_use]
    pub fn eof(&self) -> bool {
        self.buffer.as_ref().is_some_and(|b| b.eof())
    }

    /// Advisory: EOF reached and every input slot drained?
    #[must_use]
    pub fn idle(&self) -> bool {
        self.buffer.as_ref().is_some_and(|b| b.is_idle())
    }

    /// Number of items pulled from the source so far.
    #[must_use]
    pub fn produced(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |b| b.produced.load(Ordering::Relaxed))
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The feed loop: one item in flight at a time, one slot filled per source
/// pull, wait when the buffer is full.
fn run<T: Default + Send>(
    mut source: Box<dyn Source<Item = T>>,
    buffer: &InputBuffer<T>,
    errors: &ErrorCell,
) {
    log::debug!("producer starting with {} input slots", buffer.slots.capacity());
    loop {
        if buffer.abort.is_raised() {
            log::debug!("producer exiting on abort");
            return;
        }
        if !buffer.slots.has_vacancy() {
            buffer.slot_empty.wait();
            continue;
        }

        // A vacancy was observed and only this thread publishes, so the
        // item pulled below always has somewhere to go.
        let mut item = Box::new(T::default());
        match source.fill(&mut item) {
            Ok(true) => {
                buffer.produced.fetch_add(1, Ordering::Relaxed);
                let mut pending = item;
                loop {
                    match buffer.slots.try_publish(pending) {
                        Ok(()) => break,
                        Err(back) => {
                            pending = back;
                            buffer.slot_empty.wait();
                        }
                    }
                }
                buffer.item_available.signal();
            }
            Ok(false) => {
                log::debug!(
                    "producer reached end of input after {} items",
                    buffer.produced.load(Ordering::Relaxed)
                );
                return;
            }
            Err(cause) => {
                let produced = buffer.produced.load(Ordering::Relaxed);
                log::error!("source failed after {produced} items: {cause:#}");
                errors.set(PipelineError::Source { produced, cause });
                return;
            }
        }
    }
}
