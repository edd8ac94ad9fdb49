//! Consumer half of the pipeline: one thread draining the output buffer.
//!
//! The consumer owns the [`Sink`] and, once started, a dedicated thread
//! that scans the output slot array, withdraws whatever is resident, and
//! hands each item to the sink. Workers deposit results through
//! [`OutputBuffer::push_blocking`].
//!
//! Shutdown is two-phase: the run flag is cleared only after the
//! coordinator has seen the buffer idle, and the drain loop keeps going
//! while its previous scan found work, so clearing the flag never strands
//! undelivered items.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::errors::{panic_message, ErrorCell, PipelineError};
use crate::pipeline::PipelineConfig;
use crate::slots::SlotArray;
use crate::source::Sink;
use crate::wakeup::{create_wakeup, AbortFlag, Wakeup};

/// Shared state between the worker threads and the consumer thread.
pub(crate) struct OutputBuffer<U> {
    slots: SlotArray<U>,
    run: AtomicBool,
    delivered: AtomicU64,
    item_available: Arc<dyn Wakeup>,
    slot_empty: Arc<dyn Wakeup>,
    abort: Arc<AbortFlag>,
}

impl<U: Send> OutputBuffer<U> {
    fn new(capacity: usize, config: &PipelineConfig, abort: Arc<AbortFlag>) -> Self {
        let item_available = create_wakeup(config.wakeup(), config.poll_interval());
        let slot_empty = create_wakeup(config.wakeup(), config.poll_interval());
        // Up to N workers can wait on slot_empty, the consumer on
        // item_available; capacity + 1 covers both.
        abort.register(Arc::clone(&item_available), capacity + 1);
        abort.register(Arc::clone(&slot_empty), capacity + 1);
        Self {
            slots: SlotArray::new(capacity),
            run: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            item_available,
            slot_empty,
            abort,
        }
    }

    /// Worker side: deposit one result, blocking while the buffer is full.
    ///
    /// # Errors
    ///
    /// Hands the item back if the pipeline aborted while waiting; the
    /// caller is expected to drop it and exit.
    pub(crate) fn push_blocking(&self, item: Box<U>) -> std::result::Result<(), Box<U>> {
        let mut pending = item;
        loop {
            match self.slots.try_publish(pending) {
                Ok(()) => {
                    self.item_available.signal();
                    return Ok(());
                }
                Err(back) => pending = back,
            }
            if self.abort.is_raised() {
                return Err(pending);
            }
            self.slot_empty.wait();
        }
    }

    fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Owns the sink and the thread that drains the output buffer.
///
/// Like the producer, construction and thread start are separate; dropping
/// an unstarted consumer is a no-op, and dropping a started one performs an
/// orderly shutdown (clear the run flag, wake the thread, join).
pub struct Consumer<U> {
    sink: Option<Box<dyn Sink<Item = U>>>,
    buffer: Option<Arc<OutputBuffer<U>>>,
    handle: Option<JoinHandle<()>>,
}

impl<U: Send + 'static> Consumer<U> {
    /// Create a consumer over `sink`. No thread is spawned until the
    /// pipeline starts.
    pub fn new<S>(sink: S) -> Self
    where
        S: Sink<Item = U> + 'static,
    {
        Self { sink: Some(Box::new(sink)), buffer: None, handle: None }
    }

    /// Allocate the output buffer with `slots` slots and spawn the drain
    /// thread. Called by the pipeline coordinator.
    pub(crate) fn start(
        &mut self,
        slots: usize,
        config: &PipelineConfig,
        abort: &Arc<AbortFlag>,
        errors: &Arc<ErrorCell>,
    ) {
        let sink = self.sink.take().expect("consumer already started");
        let buffer = Arc::new(OutputBuffer::new(slots, config, Arc::clone(abort)));
        buffer.run.store(true, Ordering::Relaxed);
        self.buffer = Some(Arc::clone(&buffer));

        let errors = Arc::clone(errors);
        self.handle = Some(thread::spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| run(sink, &buffer)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    errors.set(error);
                    buffer.abort.raise();
                }
                Err(payload) => {
                    errors.set(PipelineError::Panic {
                        thread: "consumer".to_string(),
                        message: panic_message(payload),
                    });
                    buffer.abort.raise();
                }
            }
        }));
    }

    /// Shared handle to the output buffer; valid after `start`.
    pub(crate) fn buffer(&self) -> Arc<OutputBuffer<U>> {
        Arc::clone(self.buffer.as_ref().expect("consumer not started"))
    }

    /// Clear the run flag, wake the drain thread, and join it.
    ///
    /// Call only once every output slot is empty (see
    /// [`is_idle`](Self::is_idle)); the drain loop itself tolerates a late
    /// burst of items, but items published after the final scan are freed,
    /// not delivered.
    pub(crate) fn shutdown(&mut self) {
        if let Some(buffer) = &self.buffer {
            buffer.run.store(false, Ordering::Relaxed);
            buffer.item_available.signal();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// True iff every output slot is empty (or the consumer was never
    /// started).
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.buffer.as_ref().is_none_or(|b| b.is_idle())
    }

    /// Number of items handed to the sink so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |b| b.delivered.load(Ordering::Relaxed))
    }
}

impl<U> Drop for Consumer<U> {
    fn drop(&mut self) {
        if let Some(buffer) = &self.buffer {
            buffer.run.store(false, Ordering::Relaxed);
            buffer.item_available.signal();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The drain loop. Keeps going while the run flag is set *or* the previous
/// scan found work, so a shutdown requested mid-burst still delivers
/// everything resident.
fn run<U: Send>(
    mut sink: Box<dyn Sink<Item = U>>,
    buffer: &OutputBuffer<U>,
) -> std::result::Result<(), PipelineError> {
    log::debug!("consumer starting with {} output slots", buffer.slots.capacity());
    let mut drained = false;
    while buffer.run.load(Ordering::Relaxed) || !drained {
        drained = true;
        while let Some(item) = buffer.slots.try_withdraw() {
            buffer.slot_empty.signal();
            drained = false;
            if let Err(cause) = sink.accept(*item) {
                log::error!("sink failed: {cause:#}");
                return Err(PipelineError::Sink(cause));
            }
            buffer.delivered.fetch_add(1, Ordering::Relaxed);
        }
        if drained {
            buffer.item_available.wait();
        }
    }
    log::debug!(
        "consumer exiting after {} items",
        buffer.delivered.load(Ordering::Relaxed)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::sink_fn;
    use crate::wakeup::WakeupMode;
    use anyhow::bail;
    use parking_lot::Mutex;

    fn start_consumer<U, S>(sink: S, slots: usize, mode: WakeupMode) -> (Consumer<U>, Arc<ErrorCell>, Arc<AbortFlag>)
    where
        U: Send + 'static,
        S: Sink<Item = U> + 'static,
    {
        let config = PipelineConfig::new(slots.saturating_sub(1).max(1)).with_wakeup(mode);
        let abort = Arc::new(AbortFlag::new());
        let errors = Arc::new(ErrorCell::new());
        let mut consumer = Consumer::new(sink);
        consumer.start(slots, &config, &abort, &errors);
        (consumer, errors, abort)
    }

    #[test]
    fn test_consumer_delivers_everything_pushed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let (mut consumer, errors, _abort) = start_consumer(
            sink_fn(move |v: u32| {
                sink_seen.lock().push(v);
                Ok(())
            }),
            3,
            WakeupMode::Semaphore,
        );

        let buffer = consumer.buffer();
        for v in 0..20u32 {
            buffer.push_blocking(Box::new(v)).unwrap();
        }

        while !consumer.is_idle() {
            thread::yield_now();
        }
        consumer.shutdown();

        let mut delivered = seen.lock().clone();
        delivered.sort_unstable();
        assert_eq!(delivered, (0..20).collect::<Vec<_>>());
        assert_eq!(consumer.delivered(), 20);
        assert!(!errors.has_error());
    }

    #[test]
    fn test_consumer_shutdown_without_items() {
        let (mut consumer, errors, _abort) =
            start_consumer(sink_fn(|_: u32| Ok(())), 2, WakeupMode::Poll);
        assert!(consumer.is_idle());
        consumer.shutdown();
        assert_eq!(consumer.delivered(), 0);
        assert!(!errors.has_error());
    }

    #[test]
    fn test_sink_error_aborts_and_is_recorded() {
        let (mut consumer, errors, abort) = start_consumer(
            sink_fn(|v: u32| {
                if v >= 2 {
                    bail!("disk full");
                }
                Ok(())
            }),
            4,
            WakeupMode::Semaphore,
        );

        let buffer = consumer.buffer();
        let mut rejected = false;
        for v in 0..100u32 {
            if buffer.push_blocking(Box::new(v)).is_err() {
                rejected = true;
                break;
            }
        }
        assert!(rejected, "push should fail once the pipeline aborted");
        assert!(abort.is_raised());

        consumer.shutdown();
        match errors.take() {
            Some(PipelineError::Sink(_)) => {}
            other => panic!("expected sink error, got {other:?}"),
        }
    }

    #[test]
    fn test_unstarted_consumer_is_inert() {
        let consumer: Consumer<u32> = Consumer::new(sink_fn(|_: u32| Ok(())));
        assert!(consumer.is_idle());
        assert_eq!(consumer.delivered(), 0);
    }
}
