//! Pipeline coordinator: worker threads, lifecycle, and configuration.
//!
//! The coordinator wires a [`Producer`], a transformer, and a [`Consumer`]
//! together with N worker threads. Each worker pulls one item from the
//! input buffer, applies the transformer, and pushes the result into the
//! output buffer; both buffers have N + 1 slots so a worker always has a
//! free slot for its result and the producer can stay one item ahead.
//!
//! Shutdown flows backwards through the pipeline: the source reports
//! end-of-input, the producer stores EOF and broadcasts, workers drain the
//! input buffer and exit, the coordinator waits for the output buffer to
//! empty, then stops the consumer. Only after that is every item
//! guaranteed delivered.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::consumer::{Consumer, OutputBuffer};
use crate::errors::{panic_message, ErrorCell, PipelineError, Result};
use crate::producer::{InputBuffer, Producer};
use crate::wakeup::{AbortFlag, WakeupMode, DEFAULT_POLL_INTERVAL};

/// Construction parameters for a pipeline.
///
/// # Example
///
/// ```
/// use readpipe::{PipelineConfig, WakeupMode};
/// use std::time::Duration;
///
/// let config = PipelineConfig::new(8)
///     .with_wakeup(WakeupMode::Poll)
///     .with_poll_interval(Duration::from_millis(5));
/// assert_eq!(config.worker_count(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    worker_count: usize,
    wakeup: WakeupMode,
    poll_interval: Duration,
}

impl PipelineConfig {
    /// Create a config with `worker_count` transformer threads (values
    /// below 1 are clamped to 1), semaphore wakeups, and the default poll
    /// interval.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
            wakeup: WakeupMode::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Select the wakeup strategy.
    #[must_use]
    pub fn with_wakeup(mut self, wakeup: WakeupMode) -> Self {
        self.wakeup = wakeup;
        self
    }

    /// Set the sleep interval used by [`WakeupMode::Poll`].
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Number of transformer threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Selected wakeup strategy.
    #[must_use]
    pub fn wakeup(&self) -> WakeupMode {
        self.wakeup
    }

    /// Poll interval ([`WakeupMode::Poll`] only).
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// A producer/transformer/consumer pipeline over items of type `T`
/// transformed into type `U`.
///
/// Items flow `source -> input buffer -> worker -> output buffer -> sink`
/// with exactly one owner at every instant; payloads are never copied.
/// Item order is **not** preserved across workers: the sink sees the same
/// multiset of items the source produced, in an arbitrary interleaving.
///
/// # Example
///
/// ```
/// use parking_lot::Mutex;
/// use readpipe::{sink_fn, Consumer, IterSource, Pipeline, PipelineConfig, Producer};
/// use std::sync::Arc;
///
/// let results = Arc::new(Mutex::new(Vec::new()));
/// let sink_results = Arc::clone(&results);
///
/// let producer = Producer::new(IterSource::new(1u64..=5));
/// let consumer = Consumer::new(sink_fn(move |v: u64| {
///     sink_results.lock().push(v);
///     Ok(())
/// }));
///
/// let mut pipeline =
///     Pipeline::new(producer, |v: u64| Ok(v * v), consumer, PipelineConfig::new(2));
/// pipeline.start();
/// assert_eq!(pipeline.wait_for_finish().unwrap(), 5);
///
/// let mut squares = results.lock().clone();
/// squares.sort_unstable();
/// assert_eq!(squares, vec![1, 4, 9, 16, 25]);
/// ```
pub struct Pipeline<T, U> {
    producer: Producer<T>,
    consumer: Consumer<U>,
    transform: Arc<dyn Fn(T) -> anyhow::Result<U> + Send + Sync>,
    config: PipelineConfig,
    workers: Vec<JoinHandle<()>>,
    errors: Arc<ErrorCell>,
    abort: Arc<AbortFlag>,
    started: bool,
}

impl<T, U> Pipeline<T, U>
where
    T: Default + Send + 'static,
    U: Send + 'static,
{
    /// Assemble a pipeline. No threads run until [`start`](Self::start).
    ///
    /// The transformer is invoked concurrently on distinct items from all
    /// worker threads, hence the `Sync` bound; it is never invoked twice on
    /// the same item.
    pub fn new<F>(
        producer: Producer<T>,
        transform: F,
        consumer: Consumer<U>,
        config: PipelineConfig,
    ) -> Self
    where
        F: Fn(T) -> anyhow::Result<U> + Send + Sync + 'static,
    {
        Self {
            producer,
            consumer,
            transform: Arc::new(transform),
            config,
            workers: Vec::new(),
            errors: Arc::new(ErrorCell::new()),
            abort: Arc::new(AbortFlag::new()),
            started: false,
        }
    }

    /// Spawn the producer thread, the consumer thread, and the worker
    /// threads. Buffer capacities are `worker_count + 1`. Calling `start`
    /// again is a no-op.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        let n = self.config.worker_count;
        let capacity = n + 1;
        self.producer.start(capacity, &self.config, &self.abort, &self.errors);
        self.consumer.start(capacity, &self.config, &self.abort, &self.errors);

        log::debug!("spawning {n} worker threads");
        let input = self.producer.buffer();
        let output = self.consumer.buffer();
        for id in 0..n {
            let input = Arc::clone(&input);
            let output = Arc::clone(&output);
            let transform = Arc::clone(&self.transform);
            let errors = Arc::clone(&self.errors);
            let abort = Arc::clone(&self.abort);
            self.workers.push(thread::spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    worker_loop(id, &input, &output, transform.as_ref())
                }));
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        errors.set(error);
                        abort.raise();
                    }
                    Err(payload) => {
                        errors.set(PipelineError::Panic {
                            thread: format!("worker {id}"),
                            message: panic_message(payload),
                        });
                        abort.raise();
                    }
                }
            }));
        }
    }

    /// Wait for the pipeline to drain and stop, then report the outcome.
    ///
    /// Joins the workers (they exit once the producer reports EOF and the
    /// input buffer is drained), waits for the output buffer to empty,
    /// stops the consumer, and joins the producer. Returns the number of
    /// items delivered to the sink, or the first error recorded by any
    /// thread.
    ///
    /// # Errors
    ///
    /// The first [`PipelineError`] surfaced by any pipeline thread.
    pub fn wait_for_finish(&mut self) -> Result<u64> {
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }

        // Workers are done, so the output buffer only drains from here on.
        // The error check keeps a dead consumer from hanging the spin.
        while !self.consumer.is_idle() && !self.errors.has_error() {
            thread::yield_now();
        }
        self.consumer.shutdown();
        self.producer.join();

        if let Some(error) = self.errors.take() {
            return Err(error);
        }
        Ok(self.consumer.delivered())
    }

    /// Advisory: has the source reported end-of-input?
    #[must_use]
    pub fn finished(&self) -> bool {
        self.producer.eof()
    }

    /// Number of items pulled from the source so far.
    #[must_use]
    pub fn produced(&self) -> u64 {
        self.producer.produced()
    }

    /// Number of items delivered to the sink so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.consumer.delivered()
    }
}

impl<T, U> Drop for Pipeline<T, U> {
    fn drop(&mut self) {
        // Dropping a running pipeline aborts it; the producer and consumer
        // join their own threads in their drops.
        if !self.workers.is_empty() {
            self.abort.raise();
            for handle in self.workers.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

/// One worker: pull, transform, push, until end-of-input or abort.
fn worker_loop<T, U>(
    id: usize,
    input: &InputBuffer<T>,
    output: &OutputBuffer<U>,
    transform: &(dyn Fn(T) -> anyhow::Result<U> + Send + Sync),
) -> Result<()>
where
    T: Send,
    U: Send,
{
    log::debug!("worker {id} starting");
    while let Some(item) = input.withdraw_blocking() {
        let result = transform(*item).map_err(PipelineError::Transform)?;
        if output.push_blocking(Box::new(result)).is_err() {
            // Abort raced the push; the result is intentionally dropped.
            log::debug!("worker {id} exiting on abort");
            return Ok(());
        }
    }
    log::debug!("worker {id} exiting on end of input");
    Ok(())
}
