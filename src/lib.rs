#![deny(unsafe_code)]
// Unsafe is confined to the slot array, where raw-pointer ownership
// transfer is the whole point; every use carries a SAFETY note.
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! # readpipe - streaming producer/transformer/consumer pipelines
//!
//! A single producer thread pulls items (originally batches of sequencing
//! reads, but any move-only payload works) from a [`Source`], a bounded
//! pool of worker threads applies a pure transformation in parallel, and a
//! single consumer thread hands results to a [`Sink`]. The pipeline keeps
//! both ends of a slow I/O path busy while CPU-bound work runs on N cores,
//! without copying or re-allocating item payloads.
//!
//! # Architecture
//!
//! ```text
//! Source ──> producer thread ──> [input slots] ──> worker 1..N ──> [output slots] ──> consumer thread ──> Sink
//!                                  (N + 1)         transform         (N + 1)
//! ```
//!
//! The two slot arrays are bounded mailboxes of atomic cells; publication
//! and withdrawal are single compare-and-swap operations, so the only
//! shared state between threads is the two arrays and two flags. No item
//! is ever copied: ownership moves source -> slot -> worker -> slot ->
//! sink. Item *order* is not preserved across workers; the sink sees the
//! source's items as a multiset.
//!
//! Shutdown flows in reverse: source end-of-input -> producer stores EOF
//! and broadcasts -> workers drain the input buffer and exit -> the
//! coordinator waits out the output buffer -> consumer stops. Every item
//! produced before EOF is delivered before
//! [`Pipeline::wait_for_finish`] returns.
//!
//! # Modules
//!
//! - [`pipeline`] - the coordinator, worker pool, and [`PipelineConfig`]
//! - [`producer`] / [`consumer`] - the two end threads and their buffers
//! - [`slots`] - the atomic slot array both buffers are built on
//! - [`wakeup`] - semaphore vs. fixed-interval polling wakeups
//! - [`source`] - [`Source`]/[`Sink`] contracts and adapters
//! - [`errors`] - the error taxonomy
//!
//! # Example
//!
//! ```
//! use parking_lot::Mutex;
//! use readpipe::{sink_fn, Consumer, IterSource, Pipeline, PipelineConfig, Producer};
//! use std::sync::Arc;
//!
//! let total = Arc::new(Mutex::new(0u64));
//! let sink_total = Arc::clone(&total);
//!
//! let producer = Producer::new(IterSource::new(1u64..=100));
//! let consumer = Consumer::new(sink_fn(move |v: u64| {
//!     *sink_total.lock() += v;
//!     Ok(())
//! }));
//!
//! let mut pipeline =
//!     Pipeline::new(producer, |v: u64| Ok(v * v), consumer, PipelineConfig::new(4));
//! pipeline.start();
//! pipeline.wait_for_finish().unwrap();
//!
//! // Sum of the first 100 squares.
//! assert_eq!(*total.lock(), 338_350);
//! ```

pub mod consumer;
pub mod errors;
pub mod pipeline;
pub mod producer;
pub mod slots;
pub mod source;
pub mod wakeup;

pub use consumer::Consumer;
pub use errors::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineConfig};
pub use producer::Producer;
pub use slots::SlotArray;
pub use source::{
    sink_fn, source_fn, BatchedSource, CappedSource, FnSink, FnSource, IterSource, Sink, Source,
};
pub use wakeup::{PollWakeup, Semaphore, Wakeup, WakeupMode, DEFAULT_POLL_INTERVAL};
