//! Source and sink contracts, plus adapters for common embeddings.
//!
//! The pipeline treats the thing that reads records and the thing that
//! writes them as external collaborators: all it knows is the pull contract
//! of [`Source`] and the push contract of [`Sink`]. The adapters here cover
//! the usual embeddings: an iterator as a source ([`IterSource`]), a cap on
//! total items produced ([`CappedSource`]), chunking a record stream into
//! batches so the per-item handoff cost is paid once per batch rather than
//! once per record ([`BatchedSource`]), and plain closures ([`source_fn`],
//! [`sink_fn`]).

use std::marker::PhantomData;

/// Supplies items to the producer thread.
///
/// The producer hands `fill` a freshly default-constructed item; the source
/// populates it in place and returns `Ok(true)`, or returns `Ok(false)` to
/// signal end-of-input. A source error is fatal to the pipeline.
///
/// `fill` is only ever invoked from the producer thread, so implementations
/// may keep mutable state (file handles, counters) without synchronisation.
pub trait Source: Send {
    /// The item type produced.
    type Item: Send;

    /// Populate `item`. Returns `Ok(true)` if an item was produced,
    /// `Ok(false)` on end-of-input.
    ///
    /// # Errors
    ///
    /// Any error aborts the pipeline; it is surfaced from
    /// [`Pipeline::wait_for_finish`](crate::Pipeline::wait_for_finish)
    /// together with the number of items produced before the failure.
    fn fill(&mut self, item: &mut Self::Item) -> anyhow::Result<bool>;
}

/// Receives transformed items on the consumer thread.
///
/// Only ever invoked from the consumer thread; implementations may keep
/// mutable state without synchronisation. A sink error is fatal.
pub trait Sink: Send {
    /// The item type consumed.
    type Item: Send;

    /// Persist or otherwise handle one item.
    ///
    /// # Errors
    ///
    /// Any error aborts the pipeline.
    fn accept(&mut self, item: Self::Item) -> anyhow::Result<()>;
}

/// Use any iterator as a source.
#[derive(Debug)]
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I> {
    /// Wrap `iter`; each `next()` becomes one pipeline item.
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<I> Source for IterSource<I>
where
    I: Iterator + Send,
    I::Item: Send,
{
    type Item = I::Item;

    fn fill(&mut self, item: &mut I::Item) -> anyhow::Result<bool> {
        match self.iter.next() {
            Some(value) => {
                *item = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Cap the total number of items an inner source may produce.
///
/// Once the cap is reached, `fill` reports end-of-input without invoking
/// the inner source again. The count of items produced so far is available
/// via [`produced`](CappedSource::produced).
#[derive(Debug)]
pub struct CappedSource<S> {
    inner: S,
    produced: u64,
    cap: u64,
}

impl<S> CappedSource<S> {
    /// Wrap `inner`, allowing at most `cap` items.
    pub fn new(inner: S, cap: u64) -> Self {
        Self { inner, produced: 0, cap }
    }

    /// Items produced so far.
    #[must_use]
    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl<S: Source> Source for CappedSource<S> {
    type Item = S::Item;

    fn fill(&mut self, item: &mut S::Item) -> anyhow::Result<bool> {
        if self.produced >= self.cap {
            return Ok(false);
        }
        if self.inner.fill(item)? {
            self.produced += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Chunk an iterator of records into `Vec` batches.
///
/// Batches are the natural unit of flow for record streams: one slot
/// handoff then amortises over `batch_size` records. The final batch may be
/// short; end-of-input is reported only when a batch comes up empty.
#[derive(Debug)]
pub struct BatchedSource<I> {
    iter: I,
    batch_size: usize,
}

impl<I> BatchedSource<I> {
    /// Wrap `iter`, emitting batches of up to `batch_size` records.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    pub fn new(iter: I, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be at least 1");
        Self { iter, batch_size }
    }
}

impl<I> Source for BatchedSource<I>
where
    I: Iterator + Send,
    I::Item: Send,
{
    type Item = Vec<I::Item>;

    fn fill(&mut self, batch: &mut Vec<I::Item>) -> anyhow::Result<bool> {
        batch.clear();
        batch.extend((&mut self.iter).take(self.batch_size));
        Ok(!batch.is_empty())
    }
}

/// Closure-backed [`Source`]; see [`source_fn`].
pub struct FnSource<T, F> {
    fill: F,
    _item: PhantomData<fn() -> T>,
}

/// Adapt a closure with the source contract (`Ok(true)` = item produced,
/// `Ok(false)` = end-of-input).
pub fn source_fn<T, F>(fill: F) -> FnSource<T, F>
where
    T: Send,
    F: FnMut(&mut T) -> anyhow::Result<bool> + Send,
{
    FnSource { fill, _item: PhantomData }
}

impl<T, F> Source for FnSource<T, F>
where
    T: Send,
    F: FnMut(&mut T) -> anyhow::Result<bool> + Send,
{
    type Item = T;

    fn fill(&mut self, item: &mut T) -> anyhow::Result<bool> {
        (self.fill)(item)
    }
}

/// Closure-backed [`Sink`]; see [`sink_fn`].
pub struct FnSink<T, F> {
    accept: F,
    _item: PhantomData<fn(T)>,
}

/// Adapt a closure consuming items by value into a [`Sink`].
pub fn sink_fn<T, F>(accept: F) -> FnSink<T, F>
where
    T: Send,
    F: FnMut(T) -> anyhow::Result<()> + Send,
{
    FnSink { accept, _item: PhantomData }
}

impl<T, F> Sink for FnSink<T, F>
where
    T: Send,
    F: FnMut(T) -> anyhow::Result<()> + Send,
{
    type Item = T;

    fn accept(&mut self, item: T) -> anyhow::Result<()> {
        (self.accept)(item)
    }
}
