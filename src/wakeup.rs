//! Wakeup primitives for blocked pipeline threads.
//!
//! Two strategies sit behind the [`Wakeup`] trait, selected once at
//! pipeline construction and never mixed:
//!
//! - [`Semaphore`]: a counting semaphore. Every publish/withdraw signals
//!   its counterpart, so a blocked thread wakes as soon as work exists.
//! - [`PollWakeup`]: a fixed-interval sleep. Signals are no-ops and
//!   liveness comes from re-polling; trades latency for having no waiter
//!   bookkeeping at all.
//!
//! Correctness of the pipeline must not depend on which strategy is in
//! use; signals only bound how long a thread sleeps past the moment work
//! became available.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default sleep interval for the polling strategy.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Wakeup strategy for pipeline threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WakeupMode {
    /// Counting semaphore; signal-driven wakeups.
    #[default]
    Semaphore,
    /// Fixed-interval polling; no signalling.
    Poll,
}

/// Abstract signalling mechanism between one waiting side and one or more
/// signalling sides of a slot array.
pub trait Wakeup: Send + Sync {
    /// Block (or sleep) until work may be available.
    fn wait(&self);

    /// Announce one unit of work; wakes up to one waiter.
    fn signal(&self);

    /// Announce `n` units of work; wakes up to `n` waiters. Used on
    /// end-of-input and abort so that every potentially blocked thread
    /// re-checks its exit condition.
    fn signal_many(&self, n: usize);
}

/// Build the wakeup for `mode`. `poll_interval` applies to
/// [`WakeupMode::Poll`] only.
pub(crate) fn create_wakeup(mode: WakeupMode, poll_interval: Duration) -> Arc<dyn Wakeup> {
    match mode {
        WakeupMode::Semaphore => Arc::new(Semaphore::new()),
        WakeupMode::Poll => Arc::new(PollWakeup::new(poll_interval)),
    }
}

/// Counting semaphore built on a mutex-guarded count and a condvar.
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore with zero permits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Wakeup for Semaphore {
    fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    fn signal(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.available.notify_one();
    }

    fn signal_many(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut permits = self.permits.lock();
        *permits += n;
        drop(permits);
        self.available.notify_all();
    }
}

/// Polling stand-in for a semaphore: `wait` sleeps a fixed interval,
/// signals do nothing.
#[derive(Debug)]
pub struct PollWakeup {
    interval: Duration,
}

impl PollWakeup {
    /// Create a polling wakeup that sleeps `interval` per wait.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for PollWakeup {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Wakeup for PollWakeup {
    fn wait(&self) {
        thread::sleep(self.interval);
    }

    fn signal(&self) {}

    fn signal_many(&self, _n: usize) {}
}

/// Pipeline-wide abort switch.
///
/// When any thread dies with an error, every other thread may be blocked on
/// one of the four wakeup primitives, waiting for a peer that will never
/// signal again. `raise` flips the flag and broadcasts on every registered
/// primitive so that all waiters re-check their exit conditions.
#[derive(Default)]
pub(crate) struct AbortFlag {
    raised: AtomicBool,
    wakers: Mutex<Vec<(Arc<dyn Wakeup>, usize)>>,
}

impl AbortFlag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a wakeup to broadcast on; `width` bounds how many threads
    /// can be waiting on it at once.
    pub(crate) fn register(&self, wakeup: Arc<dyn Wakeup>, width: usize) {
        self.wakers.lock().push((wakeup, width));
    }

    /// Raise the flag and wake every registered waiter. Idempotent.
    pub(crate) fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        for (wakeup, width) in self.wakers.lock().iter() {
            wakeup.signal_many(*width);
        }
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}
