//! Fixed-size arrays of atomic item slots.
//!
//! A [`SlotArray`] is the bounded mailbox between pipeline stages: a fixed
//! number of cells, each either empty or holding exclusive ownership of one
//! boxed item. Publication and withdrawal are single compare-and-swap
//! operations on the cell, so producers and consumers on different threads
//! hand items over without locks and without copying payloads.
//!
//! The array is not a FIFO: slots are scanned in index order and items may
//! be withdrawn in any order relative to insertion. Pipeline items are
//! independent, so fairness is irrelevant.
//!
//! # Ownership protocol
//!
//! Each cell holds a raw pointer obtained from [`Box::into_raw`]. A null
//! pointer means empty. The two permitted transitions are:
//!
//! - publish: CAS null -> item pointer (release), transferring ownership of
//!   the allocation into the cell;
//! - withdraw: CAS item pointer -> null (acquire), transferring ownership
//!   back out.
//!
//! The CAS guarantees each transition is performed by exactly one thread,
//! so a resident item is never aliased and never leaked while the array is
//! alive. `Drop` frees whatever is still resident (abort paths may leave
//! items behind).

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A fixed-capacity array of atomic item slots.
///
/// # Example
///
/// ```
/// use readpipe::SlotArray;
///
/// let slots: SlotArray<u32> = SlotArray::new(2);
/// slots.try_publish(Box::new(7)).unwrap();
/// assert!(!slots.is_empty());
/// assert_eq!(*slots.try_withdraw().unwrap(), 7);
/// assert!(slots.is_empty());
/// ```
pub struct SlotArray<T> {
    slots: Box<[AtomicPtr<T>]>,
    _owns: PhantomData<T>,
}

// The array owns `T` values while they are resident, so moving or sharing it
// across threads moves/shares those values: both require `T: Send`. The CAS
// protocol ensures no `&T` is ever produced from a shared `&SlotArray`.
#[allow(unsafe_code)]
unsafe impl<T: Send> Send for SlotArray<T> {}
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for SlotArray<T> {}

impl<T> SlotArray<T> {
    /// Create a new array with `capacity` empty slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "slot array capacity must be at least 1");
        let slots: Vec<AtomicPtr<T>> =
            (0..capacity).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        Self { slots: slots.into_boxed_slice(), _owns: PhantomData }
    }

    /// Number of slots in the array.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Try to deposit `item` into the first empty slot, scanning in index
    /// order.
    ///
    /// On success ownership of the allocation has moved into the slot. If
    /// every slot is occupied the same allocation is handed back unchanged.
    ///
    /// # Errors
    ///
    /// Returns the item if no empty slot was found.
    #[allow(unsafe_code)]
    pub fn try_publish(&self, item: Box<T>) -> std::result::Result<(), Box<T>> {
        let raw = Box::into_raw(item);
        for slot in &*self.slots {
            if slot.load(Ordering::Relaxed).is_null()
                && slot
                    .compare_exchange(
                        ptr::null_mut(),
                        raw,
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                return Ok(());
            }
        }
        // SAFETY: `raw` came from `Box::into_raw` above and no CAS succeeded,
        // so ownership never left this call.
        Err(unsafe { Box::from_raw(raw) })
    }

    /// Try to take an item out of the first occupied slot, scanning in index
    /// order. Returns `None` if every slot was observed empty.
    #[allow(unsafe_code)]
    pub fn try_withdraw(&self) -> Option<Box<T>> {
        for slot in &*self.slots {
            let current = slot.load(Ordering::Relaxed);
            if !current.is_null()
                && slot
                    .compare_exchange(
                        current,
                        ptr::null_mut(),
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                // SAFETY: the CAS succeeded, so this thread alone took
                // ownership of the pointer published by `try_publish`; the
                // acquire ordering makes the item's contents visible.
                return Some(unsafe { Box::from_raw(current) });
            }
        }
        None
    }

    /// True iff every slot was observed empty.
    ///
    /// Uses acquire loads so a `true` result synchronises with every
    /// publication that happened before the check; used for the idle checks
    /// that gate shutdown.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.load(Ordering::Acquire).is_null())
    }

    /// True iff at least one slot was observed empty. Advisory: with a
    /// single publisher an observed vacancy persists until that publisher
    /// fills it.
    #[must_use]
    pub fn has_vacancy(&self) -> bool {
        self.slots.iter().any(|slot| slot.load(Ordering::Relaxed).is_null())
    }
}

impl<T> Drop for SlotArray<T> {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        for slot in &*self.slots {
            // `&mut self` gives exclusive access; no CAS needed.
            let raw = slot.swap(ptr::null_mut(), Ordering::Relaxed);
            if !raw.is_null() {
                // SAFETY: a non-null pointer is an owned allocation from
                // `try_publish` that was never withdrawn.
                drop(unsafe { Box::from_raw(raw) });
            }
        }
    }
}

impl<T> std::fmt::Debug for SlotArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotArray").field("capacity", &self.capacity()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_publish_then_withdraw() {
        let slots: SlotArray<String> = SlotArray::new(4);
        assert!(slots.is_empty());
        assert!(slots.has_vacancy());

        slots.try_publish(Box::new("hello".to_string())).unwrap();
        assert!(!slots.is_empty());

        let item = slots.try_withdraw().unwrap();
        assert_eq!(*item, "hello");
        assert!(slots.is_empty());
    }

    #[test]
    fn test_withdraw_empty_returns_none() {
        let slots: SlotArray<u32> = SlotArray::new(2);
        assert!(slots.try_withdraw().is_none());
    }

    #[test]
    fn test_publish_full_returns_item() {
        let slots: SlotArray<u32> = SlotArray::new(2);
        slots.try_publish(Box::new(1)).unwrap();
        slots.try_publish(Box::new(2)).unwrap();
        assert!(!slots.has_vacancy());

        let rejected = slots.try_publish(Box::new(3)).unwrap_err();
        assert_eq!(*rejected, 3);

        // Freeing a slot makes publish succeed again.
        slots.try_withdraw().unwrap();
        slots.try_publish(rejected).unwrap();
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn test_zero_capacity_panics() {
        let _ = SlotArray::<u32>::new(0);
    }

    #[test]
    fn test_drop_frees_resident_items() {
        static LIVE: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug)]
        struct Counted;
        impl Counted {
            fn new() -> Self {
                LIVE.fetch_add(1, Ordering::SeqCst);
                Counted
            }
        }
        impl Drop for Counted {
            fn drop(&mut self) {
                LIVE.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let slots: SlotArray<Counted> = SlotArray::new(3);
        slots.try_publish(Box::new(Counted::new())).unwrap();
        slots.try_publish(Box::new(Counted::new())).unwrap();
        assert_eq!(LIVE.load(Ordering::SeqCst), 2);

        drop(slots);
        assert_eq!(LIVE.load(Ordering::SeqCst), 0);
    }

    /// Two publishers and two withdrawers racing on a small array must hand
    /// every item over exactly once.
    #[test]
    fn test_concurrent_handoff_conserves_items() {
        const PER_THREAD: u64 = 1_000;
        let slots: Arc<SlotArray<u64>> = Arc::new(SlotArray::new(3));

        let publishers: Vec<_> = (0..2u64)
            .map(|t| {
                let slots = Arc::clone(&slots);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let mut item = Box::new(t * PER_THREAD + i);
                        loop {
                            match slots.try_publish(item) {
                                Ok(()) => break,
                                Err(back) => {
                                    item = back;
                                    thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let withdrawers: Vec<_> = (0..2)
            .map(|_| {
                let slots = Arc::clone(&slots);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while seen.len() < PER_THREAD as usize {
                        match slots.try_withdraw() {
                            Some(item) => seen.push(*item),
                            None => thread::yield_now(),
                        }
                    }
                    seen
                })
            })
            .collect();

        for handle in publishers {
            handle.join().unwrap();
        }
        let mut all: Vec<u64> = Vec::new();
        for handle in withdrawers {
            all.extend(handle.join().unwrap());
        }

        assert_eq!(all.len(), 2 * PER_THREAD as usize);
        let unique: HashSet<u64> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len(), "an item was delivered twice");
    }

    proptest! {
        /// Model-based check: any interleaving of publishes and withdrawals
        /// conserves the multiset of items.
        #[test]
        fn prop_slot_array_conserves_items(ops in proptest::collection::vec(any::<bool>(), 0..64)) {
            let slots: SlotArray<u32> = SlotArray::new(4);
            let mut next = 0u32;
            let mut inside: Vec<u32> = Vec::new();
            let mut out: Vec<u32> = Vec::new();

            for publish in ops {
                if publish {
                    match slots.try_publish(Box::new(next)) {
                        Ok(()) => {
                            inside.push(next);
                            next += 1;
                        }
                        Err(back) => {
                            prop_assert_eq!(*back, next);
                            prop_assert_eq!(inside.len(), 4);
                        }
                    }
                } else {
                    match slots.try_withdraw() {
                        Some(item) => {
                            let pos = inside.iter().position(|v| *v == *item);
                            prop_assert!(pos.is_some(), "withdrew an item never published");
                            inside.remove(pos.unwrap());
                            out.push(*item);
                        }
                        None => prop_assert!(inside.is_empty()),
                    }
                }
            }

            // Drain and verify nothing was lost or duplicated.
            while let Some(item) = slots.try_withdraw() {
                let pos = inside.iter().position(|v| *v == *item);
                prop_assert!(pos.is_some());
                inside.remove(pos.unwrap());
                out.push(*item);
            }
            prop_assert!(inside.is_empty());
            prop_assert_eq!(out.len() as u32, next);
        }
    }
}
