//! Generic concurrent delay queue consumed by the driver.
//!
//! The default implementation is a binary heap ordered by absolute
//! deadline, guarded by a mutex, with blocking `take` woken by a condvar
//! on insertion and polling a cancellation flag at a bounded interval.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::Clock;

/// Upper bound on how long `take` can sleep before re-checking whether its
/// token was cancelled. Insertion of a sooner item still wakes it
/// immediately via the heap's own condvar; this bound only matters when the
/// heap is empty or the current head is not due for longer than this.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Implemented by anything that can report its own absolute deadline, in
/// milliseconds on whatever `Clock` the owning `DelayQueue` was built with.
pub trait Delayed: Send {
    fn deadline_ms(&self) -> i64;
}

/// A concurrent priority queue of `Delayed` items, ordered by remaining
/// time until due. `take` blocks the caller until the head element is due
/// or the supplied token is cancelled.
pub trait DelayQueue<T: Delayed>: Send + Sync {
    fn try_add(&self, item: T) -> bool;
    fn take(&self, cancel_token: &CancellationToken) -> Option<T>;
    fn poll(&self) -> Option<T>;
    fn clear(&self);
}

/// A cooperative cancellation flag for a blocking `take`. A thread parked
/// in `take` does not wait on this token directly — it re-checks
/// `is_cancelled` every `CANCEL_POLL_INTERVAL` — so `cancel` only needs to
/// flip the flag.
pub struct CancellationToken {
    cancelled: AtomicBool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

struct HeapEntry<T>(T);

impl<T: Delayed> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline_ms() == other.0.deadline_ms()
    }
}

impl<T: Delayed> Eq for HeapEntry<T> {}

impl<T: Delayed> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T: Delayed> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.deadline_ms().cmp(&other.0.deadline_ms())
    }
}

/// Default `DelayQueue` implementation: a mutex-guarded binary heap plus a
/// condvar, woken on every insertion (a new head may be sooner than
/// whatever a blocked `take` was waiting on) and on cancellation.
pub struct BinaryHeapDelayQueue<T> {
    clock: Arc<dyn Clock>,
    heap: Mutex<BinaryHeap<Reverse<HeapEntry<T>>>>,
    condvar: Condvar,
}

impl<T: Delayed> BinaryHeapDelayQueue<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            heap: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

impl<T: Delayed> DelayQueue<T> for BinaryHeapDelayQueue<T> {
    fn try_add(&self, item: T) -> bool {
        {
            let mut heap = self.heap.lock();
            heap.push(Reverse(HeapEntry(item)));
        }
        self.condvar.notify_all();
        true
    }

    fn take(&self, cancel_token: &CancellationToken) -> Option<T> {
        let mut heap = self.heap.lock();
        loop {
            if cancel_token.is_cancelled() {
                return None;
            }
            match heap.peek() {
                None => {
                    self.condvar.wait_for(&mut heap, CANCEL_POLL_INTERVAL);
                }
                Some(Reverse(entry)) => {
                    let remaining = entry.0.deadline_ms() - self.clock.now_ms();
                    if remaining <= 0 {
                        let Reverse(entry) = heap.pop().expect("just peeked");
                        return Some(entry.0);
                    }
                    let wait = Duration::from_millis(remaining as u64).min(CANCEL_POLL_INTERVAL);
                    self.condvar.wait_for(&mut heap, wait);
                }
            }
        }
    }

    fn poll(&self) -> Option<T> {
        let mut heap = self.heap.lock();
        match heap.peek() {
            Some(Reverse(entry)) if entry.0.deadline_ms() <= self.clock.now_ms() => {
                let Reverse(entry) = heap.pop().expect("just peeked");
                Some(entry.0)
            }
            _ => None,
        }
    }

    fn clear(&self) {
        self.heap.lock().clear();
    }
}
