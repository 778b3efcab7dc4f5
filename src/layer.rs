//! One ring of a hierarchical timing wheel, plus its lazily-created
//! coarser neighbor.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::delay_queue::DelayQueue;
use crate::slot::Slot;
use crate::task::Task;

/// A ring of `slot_count` slots at a fixed granularity `tick_ms`, with a
/// lazily-created coarser `next` layer for expiries past this layer's
/// span.
pub struct WheelLayer {
    tick_ms: i64,
    slot_count: usize,
    span_ms: i64,
    slots: Vec<Arc<Slot>>,
    needle_ms: AtomicI64,
    next: Mutex<Option<Arc<WheelLayer>>>,
    task_count: Arc<AtomicUsize>,
    delay_queue: Arc<dyn DelayQueue<Arc<Slot>>>,
    clock: Arc<dyn Clock>,
}

impl WheelLayer {
    pub fn new(
        tick_ms: i64,
        slot_count: usize,
        start_needle_ms: i64,
        task_count: Arc<AtomicUsize>,
        delay_queue: Arc<dyn DelayQueue<Arc<Slot>>>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let slots = (0..slot_count).map(|_| Slot::new(task_count.clone())).collect();
        let aligned_needle = (start_needle_ms / tick_ms) * tick_ms;
        Arc::new(Self {
            tick_ms,
            slot_count,
            span_ms: tick_ms * slot_count as i64,
            slots,
            needle_ms: AtomicI64::new(aligned_needle),
            next: Mutex::new(None),
            task_count,
            delay_queue,
            clock,
        })
    }

    pub fn needle_ms(&self) -> i64 {
        self.needle_ms.load(Ordering::Acquire)
    }

    /// Place `task` into this layer if it fits, otherwise delegate to the
    /// (lazily created) coarser layer. Returns `false` if the task has
    /// already left `Wait`, or is due now at this layer's granularity —
    /// in both cases the caller (the driver's `reinsert`) is responsible
    /// for deciding what to do next.
    pub fn add(self: &Arc<Self>, task: Arc<Task>) -> bool {
        if !task.is_wait() {
            return false;
        }

        let needle = self.needle_ms();
        let expiry = task.expiry_ms;

        if expiry < needle + self.tick_ms {
            return false;
        }

        if expiry < needle + self.span_ms {
            let tick_index = expiry / self.tick_ms;
            let slot_index = (tick_index.rem_euclid(self.slot_count as i64)) as usize;
            let slot = &self.slots[slot_index];
            slot.add(task);
            let slot_expiry = tick_index * self.tick_ms;
            if slot.set_expiration(slot_expiry) {
                self.delay_queue.try_add(slot.clone());
            }
            true
        } else {
            let next = self.next_or_create();
            next.add(task)
        }
    }

    /// Advance this layer's needle to the tick containing `timestamp`,
    /// cascading the same advance into the next coarser layer. Only the
    /// driver, holding the writer lock, calls this.
    pub fn step(self: &Arc<Self>, timestamp: i64) {
        let needle = self.needle_ms();
        if timestamp >= needle + self.tick_ms {
            let new_needle = (timestamp / self.tick_ms) * self.tick_ms;
            self.needle_ms.store(new_needle, Ordering::Release);
            if let Some(next) = self.next.lock().clone() {
                next.step(timestamp);
            }
        }
    }

    fn next_or_create(self: &Arc<Self>) -> Arc<WheelLayer> {
        if let Some(next) = self.next.lock().clone() {
            return next;
        }
        let mut guard = self.next.lock();
        if let Some(next) = guard.clone() {
            return next;
        }
        let created = WheelLayer::new(
            self.span_ms,
            self.slot_count,
            self.needle_ms(),
            self.task_count.clone(),
            self.delay_queue.clone(),
            self.clock.clone(),
        );
        *guard = Some(created.clone());
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::delay_queue::BinaryHeapDelayQueue;
    use crate::task::TaskState;

    fn new_layer(tick_ms: i64, slot_count: usize) -> (Arc<WheelLayer>, Arc<BinaryHeapDelayQueue<Arc<Slot>>>) {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(0));
        let dq = Arc::new(BinaryHeapDelayQueue::new(clock.clone()));
        let dq_trait: Arc<dyn DelayQueue<Arc<Slot>>> = dq.clone();
        let task_count = Arc::new(AtomicUsize::new(0));
        let layer = WheelLayer::new(tick_ms, slot_count, 0, task_count, dq_trait, clock);
        (layer, dq)
    }

    fn wait_task(expiry_ms: i64) -> Arc<Task> {
        Task::new(expiry_ms, Box::new(|| Ok(())), None)
    }

    #[test]
    fn add_within_span_enqueues_its_slot_exactly_once() {
        let (layer, dq) = new_layer(10, 4);
        let a = wait_task(15);
        let b = wait_task(19); // same slot epoch as `a` (both land in [10,20))
        assert!(layer.add(a));
        assert!(layer.add(b));
        assert_eq!(dq.len(), 1, "both tasks share one slot epoch, one delay-queue entry");
    }

    #[test]
    fn add_already_due_is_rejected() {
        let (layer, _dq) = new_layer(10, 4);
        let task = wait_task(5); // < needle(0) + tick(10)
        assert!(!layer.add(task));
    }

    #[test]
    fn add_beyond_span_cascades_to_lazily_created_next_layer() {
        let (layer, _dq) = new_layer(10, 4); // span = 40
        let far = wait_task(1_000);
        assert!(layer.add(far));
        // A second insertion beyond the span must reuse the same next layer.
        let far2 = wait_task(2_000);
        assert!(layer.add(far2));
    }

    #[test]
    fn step_advances_needle_and_cascades_to_next() {
        let (layer, _dq) = new_layer(10, 4); // span = 40
        let far = wait_task(100); // lands in next layer (tick=40)
        layer.add(far);
        layer.step(50);
        assert_eq!(layer.needle_ms(), 50);
    }

    #[test]
    fn cancelled_task_is_rejected_on_reinsert() {
        let (layer, _dq) = new_layer(10, 4);
        let task = wait_task(15);
        assert!(task.cancel());
        assert_eq!(task.state(), TaskState::Cancel);
        assert!(!layer.add(task));
    }
}
