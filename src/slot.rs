//! A single ring position and the tasks queued in it.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::delay_queue::Delayed;
use crate::task::Task;

/// Sentinel stored in `expiry_ms` while the slot is not a member of the
/// delay queue.
const NOT_SCHEDULED: i64 = -1;

struct SlotList {
    head: Option<Arc<Task>>,
    tail: Option<Arc<Task>>,
}

/// A ring position holding every task whose expiry currently falls within
/// one tick of this slot's aligned time. An intrusive doubly-linked list
/// of `Task`s plus the atomic expiry used as the slot's delay-queue key.
pub struct Slot {
    list: Mutex<SlotList>,
    expiry_ms: AtomicI64,
    task_count: Arc<AtomicUsize>,
}

impl Slot {
    pub fn new(task_count: Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Self {
            list: Mutex::new(SlotList {
                head: None,
                tail: None,
            }),
            expiry_ms: AtomicI64::new(NOT_SCHEDULED),
            task_count,
        })
    }

    /// Append `task` to the tail of the list and mark it as owned by this
    /// slot. O(1).
    pub fn add(self: &Arc<Self>, task: Arc<Task>) {
        let mut list = self.list.lock();
        *task.slot.lock() = Some(self.clone());
        task.set_prev(list.tail.clone());
        task.set_next(None);
        match list.tail.take() {
            Some(old_tail) => old_tail.set_next(Some(task.clone())),
            None => list.head = Some(task.clone()),
        }
        list.tail = Some(task);
        self.task_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Detach `task` from this slot's list, iff it is still a member.
    /// Membership and the unlink happen under the same lock so a racing
    /// `flush` cannot observe a half-updated list.
    pub fn remove(self: &Arc<Self>, task: &Arc<Task>) -> bool {
        let mut list = self.list.lock();
        {
            let mut owner = task.slot.lock();
            match &*owner {
                Some(s) if Arc::ptr_eq(s, self) => *owner = None,
                _ => return false,
            }
        }

        let prev = task.prev();
        let next = task.next();
        match &prev {
            Some(p) => p.set_next(next.clone()),
            None => list.head = next.clone(),
        }
        match &next {
            Some(n) => n.set_prev(prev.clone()),
            None => list.tail = prev.clone(),
        }
        task.set_prev(None);
        task.set_next(None);
        drop(list);

        self.task_count.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Compare-and-set the slot's epoch expiry. Returns `true` iff the
    /// stored value changed — the caller uses that to decide whether this
    /// slot needs a fresh entry in the shared delay queue.
    pub fn set_expiration(&self, expiry_ms: i64) -> bool {
        let previous = self.expiry_ms.swap(expiry_ms, Ordering::AcqRel);
        previous != expiry_ms
    }

    pub fn expiration_ms(&self) -> i64 {
        self.expiry_ms.load(Ordering::Acquire)
    }

    /// Drain every task currently in the list and invoke `forward` for
    /// each, outside the list lock. Resets the slot to the unscheduled
    /// epoch so it is ready to be re-queued for a future expiry.
    pub fn flush(self: &Arc<Self>, mut forward: impl FnMut(Arc<Task>)) {
        let drained = {
            let mut list = self.list.lock();
            let mut out = Vec::new();
            let mut current = list.head.take();
            list.tail = None;
            while let Some(task) = current {
                let next = task.next();
                task.set_next(None);
                task.set_prev(None);
                *task.slot.lock() = None;
                current = next;
                out.push(task);
            }
            out
        };

        if !drained.is_empty() {
            self.task_count.fetch_sub(drained.len(), Ordering::AcqRel);
        }
        self.expiry_ms.store(NOT_SCHEDULED, Ordering::Release);

        for task in drained {
            forward(task);
        }
    }
}

impl Delayed for Arc<Slot> {
    fn deadline_ms(&self) -> i64 {
        self.expiration_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;

    fn wait_task(expiry_ms: i64) -> Arc<Task> {
        Task::new(expiry_ms, Box::new(|| Ok(())), None)
    }

    #[test]
    fn add_then_flush_preserves_fifo_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let slot = Slot::new(counter.clone());
        let a = wait_task(1);
        let b = wait_task(2);
        let c = wait_task(3);
        slot.add(a.clone());
        slot.add(b.clone());
        slot.add(c.clone());
        assert_eq!(counter.load(Ordering::Acquire), 3);

        let mut order = Vec::new();
        slot.flush(|t| order.push(t.expiry_ms));
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(counter.load(Ordering::Acquire), 0);
        assert_eq!(slot.expiration_ms(), -1);
    }

    #[test]
    fn remove_middle_element_relinks_neighbors() {
        let counter = Arc::new(AtomicUsize::new(0));
        let slot = Slot::new(counter.clone());
        let a = wait_task(1);
        let b = wait_task(2);
        let c = wait_task(3);
        slot.add(a.clone());
        slot.add(b.clone());
        slot.add(c.clone());

        assert!(slot.remove(&b));
        assert_eq!(counter.load(Ordering::Acquire), 2);

        let mut order = Vec::new();
        slot.flush(|t| order.push(t.expiry_ms));
        assert_eq!(order, vec![1, 3]);
    }

    #[test]
    fn remove_is_false_for_non_member() {
        let counter = Arc::new(AtomicUsize::new(0));
        let slot_a = Slot::new(counter.clone());
        let slot_b = Slot::new(counter.clone());
        let task = wait_task(1);
        slot_a.add(task.clone());

        assert!(!slot_b.remove(&task));
        assert!(slot_a.remove(&task));
        assert!(!slot_a.remove(&task));
    }

    #[test]
    fn set_expiration_reports_change_only_when_value_differs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let slot = Slot::new(counter);
        assert!(slot.set_expiration(100));
        assert!(!slot.set_expiration(100));
        assert!(slot.set_expiration(200));
    }

    #[test]
    fn flushed_task_state_is_still_wait_ready_for_reinsertion() {
        let counter = Arc::new(AtomicUsize::new(0));
        let slot = Slot::new(counter);
        let task = wait_task(10);
        slot.add(task.clone());
        slot.flush(|t| assert_eq!(t.state(), TaskState::Wait));
    }
}
