//! A single scheduled, cancellable callback and its lifecycle.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::slot::Slot;

/// The lifecycle of a task. `Wait` is the only non-terminal state; the
/// remaining three are terminal and mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Wait,
    Running,
    Success,
    Fail,
    Cancel,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Wait)
    }
}

type Action = Box<dyn FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;
pub type ErrorSink = dyn Fn(&TaskHandle, &(dyn std::error::Error + Send + Sync)) + Send + Sync;

struct Links {
    prev: Option<Arc<Task>>,
    next: Option<Arc<Task>>,
}

/// A single scheduled callback. Lives behind an `Arc` so it can be shared
/// between its owning `Slot`'s intrusive list and the `TaskHandle` given
/// back to the caller.
pub struct Task {
    pub(crate) expiry_ms: i64,
    action: Mutex<Option<Action>>,
    state: Mutex<TaskState>,
    pub(crate) slot: Mutex<Option<Arc<Slot>>>,
    pub(crate) links: Mutex<Links>,
    error_sink: Option<Arc<ErrorSink>>,
}

impl Task {
    pub(crate) fn new(expiry_ms: i64, action: Action, error_sink: Option<Arc<ErrorSink>>) -> Arc<Self> {
        Arc::new(Self {
            expiry_ms,
            action: Mutex::new(Some(action)),
            state: Mutex::new(TaskState::Wait),
            slot: Mutex::new(None),
            links: Mutex::new(Links {
                prev: None,
                next: None,
            }),
            error_sink,
        })
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub(crate) fn is_wait(&self) -> bool {
        *self.state.lock() == TaskState::Wait
    }

    pub(crate) fn prev(&self) -> Option<Arc<Task>> {
        self.links.lock().prev.clone()
    }

    pub(crate) fn next(&self) -> Option<Arc<Task>> {
        self.links.lock().next.clone()
    }

    pub(crate) fn set_prev(&self, prev: Option<Arc<Task>>) {
        self.links.lock().prev = prev;
    }

    pub(crate) fn set_next(&self, next: Option<Arc<Task>>) {
        self.links.lock().next = next;
    }

    /// `Wait -> Running`, run the action outside the critical section, then
    /// `Running -> Success | Fail`. No-op if the task already left `Wait`.
    pub(crate) fn run(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != TaskState::Wait {
                return;
            }
            *state = TaskState::Running;
        }
        self.remove();

        let action = self.action.lock().take();
        let result = match action {
            Some(f) => f(),
            None => Ok(()),
        };

        let final_state = match &result {
            Ok(()) => TaskState::Success,
            Err(err) => {
                log::warn!("timer task action failed: {err}");
                TaskState::Fail
            }
        };
        *self.state.lock() = final_state;

        if let (Err(err), Some(sink)) = (result, &self.error_sink) {
            let handle = TaskHandle(self.clone());
            sink(&handle, err.as_ref());
        }
    }

    /// `Wait -> Cancel`. Returns `false` if the task already left `Wait`.
    pub(crate) fn cancel(self: &Arc<Self>) -> bool {
        {
            let mut state = self.state.lock();
            if *state != TaskState::Wait {
                return false;
            }
            *state = TaskState::Cancel;
        }
        self.remove();
        true
    }

    /// Unlink from whichever slot currently holds this task. Retries
    /// against the freshly re-read `slot` pointer because a concurrent
    /// cascade may have relocated the task between the read and the
    /// unlink attempt.
    pub(crate) fn remove(self: &Arc<Self>) {
        loop {
            let current = self.slot.lock().clone();
            match current {
                None => return,
                Some(slot) => {
                    if slot.remove(self) {
                        return;
                    }
                }
            }
        }
    }
}

/// A handle to a submitted task, returned by `TimerDriver::add_task*`.
#[derive(Clone)]
pub struct TaskHandle(pub(crate) Arc<Task>);

impl TaskHandle {
    pub fn expiry_ms(&self) -> i64 {
        self.0.expiry_ms
    }

    pub fn state(&self) -> TaskState {
        self.0.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.0.state().is_terminal()
    }

    /// Attempt to cancel before firing. Returns `true` iff this call won
    /// the race against firing.
    pub fn cancel(&self) -> bool {
        self.0.cancel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(action: impl FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + 'static) -> Arc<Task> {
        Task::new(0, Box::new(action), None)
    }

    #[test]
    fn run_transitions_wait_to_success() {
        let task = new_task(|| Ok(()));
        task.run();
        assert_eq!(task.state(), TaskState::Success);
    }

    #[test]
    fn run_transitions_wait_to_fail_on_error() {
        let task = new_task(|| Err("boom".into()));
        task.run();
        assert_eq!(task.state(), TaskState::Fail);
    }

    #[test]
    fn cancel_before_run_wins() {
        let task = new_task(|| Ok(()));
        assert!(task.cancel());
        assert_eq!(task.state(), TaskState::Cancel);
        // A subsequent run() must be a no-op: action never invoked.
        task.run();
        assert_eq!(task.state(), TaskState::Cancel);
    }

    #[test]
    fn run_before_cancel_wins() {
        let task = new_task(|| Ok(()));
        task.run();
        assert!(!task.cancel());
        assert_eq!(task.state(), TaskState::Success);
    }

    #[test]
    fn error_sink_is_invoked_on_failure_but_state_stays_fail() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let observed = Arc::new(AtomicBool::new(false));
        let observed2 = observed.clone();
        let sink: Arc<ErrorSink> = Arc::new(move |_handle: &TaskHandle, _err: &(dyn std::error::Error + Send + Sync)| {
            observed2.store(true, Ordering::SeqCst);
        });
        let task = Task::new(0, Box::new(|| Err("boom".into())), Some(sink));
        task.run();
        assert_eq!(task.state(), TaskState::Fail);
        assert!(observed.load(Ordering::SeqCst));
    }
}
