//! The single thread that advances the wheel and hands due tasks off to
//! the executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::delay_queue::{BinaryHeapDelayQueue, CancellationToken, DelayQueue};
use crate::error::TimerError;
use crate::executor::{Executor, ThreadExecutor};
use crate::layer::WheelLayer;
use crate::slot::Slot;
use crate::task::{ErrorSink, Task, TaskHandle};

type Action = Box<dyn FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;

struct DriverInner {
    root: Arc<WheelLayer>,
    delay_queue: Arc<dyn DelayQueue<Arc<Slot>>>,
    task_count: Arc<AtomicUsize>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn Executor>,
    error_sink: Option<Arc<ErrorSink>>,
    rw_lock: RwLock<()>,
}

impl DriverInner {
    fn submit(&self, expiry_ms: i64, action: Action) -> TaskHandle {
        let task = Task::new(expiry_ms, action, self.error_sink.clone());
        {
            let _readers = self.rw_lock.read();
            if !self.root.add(task.clone()) {
                self.dispatch(task.clone());
            }
        }
        TaskHandle(task)
    }

    fn dispatch(&self, task: Arc<Task>) {
        self.executor.spawn(Box::new(move || task.run()));
    }

    /// `reinsert` is the forwarding function passed to `Slot::flush`: it
    /// implements both immediate firing of due tasks and promotion of
    /// tasks that have aged into a finer layer.
    fn reinsert(&self, task: Arc<Task>) {
        if !self.root.add(task.clone()) && task.is_wait() {
            self.dispatch(task);
        }
    }

    fn run_loop(&self, cancel_token: &CancellationToken) {
        loop {
            let slot = match self.delay_queue.take(cancel_token) {
                Some(slot) => slot,
                None => return, // cancelled
            };

            let _writer = self.rw_lock.write();
            let mut current = Some(slot);
            while let Some(slot) = current {
                self.root.step(slot.expiration_ms());
                slot.flush(|task| self.reinsert(task));
                current = self.delay_queue.poll();
            }
        }
    }
}

/// Owns the wheel and the single driver thread; the public entry point for
/// submitting and cancelling timers.
pub struct TimerDriver {
    inner: Arc<DriverInner>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    cancel_token: Mutex<Option<Arc<CancellationToken>>>,
}

impl TimerDriver {
    /// Build a driver with the production `SystemClock`, `ThreadExecutor`
    /// and `BinaryHeapDelayQueue`.
    pub fn build(tick_duration: Duration, slot_count: usize, start_ms: Option<i64>) -> Result<Self, TimerError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let start = start_ms.unwrap_or_else(|| clock.now_ms());
        Self::build_with(tick_duration, slot_count, start, clock, Arc::new(ThreadExecutor), None)
    }

    /// Build a driver with injected `Clock` and `Executor` implementations
    /// and an optional action-error sink.
    pub fn build_with(
        tick_duration: Duration,
        slot_count: usize,
        start_ms: i64,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn Executor>,
        error_sink: Option<Arc<ErrorSink>>,
    ) -> Result<Self, TimerError> {
        let tick_ms = tick_duration.as_millis() as i64;
        if tick_ms <= 0 {
            return Err(TimerError::InvalidTick);
        }
        if slot_count == 0 {
            return Err(TimerError::InvalidSlotCount);
        }

        let task_count = Arc::new(AtomicUsize::new(0));
        let delay_queue: Arc<dyn DelayQueue<Arc<Slot>>> = Arc::new(BinaryHeapDelayQueue::new(clock.clone()));
        let root = WheelLayer::new(tick_ms, slot_count, start_ms, task_count.clone(), delay_queue.clone(), clock.clone());

        let inner = Arc::new(DriverInner {
            root,
            delay_queue,
            task_count,
            clock,
            executor,
            error_sink,
            rw_lock: RwLock::new(()),
        });

        Ok(Self {
            inner,
            thread_handle: Mutex::new(None),
            cancel_token: Mutex::new(None),
        })
    }

    pub fn add_task<F>(&self, delay_ms: i64, action: F) -> TaskHandle
    where
        F: FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let expiry_ms = self.inner.clock.now_ms() + delay_ms;
        self.add_task_at(expiry_ms, action)
    }

    pub fn add_task_at<F>(&self, expiry_ms: i64, action: F) -> TaskHandle
    where
        F: FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        self.inner.submit(expiry_ms, Box::new(action))
    }

    pub fn task_count(&self) -> usize {
        self.inner.task_count.load(Ordering::Acquire)
    }

    /// Spawn the driver thread. No-op if already running.
    pub fn start(&self) {
        let mut handle_guard = self.thread_handle.lock();
        if handle_guard.is_some() {
            return;
        }

        let token = Arc::new(CancellationToken::new());
        *self.cancel_token.lock() = Some(token.clone());

        let inner = self.inner.clone();
        log::debug!("starting timer driver thread");
        let handle = std::thread::Builder::new()
            .name("timer-driver".to_string())
            .spawn(move || inner.run_loop(&token))
            .expect("failed to spawn timer driver thread");
        *handle_guard = Some(handle);
    }

    /// Cancel the driver thread's blocking wait and empty the delay
    /// queue. In-flight actions already dispatched to the executor are
    /// not interrupted.
    pub fn stop(&self) {
        log::debug!("stopping timer driver");
        if let Some(token) = self.cancel_token.lock().take() {
            token.cancel();
        }
        self.inner.delay_queue.clear();
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Cancel the driver thread without clearing the delay queue: queued
    /// tasks are retained and will be processed as soon as `resume` is
    /// called. Tasks whose expiry passes during the pause window fire
    /// immediately on resume; they are not held back to their originally
    /// scheduled wall time.
    pub fn pause(&self) {
        log::debug!("pausing timer driver");
        if let Some(token) = self.cancel_token.lock().take() {
            token.cancel();
        }
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn resume(&self) {
        log::debug!("resuming timer driver");
        self.start();
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
