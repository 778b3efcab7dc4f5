//! Execution substrate consumed by the driver.
//!
//! The wheel only needs an opaque `spawn(action)` capability so that a slow
//! user action cannot stall the driver thread. The policy, parallelism and
//! backpressure of the substrate are intentionally unspecified here.

/// A boxed, one-shot action dispatched off the driver thread.
pub type SpawnedAction = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    fn spawn(&self, action: SpawnedAction);
}

/// Default production executor: one OS thread per fired task.
///
/// This keeps the core independent of any particular async runtime or
/// worker-pool crate; a deployment with its own pool can supply an
/// `Executor` that forwards into it instead.
#[derive(Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn spawn(&self, action: SpawnedAction) {
        let build = std::thread::Builder::new().name("timer-task".to_string());
        if let Err(err) = build.spawn(action) {
            log::error!("failed to spawn timer task thread: {err}");
        }
    }
}

/// Runs the action synchronously on the calling thread (the driver thread,
/// in practice). Only suitable for tests: a slow action here *will* stall
/// advancement, which is exactly the property production code must avoid.
#[derive(Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn spawn(&self, action: SpawnedAction) {
        action();
    }
}
