//! A concurrent, hierarchical timing wheel for scheduling one-shot delayed
//! callbacks, based on Varghese & Lauck's "Hashed and Hierarchical Timing
//! Wheels" (1987).
//!
//! The wheel supports insertion at arbitrary delays (milliseconds to
//! hours), cancellation before firing, concurrent insertion/cancellation
//! from many producer threads while a single driver thread advances the
//! clock, and exactly-once firing under adversarial insert/cancel races.
//!
//! Layers are created lazily as insertions demand coarser granularity and
//! are never torn down; a task that lands in a coarse layer is cascaded
//! ("promoted") into progressively finer layers as the driver advances.
//!
//! ```no_run
//! use hierarchical_timing_wheel::TimerDriver;
//! use std::time::Duration;
//!
//! let driver = TimerDriver::build(Duration::from_millis(10), 256, None).unwrap();
//! driver.start();
//!
//! let handle = driver.add_task(500, || {
//!     println!("fired");
//!     Ok(())
//! });
//!
//! // handle.cancel() to cancel before it fires.
//! # driver.stop();
//! ```

mod clock;
mod delay_queue;
mod driver;
mod error;
mod executor;
mod layer;
mod slot;
mod task;

pub use clock::{Clock, SystemClock, TestClock};
pub use delay_queue::{BinaryHeapDelayQueue, CancellationToken, DelayQueue, Delayed};
pub use driver::TimerDriver;
pub use error::TimerError;
pub use executor::{Executor, InlineExecutor, SpawnedAction, ThreadExecutor};
pub use task::{ErrorSink, TaskHandle, TaskState};
