//! Construction-time argument errors. Action failures are deliberately
//! *not* represented here — they are caught per-task and turned into
//! `TaskState::Fail` (see `task.rs`), never propagated to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("tick duration must be positive")]
    InvalidTick,
    #[error("slot count must be positive")]
    InvalidSlotCount,
}
