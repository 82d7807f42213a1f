//! Scheduler error types

use thiserror::Error;

/// Errors surfaced by scheduler operations
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The callable handed to schedule cannot run as a pattern
    #[error("schedule target must be a function or bound method, not {kind}")]
    InvalidScheduleTarget { kind: String },

    /// An event was dispatched before any hook was registered for it
    #[error("unknown event '{name}': register it before dispatching")]
    UnknownEvent { name: String },
}

impl SchedulerError {
    /// True when scheduling was rejected because of the target's kind
    pub fn is_invalid_target(&self) -> bool {
        matches!(self, SchedulerError::InvalidScheduleTarget { .. })
    }

    /// True when a dispatch named an event nobody registered
    pub fn is_unknown_event(&self) -> bool {
        matches!(self, SchedulerError::UnknownEvent { .. })
    }
}
