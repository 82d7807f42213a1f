//! Scheduling coordinator for live patterns
//!
//! Maps pattern names to runners, applies live redefinitions to running
//! patterns, and dispatches named events in a single component.

mod config;
mod core;
mod error;
mod hooks;

pub use config::SchedulerConfig;
pub use core::{Scheduler, SchedulerStats};
pub use error::SchedulerError;
pub use hooks::{EventSink, HookFn, HookTable, NullEventSink};
