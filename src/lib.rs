//! Shoal - async pattern scheduling for live coding
//!
//! Shoal keeps a set of named musical patterns running against a shared
//! transport pulse while the performer redefines them from a REPL. Each
//! pattern runs on its own tokio task; redefinitions swap the body at a
//! safe point without dropping a beat.
//!
//! # Core Concepts
//!
//! - **Identity Is The Name**: scheduling a name that is already running
//!   redefines that pattern in place, never stacks a second copy
//! - **Runners Never Restart**: a stopped runner is spent; re-scheduling
//!   its name builds a brand-new runner under the same key
//! - **Safe-Point Handoff**: new bodies, stop requests and timing changes
//!   all take effect between pattern steps, never during one
//! - **Transport, Not A Clock**: the transport only publishes the pulse
//!   period; runners derive their own drift-free deadlines from it
//!
//! # Modules
//!
//! - [`scheduler`] - Name-to-runner registry and event dispatch
//! - [`runner`] - The runner contract and the clock-driven default
//! - [`pattern`] - Callable descriptors, bodies and arguments
//! - [`transport`] - Shared pulse period publication
//! - [`backend`] - sclang/SuperDirt process supervision
//! - [`config`] - Configuration types and loading

pub mod backend;
pub mod config;
pub mod pattern;
pub mod runner;
pub mod scheduler;
pub mod transport;

// Re-export commonly used types
pub use backend::{BackendConfig, BackendError, BackendNotice, BackendProcess};
pub use config::{Config, TransportConfig};
pub use pattern::{Callable, PatternArgs, PatternBody, PatternUpdate};
pub use runner::{PatternRunner, RunnerContext, RunnerFactory, TickRunner, TickRunnerFactory};
pub use scheduler::{
    EventSink, HookFn, NullEventSink, Scheduler, SchedulerConfig, SchedulerError, SchedulerStats,
};
pub use transport::Transport;
