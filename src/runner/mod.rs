//! Pattern runners
//!
//! A runner owns the execution of exactly one named pattern. The
//! scheduler talks to it only through the [`PatternRunner`] contract;
//! [`TickRunner`] is the default clock-driven implementation.

pub mod contract;
mod tick;

pub use contract::{PatternRunner, RunnerContext, RunnerFactory};
pub use tick::{TickRunner, TickRunnerFactory};
