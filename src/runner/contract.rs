//! PatternRunner trait definition

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::pattern::PatternUpdate;

/// Everything a runner needs from its surrounding session
#[derive(Debug, Clone)]
pub struct RunnerContext {
    /// Identity of the pattern this runner executes
    pub name: String,

    /// Subscription to the shared pulse period
    pub period: watch::Receiver<Duration>,

    /// Shared deferred flag. Runners read it at safe points and never
    /// write it; the scheduler is the only writer.
    pub deferred: Arc<AtomicBool>,
}

/// An addressable execution unit bound to one named pattern
///
/// Lifecycle: unstarted, then started (re-entered any number of times
/// via reload/swim), then stopped. Stopped is terminal: the scheduler
/// builds a fresh runner for the identity instead of restarting one.
#[async_trait]
pub trait PatternRunner: Send + Sync {
    /// Replace the pending body and arguments
    ///
    /// Safe to call mid-execution; the runner applies the update at its
    /// next safe suspension point. A second push before that point
    /// replaces the first.
    async fn push(&self, update: PatternUpdate);

    /// Begin executing. Called at most once per runner.
    async fn start(&self);

    /// Whether the runner has started and not yet fully stopped
    fn started(&self) -> bool;

    /// Request graceful termination. The current step always completes.
    async fn stop(&self);

    /// Re-derive timing state from the current transport parameters
    async fn reload(&self);

    /// Wake the loop so a just-pushed body is picked up promptly
    async fn swim(&self);
}

/// Builds runners for the scheduler, one per pattern identity
pub trait RunnerFactory: Send + Sync {
    fn create(&self, ctx: RunnerContext) -> Arc<dyn PatternRunner>;
}
