//! Default clock-driven runner
//!
//! Executes its pattern once per transport pulse on a dedicated tokio
//! task. Redefinitions arrive through the pending slot and are applied
//! at the next safe suspension point; stop, reload and swim are wakeups
//! evaluated at the same point. The body currently executing is never
//! touched.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::pattern::PatternUpdate;

use super::contract::{PatternRunner, RunnerContext, RunnerFactory};

/// A pushed update together with the policy it was pushed under: an
/// immediate push ticks at the next safe point instead of waiting for
/// the deadline
struct PendingUpdate {
    update: PatternUpdate,
    immediate: bool,
}

/// State shared between the handle and the spawned loop
struct TickShared {
    name: String,

    /// Latest pushed update, applied at the next safe point; immediacy
    /// travels with the update it belongs to
    pending: Mutex<Option<PendingUpdate>>,

    /// Set by start, cleared when the loop exits
    started: AtomicBool,

    /// Cooperative stop request
    stop_requested: AtomicBool,

    /// Wakes the loop out of its deadline wait
    wake: Notify,

    /// Shared deferred flag, owned by the scheduler
    deferred: Arc<AtomicBool>,
}

/// Default runner: one tokio task re-invoking the pattern body each pulse
pub struct TickRunner {
    shared: Arc<TickShared>,
    period: watch::Receiver<Duration>,
}

impl TickRunner {
    pub fn new(ctx: RunnerContext) -> Self {
        debug!(pattern = %ctx.name, "TickRunner::new: called");
        Self {
            shared: Arc::new(TickShared {
                name: ctx.name,
                pending: Mutex::new(None),
                started: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                wake: Notify::new(),
                deferred: ctx.deferred,
            }),
            period: ctx.period,
        }
    }
}

#[async_trait]
impl PatternRunner for TickRunner {
    async fn push(&self, update: PatternUpdate) {
        debug!(pattern = %self.shared.name, "TickRunner::push: called");
        let immediate = !self.shared.deferred.load(Ordering::SeqCst);
        if immediate {
            debug!(pattern = %self.shared.name, "TickRunner::push: immediate mode, forcing early tick");
        }
        *self.shared.pending.lock().await = Some(PendingUpdate { update, immediate });
        self.shared.wake.notify_one();
    }

    async fn start(&self) {
        if self.shared.stop_requested.load(Ordering::SeqCst) {
            warn!(pattern = %self.shared.name, "TickRunner::start: runner already stopped, ignoring");
            return;
        }
        if self.shared.started.swap(true, Ordering::SeqCst) {
            warn!(pattern = %self.shared.name, "TickRunner::start: already started, ignoring");
            return;
        }
        debug!(pattern = %self.shared.name, "TickRunner::start: spawning loop");
        tokio::spawn(run_loop(self.shared.clone(), self.period.clone()));
    }

    fn started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        debug!(pattern = %self.shared.name, "TickRunner::stop: called");
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    async fn reload(&self) {
        debug!(pattern = %self.shared.name, "TickRunner::reload: called");
        self.shared.wake.notify_one();
    }

    async fn swim(&self) {
        debug!(pattern = %self.shared.name, "TickRunner::swim: called");
        self.shared.wake.notify_one();
    }
}

/// The runner loop
///
/// Each pass through the top of the loop is a safe suspension point:
/// stop requests are honored and the pending update replaces the current
/// body there. Deadlines derive from the last tick's anchor plus the
/// current period, so timing stays drift-free across body jitter and
/// period changes are picked up on any wakeup.
async fn run_loop(shared: Arc<TickShared>, period_rx: watch::Receiver<Duration>) {
    debug!(pattern = %shared.name, "TickRunner: loop entered");
    let mut current: Option<PatternUpdate> = None;
    let mut last_tick: Option<Instant> = None;

    loop {
        if shared.stop_requested.load(Ordering::SeqCst) {
            debug!(pattern = %shared.name, "TickRunner: stop requested, leaving loop");
            break;
        }
        let mut fire_early = false;
        if let Some(pending) = shared.pending.lock().await.take() {
            debug!(pattern = %shared.name, "TickRunner: applying pending update");
            fire_early = pending.immediate;
            current = Some(pending.update);
        }
        let Some(update) = current.clone() else {
            // nothing pushed yet; wait for a push or a stop
            shared.wake.notified().await;
            continue;
        };

        let period = *period_rx.borrow();
        let now = Instant::now();
        let deadline = match last_tick {
            Some(anchor) => anchor + period,
            None => now,
        };

        if fire_early || now >= deadline {
            match AssertUnwindSafe((update.body)(update.args.clone()))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(pattern = %shared.name, error = %e, "TickRunner: pattern failed, retiring runner");
                    break;
                }
                Err(payload) => {
                    error!(pattern = %shared.name, panic = panic_message(&*payload), "TickRunner: pattern panicked, retiring runner");
                    break;
                }
            }

            // anchor the next deadline on the slot we just served; a
            // forced early tick re-anchors on its own time
            let mut anchor = if now >= deadline { deadline } else { now };
            let finished = Instant::now();
            if finished > anchor + period {
                debug!(pattern = %shared.name, "TickRunner: tick overran the period, re-anchoring");
                anchor = finished;
            }
            last_tick = Some(anchor);
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = shared.wake.notified() => {
                debug!(pattern = %shared.name, "TickRunner: woken before deadline");
            }
        }
    }

    shared.started.store(false, Ordering::SeqCst);
    debug!(pattern = %shared.name, "TickRunner: loop exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Factory producing [`TickRunner`]s
#[derive(Debug, Clone, Default)]
pub struct TickRunnerFactory;

impl TickRunnerFactory {
    pub fn new() -> Self {
        Self
    }
}

impl RunnerFactory for TickRunnerFactory {
    fn create(&self, ctx: RunnerContext) -> Arc<dyn PatternRunner> {
        Arc::new(TickRunner::new(ctx))
    }
}
