//! Scheduler implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::pattern::{Callable, PatternArgs, PatternUpdate};
use crate::runner::{PatternRunner, RunnerContext, RunnerFactory, TickRunnerFactory};
use crate::transport::Transport;

use super::config::SchedulerConfig;
use super::error::SchedulerError;
use super::hooks::{EventSink, HookFn, HookTable, NullEventSink};

/// Counters tracked across the scheduler's lifetime
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Runners started
    pub total_started: usize,

    /// Live redefinitions applied to running runners
    pub total_redefined: usize,

    /// Runners stopped through unschedule or reset
    pub total_stopped: usize,

    /// Most simultaneously live runners
    pub peak_live: usize,
}

/// One registry entry: the runner plus the bookkeeping that decides
/// whether the name still maps to a usable runner
struct RunnerSlot {
    runner: Arc<dyn PatternRunner>,

    /// The runner was started at least once
    ever_started: bool,

    /// Stopped through the scheduler; the slot only remains so a
    /// re-schedule of the name can see it is spent
    retired: bool,
}

impl RunnerSlot {
    /// A spent slot holds a runner that can never run again
    fn spent(&self) -> bool {
        self.retired || (self.ever_started && !self.runner.started())
    }
}

/// Internal state protected by mutex
struct SchedulerInner {
    /// Live runners keyed by pattern name
    runners: HashMap<String, RunnerSlot>,

    /// Event hooks keyed by event name
    hooks: HookTable,

    /// Statistics
    stats: SchedulerStats,
}

/// The Scheduler owns every live pattern runner and routes live-coding
/// commands to them by name.
///
/// A pattern's identity is its declared name: scheduling a name that is
/// already running redefines the running pattern in place, never stacks
/// a second copy. Stopped runners are never restarted; re-scheduling a
/// stopped name builds a brand-new runner under the same key.
pub struct Scheduler {
    config: SchedulerConfig,
    transport: Transport,
    deferred: Arc<AtomicBool>,
    factory: Arc<dyn RunnerFactory>,
    sink: Arc<dyn EventSink>,
    inner: Mutex<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler with the default runner factory and event sink
    pub fn new(config: SchedulerConfig, transport: Transport) -> Self {
        Self::with_collaborators(
            config,
            transport,
            Arc::new(TickRunnerFactory::new()),
            Arc::new(NullEventSink),
        )
    }

    /// Create a scheduler with explicit collaborators
    pub fn with_collaborators(
        config: SchedulerConfig,
        transport: Transport,
        factory: Arc<dyn RunnerFactory>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        debug!(?config, "Scheduler::new: called");
        let deferred = Arc::new(AtomicBool::new(config.deferred));
        Self {
            config,
            transport,
            deferred,
            factory,
            sink,
            inner: Mutex::new(SchedulerInner {
                runners: HashMap::new(),
                hooks: HookTable::new(),
                stats: SchedulerStats::default(),
            }),
        }
    }

    /// Schedule a pattern under its declared name
    ///
    /// Only functions and bound methods are accepted. If the name is
    /// already running this is a live redefinition: the new body is
    /// pushed into the existing runner, which picks it up at its next
    /// safe point. Otherwise a runner is created (or re-created, when a
    /// previous one under this name has stopped) and started.
    pub async fn schedule(&self, target: Callable, args: PatternArgs) -> Result<(), SchedulerError> {
        let (name, body) = match target {
            Callable::Function { name, body } => (name, body),
            Callable::Method { name, body, .. } => (name, body),
            other => {
                warn!(kind = %other.kind_name(), "Scheduler::schedule: target cannot run as a pattern, rejecting");
                return Err(SchedulerError::InvalidScheduleTarget {
                    kind: other.kind_name().to_string(),
                });
            }
        };
        debug!(pattern = %name, "Scheduler::schedule: called");
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        // a runner that ran and stopped never restarts; drop the spent
        // slot so the name gets a fresh one
        if inner.runners.get(&name).is_some_and(|slot| slot.spent()) {
            debug!(pattern = %name, "Scheduler::schedule: previous runner is spent, replacing");
            inner.runners.remove(&name);
        }

        let slot = inner.runners.entry(name.clone()).or_insert_with(|| {
            debug!(pattern = %name, "Scheduler::schedule: creating runner");
            let ctx = RunnerContext {
                name: name.clone(),
                period: self.transport.subscribe(),
                deferred: self.deferred.clone(),
            };
            RunnerSlot {
                runner: self.factory.create(ctx),
                ever_started: false,
                retired: false,
            }
        });

        slot.runner.push(PatternUpdate { body, args }).await;

        if slot.runner.started() {
            debug!(pattern = %name, "Scheduler::schedule: already running, redefining in place");
            slot.runner.reload().await;
            slot.runner.swim().await;
            inner.stats.total_redefined += 1;
        } else {
            debug!(pattern = %name, "Scheduler::schedule: starting runner");
            slot.runner.start().await;
            slot.ever_started = true;
            inner.stats.total_started += 1;
        }

        let live = inner.runners.values().filter(|slot| !slot.retired).count();
        inner.stats.peak_live = inner.stats.peak_live.max(live);
        Ok(())
    }

    /// Gracefully stop the named pattern
    ///
    /// Returns whether a live runner was stopped. Unknown names and
    /// already-stopped patterns are a no-op.
    pub async fn unschedule(&self, name: &str) -> bool {
        debug!(pattern = %name, "Scheduler::unschedule: called");
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        match inner.runners.get_mut(name) {
            Some(slot) if !slot.retired => {
                debug!(pattern = %name, "Scheduler::unschedule: stopping runner");
                slot.retired = true;
                slot.runner.stop().await;
                inner.stats.total_stopped += 1;
                true
            }
            Some(_) => {
                debug!(pattern = %name, "Scheduler::unschedule: already retired, nothing to do");
                false
            }
            None => {
                debug!(pattern = %name, "Scheduler::unschedule: no such pattern, nothing to do");
                false
            }
        }
    }

    /// Stop every runner and clear the registry
    ///
    /// Safe to call on an empty scheduler, and safe to call twice.
    pub async fn reset(&self) {
        debug!("Scheduler::reset: called");
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let mut stopped = 0;
        for (name, slot) in inner.runners.iter() {
            debug!(pattern = %name, "Scheduler::reset: stopping runner");
            slot.runner.stop().await;
            if !slot.retired {
                stopped += 1;
            }
        }
        inner.stats.total_stopped += stopped;

        let cleared = inner.runners.len();
        inner.runners.clear();
        info!(cleared, stopped, "Scheduler::reset: registry cleared");
    }

    /// Change the transport pulse period and resynchronize every runner
    pub async fn set_period(&self, period: Duration) {
        debug!(?period, "Scheduler::set_period: called");
        self.transport.set_period(period);
        self.reload_runners().await;
    }

    /// Ask every live runner to re-derive its timing state
    async fn reload_runners(&self) {
        let inner = self.inner.lock().await;
        for (name, slot) in inner.runners.iter() {
            if slot.retired {
                continue;
            }
            debug!(pattern = %name, "Scheduler::reload_runners: reloading");
            slot.runner.reload().await;
        }
    }

    /// Switch between deferred and immediate redefinition
    ///
    /// Deferred means a redefinition waits for the next pulse boundary;
    /// immediate means the runner ticks as soon as the new body lands.
    /// Runners observe the change at their next safe point.
    pub fn set_deferred(&self, deferred: bool) {
        debug!(deferred, "Scheduler::set_deferred: called");
        self.deferred.store(deferred, Ordering::SeqCst);
    }

    /// Current deferred mode
    pub fn deferred(&self) -> bool {
        self.deferred.load(Ordering::SeqCst)
    }

    /// Bind a hook to an event name, replacing any previous binding
    pub async fn register_event(&self, event: &str, hook: HookFn) {
        debug!(%event, "Scheduler::register_event: called");
        let mut inner = self.inner.lock().await;
        inner.hooks.register(event, hook);
    }

    /// Mirror every registered event name into the external sink
    ///
    /// A failing registration is logged and skipped; the remaining
    /// events still register.
    pub async fn setup(&self) {
        debug!("Scheduler::setup: called");
        let events = {
            let inner = self.inner.lock().await;
            inner.hooks.names()
        };
        for event in events {
            if let Err(e) = self.sink.register(&event).await {
                warn!(%event, error = %e, "Scheduler::setup: sink registration failed, continuing");
            }
        }
    }

    /// Invoke the hook bound to an event, synchronously
    ///
    /// Dispatching an event nobody registered is an error, not a no-op.
    pub async fn dispatch_event(&self, event: &str, args: &[Value]) -> Result<(), SchedulerError> {
        debug!(%event, "Scheduler::dispatch_event: called");
        let hook = {
            let inner = self.inner.lock().await;
            inner.hooks.get(event)
        };

        match hook {
            Some(hook) => {
                debug!(%event, "Scheduler::dispatch_event: invoking hook");
                hook(args);
                Ok(())
            }
            None => {
                debug!(%event, "Scheduler::dispatch_event: no hook registered");
                Err(SchedulerError::UnknownEvent {
                    name: event.to_string(),
                })
            }
        }
    }

    /// Names of the patterns currently in the registry, sorted
    pub async fn names(&self) -> Vec<String> {
        debug!("Scheduler::names: called");
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner
            .runners
            .iter()
            .filter(|(_, slot)| !slot.retired)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Get the scheduler statistics
    pub async fn stats(&self) -> SchedulerStats {
        debug!("Scheduler::stats: called");
        let inner = self.inner.lock().await;
        inner.stats.clone()
    }

    /// The scheduler section of the effective configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The transport handle runners subscribe to
    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::contract::mock::MockRunnerFactory;
    use async_trait::async_trait;
    use eyre::eyre;
    use serde_json::json;

    fn test_scheduler() -> (Arc<MockRunnerFactory>, Scheduler) {
        let factory = Arc::new(MockRunnerFactory::new());
        let scheduler = Scheduler::with_collaborators(
            SchedulerConfig::default(),
            Transport::new(Duration::from_millis(100)),
            factory.clone(),
            Arc::new(NullEventSink),
        );
        (factory, scheduler)
    }

    fn pattern(name: &str) -> Callable {
        Callable::function(name, |_args| async move { Ok(()) })
    }

    #[tokio::test]
    async fn test_schedule_creates_and_starts() {
        let (factory, scheduler) = test_scheduler();

        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();

        assert_eq!(factory.created_count(), 1);
        let runner = factory.runner("beat").unwrap();
        assert_eq!(runner.calls(), vec!["push", "start"]);
        assert!(runner.started());
        assert_eq!(scheduler.names().await, vec!["beat"]);
    }

    #[tokio::test]
    async fn test_schedule_twice_redefines_in_place() {
        let (factory, scheduler) = test_scheduler();

        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();

        // one runner, redefined through it, never a second copy
        assert_eq!(factory.created_count(), 1);
        let runner = factory.runner("beat").unwrap();
        assert_eq!(runner.calls(), vec!["push", "start", "push", "reload", "swim"]);
        assert_eq!(scheduler.names().await, vec!["beat"]);

        let stats = scheduler.stats().await;
        assert_eq!(stats.total_started, 1);
        assert_eq!(stats.total_redefined, 1);
    }

    #[tokio::test]
    async fn test_self_stopped_runner_is_replaced() {
        let (factory, scheduler) = test_scheduler();

        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();

        // the runner stops on its own, outside the scheduler
        factory.runner("beat").unwrap().stop().await;

        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        assert_eq!(factory.created_count(), 2, "a stopped runner must never restart");

        let fresh = factory.runner("beat").unwrap();
        assert_eq!(fresh.calls(), vec!["push", "start"]);
        assert_eq!(scheduler.names().await, vec!["beat"]);
    }

    #[tokio::test]
    async fn test_invalid_targets_rejected() {
        let (factory, scheduler) = test_scheduler();

        let err = scheduler
            .schedule(Callable::Value { type_name: "str".to_string() }, PatternArgs::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_target());
        assert_eq!(
            err.to_string(),
            "schedule target must be a function or bound method, not str"
        );

        let err = scheduler
            .schedule(Callable::Builtin { name: "print".to_string() }, PatternArgs::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_target());

        let err = scheduler
            .schedule(Callable::Type { name: "Pattern".to_string() }, PatternArgs::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_target());

        // nothing leaked into the registry
        assert_eq!(factory.created_count(), 0);
        assert!(scheduler.names().await.is_empty());
    }

    #[tokio::test]
    async fn test_method_target_accepted() {
        let (factory, scheduler) = test_scheduler();

        let target = Callable::method("player", "tick", |_args| async move { Ok(()) });
        scheduler.schedule(target, PatternArgs::new()).await.unwrap();

        assert_eq!(factory.created_count(), 1);
        assert_eq!(scheduler.names().await, vec!["tick"]);
    }

    #[tokio::test]
    async fn test_unschedule_unknown_is_noop() {
        let (_factory, scheduler) = test_scheduler();
        assert!(!scheduler.unschedule("ghost").await);
    }

    #[tokio::test]
    async fn test_unschedule_stops_runner() {
        let (factory, scheduler) = test_scheduler();

        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        assert!(scheduler.unschedule("beat").await);

        let runner = factory.runner("beat").unwrap();
        assert_eq!(runner.calls(), vec!["push", "start", "stop"]);
        assert!(scheduler.names().await.is_empty());

        // a second unschedule finds nothing left to stop
        assert!(!scheduler.unschedule("beat").await);
        assert_eq!(runner.call_count("stop"), 1);
    }

    #[tokio::test]
    async fn test_reschedule_after_unschedule_builds_new_runner() {
        let (factory, scheduler) = test_scheduler();

        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        scheduler.unschedule("beat").await;
        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();

        assert_eq!(factory.created_count(), 2);
        let fresh = factory.runner("beat").unwrap();
        assert_eq!(fresh.calls(), vec!["push", "start"]);
        assert_eq!(scheduler.names().await, vec!["beat"]);
    }

    #[tokio::test]
    async fn test_reset_stops_all_and_clears() {
        let (factory, scheduler) = test_scheduler();

        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        scheduler.schedule(pattern("bass"), PatternArgs::new()).await.unwrap();

        scheduler.reset().await;

        assert_eq!(factory.runner("beat").unwrap().call_count("stop"), 1);
        assert_eq!(factory.runner("bass").unwrap().call_count("stop"), 1);
        assert!(scheduler.names().await.is_empty());
        assert_eq!(scheduler.stats().await.total_stopped, 2);

        // reset on an empty scheduler is safe
        scheduler.reset().await;
        assert!(scheduler.names().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_period_reloads_runners() {
        let (factory, scheduler) = test_scheduler();

        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        scheduler.set_period(Duration::from_millis(250)).await;

        assert_eq!(scheduler.transport().period(), Duration::from_millis(250));
        assert_eq!(factory.runner("beat").unwrap().call_count("reload"), 1);
    }

    #[tokio::test]
    async fn test_set_period_reloads_each_live_runner_and_skips_retired() {
        let (factory, scheduler) = test_scheduler();

        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        scheduler.schedule(pattern("bass"), PatternArgs::new()).await.unwrap();
        scheduler.schedule(pattern("hats"), PatternArgs::new()).await.unwrap();
        assert!(scheduler.unschedule("hats").await);

        scheduler.set_period(Duration::from_millis(250)).await;

        let beat = factory.runner("beat").unwrap();
        let bass = factory.runner("bass").unwrap();
        let hats = factory.runner("hats").unwrap();
        assert_eq!(beat.call_count("reload"), 1);
        assert_eq!(bass.call_count("reload"), 1);
        assert_eq!(hats.call_count("reload"), 0, "retired runners are left alone");

        // a second change reloads each live runner exactly once more
        scheduler.set_period(Duration::from_millis(125)).await;
        assert_eq!(beat.call_count("reload"), 2);
        assert_eq!(bass.call_count("reload"), 2);
        assert_eq!(hats.call_count("reload"), 0);
    }

    #[tokio::test]
    async fn test_set_deferred_is_shared_with_runners() {
        let (factory, scheduler) = test_scheduler();
        assert!(scheduler.deferred(), "deferred mode is the default");
        assert_eq!(scheduler.deferred(), scheduler.config().deferred);

        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        let ctx = factory.context("beat").unwrap();
        assert!(ctx.deferred.load(Ordering::SeqCst));

        scheduler.set_deferred(false);
        assert!(!scheduler.deferred());
        assert!(
            !ctx.deferred.load(Ordering::SeqCst),
            "runners must see the flag change without being rebuilt"
        );
    }

    #[tokio::test]
    async fn test_push_carries_args() {
        let (factory, scheduler) = test_scheduler();

        let args = PatternArgs::from_positional(vec![json!(1)]).with_keyword("gain", json!(0.5));
        scheduler.schedule(pattern("beat"), args).await.unwrap();

        let pushed = factory.runner("beat").unwrap().pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].args.positional, vec![json!(1)]);
        assert_eq!(pushed[0].args.keyword.get("gain"), Some(&json!(0.5)));
    }

    #[tokio::test]
    async fn test_dispatch_before_register_fails() {
        let (_factory, scheduler) = test_scheduler();

        let err = scheduler.dispatch_event("boot", &[]).await.unwrap_err();
        assert!(err.is_unknown_event());
        assert_eq!(err.to_string(), "unknown event 'boot': register it before dispatching");
    }

    #[tokio::test]
    async fn test_register_then_dispatch_invokes_hook() {
        let (_factory, scheduler) = test_scheduler();

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let hook: HookFn = {
            let received = received.clone();
            Arc::new(move |args| {
                received.lock().unwrap().push(args.to_vec());
            })
        };
        scheduler.register_event("boot", hook).await;

        scheduler.dispatch_event("boot", &[json!(1), json!(2)]).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_register_last_wins() {
        let (_factory, scheduler) = test_scheduler();

        let first = Arc::new(std::sync::Mutex::new(0));
        let second = Arc::new(std::sync::Mutex::new(0));

        let hook: HookFn = {
            let first = first.clone();
            Arc::new(move |_args| *first.lock().unwrap() += 1)
        };
        scheduler.register_event("boot", hook).await;

        let hook: HookFn = {
            let second = second.clone();
            Arc::new(move |_args| *second.lock().unwrap() += 1)
        };
        scheduler.register_event("boot", hook).await;

        scheduler.dispatch_event("boot", &[]).await.unwrap();
        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);
    }

    /// Sink that records registrations and can fail on one event name
    struct RecordingSink {
        registered: std::sync::Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn register(&self, event: &str) -> eyre::Result<()> {
            self.registered.lock().unwrap().push(event.to_string());
            if self.fail_on.as_deref() == Some(event) {
                return Err(eyre!("sink rejected '{}'", event));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_setup_registers_all_and_survives_sink_failure() {
        let sink = Arc::new(RecordingSink {
            registered: std::sync::Mutex::new(Vec::new()),
            fail_on: Some("midi".to_string()),
        });
        let scheduler = Scheduler::with_collaborators(
            SchedulerConfig::default(),
            Transport::new(Duration::from_millis(100)),
            Arc::new(MockRunnerFactory::new()),
            sink.clone(),
        );

        let hook: HookFn = Arc::new(|_args| {});
        scheduler.register_event("quit", hook.clone()).await;
        scheduler.register_event("boot", hook.clone()).await;
        scheduler.register_event("midi", hook).await;

        scheduler.setup().await;

        // all three attempted in sorted order; the failure is skipped
        let registered = sink.registered.lock().unwrap();
        assert_eq!(*registered, vec!["boot", "midi", "quit"]);
    }

    #[tokio::test]
    async fn test_stats_tracking() {
        let (_factory, scheduler) = test_scheduler();

        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        scheduler.schedule(pattern("bass"), PatternArgs::new()).await.unwrap();
        scheduler.unschedule("beat").await;

        let stats = scheduler.stats().await;
        assert_eq!(stats.total_started, 2);
        assert_eq!(stats.total_redefined, 1);
        assert_eq!(stats.total_stopped, 1);
        assert_eq!(stats.peak_live, 2);
    }

    #[tokio::test]
    async fn test_full_live_session() {
        let (factory, scheduler) = test_scheduler();

        // perform: define, redefine, silence, bring back
        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();
        scheduler.unschedule("beat").await;
        scheduler.schedule(pattern("beat"), PatternArgs::new()).await.unwrap();

        assert_eq!(factory.created_count(), 2);
        assert_eq!(scheduler.names().await, vec!["beat"]);

        let stats = scheduler.stats().await;
        assert_eq!(stats.total_started, 2);
        assert_eq!(stats.total_redefined, 1);
        assert_eq!(stats.total_stopped, 1);
    }
}
