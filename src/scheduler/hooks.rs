//! Event hooks
//!
//! Hooks are plain synchronous callbacks invoked by name through
//! [`Scheduler::dispatch_event`]. Registration is last-wins: one hook
//! per event name. The [`EventSink`] trait is the seam to whatever
//! survival-kit or REPL layer wants to expose the hooks externally.
//!
//! [`Scheduler::dispatch_event`]: super::Scheduler::dispatch_event

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use serde_json::Value;
use tracing::debug;

/// Synchronous callback bound to an event name
pub type HookFn = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Destination that mirrors registered event names to the outside world
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Make one event name reachable from the external environment
    async fn register(&self, event: &str) -> Result<()>;
}

/// Sink that accepts every registration and does nothing with it
#[derive(Debug, Clone, Default)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn register(&self, event: &str) -> Result<()> {
        debug!(%event, "NullEventSink::register: called");
        Ok(())
    }
}

/// Name to hook mapping with last-wins registration
#[derive(Default)]
pub struct HookTable {
    hooks: HashMap<String, HookFn>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a hook to an event name, replacing any previous binding
    pub fn register(&mut self, event: &str, hook: HookFn) {
        if self.hooks.insert(event.to_string(), hook).is_some() {
            debug!(%event, "HookTable::register: replacing existing hook");
        }
    }

    /// Currently bound hook for an event, if any
    pub fn get(&self, event: &str) -> Option<HookFn> {
        self.hooks.get(event).cloned()
    }

    /// Registered event names, sorted for stable output
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hooks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl std::fmt::Debug for HookTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookTable")
            .field("events", &self.names())
            .finish()
    }
}
