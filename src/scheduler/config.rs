//! Scheduler configuration

use serde::{Deserialize, Serialize};

/// Configuration for the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Start in deferred mode: redefinitions wait for the next pulse
    /// boundary instead of firing immediately
    #[serde(default = "default_deferred")]
    pub deferred: bool,
}

fn default_deferred() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            deferred: default_deferred(),
        }
    }
}
