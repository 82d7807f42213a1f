//! Shared transport parameters
//!
//! The transport carries the pulse period runners derive their timing
//! from. It is a parameter handle, not a clock: the embedding runtime
//! publishes the period, runners subscribe and compute their own
//! deadlines from it.

use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::config::TransportConfig;

/// Cloneable handle to the shared pulse period
#[derive(Debug, Clone)]
pub struct Transport {
    period_tx: watch::Sender<Duration>,
}

impl Transport {
    /// Create a transport with an initial pulse period
    pub fn new(period: Duration) -> Self {
        debug!(?period, "Transport::new: called");
        let (period_tx, _) = watch::channel(period);
        Self { period_tx }
    }

    /// Create a transport from configuration
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.period())
    }

    /// Publish a new pulse period
    ///
    /// Sleeping runners keep their current deadline until woken; the
    /// scheduler pairs this with a reload so changes take effect at once.
    pub fn set_period(&self, period: Duration) {
        debug!(?period, "Transport::set_period: called");
        self.period_tx.send_replace(period);
    }

    /// Current pulse period
    pub fn period(&self) -> Duration {
        *self.period_tx.borrow()
    }

    /// Subscribe to period changes
    pub fn subscribe(&self) -> watch::Receiver<Duration> {
        self.period_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_period() {
        let transport = Transport::new(Duration::from_millis(500));
        assert_eq!(transport.period(), Duration::from_millis(500));
    }

    #[test]
    fn test_set_period_visible_to_subscribers() {
        let transport = Transport::new(Duration::from_millis(500));
        let rx = transport.subscribe();

        transport.set_period(Duration::from_millis(125));

        assert_eq!(transport.period(), Duration::from_millis(125));
        assert_eq!(*rx.borrow(), Duration::from_millis(125));
    }

    #[test]
    fn test_clones_share_the_period() {
        let transport = Transport::new(Duration::from_millis(500));
        let other = transport.clone();

        other.set_period(Duration::from_millis(250));

        assert_eq!(transport.period(), Duration::from_millis(250));
    }

    #[test]
    fn test_from_config() {
        let config = TransportConfig { period_ms: 100 };
        let transport = Transport::from_config(&config);
        assert_eq!(transport.period(), Duration::from_millis(100));
    }
}
