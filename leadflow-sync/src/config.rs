//! Sync loop configuration.

use std::time::Duration;

/// Foreground pull cadence in seconds.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 45;

/// Delay before the first tick, letting session/auth state settle.
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 3;

/// Configuration for a provider sync loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often a sync cycle runs (default: 45 seconds).
    pub interval: Duration,

    /// Delay before the first cycle after `start()` (default: 3 seconds).
    /// The first tick fires immediately once the delay elapses.
    pub initial_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            initial_delay: Duration::from_secs(DEFAULT_INITIAL_DELAY_SECS),
        }
    }
}

impl SyncConfig {
    /// Create SyncConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LEADFLOW_SYNC_INTERVAL_SECS`: cycle cadence (default: 45)
    /// - `LEADFLOW_SYNC_INITIAL_DELAY_SECS`: delay before the first cycle (default: 3)
    pub fn from_env() -> Self {
        let interval = Duration::from_secs(
            std::env::var("LEADFLOW_SYNC_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS),
        );

        let initial_delay = Duration::from_secs(
            std::env::var("LEADFLOW_SYNC_INITIAL_DELAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_INITIAL_DELAY_SECS),
        );

        Self {
            interval,
            initial_delay,
        }
    }

    /// Short intervals for development and tests.
    pub fn development() -> Self {
        Self {
            interval: Duration::from_secs(5),
            initial_delay: Duration::ZERO,
        }
    }

    /// Production cadence.
    pub fn production() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}
