//! Pool configuration

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for a resource pool.
///
/// Fixed at construction. Values are sanitised rather than rejected:
/// malformed settings are silently clamped into a usable range (see
/// [`PoolConfig::sanitized`]).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfig {
    /// Opaque label, used in errors and log fields.
    pub name: String,
    /// Target number of resources to keep live even when idle.
    pub min: usize,
    /// Hard ceiling on live resources.
    pub max: usize,
    /// Time after which an idle resource becomes eligible for reaping.
    pub idle_timeout: Duration,
    /// Interval between reaper ticks.
    pub reap_interval: Duration,
    /// Number of priority bands for waiters; band 0 is highest priority.
    pub priority_bands: usize,
    /// Whether the reaper evicts idle resources at all. The minimum-floor
    /// top-up runs either way.
    pub refresh_idle: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            min: 0,
            max: 1,
            idle_timeout: Duration::from_secs(30),
            reap_interval: Duration::from_secs(1),
            priority_bands: 1,
            refresh_idle: true,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given label and defaults elsewhere.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Clamp the configuration into a usable range.
    ///
    /// `max` is raised to at least 1; `min` is lowered to `max` if it
    /// exceeds it; zero durations and a zero band count fall back to the
    /// defaults. Sanitisation never fails.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.max == 0 {
            self.max = defaults.max;
        }
        if self.min > self.max {
            self.min = self.max;
        }
        if self.idle_timeout.is_zero() {
            self.idle_timeout = defaults.idle_timeout;
        }
        if self.reap_interval.is_zero() {
            self.reap_interval = defaults.reap_interval;
        }
        if self.priority_bands == 0 {
            self.priority_bands = defaults.priority_bands;
        }
        self
    }
}
