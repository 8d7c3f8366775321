//! Pool configuration types

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a [`Pool`](super::Pool).
///
/// `None` in any of the optional durations disables the corresponding
/// maintenance check.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Maximum number of live resources
    pub size: usize,
    /// Give a task that already holds a lease that same lease again
    pub bind_to_task: bool,
    /// Return leases automatically when they are dropped
    pub auto_return: bool,
    /// Default timeout for [`Pool::borrow`](super::Pool::borrow)
    pub borrowing_timeout: Duration,
    /// How long a return may wait for room in the idle channel
    pub returning_timeout: Duration,
    /// Idle resources older than this are evicted by maintenance
    pub idle_timeout: Option<Duration>,
    /// Resources older than this are discarded
    pub max_lifetime: Option<Duration>,
    /// Leases held longer than this are reported as suspected leaks
    pub leak_detection_threshold: Option<Duration>,
    /// Tick of the maintenance scheduler
    pub maintenance_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            bind_to_task: false,
            auto_return: true,
            borrowing_timeout: Duration::from_secs(30),
            returning_timeout: Duration::from_millis(1),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(3600)),
            leak_detection_threshold: None,
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Set the maximum number of live resources.
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Enable or disable task binding.
    #[must_use]
    pub fn with_bind_to_task(mut self, enabled: bool) -> Self {
        self.bind_to_task = enabled;
        self
    }

    /// Enable or disable automatic return on drop.
    #[must_use]
    pub fn with_auto_return(mut self, enabled: bool) -> Self {
        self.auto_return = enabled;
        self
    }

    /// Set the default borrow timeout.
    #[must_use]
    pub fn with_borrowing_timeout(mut self, timeout: Duration) -> Self {
        self.borrowing_timeout = timeout;
        self
    }

    /// Set the return push timeout.
    #[must_use]
    pub fn with_returning_timeout(mut self, timeout: Duration) -> Self {
        self.returning_timeout = timeout;
        self
    }

    /// Set or disable the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set or disable the maximum lifetime.
    #[must_use]
    pub fn with_max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set or disable leak detection.
    #[must_use]
    pub fn with_leak_detection_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.leak_detection_threshold = threshold;
        self
    }

    /// Set the maintenance tick.
    #[must_use]
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::configuration("size must be greater than 0"));
        }
        if self.borrowing_timeout.is_zero() {
            return Err(Error::configuration(
                "borrowing_timeout must be greater than zero",
            ));
        }
        if self.returning_timeout.is_zero() {
            return Err(Error::configuration(
                "returning_timeout must be greater than zero",
            ));
        }
        if self.maintenance_interval.is_zero() {
            return Err(Error::configuration(
                "maintenance_interval must be greater than zero",
            ));
        }
        for (name, value) in [
            ("idle_timeout", self.idle_timeout),
            ("max_lifetime", self.max_lifetime),
            ("leak_detection_threshold", self.leak_detection_threshold),
        ] {
            if value.is_some_and(|d| d.is_zero()) {
                return Err(Error::configuration(format!(
                    "{name} must be greater than zero when set"
                )));
            }
        }
        Ok(())
    }

    /// Parse a JSON document and validate the result.
    ///
    /// Missing fields take their default values.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("invalid pool config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}
