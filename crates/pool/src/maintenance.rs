//! Periodic pool maintenance.
//!
//! A pool never schedules its own maintenance. It exposes a [`Maintainable`]
//! control surface and a [`Scheduler`] drives it; [`IntervalScheduler`] is
//! the tokio-timer implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::entry::EntryId;
use crate::error::{Error, Result};
use crate::pool::{Pool, PoolStats};
use crate::resource::Resource;

/// A lease held longer than the leak detection threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LeakReport {
    /// The leased entry.
    pub entry: EntryId,
    /// How long it has been leased.
    pub held: Duration,
}

/// Outcome of one [`Pool::maintain`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaintenanceReport {
    /// Idle entries evicted for exceeding the idle timeout.
    pub idle_evicted: usize,
    /// Idle entries evicted for exceeding the maximum lifetime.
    pub expired: usize,
    /// Suspected leaks.
    pub leaks: Vec<LeakReport>,
}

impl MaintenanceReport {
    /// Total entries removed in this pass.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.idle_evicted + self.expired
    }

    /// Whether the pass found nothing to do.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.removed() == 0 && self.leaks.is_empty()
    }
}

/// Object-safe control surface a scheduler drives.
///
/// Implemented by every [`Pool`].
pub trait Maintainable: Send + Sync {
    /// Pool name.
    fn name(&self) -> &str;

    /// How often the pool wants to be maintained.
    fn maintenance_interval(&self) -> Duration;

    /// Current pool statistics.
    fn stats(&self) -> PoolStats;

    /// Run one maintenance pass.
    fn maintain(&self) -> BoxFuture<'_, MaintenanceReport>;

    /// Grow by one entry.
    fn increase_items(&self) -> BoxFuture<'_, Result<bool>>;

    /// Shrink by one idle entry.
    fn decrease_items(&self) -> BoxFuture<'_, bool>;

    /// Close the pool.
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

impl<R: Resource> Maintainable for Pool<R> {
    fn name(&self) -> &str {
        Pool::name(self)
    }

    fn maintenance_interval(&self) -> Duration {
        self.config().maintenance_interval
    }

    fn stats(&self) -> PoolStats {
        Pool::stats(self)
    }

    fn maintain(&self) -> BoxFuture<'_, MaintenanceReport> {
        Box::pin(Pool::maintain(self))
    }

    fn increase_items(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(Pool::increase_items(self))
    }

    fn decrease_items(&self) -> BoxFuture<'_, bool> {
        Box::pin(Pool::decrease_items(self))
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(Pool::shutdown(self))
    }
}

/// Drives [`Maintainable::maintain`] on some schedule.
pub trait Scheduler: Send {
    /// Attach the pool to maintain. Replaces any previous binding.
    fn bind_to(&mut self, target: Arc<dyn Maintainable>);

    /// Start the schedule.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if no pool is bound.
    fn start(&mut self) -> Result<()>;

    /// Stop the schedule and wait for an in-flight pass to finish.
    fn stop(&mut self) -> impl Future<Output = ()> + Send;
}

/// [`Scheduler`] that runs maintenance on a fixed tokio interval.
///
/// ```rust,ignore
/// let mut scheduler = IntervalScheduler::new();
/// scheduler.bind_to(Arc::new(pool.clone()));
/// scheduler.start()?;
/// // ...
/// scheduler.stop().await;
/// ```
pub struct IntervalScheduler {
    period: Option<Duration>,
    target: Option<Arc<dyn Maintainable>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl IntervalScheduler {
    /// Scheduler ticking at the bound pool's `maintenance_interval`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            period: None,
            target: None,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Tick every `period` instead of the pool's configured interval.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Whether the background task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for IntervalScheduler {
    fn bind_to(&mut self, target: Arc<dyn Maintainable>) {
        self.target = Some(target);
    }

    fn start(&mut self) -> Result<()> {
        let Some(target) = self.target.clone() else {
            return Err(Error::configuration("scheduler is not bound to a pool"));
        };
        if self.is_running() {
            return Ok(());
        }
        let period = self.period.unwrap_or_else(|| target.maintenance_interval());
        if period.is_zero() {
            return Err(Error::configuration("maintenance period must be greater than zero"));
        }

        let cancel = self.cancel.clone();
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = cancel.cancelled() => break,
                }

                let report = target.maintain().await;
                if !report.leaks.is_empty() {
                    warn!(
                        pool = %target.name(),
                        leaks = report.leaks.len(),
                        "maintenance found suspected leaks"
                    );
                }
                if report.removed() > 0 {
                    debug!(
                        pool = %target.name(),
                        idle_evicted = report.idle_evicted,
                        expired = report.expired,
                        "maintenance evicted entries"
                    );
                }
            }
            debug!(pool = %target.name(), "maintenance scheduler stopped");
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        // Allow a later restart.
        self.cancel = CancellationToken::new();
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for IntervalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalScheduler")
            .field("period", &self.period)
            .field("target", &self.target.as_ref().map(|t| t.name().to_string()))
            .field("running", &self.is_running())
            .finish()
    }
}
