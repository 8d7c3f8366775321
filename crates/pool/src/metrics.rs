//! Pool counters and timing accumulators.
//!
//! [`PoolMetrics`] is updated by the pool at the moment of each transition.
//! With the `metrics` feature, [`MetricsCollector`] additionally mirrors
//! [`PoolEvent`](crate::events::PoolEvent)s into the `metrics` facade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Monotonic counters and accumulators for one pool.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    borrowed_total: AtomicU64,
    item_created_total: AtomicU64,
    item_deleted_total: AtomicU64,
    borrowing_timeouts_total: AtomicU64,
    item_in_use_nanos: AtomicU64,
    item_creation_nanos: AtomicU64,
    waiting_for_item_nanos: AtomicU64,
}

fn add_duration(counter: &AtomicU64, d: Duration) {
    let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
    counter.fetch_add(nanos, Ordering::Relaxed);
}

fn secs(counter: &AtomicU64) -> f64 {
    Duration::from_nanos(counter.load(Ordering::Relaxed)).as_secs_f64()
}

impl PoolMetrics {
    /// Create zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A lease was handed out after waiting `waited`.
    pub fn record_borrow(&self, waited: Duration) {
        self.borrowed_total.fetch_add(1, Ordering::Relaxed);
        add_duration(&self.waiting_for_item_nanos, waited);
    }

    /// A borrow gave up after waiting `waited`.
    pub fn record_timeout(&self, waited: Duration) {
        self.borrowing_timeouts_total.fetch_add(1, Ordering::Relaxed);
        add_duration(&self.waiting_for_item_nanos, waited);
    }

    /// An entry was created in `elapsed`.
    pub fn record_created(&self, elapsed: Duration) {
        self.item_created_total.fetch_add(1, Ordering::Relaxed);
        add_duration(&self.item_creation_nanos, elapsed);
    }

    /// An entry was removed.
    pub fn record_deleted(&self) {
        self.item_deleted_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A lease held for `held` came back.
    pub fn record_in_use(&self, held: Duration) {
        add_duration(&self.item_in_use_nanos, held);
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            borrowed_total: self.borrowed_total.load(Ordering::Relaxed),
            item_created_total: self.item_created_total.load(Ordering::Relaxed),
            item_deleted_total: self.item_deleted_total.load(Ordering::Relaxed),
            borrowing_timeouts_total: self.borrowing_timeouts_total.load(Ordering::Relaxed),
            item_in_use_total_sec: secs(&self.item_in_use_nanos),
            item_creation_total_sec: secs(&self.item_creation_nanos),
            waiting_for_item_borrowing_total_sec: secs(&self.waiting_for_item_nanos),
        }
    }
}

/// Copy of [`PoolMetrics`] at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MetricsSnapshot {
    /// Leases handed out (re-borrows by a bound task not included).
    pub borrowed_total: u64,
    /// Entries created.
    pub item_created_total: u64,
    /// Entries removed.
    pub item_deleted_total: u64,
    /// Borrows that timed out.
    pub borrowing_timeouts_total: u64,
    /// Total time entries spent leased, in seconds.
    pub item_in_use_total_sec: f64,
    /// Total time spent in the resource factory, in seconds.
    pub item_creation_total_sec: f64,
    /// Total time borrowers spent waiting, in seconds.
    pub waiting_for_item_borrowing_total_sec: f64,
}

#[cfg(feature = "metrics")]
pub use collector::{MetricsCollector, spawn_metrics_collector};

#[cfg(feature = "metrics")]
mod collector {
    use std::sync::Arc;

    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;

    use crate::events::{EventBus, PoolEvent};

    /// Background collector that subscribes to an [`EventBus`] and records
    /// counters/histograms via the `metrics` crate.
    ///
    /// ```rust,ignore
    /// let bus = Arc::new(EventBus::default());
    /// let collector = MetricsCollector::new(&bus);
    /// tokio::spawn(collector.run(CancellationToken::new()));
    /// ```
    pub struct MetricsCollector {
        receiver: broadcast::Receiver<PoolEvent>,
    }

    impl MetricsCollector {
        /// Create a new collector subscribed to the given event bus.
        #[must_use]
        pub fn new(event_bus: &EventBus) -> Self {
            Self {
                receiver: event_bus.subscribe(),
            }
        }

        /// Consume events until the bus is dropped or `cancel` fires.
        /// Lagged events are skipped with a warning.
        pub async fn run(mut self, cancel: CancellationToken) {
            loop {
                tokio::select! {
                    result = self.receiver.recv() => {
                        match result {
                            Ok(event) => Self::record_event(&event),
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!(skipped = n, "MetricsCollector lagged behind event bus");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        }

        fn record_event(event: &PoolEvent) {
            match event {
                PoolEvent::Created { pool, elapsed, .. } => {
                    metrics::counter!("pool.create.total", "pool" => pool.clone()).increment(1);
                    metrics::histogram!("pool.create.duration_seconds", "pool" => pool.clone())
                        .record(elapsed.as_secs_f64());
                }
                PoolEvent::Borrowed { pool, waited, .. } => {
                    metrics::counter!("pool.borrow.total", "pool" => pool.clone()).increment(1);
                    metrics::histogram!("pool.borrow.wait_seconds", "pool" => pool.clone())
                        .record(waited.as_secs_f64());
                }
                PoolEvent::Returned { pool, held, .. } => {
                    metrics::counter!("pool.return.total", "pool" => pool.clone()).increment(1);
                    metrics::histogram!("pool.lease.duration_seconds", "pool" => pool.clone())
                        .record(held.as_secs_f64());
                }
                PoolEvent::Removed { pool, reason, .. } => {
                    metrics::counter!(
                        "pool.remove.total",
                        "pool" => pool.clone(),
                        "reason" => reason.to_string()
                    )
                    .increment(1);
                }
                PoolEvent::BorrowTimeout { pool, .. } => {
                    metrics::counter!("pool.borrow.timeout.total", "pool" => pool.clone())
                        .increment(1);
                }
                PoolEvent::LeakSuspected { pool, .. } => {
                    metrics::counter!("pool.leak.suspected.total", "pool" => pool.clone())
                        .increment(1);
                }
            }
        }
    }

    impl std::fmt::Debug for MetricsCollector {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MetricsCollector").finish()
        }
    }

    /// Create a [`MetricsCollector`] and spawn it as a background task.
    pub fn spawn_metrics_collector(
        event_bus: &Arc<EventBus>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let collector = MetricsCollector::new(event_bus);
        tokio::spawn(collector.run(cancel))
    }
}
