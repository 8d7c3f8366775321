//! # Nebula Pool
//!
//! Lease-based async resource pool.
//!
//! A [`Pool`] keeps at most `size` expensive resources (database
//! connections, sockets, ...) and hands each one to a single borrower at a
//! time as a [`Lease`]. Borrowers that find nothing idle suspend on a
//! bounded handoff channel until a lease comes back or their timeout
//! expires. Growth, shrinking, hooks and maintenance all go through the
//! pool; nothing else creates or destroys resources.
//!
//! ```rust,ignore
//! let pool = Pool::new(Postgres::new(url), PoolConfig::default().with_size(8))?;
//! pool.warmup().await;
//!
//! let conn = pool.borrow().await?;
//! conn.execute("SELECT 1").await?;
//! pool.release(conn).await?;
//! ```

pub mod binding;
pub mod channel;
mod entry;
pub mod error;
pub mod events;
pub mod hooks;
pub mod lease;
pub mod maintenance;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod resource;
pub mod state;

pub use entry::EntryId;
pub use error::{Error, Result};
pub use events::{EventBus, PoolEvent, RemovalReason};
pub use hooks::{
    AuditHook, HookPhase, HookResult, HookTarget, KeepAliveChecker, KeepAliveHook, PoolHook,
};
pub use lease::Lease;
pub use maintenance::{
    IntervalScheduler, LeakReport, Maintainable, MaintenanceReport, Scheduler,
};
pub use metrics::{MetricsSnapshot, PoolMetrics};
pub use pool::{Pool, PoolBuilder, PoolConfig, PoolStats};
pub use registry::PoolRegistry;
pub use resource::Resource;
pub use state::LeaseState;

#[cfg(feature = "metrics")]
pub use metrics::{MetricsCollector, spawn_metrics_collector};
