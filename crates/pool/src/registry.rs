//! Explicit registry of named pools.
//!
//! Construct one at process start, hand it to whatever needs pools and shut
//! it down explicitly. There is no global instance.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tracing::debug;

use crate::error::{Error, Result};
use crate::maintenance::{Maintainable, MaintenanceReport};
use crate::pool::{Pool, PoolStats};
use crate::resource::Resource;

/// One registered pool, kept both typed (for downcasting) and as a
/// type-erased control surface.
#[derive(Clone)]
struct Registered {
    typed: Arc<dyn Any + Send + Sync>,
    control: Arc<dyn Maintainable>,
}

/// Pools of different resource types keyed by pool name.
#[derive(Default)]
pub struct PoolRegistry {
    pools: DashMap<String, Registered>,
}

impl PoolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pool` under its name.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if a pool with the same name is
    /// already registered. Remove it first to replace it.
    pub fn register<R: Resource>(&self, pool: Pool<R>) -> Result<()> {
        let name = pool.name().to_string();
        match self.pools.entry(name) {
            MapEntry::Occupied(occupied) => Err(Error::configuration(format!(
                "pool '{}' is already registered",
                occupied.key()
            ))),
            MapEntry::Vacant(vacant) => {
                debug!(pool = %vacant.key(), "registered pool");
                let typed = Arc::new(pool);
                let control: Arc<dyn Maintainable> = typed.clone();
                vacant.insert(Registered { typed, control });
                Ok(())
            }
        }
    }

    /// Typed handle to the pool named `name`.
    ///
    /// Returns `None` if no such pool exists or it manages a different
    /// resource type.
    #[must_use]
    pub fn get<R: Resource>(&self, name: &str) -> Option<Pool<R>> {
        let typed = self.pools.get(name).map(|r| Arc::clone(&r.typed))?;
        typed.downcast::<Pool<R>>().ok().map(|pool| (*pool).clone())
    }

    /// Type-erased control surface of the pool named `name`.
    #[must_use]
    pub fn control(&self, name: &str) -> Option<Arc<dyn Maintainable>> {
        self.pools.get(name).map(|r| Arc::clone(&r.control))
    }

    /// Whether a pool named `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    /// Registered pool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether no pool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Stats of every registered pool.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<String, PoolStats> {
        self.pools
            .iter()
            .map(|r| (r.key().clone(), r.control.stats()))
            .collect()
    }

    /// Unregister the pool named `name` without shutting it down.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Maintainable>> {
        self.pools.remove(name).map(|(_, r)| r.control)
    }

    /// Run one maintenance pass on every pool.
    pub async fn maintain_all(&self) -> BTreeMap<String, MaintenanceReport> {
        let mut reports = BTreeMap::new();
        for (name, control) in self.snapshot() {
            reports.insert(name, control.maintain().await);
        }
        reports
    }

    /// Shut down and unregister every pool.
    pub async fn shutdown(&self) {
        let pools = self.snapshot();
        for (name, control) in &pools {
            control.shutdown().await;
            debug!(pool = %name, "pool shut down by registry");
        }
        self.pools.clear();
    }

    /// Clone the controls out so no shard lock is held across an await.
    fn snapshot(&self) -> Vec<(String, Arc<dyn Maintainable>)> {
        self.pools
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(&r.control)))
            .collect()
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.names())
            .finish()
    }
}
