//! Pool entries: a raw resource paired with its lease state and timestamps.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource::Resource;
use crate::state::{LeaseState, StateCell};

/// Stable identity of a pooled entry.
///
/// Only the id is public. Entries themselves are made and destroyed by the
/// pool alone:
///
/// ```compile_fail
/// let entry = nebula_pool::entry::Entry::new(1_u32);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntryId(Uuid);

impl EntryId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Where the raw instance currently lives.
struct Slot<T> {
    /// Set while the entry holds the instance itself.
    owned: Option<Arc<T>>,
    /// Set while the instance is lent out to a lease that may be shared.
    lent: Weak<T>,
}

/// One pooled instance.
///
/// The entry owns the raw instance except while it is lent to a lease; the
/// lease must give it back on return.
pub struct Entry<T> {
    id: EntryId,
    slot: Mutex<Slot<T>>,
    state: StateCell,
    created_at: Instant,
}

impl<T> Entry<T> {
    /// Wrap `instance` in a new entry in the [`LeaseState::Reserved`] state.
    pub(crate) fn new(instance: T) -> Self {
        Self {
            id: EntryId::new(),
            slot: Mutex::new(Slot {
                owned: Some(Arc::new(instance)),
                lent: Weak::new(),
            }),
            state: StateCell::new(LeaseState::Reserved),
            created_at: Instant::now(),
        }
    }

    /// Create a raw instance through `resource` and wrap it.
    ///
    /// Factory errors propagate untouched; the caller owns any rollback.
    pub(crate) async fn create<R>(resource: &R) -> Result<Self>
    where
        R: Resource<Instance = T>,
    {
        let instance = resource.create().await?;
        Ok(Self::new(instance))
    }

    /// The entry's identity.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// The entry's lease state.
    #[must_use]
    pub fn state(&self) -> &StateCell {
        &self.state
    }

    /// Time since creation.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the entry is older than `max_lifetime`.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|max| self.age() > max)
    }

    /// Whether the entry has sat idle longer than `idle_timeout`.
    #[must_use]
    pub fn is_idle_past(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|limit| {
            self.state.current() == LeaseState::Idle && self.state.in_state_for() > limit
        })
    }

    /// Handle to the raw instance, whether held by the entry or lent out.
    /// `None` once removed or after the lent instance was dropped.
    #[must_use]
    pub fn instance(&self) -> Option<Arc<T>> {
        let slot = self.slot.lock();
        slot.owned.clone().or_else(|| slot.lent.upgrade())
    }

    /// Hand the instance to a lease.
    ///
    /// With `shareable` the entry keeps a weak reference so later leases of
    /// the same bound task can reach the instance. Without it the lease is
    /// the sole owner and may mutate the instance.
    pub(crate) fn lend(&self, shareable: bool) -> Option<Arc<T>> {
        let mut slot = self.slot.lock();
        let instance = slot.owned.take()?;
        slot.lent = if shareable {
            Arc::downgrade(&instance)
        } else {
            Weak::new()
        };
        Some(instance)
    }

    /// Take back an instance previously handed out by [`lend`](Self::lend).
    pub(crate) fn restore(&self, instance: Arc<T>) {
        let mut slot = self.slot.lock();
        slot.lent = Weak::new();
        slot.owned = Some(instance);
    }

    /// Detach the raw instance for disposal.
    pub(crate) fn take_instance(&self) -> Option<Arc<T>> {
        let mut slot = self.slot.lock();
        slot.lent = Weak::new();
        slot.owned.take()
    }
}

impl<T> fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("state", &self.state.current())
            .field("age", &self.age())
            .finish()
    }
}
