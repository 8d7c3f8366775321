//! RAII lease handed to borrowers.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::entry::EntryId;

/// Bookkeeping a lease carries back to its pool.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeaseTicket {
    pub(crate) entry: EntryId,
    pub(crate) borrowed_at: Instant,
    pub(crate) task: Option<tokio::task::Id>,
}

/// Non-owning route from a lease back to the pool that issued it.
pub(crate) trait ReturnSink<T>: Send + Sync {
    /// Return the lease on a background task.
    fn schedule_return(self: Arc<Self>, ticket: LeaseTicket, instance: Arc<T>);

    /// Discard the lease's entry on a background task. Used when a lease is
    /// dropped while automatic return is disabled.
    fn schedule_discard(self: Arc<Self>, ticket: LeaseTicket, instance: Arc<T>);
}

/// Exclusive, temporary ownership of a pooled resource.
///
/// Give it back with [`Pool::release`](crate::Pool::release) or
/// [`Pool::remove_item`](crate::Pool::remove_item). Dropping it returns the
/// resource automatically when the pool's `auto_return` is enabled;
/// otherwise a dropped lease counts as broken and its entry is discarded.
///
/// The lease holds only a weak reference to its pool, so an outstanding
/// lease never keeps a pool alive.
pub struct Lease<T: Send + Sync + 'static> {
    instance: Option<Arc<T>>,
    ticket: LeaseTicket,
    pool: Weak<dyn ReturnSink<T>>,
    auto_return: bool,
}

impl<T: Send + Sync + 'static> Lease<T> {
    pub(crate) fn new(
        instance: Arc<T>,
        ticket: LeaseTicket,
        pool: Weak<dyn ReturnSink<T>>,
        auto_return: bool,
    ) -> Self {
        Self {
            instance: Some(instance),
            ticket,
            pool,
            auto_return,
        }
    }

    /// Identity of the pooled entry backing this lease.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.ticket.entry
    }

    /// How long the lease has been held.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.ticket.borrowed_at.elapsed()
    }

    /// Whether other leases from the same bound task share this instance.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.instance.as_ref().is_some_and(|i| Arc::strong_count(i) > 1)
    }

    /// Mutable access to the instance.
    ///
    /// Returns `None` when the pool binds leases to tasks, since another
    /// lease of the same task may share the instance.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.instance.as_mut().and_then(Arc::get_mut)
    }

    /// Whether this lease was issued by the pool behind `sink`.
    pub(crate) fn issued_by(&self, sink: *const ()) -> bool {
        std::ptr::addr_eq(self.pool.as_ptr(), sink)
    }

    /// Take the ticket and instance out without triggering the drop path.
    pub(crate) fn detach(mut self) -> (LeaseTicket, Arc<T>) {
        let instance = self
            .instance
            .take()
            .expect("lease instance is present until detached or dropped");
        (self.ticket, instance)
    }
}

impl<T: Send + Sync + 'static> std::ops::Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.instance
            .as_deref()
            .expect("lease instance is present until detached or dropped")
    }
}

impl<T: Send + Sync + 'static> AsRef<T> for Lease<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: Send + Sync + 'static> Drop for Lease<T> {
    fn drop(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        if self.auto_return {
            pool.schedule_return(self.ticket, instance);
        } else {
            pool.schedule_discard(self.ticket, instance);
        }
    }
}

impl<T: Send + Sync + fmt::Debug + 'static> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.ticket.entry)
            .field("instance", &self.instance)
            .field("held_for", &self.held_for())
            .finish()
    }
}
