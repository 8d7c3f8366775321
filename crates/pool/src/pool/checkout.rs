//! Drop guards that keep the live count honest when a pool future is
//! cancelled mid-operation.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::entry::Entry;
use crate::resource::Resource;

use super::{PoolInner, SharedEntry};

/// Give back one live slot, never going below zero.
pub(super) fn release_slot(live: &AtomicUsize) {
    let _ = live.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
}

/// A live slot claimed for an entry that does not exist yet.
///
/// Released on drop unless [`keep`](Self::keep) hands it to a created entry.
pub(super) struct SlotClaim<'a> {
    live: &'a AtomicUsize,
    kept: bool,
}

impl<'a> SlotClaim<'a> {
    /// Claim a slot if fewer than `size` are live.
    pub(super) fn try_claim(live: &'a AtomicUsize, size: usize) -> Option<Self> {
        live.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < size).then_some(n + 1)
        })
        .ok()
        .map(|_| Self { live, kept: false })
    }

    /// The slot now belongs to a live entry.
    pub(super) fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        if !self.kept {
            release_slot(self.live);
        }
    }
}

/// An entry taken off the idle channel and not yet leased out or put back.
///
/// If dropped while still armed, the entry goes back to the idle channel
/// when it never left `Idle`, and is removed otherwise.
pub(super) struct Checkout<R: Resource> {
    pool: Arc<PoolInner<R>>,
    entry: Option<SharedEntry<R::Instance>>,
}

impl<R: Resource> Checkout<R> {
    pub(super) fn new(pool: &Arc<PoolInner<R>>, entry: SharedEntry<R::Instance>) -> Self {
        Self {
            pool: Arc::clone(pool),
            entry: Some(entry),
        }
    }

    /// Another handle to the entry; the guard stays armed.
    pub(super) fn shared(&self) -> SharedEntry<R::Instance> {
        Arc::clone(self.entry())
    }

    /// Disarm the guard and take the entry.
    pub(super) fn into_inner(mut self) -> SharedEntry<R::Instance> {
        self.entry
            .take()
            .expect("checkout holds its entry until disarmed")
    }

    /// The entry has been handed on; nothing to settle.
    pub(super) fn disarm(self) {
        drop(self.into_inner());
    }

    fn entry(&self) -> &SharedEntry<R::Instance> {
        self.entry
            .as_ref()
            .expect("checkout holds its entry until disarmed")
    }
}

impl<R: Resource> Deref for Checkout<R> {
    type Target = Entry<R::Instance>;

    fn deref(&self) -> &Entry<R::Instance> {
        self.entry()
    }
}

impl<R: Resource> Drop for Checkout<R> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.reclaim(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_respects_size() {
        let live = AtomicUsize::new(0);
        let first = SlotClaim::try_claim(&live, 1).unwrap();
        assert!(SlotClaim::try_claim(&live, 1).is_none());
        first.keep();
        assert_eq!(live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_claim_gives_the_slot_back() {
        let live = AtomicUsize::new(0);
        drop(SlotClaim::try_claim(&live, 2).unwrap());
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn release_never_underflows() {
        let live = AtomicUsize::new(0);
        release_slot(&live);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
