//! Event broadcasting for pool observability.
//!
//! Provides [`PoolEvent`] variants emitted as entries move through their
//! lifecycle and an [`EventBus`] backed by `tokio::sync::broadcast`.

use std::fmt;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::entry::EntryId;

// ---------------------------------------------------------------------------
// PoolEvent
// ---------------------------------------------------------------------------

/// Events emitted during pool operations.
///
/// All variants carry the `pool` name. Subscribers receive cloned copies
/// via [`EventBus::subscribe`].
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A new entry was created and made idle.
    Created {
        /// The pool name.
        pool: String,
        /// The new entry.
        entry: EntryId,
        /// How long the factory took.
        elapsed: Duration,
    },
    /// An entry was leased out.
    Borrowed {
        /// The pool name.
        pool: String,
        /// The leased entry.
        entry: EntryId,
        /// How long the borrower waited.
        waited: Duration,
    },
    /// A lease came back and its entry is idle again.
    Returned {
        /// The pool name.
        pool: String,
        /// The returned entry.
        entry: EntryId,
        /// How long the lease was held.
        held: Duration,
    },
    /// An entry was permanently removed.
    Removed {
        /// The pool name.
        pool: String,
        /// The removed entry.
        entry: EntryId,
        /// Why it was removed.
        reason: RemovalReason,
    },
    /// A borrower gave up waiting.
    BorrowTimeout {
        /// The pool name.
        pool: String,
        /// Borrowers still waiting at that moment.
        waiters: usize,
    },
    /// A lease has been held longer than the leak detection threshold.
    LeakSuspected {
        /// The pool name.
        pool: String,
        /// The suspicious entry.
        entry: EntryId,
        /// How long it has been leased.
        held: Duration,
    },
}

// ---------------------------------------------------------------------------
// RemovalReason
// ---------------------------------------------------------------------------

/// Reason an entry was permanently removed from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Shrunk on request via `decrease_items`.
    Evicted,
    /// Idle longer than the configured idle timeout.
    IdleTimeout,
    /// Older than the configured maximum lifetime.
    Expired,
    /// A before-borrow or after-return hook rejected it.
    HookRejected,
    /// The borrower reported it broken via `remove_item`.
    Broken,
    /// A lease was dropped without auto-return enabled.
    Abandoned,
    /// The idle channel had no room for it.
    ChannelFull,
    /// Its lease state was not what the pool expected.
    InvalidState,
    /// The pool is shutting down.
    Shutdown,
    /// The operation holding it was cancelled mid-flight.
    Cancelled,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Evicted => "evicted",
            Self::IdleTimeout => "idle_timeout",
            Self::Expired => "expired",
            Self::HookRejected => "hook_rejected",
            Self::Broken => "broken",
            Self::Abandoned => "abandoned",
            Self::ChannelFull => "channel_full",
            Self::InvalidState => "invalid_state",
            Self::Shutdown => "shutdown",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for pool events.
///
/// Emission is fire-and-forget: if no subscribers are listening or the
/// channel is full, events are silently dropped (no backpressure on the pool).
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    ///
    /// The buffer size determines how many events can be queued before
    /// slow subscribers start lagging (and losing events).
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: PoolEvent) {
        // Err only means there are no active receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
