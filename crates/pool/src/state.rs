//! Lease state machine attached to every pooled entry.
//!
//! ```text
//! Idle -> Reserved -> Leased -> (Reserved) -> Idle
//!   \________\__________\____________\______-> Removed (terminal)
//! ```
//!
//! Transitions are compare-and-set: a transition only happens when the
//! entry is currently in the expected source state. A failed CAS on a
//! path the pool believes reachable is an invariant violation.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle state of a pooled entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum LeaseState {
    /// Available, sitting in the handoff channel.
    Idle = 0,
    /// Claimed mid-handoff; hooks run in this state.
    Reserved = 1,
    /// Owned by a borrowing task.
    Leased = 2,
    /// Disposed. Terminal.
    Removed = 3,
}

impl LeaseState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Reserved,
            2 => Self::Leased,
            _ => Self::Removed,
        }
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Reserved => write!(f, "Reserved"),
            Self::Leased => write!(f, "Leased"),
            Self::Removed => write!(f, "Removed"),
        }
    }
}

/// Why [`StateCell::wait_and_transition`] gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The expected source state did not appear before the deadline.
    Timeout {
        /// State observed when the wait expired.
        actual: LeaseState,
    },
    /// The entry was removed while waiting; it can never reach the source state.
    Removed,
}

/// Atomic holder of a [`LeaseState`] plus the instant it was entered.
#[derive(Debug)]
pub struct StateCell {
    state: AtomicU8,
    entered_at: Mutex<Instant>,
    changed: Notify,
}

impl StateCell {
    /// Create a cell in `initial` state.
    #[must_use]
    pub fn new(initial: LeaseState) -> Self {
        Self {
            state: AtomicU8::new(initial as u8),
            entered_at: Mutex::new(Instant::now()),
            changed: Notify::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> LeaseState {
        LeaseState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Instant the current state was entered.
    #[must_use]
    pub fn entered_at(&self) -> Instant {
        *self.entered_at.lock()
    }

    /// Time spent in the current state.
    #[must_use]
    pub fn in_state_for(&self) -> Duration {
        self.entered_at().elapsed()
    }

    /// Move `from -> to` if the cell is currently `from`.
    ///
    /// Returns the state actually observed on failure. Leaving
    /// [`LeaseState::Removed`] is never allowed.
    pub fn transition(&self, from: LeaseState, to: LeaseState) -> Result<(), LeaseState> {
        if from == LeaseState::Removed {
            return Err(LeaseState::Removed);
        }
        match self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                *self.entered_at.lock() = Instant::now();
                self.changed.notify_waiters();
                Ok(())
            }
            Err(actual) => Err(LeaseState::from_u8(actual)),
        }
    }

    /// Move to [`LeaseState::Removed`] from whatever state the cell is in.
    ///
    /// Returns the previous state, or `None` if the cell was already removed.
    pub fn remove(&self) -> Option<LeaseState> {
        let previous = self.state.swap(LeaseState::Removed as u8, Ordering::AcqRel);
        let previous = LeaseState::from_u8(previous);
        if previous == LeaseState::Removed {
            return None;
        }
        *self.entered_at.lock() = Instant::now();
        self.changed.notify_waiters();
        Some(previous)
    }

    /// Wait up to `timeout` for the cell to be in `from`, then move it to `to`.
    pub async fn wait_and_transition(
        &self,
        from: LeaseState,
        to: LeaseState,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a transition between the check
            // and the await still wakes us.
            notified.as_mut().enable();

            match self.transition(from, to) {
                Ok(()) => return Ok(()),
                Err(LeaseState::Removed) => return Err(WaitError::Removed),
                Err(_) => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return match self.transition(from, to) {
                    Ok(()) => Ok(()),
                    Err(LeaseState::Removed) => Err(WaitError::Removed),
                    Err(actual) => Err(WaitError::Timeout { actual }),
                };
            }
        }
    }
}
