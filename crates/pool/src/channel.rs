//! Bounded handoff channel used to pass idle entries between tasks.
//!
//! Backed by a bounded `async-channel`. Receiving is cancel-safe, so
//! [`HandoffChannel::pop`] is a plain `recv` under a timeout. Sending is
//! not: dropping a pending `send` loses the item, so the timed
//! [`HandoffChannel::push`] retries `try_send` until its deadline and
//! always hands the item back on failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_channel::{Receiver, Sender, TryRecvError, TrySendError};

const PUSH_RETRY_INTERVAL: Duration = Duration::from_micros(100);

/// Why a [`HandoffChannel::pop`] returned without an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// Nothing arrived before the timeout elapsed.
    Timeout,
    /// The channel was closed.
    Closed,
}

/// Capacity-bounded FIFO of items with timed blocking push/pop.
#[derive(Debug)]
pub struct HandoffChannel<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    waiters: AtomicUsize,
}

/// Decrements the waiter count when a `pop` finishes or is cancelled.
struct WaiterGuard<'a>(&'a AtomicUsize);

impl<'a> WaiterGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T> HandoffChannel<T> {
    /// Create a channel holding at most `capacity` items.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity);
        Self {
            tx,
            rx,
            waiters: AtomicUsize::new(0),
        }
    }

    /// Enqueue without waiting. Returns the item if the channel is full or closed.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.tx.try_send(item).map_err(TrySendError::into_inner)
    }

    /// Enqueue, waiting up to `timeout` for room. Returns the item on failure.
    pub async fn push(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut item = item;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(back)) => return Err(back),
                Err(TrySendError::Full(back)) => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        return Err(back);
                    }
                    item = back;
                    tokio::time::sleep(PUSH_RETRY_INTERVAL.min(deadline - now)).await;
                }
            }
        }
    }

    /// Dequeue without waiting.
    pub fn try_pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }

    /// Dequeue, suspending the calling task up to `timeout`.
    pub async fn pop(&self, timeout: Duration) -> Result<T, PopError> {
        if let Ok(item) = self.rx.try_recv() {
            return Ok(item);
        }
        let _waiting = WaiterGuard::enter(&self.waiters);
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Ok(item)) => Ok(item),
            Ok(Err(_)) => Err(PopError::Closed),
            Err(_) => Err(PopError::Timeout),
        }
    }

    /// Close the channel. Pending and future pops fail with [`PopError::Closed`]
    /// once it is empty; pushes fail immediately.
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no item is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Whether the channel is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    /// Number of tasks currently suspended in [`pop`](Self::pop).
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn introspection_tracks_contents() {
        let ch = HandoffChannel::new(2);
        assert!(ch.is_empty());
        ch.try_push(1).unwrap();
        ch.try_push(2).unwrap();
        assert!(ch.is_full());
        assert_eq!(ch.try_push(3), Err(3));
        assert_eq!(ch.len(), 2);
    }

    #[test]
    fn fifo_order() {
        let ch = HandoffChannel::new(3);
        for i in 0..3 {
            ch.try_push(i).unwrap();
        }
        assert_eq!(ch.try_pop(), Some(0));
        assert_eq!(ch.try_pop(), Some(1));
        assert_eq!(ch.try_pop(), Some(2));
        assert_eq!(ch.try_pop(), None);
    }

    #[tokio::test]
    async fn pop_times_out_when_empty() {
        let ch: HandoffChannel<u32> = HandoffChannel::new(1);
        let started = Instant::now();
        assert_eq!(ch.pop(Duration::from_millis(50)).await, Err(PopError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(45));
        assert_eq!(ch.waiters(), 0);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let ch = Arc::new(HandoffChannel::new(1));
        let producer = Arc::clone(&ch);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.try_push(7u32).unwrap();
        });
        assert_eq!(ch.pop(Duration::from_secs(1)).await, Ok(7));
    }

    #[tokio::test]
    async fn waiters_are_counted_while_suspended() {
        let ch: Arc<HandoffChannel<u32>> = Arc::new(HandoffChannel::new(1));
        let waiting = Arc::clone(&ch);
        let handle = tokio::spawn(async move { waiting.pop(Duration::from_secs(1)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ch.waiters(), 1);

        ch.try_push(1).unwrap();
        assert_eq!(handle.await.unwrap(), Ok(1));
        assert_eq!(ch.waiters(), 0);
    }

    #[tokio::test]
    async fn push_returns_item_when_still_full() {
        let ch = HandoffChannel::new(1);
        ch.try_push(1).unwrap();
        assert_eq!(ch.push(2, Duration::from_millis(5)).await, Err(2));
    }

    #[tokio::test]
    async fn push_succeeds_once_room_frees() {
        let ch = Arc::new(HandoffChannel::new(1));
        ch.try_push(1).unwrap();
        let consumer = Arc::clone(&ch);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            consumer.try_pop();
        });
        assert_eq!(ch.push(2, Duration::from_secs(1)).await, Ok(()));
    }

    #[tokio::test]
    async fn close_fails_pending_pop() {
        let ch: Arc<HandoffChannel<u32>> = Arc::new(HandoffChannel::new(1));
        let waiting = Arc::clone(&ch);
        let handle = tokio::spawn(async move { waiting.pop(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(ch.close());
        assert_eq!(handle.await.unwrap(), Err(PopError::Closed));
        assert_eq!(ch.try_push(1), Err(1));
    }
}
