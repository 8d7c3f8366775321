//! Maintenance hooks run around lease hand-off.
//!
//! Hooks run while an entry is [`Reserved`](crate::LeaseState::Reserved):
//! right before it is leased out ([`HookPhase::BeforeBorrow`]) and right
//! after a lease comes back ([`HookPhase::AfterReturn`]). A hook may inspect
//! or repair the instance, or reject it; a rejected entry is discarded and
//! the triggering borrow/return fails with
//! [`Error::HookRejected`](crate::Error::HookRejected).
//!
//! Hooks are executed in priority order (lower number = earlier).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::entry::EntryId;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// HookPhase
// ---------------------------------------------------------------------------

/// When a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HookPhase {
    /// After an idle entry is claimed, before the lease is handed out.
    BeforeBorrow,
    /// After a lease is returned, before the entry goes back to idle.
    AfterReturn,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeBorrow => write!(f, "BeforeBorrow"),
            Self::AfterReturn => write!(f, "AfterReturn"),
        }
    }
}

// ---------------------------------------------------------------------------
// HookResult / HookTarget
// ---------------------------------------------------------------------------

/// Verdict of a single hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookResult {
    /// Keep the entry and carry on.
    Continue,
    /// Discard the entry and fail the operation with the given reason.
    Reject(String),
}

/// What a hook gets to look at.
#[derive(Debug)]
pub struct HookTarget<'a, T> {
    /// Name of the pool running the hook.
    pub pool: &'a str,
    /// The entry being handed off.
    pub entry: EntryId,
    /// The raw instance.
    pub instance: &'a T,
    /// Time since the instance was created.
    pub age: Duration,
    /// Time spent in the state before the hand-off: idle time for
    /// [`HookPhase::BeforeBorrow`], lease time for [`HookPhase::AfterReturn`].
    pub in_previous_state: Duration,
}

// ---------------------------------------------------------------------------
// PoolHook trait
// ---------------------------------------------------------------------------

/// A maintenance hook for entries of type `T`.
pub trait PoolHook<T>: Send + Sync {
    /// Human-readable name for this hook.
    fn name(&self) -> &str;

    /// Priority (lower = runs first). Default: 100.
    fn priority(&self) -> u32 {
        100
    }

    /// Which phases this hook runs in.
    fn phases(&self) -> Vec<HookPhase>;

    /// Inspect, repair or reject the entry.
    fn run<'a>(
        &'a self,
        phase: HookPhase,
        target: &'a HookTarget<'a, T>,
    ) -> Pin<Box<dyn Future<Output = HookResult> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// HookRegistry
// ---------------------------------------------------------------------------

/// Ordered set of hooks a pool runs.
pub struct HookRegistry<T> {
    hooks: RwLock<Vec<Arc<dyn PoolHook<T>>>>,
}

impl<T> HookRegistry<T> {
    /// Create a new empty hook registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Register a hook. Hooks are sorted by priority (lower first).
    pub fn register(&self, hook: Arc<dyn PoolHook<T>>) {
        let mut hooks = self.hooks.write();
        hooks.push(hook);
        hooks.sort_by_key(|h| h.priority());
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    /// Whether no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    /// Whether any hook runs in `phase`.
    #[must_use]
    pub fn has(&self, phase: HookPhase) -> bool {
        self.hooks.read().iter().any(|h| h.phases().contains(&phase))
    }

    fn matching(&self, phase: HookPhase) -> Vec<Arc<dyn PoolHook<T>>> {
        self.hooks
            .read()
            .iter()
            .filter(|h| h.phases().contains(&phase))
            .cloned()
            .collect()
    }

    /// Run all hooks for `phase` in priority order.
    ///
    /// Short-circuits on the first [`HookResult::Reject`].
    pub async fn run(&self, phase: HookPhase, target: &HookTarget<'_, T>) -> Result<()>
    where
        T: Sync,
    {
        // Snapshot the hooks under the lock, then release before awaiting.
        let hooks = self.matching(phase);

        for hook in &hooks {
            if let HookResult::Reject(reason) = hook.run(phase, target).await {
                tracing::warn!(
                    hook = hook.name(),
                    pool = target.pool,
                    entry = %target.entry,
                    phase = %phase,
                    reason = %reason,
                    "Hook rejected pooled resource"
                );
                return Err(Error::HookRejected {
                    pool: target.pool.to_string(),
                    hook: hook.name().to_string(),
                    phase,
                    reason,
                });
            }
        }

        Ok(())
    }
}

impl<T> Default for HookRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HookRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.hooks.read().len();
        f.debug_struct("HookRegistry")
            .field("hook_count", &count)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Built-in hooks
// ---------------------------------------------------------------------------

/// Logs every hand-off via `tracing::debug!`.
///
/// Priority 10 (runs early). Runs in both phases, never rejects.
#[derive(Debug, Default)]
pub struct AuditHook;

impl<T: Sync> PoolHook<T> for AuditHook {
    fn name(&self) -> &str {
        "audit"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn phases(&self) -> Vec<HookPhase> {
        vec![HookPhase::BeforeBorrow, HookPhase::AfterReturn]
    }

    fn run<'a>(
        &'a self,
        phase: HookPhase,
        target: &'a HookTarget<'a, T>,
    ) -> Pin<Box<dyn Future<Output = HookResult> + Send + 'a>> {
        Box::pin(async move {
            tracing::debug!(
                hook = "audit",
                pool = target.pool,
                entry = %target.entry,
                phase = %phase,
                age_ms = target.age.as_millis() as u64,
                previous_state_ms = target.in_previous_state.as_millis() as u64,
                "Pool hand-off"
            );
            HookResult::Continue
        })
    }
}

// ---------------------------------------------------------------------------

/// Liveness probe for pooled instances.
pub trait KeepAliveChecker<T>: Send + Sync {
    /// Whether `instance` is still usable.
    fn check(&self, instance: &T) -> impl Future<Output = bool> + Send;

    /// Minimum idle time before an instance is probed again.
    fn interval(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Runs a [`KeepAliveChecker`] before lending out an entry that has been
/// idle for at least the checker's interval.
///
/// Priority 50. Runs only in [`HookPhase::BeforeBorrow`].
#[derive(Debug)]
pub struct KeepAliveHook<C> {
    checker: C,
}

impl<C> KeepAliveHook<C> {
    /// Wrap `checker` as a before-borrow hook.
    #[must_use]
    pub fn new(checker: C) -> Self {
        Self { checker }
    }
}

impl<T, C> PoolHook<T> for KeepAliveHook<C>
where
    T: Sync,
    C: KeepAliveChecker<T>,
{
    fn name(&self) -> &str {
        "keep-alive"
    }

    fn priority(&self) -> u32 {
        50
    }

    fn phases(&self) -> Vec<HookPhase> {
        vec![HookPhase::BeforeBorrow]
    }

    fn run<'a>(
        &'a self,
        _phase: HookPhase,
        target: &'a HookTarget<'a, T>,
    ) -> Pin<Box<dyn Future<Output = HookResult> + Send + 'a>> {
        Box::pin(async move {
            if target.in_previous_state < self.checker.interval() {
                return HookResult::Continue;
            }
            if self.checker.check(target.instance).await {
                HookResult::Continue
            } else {
                HookResult::Reject("keep-alive check failed".to_string())
            }
        })
    }
}
