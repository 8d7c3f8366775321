//! The pool orchestrator.
//!
//! A [`Pool`] owns a bounded [`HandoffChannel`] of idle entries, the map of
//! entries currently leased out, optional per-task bindings, hooks and
//! metrics. Borrowers pop idle entries off the channel; returns push them
//! back. Entries are only ever created by [`Pool::increase_items`] and only
//! ever destroyed by the pool's internal removal path.

mod checkout;
mod config;

pub use config::PoolConfig;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::Id as TaskId;
use tracing::{debug, error, trace, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::binding::{TaskBindings, Unbind};
use crate::channel::{HandoffChannel, PopError};
use crate::entry::{Entry, EntryId};
use crate::error::{Error, Result};
use crate::events::{EventBus, PoolEvent, RemovalReason};
use crate::hooks::{HookPhase, HookRegistry, HookTarget, PoolHook};
use crate::lease::{Lease, LeaseTicket, ReturnSink};
use crate::maintenance::{LeakReport, MaintenanceReport};
use crate::metrics::{MetricsSnapshot, PoolMetrics};
use crate::resource::Resource;
use crate::state::{LeaseState, WaitError};

use checkout::{Checkout, SlotClaim};

/// Pause between successful warmup attempts.
const WARMUP_PAUSE: Duration = Duration::from_millis(1);
/// Backoff after a failed warmup attempt.
const WARMUP_FAILURE_BACKOFF: Duration = Duration::from_millis(50);

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolStats {
    /// Configured maximum number of live entries.
    pub size: usize,
    /// Entries not yet removed.
    pub live: usize,
    /// Entries sitting in the idle channel.
    pub idle: usize,
    /// Entries currently leased out.
    pub leased: usize,
    /// Borrowers suspended waiting for an entry.
    pub waiters: usize,
    /// Tasks holding a bound lease.
    pub bound_tasks: usize,
    /// Cumulative counters.
    pub metrics: MetricsSnapshot,
}

type SharedEntry<T> = Arc<Entry<T>>;

struct PoolInner<R: Resource> {
    name: String,
    resource: R,
    config: PoolConfig,
    idle: HandoffChannel<SharedEntry<R::Instance>>,
    /// Entries not yet removed. Never exceeds `config.size`.
    live: AtomicUsize,
    leased: Mutex<HashMap<EntryId, SharedEntry<R::Instance>>>,
    bindings: TaskBindings,
    hooks: HookRegistry<R::Instance>,
    metrics: PoolMetrics,
    events: Option<Arc<EventBus>>,
    closed: AtomicBool,
}

// ---------------------------------------------------------------------------
// Pool<R>
// ---------------------------------------------------------------------------

/// Lease-based pool of `R::Instance` resources.
///
/// Cheap to clone; clones share the same pool.
pub struct Pool<R: Resource> {
    inner: Arc<PoolInner<R>>,
}

impl<R: Resource> Clone for Pool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Resource> fmt::Debug for Pool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<R: Resource> Pool<R> {
    /// Create a pool with no hooks and no event bus.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `config` is invalid.
    pub fn new(resource: R, config: PoolConfig) -> Result<Self> {
        Self::builder(resource).config(config).build()
    }

    /// Start building a pool for `resource`.
    pub fn builder(resource: R) -> PoolBuilder<R> {
        PoolBuilder::new(resource)
    }

    /// Borrow a resource, waiting up to the configured `borrowing_timeout`.
    pub async fn borrow(&self) -> Result<Lease<R::Instance>> {
        self.inner.borrow(self.inner.config.borrowing_timeout).await
    }

    /// Borrow a resource, waiting up to `timeout`.
    pub async fn borrow_timeout(&self, timeout: Duration) -> Result<Lease<R::Instance>> {
        self.inner.borrow(timeout).await
    }

    /// Give a lease back to the pool.
    ///
    /// Releasing a lease whose entry was already settled is a no-op.
    ///
    /// # Errors
    /// - [`Error::ForeignLease`] if another pool issued the lease. The lease
    ///   is then settled by its own pool.
    /// - [`Error::HookRejected`] if an after-return hook rejected the
    ///   resource; the entry has been destroyed.
    /// - [`Error::InvalidStateTransition`] if the entry was not leased.
    pub async fn release(&self, lease: Lease<R::Instance>) -> Result<()> {
        self.inner.check_issued(&lease)?;
        let (ticket, instance) = lease.detach();
        self.inner.give_back(ticket, instance).await
    }

    /// Destroy a lease's resource instead of recycling it.
    ///
    /// Use this when the borrower knows the resource is broken. Other leases
    /// sharing the same bound instance keep it until they are dropped, but
    /// the entry never returns to the pool.
    pub async fn remove_item(&self, lease: Lease<R::Instance>) -> Result<()> {
        self.inner.check_issued(&lease)?;
        let (ticket, instance) = lease.detach();
        self.inner
            .discard(ticket, instance, RemovalReason::Broken)
            .await;
        Ok(())
    }

    /// Create one entry and make it idle.
    ///
    /// Returns `Ok(false)` when the pool is already at capacity.
    ///
    /// # Errors
    /// Propagates the factory's error after rolling back the live count.
    pub async fn increase_items(&self) -> Result<bool> {
        self.inner.increase_items().await
    }

    /// Destroy one idle entry. Returns `false` if none was idle.
    pub async fn decrease_items(&self) -> bool {
        self.inner.decrease_items().await
    }

    /// Pre-populate the pool up to half its size.
    ///
    /// Best effort: attempts are capped at twice the target and failures
    /// are logged, not returned. Returns how many entries were created.
    pub async fn warmup(&self) -> usize {
        self.inner.warmup().await
    }

    /// Snapshot of counts and cumulative metrics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// Pool name, taken from [`Resource::id`].
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The pool's configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The resource factory backing this pool.
    #[must_use]
    pub fn resource(&self) -> &R {
        &self.inner.resource
    }

    /// Run every maintenance check enabled in the configuration.
    pub async fn maintain(&self) -> MaintenanceReport {
        self.inner.maintain().await
    }

    /// Destroy idle entries that have been idle longer than `idle_timeout`.
    pub async fn evict_idle(&self, idle_timeout: Duration) -> usize {
        self.inner
            .sweep(RemovalReason::IdleTimeout, |entry| {
                entry.is_idle_past(Some(idle_timeout))
            })
            .await
    }

    /// Destroy idle entries older than `max_lifetime`.
    pub async fn evict_expired(&self, max_lifetime: Duration) -> usize {
        self.inner
            .sweep(RemovalReason::Expired, |entry| {
                entry.is_expired(Some(max_lifetime))
            })
            .await
    }

    /// Report leases held longer than `threshold`.
    #[must_use]
    pub fn detect_leaks(&self, threshold: Duration) -> Vec<LeakReport> {
        self.inner.detect_leaks(threshold)
    }

    /// Close the pool.
    ///
    /// Pending and future borrows fail with [`Error::Closed`], idle entries
    /// are destroyed now and outstanding leases are destroyed when they come
    /// back.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

// ---------------------------------------------------------------------------
// PoolBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Pool`].
///
/// ```rust,ignore
/// let pool = Pool::builder(Postgres::new(url))
///     .config(PoolConfig::default().with_size(20))
///     .hook(Arc::new(KeepAliveHook::new(PingChecker)))
///     .event_bus(Arc::clone(&bus))
///     .build()?;
/// ```
pub struct PoolBuilder<R: Resource> {
    resource: R,
    config: PoolConfig,
    hooks: Vec<Arc<dyn PoolHook<R::Instance>>>,
    event_bus: Option<Arc<EventBus>>,
}

impl<R: Resource> PoolBuilder<R> {
    fn new(resource: R) -> Self {
        Self {
            resource,
            config: PoolConfig::default(),
            hooks: Vec::new(),
            event_bus: None,
        }
    }

    /// Use `config` instead of the default configuration.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a before-borrow / after-return hook.
    pub fn hook(mut self, hook: Arc<dyn PoolHook<R::Instance>>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Publish lifecycle events to `bus`.
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Validate the configuration and build the pool.
    ///
    /// The pool starts empty; call [`Pool::warmup`] to pre-populate it.
    pub fn build(self) -> Result<Pool<R>> {
        self.config.validate()?;
        let hooks = HookRegistry::new();
        for hook in self.hooks {
            hooks.register(hook);
        }
        let name = self.resource.id().to_string();
        debug!(pool = %name, size = self.config.size, "pool created");
        Ok(Pool {
            inner: Arc::new(PoolInner {
                name,
                idle: HandoffChannel::new(self.config.size),
                live: AtomicUsize::new(0),
                leased: Mutex::new(HashMap::with_capacity(self.config.size)),
                bindings: TaskBindings::new(),
                hooks,
                metrics: PoolMetrics::new(),
                events: self.event_bus,
                closed: AtomicBool::new(false),
                resource: self.resource,
                config: self.config,
            }),
        })
    }
}

impl<R: Resource> fmt::Debug for PoolBuilder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("resource", &self.resource.id())
            .field("config", &self.config)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PoolInner: borrow path
// ---------------------------------------------------------------------------

impl<R: Resource> PoolInner<R> {
    fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> Error {
        Error::Closed {
            pool: self.name.clone(),
        }
    }

    fn emit(&self, event: PoolEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }

    fn sink(self: &Arc<Self>) -> Weak<dyn ReturnSink<R::Instance>> {
        let weak: Weak<Self> = Arc::downgrade(self);
        weak
    }

    fn check_issued(self: &Arc<Self>, lease: &Lease<R::Instance>) -> Result<()> {
        if lease.issued_by(Arc::as_ptr(self).cast::<()>()) {
            return Ok(());
        }
        error!(pool = %self.name, entry = %lease.id(), "lease handed to a pool that did not issue it");
        Err(Error::ForeignLease {
            pool: self.name.clone(),
            entry: lease.id(),
        })
    }

    async fn borrow(self: &Arc<Self>, timeout: Duration) -> Result<Lease<R::Instance>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let task = if self.config.bind_to_task {
            tokio::task::try_id()
        } else {
            None
        };
        if let Some(task) = task
            && let Some(lease) = self.rebind(task)
        {
            return Ok(lease);
        }

        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            if self.idle.is_empty() && self.live() < self.config.size {
                self.spawn_growth();
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let entry = match self.idle.pop(remaining).await {
                Ok(entry) => entry,
                Err(PopError::Timeout) => return Err(self.borrow_timed_out(timeout, started)),
                Err(PopError::Closed) => return Err(self.closed_error()),
            };
            let entry = Checkout::new(self, entry);

            let idle_for = entry.state().in_state_for();
            let remaining = deadline.saturating_duration_since(Instant::now());
            match entry
                .state()
                .wait_and_transition(LeaseState::Idle, LeaseState::Reserved, remaining)
                .await
            {
                Ok(()) => {}
                Err(WaitError::Removed) => continue,
                Err(WaitError::Timeout { actual }) => {
                    error!(
                        pool = %self.name,
                        entry = %entry.id(),
                        %actual,
                        "entry popped from the idle channel never became idle"
                    );
                    self.destroy(&entry, RemovalReason::InvalidState).await;
                    return Err(self.borrow_timed_out(timeout, started));
                }
            }

            if entry.is_expired(self.config.max_lifetime) {
                debug!(pool = %self.name, entry = %entry.id(), age = ?entry.age(), "discarding expired entry");
                self.destroy(&entry, RemovalReason::Expired).await;
                continue;
            }

            if self.hooks.has(HookPhase::BeforeBorrow) {
                let verdict = match entry.instance() {
                    Some(instance) => {
                        self.run_hooks(HookPhase::BeforeBorrow, &entry, &instance, idle_for)
                            .await
                    }
                    None => Ok(()),
                };
                if let Err(e) = verdict {
                    self.destroy(&entry, RemovalReason::HookRejected).await;
                    return Err(e);
                }
            }

            return self
                .lease_out(entry.into_inner(), task, started.elapsed())
                .await;
        }
    }

    /// Hand out another lease on the entry `task` already holds.
    fn rebind(self: &Arc<Self>, task: TaskId) -> Option<Lease<R::Instance>> {
        let id = self.bindings.rebind(task)?;
        let instance = self.leased.lock().get(&id).and_then(|entry| entry.instance());
        let Some(instance) = instance else {
            // Every lease on it is already on its way back.
            let _ = self.bindings.release(task, id);
            return None;
        };
        trace!(pool = %self.name, entry = %id, task = %task, "re-borrow from bound task");
        let ticket = LeaseTicket {
            entry: id,
            borrowed_at: Instant::now(),
            task: Some(task),
        };
        Some(Lease::new(
            instance,
            ticket,
            self.sink(),
            self.config.auto_return,
        ))
    }

    async fn lease_out(
        self: &Arc<Self>,
        entry: SharedEntry<R::Instance>,
        task: Option<TaskId>,
        waited: Duration,
    ) -> Result<Lease<R::Instance>> {
        let Some(instance) = entry.lend(task.is_some()) else {
            let actual = entry.state().current();
            return Err(self
                .violation(&entry, LeaseState::Reserved, LeaseState::Leased, actual)
                .await);
        };
        if let Err(actual) = entry
            .state()
            .transition(LeaseState::Reserved, LeaseState::Leased)
        {
            entry.restore(instance);
            return Err(self
                .violation(&entry, LeaseState::Reserved, LeaseState::Leased, actual)
                .await);
        }

        let id = entry.id();
        self.leased.lock().insert(id, entry);
        if let Some(task) = task {
            self.bindings.bind(task, id);
        }
        self.metrics.record_borrow(waited);
        self.emit(PoolEvent::Borrowed {
            pool: self.name.clone(),
            entry: id,
            waited,
        });
        trace!(pool = %self.name, entry = %id, ?waited, "entry leased");

        let ticket = LeaseTicket {
            entry: id,
            borrowed_at: Instant::now(),
            task,
        };
        Ok(Lease::new(
            instance,
            ticket,
            self.sink(),
            self.config.auto_return,
        ))
    }

    fn spawn_growth(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        drop(tokio::spawn(async move {
            if let Err(error) = inner.increase_items().await {
                warn!(pool = %inner.name, %error, "background growth failed");
            }
        }));
    }

    fn borrow_timed_out(&self, timeout: Duration, started: Instant) -> Error {
        let waited = started.elapsed();
        let waiters = self.idle.waiters();
        self.metrics.record_timeout(waited);
        self.emit(PoolEvent::BorrowTimeout {
            pool: self.name.clone(),
            waiters,
        });
        debug!(pool = %self.name, ?waited, waiters, "borrow timed out");
        Error::BorrowTimeout {
            pool: self.name.clone(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            waiters,
        }
    }

    async fn run_hooks(
        &self,
        phase: HookPhase,
        entry: &Entry<R::Instance>,
        instance: &R::Instance,
        in_previous_state: Duration,
    ) -> Result<()> {
        let target = HookTarget {
            pool: &self.name,
            entry: entry.id(),
            instance,
            age: entry.age(),
            in_previous_state,
        };
        self.hooks.run(phase, &target).await
    }

    /// Log a failed transition, destroy the entry and build the error.
    async fn violation(
        &self,
        entry: &Entry<R::Instance>,
        expected: LeaseState,
        to: LeaseState,
        actual: LeaseState,
    ) -> Error {
        error!(
            pool = %self.name,
            entry = %entry.id(),
            %expected,
            %to,
            %actual,
            "invalid lease state transition"
        );
        self.destroy(entry, RemovalReason::InvalidState).await;
        Error::InvalidStateTransition {
            pool: self.name.clone(),
            entry: entry.id(),
            expected,
            to,
            actual,
        }
    }
}

// ---------------------------------------------------------------------------
// PoolInner: return path
// ---------------------------------------------------------------------------

impl<R: Resource> PoolInner<R> {
    /// Settle one lease's claim on its entry.
    ///
    /// Returns the entry once no lease refers to it anymore. With `force`,
    /// a task binding is dropped even if other leases still share it.
    fn detach(&self, ticket: &LeaseTicket, force: bool) -> Option<SharedEntry<R::Instance>> {
        if let Some(task) = ticket.task {
            if force {
                if self.bindings.get(task) == Some(ticket.entry) {
                    self.bindings.forget(task);
                }
            } else if let Unbind::Shared { remaining } = self.bindings.release(task, ticket.entry)
            {
                trace!(pool = %self.name, entry = %ticket.entry, remaining, "bound lease released");
                return None;
            }
        }
        let detached = self.leased.lock().remove(&ticket.entry);
        if detached.is_none() {
            debug!(pool = %self.name, entry = %ticket.entry, "lease already settled");
        }
        detached
    }

    async fn give_back(
        self: &Arc<Self>,
        ticket: LeaseTicket,
        instance: Arc<R::Instance>,
    ) -> Result<()> {
        let Some(entry) = self.detach(&ticket, false) else {
            return Ok(());
        };
        let entry = Checkout::new(self, entry);
        entry.restore(instance);
        let held = entry.state().in_state_for();
        self.metrics.record_in_use(held);

        if self.is_closed() {
            self.destroy(&entry, RemovalReason::Shutdown).await;
            return Ok(());
        }

        let current = entry.state().current();
        if current != LeaseState::Leased {
            return Err(self
                .violation(&entry, LeaseState::Leased, LeaseState::Idle, current)
                .await);
        }

        if self.idle.is_full() {
            warn!(pool = %self.name, entry = %entry.id(), "idle channel full on return");
            self.destroy(&entry, RemovalReason::ChannelFull).await;
            return Ok(());
        }

        if self.hooks.has(HookPhase::AfterReturn) {
            if let Err(actual) = entry
                .state()
                .transition(LeaseState::Leased, LeaseState::Reserved)
            {
                return Err(self
                    .violation(&entry, LeaseState::Leased, LeaseState::Reserved, actual)
                    .await);
            }
            let verdict = match entry.instance() {
                Some(instance) => {
                    self.run_hooks(HookPhase::AfterReturn, &entry, &instance, held)
                        .await
                }
                None => Ok(()),
            };
            if let Err(e) = verdict {
                self.destroy(&entry, RemovalReason::HookRejected).await;
                return Err(e);
            }
            if let Err(actual) = entry
                .state()
                .transition(LeaseState::Reserved, LeaseState::Idle)
            {
                return Err(self
                    .violation(&entry, LeaseState::Reserved, LeaseState::Idle, actual)
                    .await);
            }
        } else if let Err(actual) = entry
            .state()
            .transition(LeaseState::Leased, LeaseState::Idle)
        {
            return Err(self
                .violation(&entry, LeaseState::Leased, LeaseState::Idle, actual)
                .await);
        }

        let id = entry.id();
        match self
            .idle
            .push(entry.shared(), self.config.returning_timeout)
            .await
        {
            Ok(()) => {
                entry.disarm();
                self.emit(PoolEvent::Returned {
                    pool: self.name.clone(),
                    entry: id,
                    held,
                });
                trace!(pool = %self.name, entry = %id, ?held, "entry returned");
            }
            Err(rejected) => {
                // Lost a race with growth or shutdown.
                self.destroy(&rejected, RemovalReason::ChannelFull).await;
            }
        }
        Ok(())
    }

    async fn discard(&self, ticket: LeaseTicket, instance: Arc<R::Instance>, reason: RemovalReason) {
        let force = reason == RemovalReason::Broken;
        let Some(entry) = self.detach(&ticket, force) else {
            return;
        };
        entry.restore(instance);
        self.metrics.record_in_use(entry.state().in_state_for());
        self.destroy(&entry, reason).await;
    }

    /// Last resort when a lease is dropped outside any tokio runtime.
    fn settle_without_runtime(&self, ticket: LeaseTicket, instance: Arc<R::Instance>) {
        let Some(entry) = self.detach(&ticket, false) else {
            return;
        };
        drop(instance);
        warn!(
            pool = %self.name,
            entry = %entry.id(),
            "lease dropped outside a tokio runtime, resource dropped without cleanup"
        );
        drop(self.retire(&entry, RemovalReason::Abandoned));
    }

    /// Settle an entry whose checkout was dropped mid-operation.
    ///
    /// An entry that never left `Idle` goes back to the channel; anything
    /// else is removed.
    fn reclaim(self: &Arc<Self>, entry: SharedEntry<R::Instance>) {
        match entry.state().current() {
            LeaseState::Removed => {}
            LeaseState::Idle if !self.is_closed() => {
                if let Err(entry) = self.idle.try_push(entry) {
                    self.forsake(&entry, RemovalReason::ChannelFull);
                }
            }
            LeaseState::Idle => self.forsake(&entry, RemovalReason::Shutdown),
            LeaseState::Reserved | LeaseState::Leased => {
                debug!(pool = %self.name, entry = %entry.id(), "operation cancelled while holding an entry");
                self.forsake(&entry, RemovalReason::Cancelled);
            }
        }
    }

    /// Remove `entry` without awaiting; cleanup runs on a spawned task.
    fn forsake(self: &Arc<Self>, entry: &Entry<R::Instance>, reason: RemovalReason) {
        let Some(instance) = self.retire(entry, reason) else {
            return;
        };
        let id = entry.id();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                drop(handle.spawn(async move { inner.dispose(id, instance).await }));
            }
            Err(_) => {
                debug!(pool = %self.name, entry = %id, "no runtime, resource dropped without cleanup");
            }
        }
    }
}

impl<R: Resource> ReturnSink<R::Instance> for PoolInner<R> {
    fn schedule_return(self: Arc<Self>, ticket: LeaseTicket, instance: Arc<R::Instance>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                drop(handle.spawn(async move {
                    if let Err(error) = self.give_back(ticket, instance).await {
                        warn!(pool = %self.name, entry = %ticket.entry, %error, "automatic return failed");
                    }
                }));
            }
            Err(_) => self.settle_without_runtime(ticket, instance),
        }
    }

    fn schedule_discard(self: Arc<Self>, ticket: LeaseTicket, instance: Arc<R::Instance>) {
        debug!(pool = %self.name, entry = %ticket.entry, "lease dropped without automatic return");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                drop(handle.spawn(async move {
                    self.discard(ticket, instance, RemovalReason::Abandoned)
                        .await;
                }));
            }
            Err(_) => self.settle_without_runtime(ticket, instance),
        }
    }
}

// ---------------------------------------------------------------------------
// PoolInner: sizing, removal and maintenance
// ---------------------------------------------------------------------------

impl<R: Resource> PoolInner<R> {
    async fn increase_items(&self) -> Result<bool> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if self.idle.is_full() {
            return Ok(false);
        }
        let Some(claim) = SlotClaim::try_claim(&self.live, self.config.size) else {
            return Ok(false);
        };

        let started = Instant::now();
        let entry = match Entry::create(&self.resource).await {
            Ok(entry) => Arc::new(entry),
            Err(error) => {
                debug!(pool = %self.name, %error, "resource creation failed");
                return Err(error);
            }
        };
        claim.keep();
        let elapsed = started.elapsed();
        self.metrics.record_created(elapsed);
        self.emit(PoolEvent::Created {
            pool: self.name.clone(),
            entry: entry.id(),
            elapsed,
        });
        debug!(pool = %self.name, entry = %entry.id(), ?elapsed, "entry created");

        if let Err(actual) = entry
            .state()
            .transition(LeaseState::Reserved, LeaseState::Idle)
        {
            return Err(self
                .violation(&entry, LeaseState::Reserved, LeaseState::Idle, actual)
                .await);
        }
        match self.idle.try_push(entry) {
            Ok(()) => Ok(true),
            Err(entry) => {
                self.destroy(&entry, RemovalReason::ChannelFull).await;
                Ok(false)
            }
        }
    }

    async fn decrease_items(&self) -> bool {
        match self.idle.pop(self.config.returning_timeout).await {
            Ok(entry) => {
                self.destroy(&entry, RemovalReason::Evicted).await;
                true
            }
            Err(_) => false,
        }
    }

    async fn warmup(&self) -> usize {
        let target = self.config.size / 2;
        let mut created = 0;
        let mut attempts = 0;
        while self.live() < target && attempts < target * 2 {
            attempts += 1;
            match self.increase_items().await {
                Ok(true) => {
                    created += 1;
                    tokio::time::sleep(WARMUP_PAUSE).await;
                }
                Ok(false) => break,
                Err(error) => {
                    warn!(pool = %self.name, %error, attempt = attempts, "warmup attempt failed");
                    if !error.is_retryable() {
                        break;
                    }
                    tokio::time::sleep(WARMUP_FAILURE_BACKOFF).await;
                }
            }
        }
        debug!(pool = %self.name, created, attempts, "warmup finished");
        created
    }

    /// Permanently remove `entry` and dispose of its instance.
    async fn destroy(&self, entry: &Entry<R::Instance>, reason: RemovalReason) {
        if let Some(instance) = self.retire(entry, reason) {
            self.dispose(entry.id(), instance).await;
        }
    }

    /// Mark `entry` removed and free its slot before any cleanup runs.
    ///
    /// Returns the instance the entry still owned, if any.
    fn retire(
        &self,
        entry: &Entry<R::Instance>,
        reason: RemovalReason,
    ) -> Option<Arc<R::Instance>> {
        let previous = entry.state().remove()?;
        debug!(pool = %self.name, entry = %entry.id(), %previous, %reason, "removing entry");
        let instance = entry.take_instance();
        checkout::release_slot(&self.live);
        self.metrics.record_deleted();
        self.emit(PoolEvent::Removed {
            pool: self.name.clone(),
            entry: entry.id(),
            reason,
        });
        instance
    }

    async fn dispose(&self, id: EntryId, instance: Arc<R::Instance>) {
        match Arc::try_unwrap(instance) {
            Ok(raw) => {
                if let Err(error) = self.resource.cleanup(raw).await {
                    warn!(pool = %self.name, entry = %id, %error, "resource cleanup failed");
                }
            }
            Err(_) => {
                debug!(pool = %self.name, entry = %id, "instance still shared, dropped without cleanup");
            }
        }
    }

    /// Cycle through the entries idle right now, destroying those matching
    /// `stale` and putting the rest back.
    async fn sweep<F>(&self, reason: RemovalReason, stale: F) -> usize
    where
        F: Fn(&Entry<R::Instance>) -> bool,
    {
        let mut removed = 0;
        for _ in 0..self.idle.len() {
            let Some(entry) = self.idle.try_pop() else {
                break;
            };
            if stale(&entry) {
                self.destroy(&entry, reason).await;
                removed += 1;
            } else if let Err(entry) = self.idle.try_push(entry) {
                self.destroy(&entry, RemovalReason::ChannelFull).await;
            }
        }
        if removed > 0 {
            debug!(pool = %self.name, removed, %reason, "evicted idle entries");
        }
        removed
    }

    fn detect_leaks(&self, threshold: Duration) -> Vec<LeakReport> {
        let leaks: Vec<LeakReport> = self
            .leased
            .lock()
            .values()
            .filter(|entry| entry.state().current() == LeaseState::Leased)
            .filter_map(|entry| {
                let held = entry.state().in_state_for();
                (held > threshold).then(|| LeakReport {
                    entry: entry.id(),
                    held,
                })
            })
            .collect();
        for leak in &leaks {
            warn!(pool = %self.name, entry = %leak.entry, held = ?leak.held, "lease held past leak detection threshold");
            self.emit(PoolEvent::LeakSuspected {
                pool: self.name.clone(),
                entry: leak.entry,
                held: leak.held,
            });
        }
        leaks
    }

    async fn maintain(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        if let Some(idle_timeout) = self.config.idle_timeout {
            report.idle_evicted = self
                .sweep(RemovalReason::IdleTimeout, |entry| {
                    entry.is_idle_past(Some(idle_timeout))
                })
                .await;
        }
        if let Some(max_lifetime) = self.config.max_lifetime {
            report.expired = self
                .sweep(RemovalReason::Expired, |entry| {
                    entry.is_expired(Some(max_lifetime))
                })
                .await;
        }
        if let Some(threshold) = self.config.leak_detection_threshold {
            report.leaks = self.detect_leaks(threshold);
        }
        trace!(pool = %self.name, ?report, "maintenance pass");
        report
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.idle.close();
        let mut drained = 0;
        while let Some(entry) = self.idle.try_pop() {
            self.destroy(&entry, RemovalReason::Shutdown).await;
            drained += 1;
        }
        debug!(
            pool = %self.name,
            drained,
            outstanding = self.leased.lock().len(),
            "pool shut down"
        );
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.config.size,
            live: self.live(),
            idle: self.idle.len(),
            leased: self.leased.lock().len(),
            waiters: self.idle.waiters(),
            bound_tasks: self.bindings.len(),
            metrics: self.metrics.snapshot(),
        }
    }
}
