//! The pool core: dispatcher, admission, and the drain/shutdown state machine
//!
//! All mutable state (registry, waiter queue, phase flags) lives behind a
//! single mutex owned by the dispatcher. Factory callbacks never run under
//! that lock, and resources are always delivered to waiters out-of-line
//! through a oneshot channel, so a synchronously-completing factory can
//! never re-enter a dispatch pass.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::context::{BorrowContext, BorrowHooks};
use crate::error::{Error, Result};
use crate::factory::{Factory, FactoryAdapter};
use crate::lease::Lease;
use crate::reaper;
use crate::registry::{IdleEntry, Registry, SlotId};
use crate::waiters::WaiterQueue;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Lifecycle phase of the pool.
///
/// `Open` → `Draining` (via [`Pool::drain`]) → `Drained` (via
/// [`Pool::destroy_all`]); `Open` → `Drained` directly is also permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Draining,
    Drained,
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total successful factory creations.
    pub created: u64,
    /// Total completed destructions.
    pub destroyed: u64,
    /// Total resources delivered to borrowers.
    pub acquired: u64,
    /// Total resources returned by borrowers.
    pub released: u64,
    /// Total failed factory creations.
    pub create_failures: u64,
    /// Total idle resources discarded because validation failed.
    pub validation_failures: u64,
    /// Total idle resources evicted by the reaper.
    pub reaped: u64,
    /// Current idle resources.
    pub idle: usize,
    /// Current borrowed resources.
    pub borrowed: usize,
    /// Current queued waiters.
    pub waiting: usize,
}

#[derive(Debug, Default)]
struct StatCounters {
    created: u64,
    destroyed: u64,
    acquired: u64,
    released: u64,
    create_failures: u64,
    validation_failures: u64,
    reaped: u64,
}

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

struct PoolState<F: Factory> {
    registry: Registry<F::Resource>,
    waiters: WaiterQueue<Lease<F>>,
    /// Creations in flight. Each is earmarked for the head of the waiter
    /// queue (or the idle list, for minimum-floor top-ups).
    creating: usize,
    /// Factory teardowns in flight.
    discarding: usize,
    phase: Phase,
    stats: StatCounters,
    /// Completions registered by `drain`, fired once at quiescence.
    drain_waiters: Vec<oneshot::Sender<()>>,
    /// Completions registered by `destroy_all`, fired when no teardown
    /// remains in flight.
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

pub(crate) struct PoolInner<F: Factory> {
    adapter: FactoryAdapter<F>,
    config: PoolConfig,
    hooks: Option<Arc<dyn BorrowHooks>>,
    reaper_token: CancellationToken,
    state: Mutex<PoolState<F>>,
}

/// One decision taken per dispatch iteration, resolved outside the lock.
enum DispatchStep<R> {
    Validate(IdleEntry<R>),
    SpawnCreate,
    Done,
}

impl<F: Factory> PoolInner<F> {
    /// Run dispatch decisions until neither a hand-off nor a creation is
    /// possible.
    ///
    /// Safe to invoke from any thread at any time; every decision is made
    /// atomically under the state lock and acted on outside it.
    pub(crate) fn dispatch(this: &Arc<Self>) {
        loop {
            let step = {
                let mut state = this.state.lock();
                if state.waiters.is_empty() {
                    DispatchStep::Done
                } else if let Some(entry) = state.registry.pop_newest_idle() {
                    DispatchStep::Validate(entry)
                } else if state.creating < state.waiters.len()
                    && state.registry.occupied() + state.creating < this.config.max
                {
                    state.creating += 1;
                    DispatchStep::SpawnCreate
                } else {
                    DispatchStep::Done
                }
            };
            match step {
                DispatchStep::Done => break,
                DispatchStep::SpawnCreate => Self::spawn_create(this),
                DispatchStep::Validate(entry) => {
                    if this.adapter.check(&entry.resource) {
                        Self::deliver(this, entry.id, entry.resource);
                    } else {
                        tracing::debug!(
                            pool = %this.config.name,
                            slot = entry.id,
                            "discarding idle resource that failed validation"
                        );
                        let mut state = this.state.lock();
                        state.stats.validation_failures += 1;
                        state.registry.condemn_borrowed(entry.id);
                        Self::begin_discard(this, &mut state, Some(entry.id), entry.resource);
                        // The waiter was not consumed; loop for the next
                        // idle resource or a fresh creation.
                    }
                }
            }
        }
    }

    /// Hand a checked-out resource to the next waiter, or put it back if no
    /// waiter remains.
    fn deliver(this: &Arc<Self>, id: SlotId, resource: F::Resource) {
        let waiter = { this.state.lock().waiters.pop() };
        let Some(waiter) = waiter else {
            Self::reclaim(this, id, resource);
            return;
        };

        tracing::trace!(pool = %this.config.name, slot = id, seq = waiter.seq, "delivering resource");
        if let Some(hooks) = &this.hooks {
            hooks.attach(&waiter.ctx);
        }
        let lease = Lease::new(Arc::clone(this), id, resource, waiter.ctx);
        match waiter.tx.send(Ok(lease)) {
            Ok(()) => {
                this.state.lock().stats.acquired += 1;
            }
            Err(unsent) => {
                // The caller abandoned its acquisition; reclaim the
                // resource without running the lease's drop hook.
                if let Ok(lease) = unsent {
                    let (id, resource, ctx) = lease.into_parts();
                    if let Some(hooks) = &this.hooks {
                        hooks.detach(&ctx);
                    }
                    Self::reclaim(this, id, resource);
                }
            }
        }
    }

    /// Return a checked-out resource to the idle list, or condemn it when
    /// the pool is no longer open.
    fn reclaim(this: &Arc<Self>, id: SlotId, resource: F::Resource) {
        let mut state = this.state.lock();
        if state.phase == Phase::Open {
            state.registry.release(id, resource, Instant::now());
        } else {
            state.registry.condemn_borrowed(id);
            Self::begin_discard(this, &mut state, Some(id), resource);
            Self::maybe_quiesce(this, &mut state);
        }
    }

    /// Spawn one factory creation. The `creating` counter was already
    /// incremented under the lock by the caller.
    fn spawn_create(this: &Arc<Self>) {
        let inner = Arc::clone(this);
        tokio::spawn(async move {
            match inner.adapter.produce().await {
                Ok(resource) => {
                    let admitted = {
                        let mut state = inner.state.lock();
                        state.creating -= 1;
                        state.stats.created += 1;
                        if state.phase == Phase::Open {
                            Some(state.registry.admit_borrowed())
                        } else {
                            None
                        }
                    };
                    match admitted {
                        // Straight to the head waiter; `deliver` parks the
                        // resource on the idle list if nobody is waiting.
                        Some(id) => Self::deliver(&inner, id, resource),
                        None => {
                            // The pool went down while the factory was
                            // working; the resource never gets a slot.
                            let mut state = inner.state.lock();
                            Self::begin_discard(&inner, &mut state, None, resource);
                        }
                    }
                    Self::dispatch(&inner);
                }
                Err(error) => {
                    let waiter = {
                        let mut state = inner.state.lock();
                        state.creating -= 1;
                        state.stats.create_failures += 1;
                        state.waiters.pop()
                    };
                    // The next-in-line consumer of this attempt takes the
                    // error; waiters behind it trigger fresh attempts via
                    // the dispatch pass below.
                    if let Some(waiter) = waiter {
                        let _ = waiter.tx.send(Err(error));
                    }
                    Self::dispatch(&inner);
                }
            }
        });
    }

    /// Schedule a factory teardown for a condemned resource. Bookkeeping for
    /// the slot itself must already have happened under `state`.
    fn begin_discard(
        this: &Arc<Self>,
        state: &mut PoolState<F>,
        slot: Option<SlotId>,
        resource: F::Resource,
    ) {
        state.discarding += 1;
        let inner = Arc::clone(this);
        tokio::spawn(async move {
            inner.adapter.discard(resource).await;
            let mut state = inner.state.lock();
            state.discarding -= 1;
            state.stats.destroyed += 1;
            if let Some(id) = slot {
                state.registry.finish_destroy(id);
            }
            Self::maybe_finish_shutdown(&mut state);
            drop(state);
            Self::dispatch(&inner);
        });
    }

    /// Return a borrowed resource. Invoked by [`Lease`]'s drop hook.
    pub(crate) fn release(this: &Arc<Self>, id: SlotId, resource: F::Resource, ctx: &BorrowContext) {
        if let Some(hooks) = &this.hooks {
            hooks.detach(ctx);
        }
        let reopenable = {
            let mut state = this.state.lock();
            state.stats.released += 1;
            match state.phase {
                Phase::Open => {
                    state.registry.release(id, resource, Instant::now());
                    true
                }
                Phase::Draining | Phase::Drained => {
                    // No admissions remain; keep the floor until quiescence
                    // sweeps the idle list.
                    if state.phase == Phase::Drained
                        || state.registry.occupied() + state.creating > this.config.min
                    {
                        state.registry.condemn_borrowed(id);
                        Self::begin_discard(this, &mut state, Some(id), resource);
                    } else {
                        state.registry.release(id, resource, Instant::now());
                    }
                    Self::maybe_quiesce(this, &mut state);
                    false
                }
            }
        };
        if reopenable {
            Self::dispatch(this);
        }
    }

    /// Forcibly remove a borrowed resource from the pool.
    pub(crate) fn destroy_lease(
        this: &Arc<Self>,
        id: SlotId,
        resource: F::Resource,
        ctx: &BorrowContext,
    ) {
        if let Some(hooks) = &this.hooks {
            hooks.detach(ctx);
        }
        {
            let mut state = this.state.lock();
            state.registry.condemn_borrowed(id);
            Self::begin_discard(this, &mut state, Some(id), resource);
            Self::maybe_quiesce(this, &mut state);
        }
        Self::dispatch(this);
    }

    /// If the pool is past `Open` and nothing is out on loan, sweep the idle
    /// list and complete every pending drain.
    fn maybe_quiesce(this: &Arc<Self>, state: &mut PoolState<F>) {
        if state.phase == Phase::Open || state.registry.borrowed() != 0 {
            return;
        }
        for entry in state.registry.condemn_all_idle() {
            Self::begin_discard(this, state, Some(entry.id), entry.resource);
        }
        for tx in state.drain_waiters.drain(..) {
            let _ = tx.send(());
        }
        this.reaper_token.cancel();
    }

    /// Complete pending `destroy_all` calls once no teardown is in flight.
    fn maybe_finish_shutdown(state: &mut PoolState<F>) {
        if state.phase == Phase::Drained && state.discarding == 0 {
            for tx in state.shutdown_waiters.drain(..) {
                let _ = tx.send(());
            }
        }
    }

    /// One reaper tick: evict over-age idle resources (oldest first, never
    /// below the minimum floor), then top the pool back up to it.
    pub(crate) fn reap(this: &Arc<Self>) {
        let now = Instant::now();
        {
            let mut state = this.state.lock();
            if state.phase != Phase::Open {
                return;
            }
            if this.config.refresh_idle {
                let expired =
                    state
                        .registry
                        .take_expired(now, this.config.idle_timeout, this.config.min);
                if !expired.is_empty() {
                    tracing::debug!(
                        pool = %this.config.name,
                        evicted = expired.len(),
                        "reaping idle resources"
                    );
                }
                for entry in expired {
                    state.stats.reaped += 1;
                    Self::begin_discard(this, &mut state, Some(entry.id), entry.resource);
                }
            }
        }
        Self::top_up(this);
    }

    /// Request enough creations to restore the minimum floor.
    pub(crate) fn top_up(this: &Arc<Self>) {
        let wanted = {
            let mut state = this.state.lock();
            if state.phase != Phase::Open {
                0
            } else {
                let have = state.registry.occupied() + state.creating;
                let wanted = this.config.min.saturating_sub(have);
                state.creating += wanted;
                wanted
            }
        };
        for _ in 0..wanted {
            Self::spawn_create(this);
        }
    }
}

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

/// Pending acquire: resolves to a [`Lease`] once the dispatcher hands this
/// caller a resource.
///
/// [`Acquisition::admitted`] reports, at enqueue time, whether the request
/// fit within the pool's ceiling or should expect to wait behind others.
#[must_use = "an acquisition does nothing until awaited"]
pub struct Acquisition<F: Factory> {
    admitted: bool,
    pool: String,
    rx: oneshot::Receiver<Result<Lease<F>>>,
}

impl<F: Factory> Acquisition<F> {
    /// Whether the request fit under `max` at enqueue time. `false` means
    /// the caller should expect to wait for a release.
    #[must_use]
    pub fn admitted(&self) -> bool {
        self.admitted
    }
}

impl<F: Factory> Future for Acquisition<F> {
    type Output = Result<Lease<F>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The pool (and with it the waiter queue) was dropped outright.
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::shutdown(&self.pool))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<F: Factory> std::fmt::Debug for Acquisition<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("pool", &self.pool)
            .field("admitted", &self.admitted)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Bounded asynchronous resource pool.
///
/// Cheap to clone; all clones share the same state. Must be created and
/// used within a Tokio runtime: creations, teardowns, and the reaper run as
/// spawned tasks.
pub struct Pool<F: Factory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Factory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.config.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: Factory> Pool<F> {
    /// Create a pool over the given factory.
    ///
    /// The configuration is sanitised (see [`PoolConfig::sanitized`]); the
    /// reaper starts immediately and the pool is topped up to `min`.
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self::build(factory, config, None)
    }

    /// Create a pool with an attach/detach hook pair run at the borrow and
    /// release boundaries.
    pub fn with_hooks(factory: F, config: PoolConfig, hooks: Arc<dyn BorrowHooks>) -> Self {
        Self::build(factory, config, Some(hooks))
    }

    fn build(factory: F, config: PoolConfig, hooks: Option<Arc<dyn BorrowHooks>>) -> Self {
        let config = config.sanitized();
        tracing::debug!(
            pool = %config.name,
            min = config.min,
            max = config.max,
            bands = config.priority_bands,
            "created resource pool"
        );
        let reaper_token = CancellationToken::new();
        let inner = Arc::new(PoolInner {
            adapter: FactoryAdapter::new(factory, config.name.clone()),
            state: Mutex::new(PoolState {
                registry: Registry::new(),
                waiters: WaiterQueue::new(config.priority_bands),
                creating: 0,
                discarding: 0,
                phase: Phase::Open,
                stats: StatCounters::default(),
                drain_waiters: Vec::new(),
                shutdown_waiters: Vec::new(),
            }),
            hooks,
            reaper_token: reaper_token.clone(),
            config,
        });
        reaper::spawn(
            Arc::downgrade(&inner),
            reaper_token,
            inner.config.reap_interval,
        );
        PoolInner::top_up(&inner);
        Self { inner }
    }

    /// Request a resource at the highest priority with an empty context.
    pub fn acquire(&self) -> Acquisition<F> {
        self.acquire_with(0, BorrowContext::default())
    }

    /// Request a resource at the given priority band, capturing the caller's
    /// context for the lifetime of the borrow.
    ///
    /// Priorities outside `[0, priority_bands)` clamp to the nearest band.
    /// After a drain or shutdown the returned acquisition resolves to the
    /// corresponding error without ever holding a resource.
    pub fn acquire_with(&self, priority: usize, ctx: BorrowContext) -> Acquisition<F> {
        let (tx, rx) = oneshot::channel();
        let name = self.inner.config.name.clone();
        let enqueued = {
            let mut state = self.inner.state.lock();
            match state.phase {
                Phase::Open => {
                    state.waiters.push(priority, tx, ctx);
                    true
                }
                Phase::Draining => {
                    let _ = tx.send(Err(Error::drained(&name)));
                    false
                }
                Phase::Drained => {
                    let _ = tx.send(Err(Error::shutdown(&name)));
                    false
                }
            }
        };
        let admitted = if enqueued {
            PoolInner::dispatch(&self.inner);
            // Live slots plus still-queued waiters; an in-flight creation is
            // represented by the earmarked waiter it will complete.
            let state = self.inner.state.lock();
            state.registry.occupied() + state.waiters.len() < self.inner.config.max
        } else {
            false
        };
        Acquisition {
            admitted,
            pool: name,
            rx,
        }
    }

    /// Return a borrowed resource to the pool. Equivalent to dropping the
    /// lease.
    pub fn release(&self, lease: Lease<F>) {
        drop(lease);
    }

    /// Forcibly remove a borrowed resource: its slot is condemned and the
    /// factory tears it down instead of it returning to the idle list.
    pub fn destroy(&self, lease: Lease<F>) {
        let (id, resource, ctx) = lease.into_parts();
        PoolInner::destroy_lease(&self.inner, id, resource, &ctx);
    }

    /// Stop admitting borrows and wait for every borrowed resource to come
    /// home.
    ///
    /// Queued waiters are completed with [`Error::Drained`]; idle resources
    /// are discarded once the pool is quiescent. Idempotent: every caller's
    /// future completes exactly once, at the same quiescence point.
    pub async fn drain(&self) {
        let rx = {
            let mut state = self.inner.state.lock();
            if state.phase == Phase::Open {
                state.phase = Phase::Draining;
                tracing::debug!(pool = %self.inner.config.name, "pool draining");
                let name = self.inner.config.name.clone();
                state.waiters.flush_with(|| Error::drained(&name));
            }
            let (tx, rx) = oneshot::channel();
            state.drain_waiters.push(tx);
            PoolInner::maybe_quiesce(&self.inner, &mut state);
            rx
        };
        let _ = rx.await;
    }

    /// Tear the pool down now.
    ///
    /// Cancels the reaper, discards every idle resource, and completes any
    /// outstanding waiters with [`Error::Shutdown`]. Resolves once every
    /// teardown scheduled here has returned; resources still out on loan are
    /// destroyed when their leases come back.
    pub async fn destroy_all(&self) {
        let rx = {
            let mut state = self.inner.state.lock();
            state.phase = Phase::Drained;
            self.inner.reaper_token.cancel();
            tracing::debug!(pool = %self.inner.config.name, "pool shutting down");
            let name = self.inner.config.name.clone();
            state.waiters.flush_with(|| Error::shutdown(&name));
            for entry in state.registry.condemn_all_idle() {
                PoolInner::begin_discard(&self.inner, &mut state, Some(entry.id), entry.resource);
            }
            PoolInner::maybe_quiesce(&self.inner, &mut state);
            let (tx, rx) = oneshot::channel();
            state.shutdown_waiters.push(tx);
            PoolInner::maybe_finish_shutdown(&mut state);
            rx
        };
        let _ = rx.await;
    }

    /// Total live resources, including those whose teardown is in flight.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.state.lock().registry.count()
    }

    /// Idle resources ready for hand-off.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.inner.state.lock().registry.available()
    }

    /// Resources currently out on loan.
    #[must_use]
    pub fn borrowed_count(&self) -> usize {
        self.inner.state.lock().registry.borrowed()
    }

    /// Queued acquisitions not yet matched with a resource.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// The minimum floor, after sanitisation.
    #[must_use]
    pub fn min(&self) -> usize {
        self.inner.config.min
    }

    /// The ceiling, after sanitisation.
    #[must_use]
    pub fn max(&self) -> usize {
        self.inner.config.max
    }

    /// The pool's label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Snapshot of the pool's counters and gauges.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            created: state.stats.created,
            destroyed: state.stats.destroyed,
            acquired: state.stats.acquired,
            released: state.stats.released,
            create_failures: state.stats.create_failures,
            validation_failures: state.stats.validation_failures,
            reaped: state.stats.reaped,
            idle: state.registry.available(),
            borrowed: state.registry.borrowed(),
            waiting: state.waiters.len(),
        }
    }
}
