//! The host-partitioned session pool.
//!
//! [`HostPool`] keeps one [`HostGroup`] per remote host, created lazily on
//! the first acquire for that host. All groups share the pool's mutex and
//! condition variable:
//!
//! ```text
//! HostPool ──Arc──► PoolInner
//!                     ├── Mutex<PoolState>
//!                     │     └── HashMap<HostKey, HostGroup>
//!                     │           ├── active: HashMap<SessionId, Arc<SessionCell>>
//!                     │           └── idle:   IdleQueue (FIFO)
//!                     ├── Condvar  (wakes blocked acquirers)
//!                     └── factory, guard, cancel check, clock
//! ```
//!
//! Leases hold a `Weak` back-reference, so a session outliving its pool is
//! closed instead of returned.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use http::Uri;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use hostpool_common::HostKey;
use hostpool_config::PoolConfig;

use crate::cancel::{CancelCheck, NeverCancel};
use crate::clock::{Clock, SystemClock};
use crate::error::{PoolError, PoolResult};
use crate::group::{self, close_session, Admission, HostGroup, Released};
use crate::guard::{ConnectionGuard, IdleShedder, Unbounded};
use crate::session::{PooledSession, Session, SessionCell, SessionFactory};
use crate::stats::{HostStats, PoolStats};

// ============================================================================
// Shared State
// ============================================================================

/// Everything guarded by the pool mutex.
pub(crate) struct PoolState<S> {
    groups: HashMap<HostKey, HostGroup<S>>,
    disposed: bool,
}

impl<S> PoolState<S> {
    /// Group of `host`. Groups are only missing once the pool is torn down.
    pub(crate) fn group_mut(&mut self, host: &HostKey) -> PoolResult<&mut HostGroup<S>> {
        self.groups.get_mut(host).ok_or(PoolError::Disposed)
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    evicted: AtomicU64,
}

pub(crate) struct PoolInner<F: SessionFactory> {
    config: PoolConfig,
    factory: F,
    guard: Arc<dyn ConnectionGuard>,
    cancel: Arc<dyn CancelCheck>,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState<F::Session>>,
    monitor: Condvar,
    /// Mirrors `PoolState::disposed` for waits that run without the lock
    disposed: AtomicBool,
    counters: PoolCounters,
}

impl<F: SessionFactory> PoolInner<F> {
    fn admission(&self) -> Admission<'_, F> {
        Admission {
            factory: &self.factory,
            guard: self.guard.as_ref(),
            cancel: self.cancel.as_ref(),
            monitor: &self.monitor,
            disposed: &self.disposed,
            poll_interval: self.config.wait_poll_interval,
        }
    }

    /// Take back a session from a lease.
    pub(crate) fn return_session(&self, cell: Arc<SessionCell<F::Session>>, host: &HostKey) {
        let mut state = self.state.lock();
        let outcome = if state.disposed {
            trace!(
                host = %host,
                session = %cell.id(),
                "Pool disposed, closing returned session"
            );
            close_session(&cell, self.guard.as_ref());
            Released::Discarded
        } else if let Some(group) = state.groups.get_mut(host) {
            let now = self.clock.now();
            group.release(cell, now, self.guard.as_ref(), self.cancel.as_ref())
        } else {
            warn!(
                host = %host,
                session = %cell.id(),
                "No host group for returned session, closing it"
            );
            close_session(&cell, self.guard.as_ref());
            Released::Discarded
        };
        drop(state);

        if outcome == Released::Discarded {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        }
        self.monitor.notify_all();
    }

    fn dispose(&self) {
        let mut state = self.state.lock();
        let first = !state.disposed;
        let closed = dispose_groups(&mut state, self.guard.as_ref());
        self.disposed.store(true, Ordering::Release);
        drop(state);

        self.monitor.notify_all();
        self.guard.wake_waiters();
        if first {
            info!(closed = closed, "Connection pool disposed");
        }
    }
}

impl<F: SessionFactory> IdleShedder for PoolInner<F> {
    fn shed_idle(&self) -> usize {
        let mut state = self.state.lock();
        let guard = self.guard.as_ref();
        let closed: usize = state
            .groups
            .values_mut()
            .map(|group| group.close_inactive(guard))
            .sum();
        drop(state);

        if closed > 0 {
            debug!(closed = closed, "Closed all idle sessions");
            self.monitor.notify_all();
        }
        closed
    }
}

impl<F: SessionFactory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.disposed {
            let closed = dispose_groups(state, self.guard.as_ref());
            debug!(closed = closed, "Connection pool dropped without dispose");
        }
    }
}

fn dispose_groups<S: Session>(state: &mut PoolState<S>, guard: &dyn ConnectionGuard) -> usize {
    state.disposed = true;
    state.groups.values_mut().map(|group| group.dispose(guard)).sum()
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`HostPool`].
pub struct HostPoolBuilder<F: SessionFactory> {
    factory: F,
    config: PoolConfig,
    guard: Arc<dyn ConnectionGuard>,
    cancel: Arc<dyn CancelCheck>,
    clock: Arc<dyn Clock>,
}

impl<F: SessionFactory> HostPoolBuilder<F> {
    /// Per-host limits and timings. Zero values fall back to defaults.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Global guard, usually shared between pools.
    pub fn guard(mut self, guard: Arc<dyn ConnectionGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Check consulted by blocked acquirers.
    pub fn cancel_check(mut self, cancel: Arc<dyn CancelCheck>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Time source for idle ages.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> HostPool<F> {
        let config = self.config.normalized();
        info!(
            max_cached = config.max_cached,
            max_concurrent = config.max_concurrent,
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            "Connection pool created"
        );

        let inner = Arc::new(PoolInner {
            config,
            factory: self.factory,
            guard: self.guard,
            cancel: self.cancel,
            clock: self.clock,
            state: Mutex::new(PoolState {
                groups: HashMap::new(),
                disposed: false,
            }),
            monitor: Condvar::new(),
            disposed: AtomicBool::new(false),
            counters: PoolCounters::default(),
        });
        let shedder: Weak<PoolInner<F>> = Arc::downgrade(&inner);
        inner.guard.register(shedder);

        HostPool { inner }
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Pool of sessions partitioned by remote host.
///
/// Cloning is cheap and yields a handle to the same pool.
pub struct HostPool<F: SessionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: SessionFactory> Clone for HostPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: SessionFactory> HostPool<F> {
    /// Pool with default limits, no global guard and no cancellation.
    pub fn new(factory: F) -> Self {
        Self::builder(factory).build()
    }

    pub fn builder(factory: F) -> HostPoolBuilder<F> {
        HostPoolBuilder {
            factory,
            config: PoolConfig::default(),
            guard: Arc::new(Unbounded),
            cancel: Arc::new(NeverCancel),
            clock: Arc::new(SystemClock),
        }
    }

    /// Get a session for `address`.
    ///
    /// With `may_reuse` the oldest idle session of the host is adjusted and
    /// handed out when one exists. Otherwise, or when the cache is empty, a
    /// new session is opened once the global guard and the host's
    /// `max_concurrent` limit allow it. Blocks until then.
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidAddress`] if `address` has no host
    /// - [`PoolError::Disposed`] if the pool is or becomes disposed
    /// - [`PoolError::Cancelled`] if the cancel check fires while blocked
    /// - [`PoolError::CreationFailed`] if the factory or adjuster fails
    pub fn acquire(&self, address: &Uri, may_reuse: bool) -> PoolResult<PooledSession<F>> {
        let host = HostKey::from_uri(address)
            .ok_or_else(|| PoolError::InvalidAddress(address.to_string()))?;
        let inner = &self.inner;

        let mut state = inner.state.lock();
        if state.disposed {
            return Err(PoolError::Disposed);
        }
        if !state.groups.contains_key(&host) {
            debug!(
                host = %host,
                max_cached = inner.config.max_cached,
                max_concurrent = inner.config.max_concurrent,
                "Creating host group"
            );
            let group = HostGroup::new(
                host.clone(),
                inner.config.max_cached,
                inner.config.max_concurrent,
            );
            state.groups.insert(host.clone(), group);
        }

        let acquired = group::acquire(&mut state, &host, address, may_reuse, &inner.admission())?;
        drop(state);

        let counter = if acquired.reused {
            &inner.counters.reused
        } else {
            &inner.counters.created
        };
        counter.fetch_add(1, Ordering::Relaxed);

        Ok(PooledSession::new(
            acquired.cell,
            host,
            acquired.reused,
            Arc::downgrade(inner),
        ))
    }

    /// Hand a session back.
    ///
    /// The session is cached when its host has room and the guard agrees,
    /// and closed otherwise. After disposal it is always closed.
    pub fn release(&self, mut session: PooledSession<F>) {
        if !session.belongs_to(&self.inner) {
            warn!(host = %session.host(), "Session released to a pool that did not lend it");
            // Dropping the lease returns it to its own pool
            drop(session);
            return;
        }
        if let Some(cell) = session.take_cell() {
            self.inner.return_session(cell, session.host());
        }
    }

    /// Close every session, active and idle, and fail all pending and
    /// future acquires with [`PoolError::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// Close idle sessions cached longer than the idle timeout.
    ///
    /// Returns the number of sessions closed.
    pub fn sweep(&self) -> usize {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.disposed {
            return 0;
        }

        let now = inner.clock.now();
        let timeout = inner.config.idle_timeout;
        let guard = inner.guard.as_ref();
        let evicted: usize = state
            .groups
            .values_mut()
            .map(|group| group.sweep(now, timeout, guard))
            .sum();
        drop(state);

        if evicted > 0 {
            inner.counters.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            inner.monitor.notify_all();
        }
        evicted
    }

    /// Number of idle sessions across all hosts.
    pub fn inactive_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.groups.values().map(|group| group.idle_len()).sum()
    }

    /// Close every idle session across all hosts. Returns how many were closed.
    pub fn shed_idle(&self) -> usize {
        self.inner.shed_idle()
    }

    /// Wake every blocked acquirer so it re-checks its cancel check.
    pub fn interrupt_waiters(&self) {
        trace!("Interrupting waiting acquirers");
        self.inner.monitor.notify_all();
    }

    /// The factory sessions are created with.
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Effective, normalized configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Per-host occupancy, sorted by host.
    pub fn host_stats(&self) -> Vec<HostStats> {
        let state = self.inner.state.lock();
        let mut stats: Vec<_> = state.groups.values().map(|group| group.stats()).collect();
        stats.sort_by(|a, b| a.host.as_str().cmp(b.host.as_str()));
        stats
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let state = inner.state.lock();
        PoolStats {
            hosts: state.groups.len(),
            active: state.groups.values().map(|group| group.active_len()).sum(),
            idle: state.groups.values().map(|group| group.idle_len()).sum(),
            total_created: inner.counters.created.load(Ordering::Relaxed),
            total_reused: inner.counters.reused.load(Ordering::Relaxed),
            total_discarded: inner.counters.discarded.load(Ordering::Relaxed),
            total_evicted: inner.counters.evicted.load(Ordering::Relaxed),
            disposed: state.disposed,
        }
    }
}

impl<F: SessionFactory> fmt::Debug for HostPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
