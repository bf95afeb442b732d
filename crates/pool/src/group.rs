//! Per-host partition of the pool.
//!
//! A [`HostGroup`] owns the sessions of one remote host: the ones checked
//! out to callers (`active`) and the ones cached for reuse (`idle`). It
//! enforces two limits:
//!
//! - `|idle| <= max_cached`
//! - `|active| + |idle| <= max_concurrent`
//!
//! Groups carry no lock of their own. Every method runs with the owning
//! pool's mutex held, and blocked acquirers sleep on the pool's condition
//! variable, which is bound to that same mutex. Waiting therefore releases
//! the lock, and a release on any host can wake them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use http::Uri;
use parking_lot::{Condvar, MutexGuard};
use tracing::{debug, trace, warn};

use hostpool_common::{HostKey, SessionId};

use crate::cancel::CancelCheck;
use crate::error::{PoolError, PoolResult};
use crate::guard::ConnectionGuard;
use crate::idle::IdleQueue;
use crate::pool::PoolState;
use crate::session::{Session, SessionCell, SessionFactory};
use crate::stats::HostStats;

/// Collaborators an acquire borrows from its pool.
pub(crate) struct Admission<'a, F: SessionFactory> {
    pub(crate) factory: &'a F,
    pub(crate) guard: &'a dyn ConnectionGuard,
    pub(crate) cancel: &'a dyn CancelCheck,
    pub(crate) monitor: &'a Condvar,
    /// Set once the pool is disposed; read without the pool lock
    pub(crate) disposed: &'a AtomicBool,
    pub(crate) poll_interval: Duration,
}

/// A session handed out by [`acquire`].
pub(crate) struct Acquired<S> {
    pub(crate) cell: Arc<SessionCell<S>>,
    pub(crate) reused: bool,
}

impl<S: Session> std::fmt::Debug for Acquired<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquired")
            .field("id", &self.cell.id())
            .field("reused", &self.reused)
            .finish()
    }
}

/// What happened to a released session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    /// Cached for reuse
    Cached,
    /// Closed: cache full, guard pressure, or the group is gone
    Discarded,
}

/// Sessions and limits for one remote host.
pub(crate) struct HostGroup<S> {
    host: HostKey,
    active: HashMap<SessionId, Arc<SessionCell<S>>>,
    idle: IdleQueue<S>,
    max_cached: usize,
    max_concurrent: usize,
    disposed: bool,
}

impl<S: Session> HostGroup<S> {
    pub(crate) fn new(host: HostKey, max_cached: usize, max_concurrent: usize) -> Self {
        Self {
            host,
            active: HashMap::new(),
            idle: IdleQueue::new(),
            max_cached,
            max_concurrent: max_concurrent.max(max_cached),
            disposed: false,
        }
    }

    pub(crate) fn active_len(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn at_capacity(&self) -> bool {
        self.active.len() + self.idle.len() >= self.max_concurrent
    }

    /// Hand out the oldest idle session, re-targeted at `address`.
    fn reuse<F>(
        &mut self,
        address: &Uri,
        ctx: &Admission<'_, F>,
    ) -> PoolResult<Option<Acquired<S>>>
    where
        F: SessionFactory<Session = S>,
    {
        let Some(cell) = self.idle.pop_oldest() else {
            return Ok(None);
        };

        if let Err(e) = ctx.factory.adjust(address, cell.session()) {
            warn!(
                host = %self.host,
                session = %cell.id(),
                error = %e,
                "Failed to adjust idle session, closing it"
            );
            close_session(&cell, ctx.guard);
            ctx.monitor.notify_all();
            return Err(PoolError::CreationFailed(e));
        }

        if !ctx.guard.should_keep_locally(ctx.cancel) {
            let shed = self.close_inactive(ctx.guard);
            if shed > 0 {
                debug!(
                    host = %self.host,
                    shed = shed,
                    "Shedding idle sessions under global pressure"
                );
                ctx.monitor.notify_all();
            }
        }

        trace!(
            host = %self.host,
            session = %cell.id(),
            idle = self.idle.len(),
            "Reusing idle session"
        );
        self.active.insert(cell.id(), Arc::clone(&cell));
        Ok(Some(Acquired { cell, reused: true }))
    }

    /// Open a fresh session. The caller has checked capacity.
    fn create<F>(&mut self, address: &Uri, ctx: &Admission<'_, F>) -> PoolResult<Acquired<S>>
    where
        F: SessionFactory<Session = S>,
    {
        debug_assert!(!self.at_capacity());

        let session = ctx.factory.create(address).map_err(|e| {
            warn!(host = %self.host, error = %e, "Session factory failed");
            PoolError::CreationFailed(e)
        })?;
        ctx.guard.session_opened();

        let cell = Arc::new(SessionCell::new(session));
        self.active.insert(cell.id(), Arc::clone(&cell));
        debug!(
            host = %self.host,
            session = %cell.id(),
            active = self.active.len(),
            idle = self.idle.len(),
            "Opened new session"
        );
        Ok(Acquired {
            cell,
            reused: false,
        })
    }

    /// Take a session back from a caller.
    ///
    /// The session is cached when the guard agrees and the cache has room;
    /// otherwise it is closed.
    pub(crate) fn release(
        &mut self,
        cell: Arc<SessionCell<S>>,
        now: Instant,
        guard: &dyn ConnectionGuard,
        cancel: &dyn CancelCheck,
    ) -> Released {
        let was_active = self.active.remove(&cell.id()).is_some();
        if !was_active {
            warn!(
                host = %self.host,
                session = %cell.id(),
                "Released session was not checked out of this host group"
            );
        }

        let cacheable = was_active && !self.disposed && !cell.is_closed();
        if cacheable && guard.should_keep_locally(cancel) && self.idle.len() < self.max_cached {
            trace!(
                host = %self.host,
                session = %cell.id(),
                idle = self.idle.len() + 1,
                "Caching released session"
            );
            self.idle.admit(cell, now);
            Released::Cached
        } else {
            trace!(host = %self.host, session = %cell.id(), "Discarding released session");
            close_session(&cell, guard);
            Released::Discarded
        }
    }

    /// Close idle sessions older than `timeout`. Returns how many were closed.
    pub(crate) fn sweep(
        &mut self,
        now: Instant,
        timeout: Duration,
        guard: &dyn ConnectionGuard,
    ) -> usize {
        let expired = self.idle.evict_expired(now, timeout);
        for cell in &expired {
            close_session(cell, guard);
        }
        if !expired.is_empty() {
            debug!(
                host = %self.host,
                evicted = expired.len(),
                remaining = self.idle.len(),
                "Evicted idle sessions past their timeout"
            );
        }
        expired.len()
    }

    /// Close the longest cached idle session to free its slot.
    fn close_oldest_idle(&mut self, guard: &dyn ConnectionGuard) -> bool {
        let Some(cell) = self.idle.pop_oldest() else {
            return false;
        };
        debug!(
            host = %self.host,
            session = %cell.id(),
            "Closing idle session to make room for a fresh one"
        );
        close_session(&cell, guard);
        true
    }

    /// Close every idle session. Returns how many were closed.
    pub(crate) fn close_inactive(&mut self, guard: &dyn ConnectionGuard) -> usize {
        let drained = self.idle.drain();
        for cell in &drained {
            close_session(cell, guard);
        }
        drained.len()
    }

    /// Close everything and refuse further work. Returns how many sessions were closed.
    pub(crate) fn dispose(&mut self, guard: &dyn ConnectionGuard) -> usize {
        let mut closed = self.close_inactive(guard);
        for (_, cell) in self.active.drain() {
            if close_session(&cell, guard) {
                closed += 1;
            }
        }
        self.disposed = true;
        debug!(host = %self.host, closed = closed, "Host group disposed");
        closed
    }

    pub(crate) fn stats(&self) -> HostStats {
        HostStats {
            host: self.host.clone(),
            active: self.active.len(),
            idle: self.idle.len(),
            max_cached: self.max_cached,
            max_concurrent: self.max_concurrent,
        }
    }
}

/// Close a session once and tell the guard about it.
pub(crate) fn close_session<S: Session>(
    cell: &SessionCell<S>,
    guard: &dyn ConnectionGuard,
) -> bool {
    let closed = cell.close();
    if closed {
        guard.session_closed();
    }
    closed
}

/// Get a session for `address` from the group of `host`.
///
/// 1. Reuse the oldest idle session when allowed.
/// 2. Wait for the global guard, with the pool lock released.
/// 3. Wait on the pool monitor while the host is at capacity.
/// 4. Reuse an idle session that appeared meanwhile, or open a new one.
pub(crate) fn acquire<F: SessionFactory>(
    state: &mut MutexGuard<'_, PoolState<F::Session>>,
    host: &HostKey,
    address: &Uri,
    may_reuse: bool,
    ctx: &Admission<'_, F>,
) -> PoolResult<Acquired<F::Session>> {
    {
        let group = state.group_mut(host)?;
        if group.disposed {
            return Err(PoolError::Disposed);
        }
        if may_reuse {
            if let Some(acquired) = group.reuse(address, ctx)? {
                return Ok(acquired);
            }
        }
    }

    wait_for_global_capacity(state, host, ctx)?;

    wait_for_room(state, host, may_reuse, ctx)?;

    let group = state.group_mut(host)?;
    if may_reuse {
        if let Some(acquired) = group.reuse(address, ctx)? {
            return Ok(acquired);
        }
    }
    group.create(address, ctx)
}

/// Wait on the global guard with the pool lock released.
///
/// The guard sees the caller's cancel check combined with the pool's
/// disposed flag, so disposing the pool also ends this wait.
fn wait_for_global_capacity<F: SessionFactory>(
    state: &mut MutexGuard<'_, PoolState<F::Session>>,
    host: &HostKey,
    ctx: &Admission<'_, F>,
) -> PoolResult<()> {
    let disposed = ctx.disposed;
    let cancel = ctx.cancel;
    let stop = |thread: &Thread| disposed.load(Ordering::Acquire) || cancel.is_cancelled(thread);

    match MutexGuard::unlocked(state, || ctx.guard.wait_for_capacity(&stop)) {
        Err(PoolError::Cancelled) if disposed.load(Ordering::Acquire) => {
            debug!(host = %host, "Pool disposed while waiting for global capacity");
            Err(PoolError::Disposed)
        }
        result => result,
    }
}

/// Block until the group of `host` can serve one more session.
///
/// That is the case below `max_concurrent`, or when an idle session is
/// cached: a reusing caller takes it, any other caller closes it to free
/// its slot. Wakes on every notification and at least once per poll
/// interval. Any exit other than success notifies the remaining waiters
/// first.
fn wait_for_room<F: SessionFactory>(
    state: &mut MutexGuard<'_, PoolState<F::Session>>,
    host: &HostKey,
    may_reuse: bool,
    ctx: &Admission<'_, F>,
) -> PoolResult<()> {
    let current = thread::current();
    let mut waited = false;

    loop {
        let group = state.group_mut(host)?;
        if group.disposed {
            debug!(host = %host, "Pool disposed while waiting for capacity");
            ctx.monitor.notify_all();
            return Err(PoolError::Disposed);
        }
        if !group.at_capacity() || (may_reuse && !group.idle.is_empty()) {
            if waited {
                trace!(host = %host, "Capacity freed, resuming acquire");
            }
            return Ok(());
        }
        if group.close_oldest_idle(ctx.guard) {
            continue;
        }
        if !waited {
            debug!(
                host = %host,
                active = group.active.len(),
                idle = group.idle.len(),
                max_concurrent = group.max_concurrent,
                "Host at capacity, waiting"
            );
            waited = true;
        }

        ctx.monitor.wait_for(state, ctx.poll_interval);

        if ctx.cancel.is_cancelled(&current) {
            debug!(host = %host, "Acquire cancelled while waiting for capacity");
            ctx.monitor.notify_all();
            return Err(PoolError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::NeverCancel;
    use crate::error::BoxError;
    use crate::guard::Unbounded;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Conn {
        closed: AtomicUsize,
        adjusted_to: parking_lot::Mutex<Option<String>>,
    }

    impl Session for Conn {
        fn close(&self) -> Result<(), BoxError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Factory {
        fail_create: AtomicBool,
        fail_adjust: AtomicBool,
    }

    impl SessionFactory for Factory {
        type Session = Conn;

        fn create(&self, _address: &Uri) -> Result<Conn, BoxError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err("connection refused".into());
            }
            Ok(Conn::default())
        }

        fn adjust(&self, address: &Uri, session: &Conn) -> Result<(), BoxError> {
            if self.fail_adjust.load(Ordering::SeqCst) {
                return Err("re-authentication failed".into());
            }
            *session.adjusted_to.lock() = Some(address.to_string());
            Ok(())
        }
    }

    /// Guard that refuses to keep anything cached.
    struct Shedding;

    impl ConnectionGuard for Shedding {
        fn wait_for_capacity(&self, _cancel: &dyn CancelCheck) -> PoolResult<()> {
            Ok(())
        }

        fn should_keep_locally(&self, _cancel: &dyn CancelCheck) -> bool {
            false
        }
    }

    static LIVE: AtomicBool = AtomicBool::new(false);

    fn ctx<'a>(
        factory: &'a Factory,
        guard: &'a dyn ConnectionGuard,
        monitor: &'a Condvar,
    ) -> Admission<'a, Factory> {
        Admission {
            factory,
            guard,
            cancel: &NeverCancel,
            monitor,
            disposed: &LIVE,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_create_then_release_caches() {
        let factory = Factory::default();
        let monitor = Condvar::new();
        let ctx = ctx(&factory, &Unbounded, &monitor);
        let mut group = HostGroup::new(HostKey::new("svn.example.com"), 2, 4);

        let acquired = group.create(&uri("svn://svn.example.com/a"), &ctx).unwrap();
        assert!(!acquired.reused);
        assert_eq!(group.active_len(), 1);

        let outcome = group.release(acquired.cell, Instant::now(), &Unbounded, &NeverCancel);
        assert_eq!(outcome, Released::Cached);
        assert_eq!(group.active_len(), 0);
        assert_eq!(group.idle_len(), 1);
    }

    #[test]
    fn test_reuse_adjusts_oldest() {
        let factory = Factory::default();
        let monitor = Condvar::new();
        let ctx = ctx(&factory, &Unbounded, &monitor);
        let mut group = HostGroup::new(HostKey::new("h"), 2, 4);
        let now = Instant::now();

        let first = group.create(&uri("svn://h/a"), &ctx).unwrap().cell;
        let second = group.create(&uri("svn://h/b"), &ctx).unwrap().cell;
        let first_id = first.id();
        group.release(first, now, &Unbounded, &NeverCancel);
        group.release(second, now, &Unbounded, &NeverCancel);

        let reused = group.reuse(&uri("svn://h/c"), &ctx).unwrap().unwrap();
        assert!(reused.reused);
        assert_eq!(reused.cell.id(), first_id);
        assert_eq!(reused.cell.session().adjusted_to.lock().as_deref(), Some("svn://h/c"));
        assert_eq!(group.active_len(), 1);
        assert_eq!(group.idle_len(), 1);
    }

    #[test]
    fn test_release_discards_when_cache_full() {
        let factory = Factory::default();
        let monitor = Condvar::new();
        let ctx = ctx(&factory, &Unbounded, &monitor);
        let mut group = HostGroup::new(HostKey::new("h"), 1, 4);
        let now = Instant::now();

        let a = group.create(&uri("svn://h/"), &ctx).unwrap().cell;
        let b = group.create(&uri("svn://h/"), &ctx).unwrap().cell;
        assert_eq!(group.release(a, now, &Unbounded, &NeverCancel), Released::Cached);
        assert_eq!(
            group.release(Arc::clone(&b), now, &Unbounded, &NeverCancel),
            Released::Discarded
        );

        assert!(b.is_closed());
        assert_eq!(b.session().closed.load(Ordering::SeqCst), 1);
        assert_eq!(group.idle_len(), 1);
    }

    #[test]
    fn test_release_discards_under_guard_pressure() {
        let factory = Factory::default();
        let monitor = Condvar::new();
        let ctx = ctx(&factory, &Unbounded, &monitor);
        let mut group = HostGroup::new(HostKey::new("h"), 5, 5);

        let a = group.create(&uri("svn://h/"), &ctx).unwrap().cell;
        let outcome = group.release(a, Instant::now(), &Shedding, &NeverCancel);
        assert_eq!(outcome, Released::Discarded);
        assert_eq!(group.idle_len(), 0);
    }

    #[test]
    fn test_reuse_sheds_remaining_idle_under_pressure() {
        let factory = Factory::default();
        let monitor = Condvar::new();
        let mut group = HostGroup::new(HostKey::new("h"), 5, 5);
        let now = Instant::now();

        let plain = ctx(&factory, &Unbounded, &monitor);
        let cells: Vec<_> = (0..3)
            .map(|_| group.create(&uri("svn://h/"), &plain).unwrap().cell)
            .collect();
        for cell in &cells {
            group.release(Arc::clone(cell), now, &Unbounded, &NeverCancel);
        }
        assert_eq!(group.idle_len(), 3);

        let shedding = ctx(&factory, &Shedding, &monitor);
        let reused = group.reuse(&uri("svn://h/"), &shedding).unwrap().unwrap();
        assert_eq!(reused.cell.id(), cells[0].id());
        assert!(!reused.cell.is_closed());
        assert_eq!(group.idle_len(), 0);
        assert!(cells[1].is_closed());
        assert!(cells[2].is_closed());
    }

    #[test]
    fn test_failed_adjust_closes_session() {
        let factory = Factory::default();
        let monitor = Condvar::new();
        let ctx = ctx(&factory, &Unbounded, &monitor);
        let mut group = HostGroup::new(HostKey::new("h"), 2, 2);

        let cell = group.create(&uri("svn://h/"), &ctx).unwrap().cell;
        group.release(Arc::clone(&cell), Instant::now(), &Unbounded, &NeverCancel);

        factory.fail_adjust.store(true, Ordering::SeqCst);
        let err = group.reuse(&uri("svn://h/"), &ctx).unwrap_err();
        assert!(matches!(err, PoolError::CreationFailed(_)));
        assert!(cell.is_closed());
        assert_eq!(group.active_len() + group.idle_len(), 0);
    }

    #[test]
    fn test_failed_create_leaves_no_trace() {
        let factory = Factory::default();
        factory.fail_create.store(true, Ordering::SeqCst);
        let monitor = Condvar::new();
        let ctx = ctx(&factory, &Unbounded, &monitor);
        let mut group = HostGroup::<Conn>::new(HostKey::new("h"), 2, 2);

        let err = group.create(&uri("svn://h/"), &ctx).unwrap_err();
        assert!(matches!(err, PoolError::CreationFailed(_)));
        assert_eq!(group.active_len(), 0);
    }

    #[test]
    fn test_dispose_closes_everything_once() {
        let factory = Factory::default();
        let monitor = Condvar::new();
        let ctx = ctx(&factory, &Unbounded, &monitor);
        let mut group = HostGroup::new(HostKey::new("h"), 2, 4);

        let active = group.create(&uri("svn://h/"), &ctx).unwrap().cell;
        let idle = group.create(&uri("svn://h/"), &ctx).unwrap().cell;
        group.release(Arc::clone(&idle), Instant::now(), &Unbounded, &NeverCancel);

        assert_eq!(group.dispose(&Unbounded), 2);
        assert!(group.is_disposed());
        assert_eq!(active.session().closed.load(Ordering::SeqCst), 1);
        assert_eq!(idle.session().closed.load(Ordering::SeqCst), 1);

        // A late release of the force-closed session neither caches nor re-closes it
        let outcome = group.release(Arc::clone(&active), Instant::now(), &Unbounded, &NeverCancel);
        assert_eq!(outcome, Released::Discarded);
        assert_eq!(active.session().closed.load(Ordering::SeqCst), 1);
        assert_eq!(group.idle_len(), 0);
    }

    #[test]
    fn test_max_concurrent_never_below_max_cached() {
        let group = HostGroup::<Conn>::new(HostKey::new("h"), 6, 2);
        let stats = group.stats();
        assert_eq!(stats.max_cached, 6);
        assert_eq!(stats.max_concurrent, 6);
    }
}
