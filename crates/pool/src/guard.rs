//! Process-wide connection guard.
//!
//! Every pool consults a [`ConnectionGuard`] before opening a session and
//! before caching one. A single guard is usually shared by all pools of a
//! process so that the total number of open sessions stays near one
//! ceiling, whatever the per-host limits add up to.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Weak;
use std::thread;
use tracing::{debug, trace};

use hostpool_config::GuardConfig;

use crate::cancel::CancelCheck;
use crate::error::{PoolError, PoolResult};

/// Arbiter of the process-wide session budget.
pub trait ConnectionGuard: Send + Sync {
    /// Block until one more session may be opened.
    ///
    /// Must return [`PoolError::Cancelled`] once `cancel` fires.
    fn wait_for_capacity(&self, cancel: &dyn CancelCheck) -> PoolResult<()>;

    /// Whether a session that is no longer in use should be cached rather
    /// than closed.
    fn should_keep_locally(&self, cancel: &dyn CancelCheck) -> bool;

    /// A pool opened a session.
    fn session_opened(&self) {}

    /// A pool closed a session. Called exactly once per opened session
    /// that the pool closes.
    fn session_closed(&self) {}

    /// A pool using this guard was built. Guards that reclaim cached
    /// sessions keep the handle and call it when over their ceiling.
    fn register(&self, _pool: Weak<dyn IdleShedder>) {}

    /// Wake every thread blocked in `wait_for_capacity` so it re-runs its
    /// cancel check.
    fn wake_waiters(&self) {}
}

/// A pool that can give back its cached sessions.
///
/// Implementations take their own lock and report each close through
/// [`ConnectionGuard::session_closed`], so the guard must not hold its own
/// lock while calling [`shed_idle`](IdleShedder::shed_idle).
pub trait IdleShedder: Send + Sync {
    /// Close every idle session. Returns how many were closed.
    fn shed_idle(&self) -> usize;
}

/// A guard without a ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl ConnectionGuard for Unbounded {
    fn wait_for_capacity(&self, _cancel: &dyn CancelCheck) -> PoolResult<()> {
        Ok(())
    }

    fn should_keep_locally(&self, _cancel: &dyn CancelCheck) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct GuardState {
    /// Sessions currently open across all pools
    open: usize,
    /// Threads blocked in `wait_for_capacity`
    waiting: usize,
}

/// Guard that counts open sessions against a fixed ceiling.
///
/// The ceiling is advisory: `wait_for_capacity` does not reserve a slot, so
/// concurrent openers may briefly overshoot it. Cached sessions count
/// against the ceiling, so a thread that finds it reached first makes every
/// registered pool close its idle sessions, and only parks if that was not
/// enough. While anyone is waiting, pools are told not to cache released
/// sessions, which closes them and hands their slots to the waiters.
#[derive(Debug)]
pub struct ConnectionCountGuard {
    config: GuardConfig,
    state: Mutex<GuardState>,
    freed: Condvar,
    pools: Mutex<Vec<Weak<dyn IdleShedder>>>,
}

impl ConnectionCountGuard {
    pub fn new(config: GuardConfig) -> Self {
        debug!(max_total = config.max_total, "Creating connection count guard");
        Self {
            config,
            state: Mutex::new(GuardState::default()),
            freed: Condvar::new(),
            pools: Mutex::new(Vec::new()),
        }
    }

    /// Close the idle sessions of every registered pool that is still alive.
    fn reclaim_idle(&self) -> usize {
        let live: Vec<_> = {
            let mut pools = self.pools.lock();
            pools.retain(|known| known.strong_count() > 0);
            pools.iter().filter_map(Weak::upgrade).collect()
        };
        let reclaimed: usize = live.iter().map(|pool| pool.shed_idle()).sum();
        if reclaimed > 0 {
            debug!(reclaimed = reclaimed, "Reclaimed cached sessions over the global ceiling");
        }
        reclaimed
    }

    /// Sessions currently counted as open.
    pub fn open_sessions(&self) -> usize {
        self.state.lock().open
    }

    /// Threads currently blocked waiting for global capacity.
    pub fn waiting_threads(&self) -> usize {
        self.state.lock().waiting
    }

    pub fn max_total(&self) -> usize {
        self.config.max_total
    }
}

impl Default for ConnectionCountGuard {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

impl ConnectionGuard for ConnectionCountGuard {
    fn wait_for_capacity(&self, cancel: &dyn CancelCheck) -> PoolResult<()> {
        let mut state = self.state.lock();
        if state.open < self.config.max_total {
            return Ok(());
        }

        debug!(
            open = state.open,
            max_total = self.config.max_total,
            "Global session ceiling reached, waiting"
        );
        state.waiting += 1;
        let current = thread::current();
        let result = loop {
            // Closing reports back through session_closed, which takes this lock
            MutexGuard::unlocked(&mut state, || self.reclaim_idle());
            if state.open < self.config.max_total {
                break Ok(());
            }

            self.freed.wait_for(&mut state, self.config.poll_interval);
            if cancel.is_cancelled(&current) {
                break Err(PoolError::Cancelled);
            }
            if state.open < self.config.max_total {
                break Ok(());
            }
        };
        state.waiting -= 1;

        if result.is_err() {
            // Let the other waiters re-check instead of sleeping out their poll
            self.freed.notify_all();
        }
        result
    }

    fn should_keep_locally(&self, _cancel: &dyn CancelCheck) -> bool {
        let state = self.state.lock();
        state.waiting == 0 && state.open <= self.config.max_total
    }

    fn session_opened(&self) {
        let mut state = self.state.lock();
        state.open += 1;
        trace!(open = state.open, "Session opened");
    }

    fn session_closed(&self) {
        let mut state = self.state.lock();
        state.open = state.open.saturating_sub(1);
        trace!(open = state.open, "Session closed");
        drop(state);
        self.freed.notify_all();
    }

    fn register(&self, pool: Weak<dyn IdleShedder>) {
        let mut pools = self.pools.lock();
        pools.retain(|known| known.strong_count() > 0);
        pools.push(pool);
    }

    fn wake_waiters(&self) {
        self.freed.notify_all();
    }
}
