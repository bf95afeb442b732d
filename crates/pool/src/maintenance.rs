//! Background idle sweeping.
//!
//! A pool only evicts idle sessions when [`HostPool::sweep`] runs. The
//! [`Sweeper`] calls it on a fixed interval from a dedicated thread until
//! it is stopped or the pool is disposed.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::pool::HostPool;
use crate::session::SessionFactory;

/// Shortest interval a sweeper runs at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to a running sweep thread. Dropping it stops the thread.
pub struct Sweeper {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl Sweeper {
    /// Start sweeping `pool` every `interval`.
    ///
    /// The thread holds a handle to the pool, so the pool stays alive until
    /// the sweeper is stopped or the pool is disposed. Intervals shorter
    /// than [`MIN_SWEEP_INTERVAL`] are raised to it.
    pub fn spawn<F: SessionFactory>(pool: HostPool<F>, interval: Duration) -> io::Result<Self> {
        if interval < MIN_SWEEP_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                min_ms = MIN_SWEEP_INTERVAL.as_millis() as u64,
                "Sweep interval too short, using the minimum"
            );
        }
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name("hostpool-sweeper".to_string())
            .spawn(move || run(pool, interval, &thread_signal))?;

        info!(interval_ms = interval.as_millis() as u64, "Idle sweeper started");
        Ok(Self {
            signal,
            handle: Some(handle),
            interval,
        })
    }

    /// Effective interval between sweeps.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the thread and wait for it to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn shutdown(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("Idle sweeper stopped");
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<F: SessionFactory>(pool: HostPool<F>, interval: Duration, signal: &StopSignal) {
    let mut stopped = signal.stopped.lock();
    loop {
        if *stopped {
            return;
        }
        signal.wake.wait_for(&mut stopped, interval);
        if *stopped {
            return;
        }
        if pool.is_disposed() {
            debug!("Pool disposed, idle sweeper exiting");
            return;
        }

        let evicted = parking_lot::MutexGuard::unlocked(&mut stopped, || pool.sweep());
        trace!(evicted = evicted, idle = pool.inactive_count(), "Idle sweep finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::BoxError;
    use crate::session::Session;
    use hostpool_config::PoolConfig;
    use http::Uri;
    use std::time::Instant;

    struct Conn;

    impl Session for Conn {
        fn close(&self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    struct Factory;

    impl SessionFactory for Factory {
        type Session = Conn;

        fn create(&self, _address: &Uri) -> Result<Conn, BoxError> {
            Ok(Conn)
        }
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_sweeper_evicts_expired_sessions() {
        let clock = Arc::new(ManualClock::new());
        let pool = HostPool::builder(Factory)
            .config(PoolConfig {
                idle_timeout: Duration::from_secs(60),
                ..Default::default()
            })
            .clock(clock.clone())
            .build();

        let lease = pool.acquire(&"svn://alpha/".parse::<Uri>().unwrap(), true).unwrap();
        pool.release(lease);
        assert_eq!(pool.inactive_count(), 1);

        let sweeper = Sweeper::spawn(pool.clone(), Duration::from_millis(10)).unwrap();
        clock.advance(Duration::from_secs(61));

        assert!(wait_until(Duration::from_secs(2), || pool.inactive_count() == 0));
        assert!(sweeper.is_running());
        sweeper.stop();
    }

    #[test]
    fn test_sweeper_exits_when_pool_disposed() {
        let pool = HostPool::new(Factory);
        let sweeper = Sweeper::spawn(pool.clone(), Duration::from_millis(10)).unwrap();

        pool.dispose();
        assert!(wait_until(Duration::from_secs(2), || !sweeper.is_running()));
    }

    #[test]
    fn test_zero_interval_is_raised_to_minimum() {
        let clock = Arc::new(ManualClock::new());
        let pool = HostPool::builder(Factory).clock(clock.clone()).build();
        let lease = pool.acquire(&"svn://alpha/".parse::<Uri>().unwrap(), true).unwrap();
        pool.release(lease);

        let sweeper = Sweeper::spawn(pool.clone(), Duration::ZERO).unwrap();
        assert_eq!(sweeper.interval(), MIN_SWEEP_INTERVAL);

        clock.advance(pool.config().idle_timeout + Duration::from_secs(1));
        assert!(wait_until(Duration::from_secs(2), || pool.inactive_count() == 0));

        let start = Instant::now();
        sweeper.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_stop_returns_promptly() {
        let pool = HostPool::new(Factory);
        let sweeper = Sweeper::spawn(pool, Duration::from_secs(3600)).unwrap();

        let start = Instant::now();
        sweeper.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
