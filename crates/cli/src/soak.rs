//! Soak run against simulated sessions.
//!
//! Worker threads acquire sessions for a handful of fake hosts, hold them
//! for a random time and release them. The simulated factory records every
//! open and close, so the run can verify afterwards that no host ever had
//! more live sessions than allowed and that every session was closed
//! exactly once.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context, Result};
use clap::Args;
use http::Uri;
use parking_lot::Mutex;
use tracing::{debug, info};

use hostpool::{
    BoxError, ConnectionCountGuard, HostKey, HostPool, Session, SessionFactory, Sweeper,
};
use hostpool_config::Config;

#[derive(Args, Debug, Clone)]
pub struct SoakArgs {
    /// Number of distinct simulated hosts
    #[arg(long, default_value_t = 4)]
    pub hosts: usize,

    /// Number of worker threads
    #[arg(long, default_value_t = 16)]
    pub threads: usize,

    /// Acquire/release cycles per worker
    #[arg(long, default_value_t = 500)]
    pub iterations: usize,

    /// Upper bound on how long a worker holds a session
    #[arg(long = "hold-ms", default_value_t = 5)]
    pub hold_ms: u64,
}

// ============================================================================
// Simulated sessions
// ============================================================================

#[derive(Debug, Default)]
struct HostLedger {
    live: usize,
    peak: usize,
}

/// Everything the simulated factory observed.
#[derive(Debug, Default)]
struct Ledger {
    hosts: Mutex<HashMap<HostKey, HostLedger>>,
    closes: Mutex<Vec<usize>>,
}

impl Ledger {
    fn opened(&self, host: &HostKey) -> usize {
        let mut hosts = self.hosts.lock();
        let entry = hosts.entry(host.clone()).or_default();
        entry.live += 1;
        entry.peak = entry.peak.max(entry.live);

        let mut closes = self.closes.lock();
        closes.push(0);
        closes.len() - 1
    }

    fn closed(&self, host: &HostKey, serial: usize) {
        if let Some(entry) = self.hosts.lock().get_mut(host) {
            entry.live = entry.live.saturating_sub(1);
        }
        if let Some(count) = self.closes.lock().get_mut(serial) {
            *count += 1;
        }
    }
}

struct SimSession {
    serial: usize,
    host: HostKey,
    ledger: Arc<Ledger>,
}

impl Session for SimSession {
    fn close(&self) -> Result<(), BoxError> {
        self.ledger.closed(&self.host, self.serial);
        Ok(())
    }
}

struct SimFactory {
    ledger: Arc<Ledger>,
}

impl SessionFactory for SimFactory {
    type Session = SimSession;

    fn create(&self, address: &Uri) -> Result<SimSession, BoxError> {
        let host = HostKey::from_uri(address).ok_or("address has no host")?;
        let serial = self.ledger.opened(&host);
        Ok(SimSession {
            serial,
            host,
            ledger: Arc::clone(&self.ledger),
        })
    }
}

/// Cheap per-call randomness.
fn jitter(seed: impl Hash, bound: u64) -> u64 {
    if bound == 0 {
        return 0;
    }
    let mut hasher = RandomState::new().build_hasher();
    seed.hash(&mut hasher);
    hasher.finish() % bound
}

// ============================================================================
// Run
// ============================================================================

pub fn run(config: &Config, args: &SoakArgs) -> Result<()> {
    ensure!(args.hosts > 0, "--hosts must be at least 1");
    ensure!(args.threads > 0, "--threads must be at least 1");

    let ledger = Arc::new(Ledger::default());
    let guard = Arc::new(ConnectionCountGuard::new(config.guard.clone()));
    let pool = HostPool::builder(SimFactory {
        ledger: Arc::clone(&ledger),
    })
    .config(config.pool.clone())
    .guard(guard.clone())
    .build();
    let sweeper = Sweeper::spawn(pool.clone(), config.maintenance.sweep_interval)
        .context("Failed to start idle sweeper")?;

    info!(
        hosts = args.hosts,
        threads = args.threads,
        iterations = args.iterations,
        hold_ms = args.hold_ms,
        "Starting soak run"
    );
    let started = Instant::now();

    let workers = (0..args.threads)
        .map(|worker| {
            let pool = pool.clone();
            let args = args.clone();
            thread::Builder::new()
                .name(format!("soak-worker-{worker}"))
                .spawn(move || work(&pool, &args, worker))
                .context("Failed to spawn soak worker")
        })
        .collect::<Result<Vec<_>>>()?;

    let mut completed = 0;
    for handle in workers {
        match handle.join() {
            Ok(result) => completed += result?,
            Err(_) => bail!("soak worker panicked"),
        }
    }
    let elapsed = started.elapsed();

    let stats = pool.stats();
    info!(
        cycles = completed,
        created = stats.total_created,
        reused = stats.total_reused,
        discarded = stats.total_discarded,
        evicted = stats.total_evicted,
        reuse_rate = %format!("{:.1}%", stats.reuse_rate() * 100.0),
        elapsed_ms = elapsed.as_millis() as u64,
        "Soak run finished"
    );
    for host in pool.host_stats() {
        debug!(
            host = %host.host,
            active = host.active,
            idle = host.idle,
            "Host group at end of run"
        );
    }

    sweeper.stop();
    pool.dispose();

    verify(&ledger, pool.config().max_concurrent)?;
    ensure!(
        guard.open_sessions() == 0,
        "global guard still counts {} open sessions after dispose",
        guard.open_sessions()
    );

    println!(
        "hostpool: soak run ok ({} cycles, {} sessions opened, {:.1}% reused, {:?})",
        completed,
        stats.total_created,
        stats.reuse_rate() * 100.0,
        elapsed
    );
    Ok(())
}

fn work(pool: &HostPool<SimFactory>, args: &SoakArgs, worker: usize) -> Result<usize> {
    let hold_us = args.hold_ms * 1000;
    let mut completed = 0;

    for iteration in 0..args.iterations {
        let host = jitter((worker, iteration, "host"), args.hosts as u64);
        let address: Uri = format!("svn://soak-host-{host}.invalid/repo/{iteration}").parse()?;
        let may_reuse = jitter((worker, iteration, "reuse"), 4) != 0;

        let session = pool
            .acquire(&address, may_reuse)
            .with_context(|| format!("acquire failed for {address}"))?;
        thread::sleep(Duration::from_micros(jitter((worker, iteration, "hold"), hold_us + 1)));
        pool.release(session);
        completed += 1;
    }
    Ok(completed)
}

/// Check the factory's records against the pool limits.
fn verify(ledger: &Ledger, max_concurrent: usize) -> Result<()> {
    for (host, record) in ledger.hosts.lock().iter() {
        ensure!(
            record.peak <= max_concurrent,
            "host {} reached {} live sessions, limit is {}",
            host,
            record.peak,
            max_concurrent
        );
        ensure!(record.live == 0, "host {} still has {} live sessions", host, record.live);
    }

    let closes = ledger.closes.lock();
    if let Some((serial, count)) = closes.iter().enumerate().find(|(_, count)| **count != 1) {
        bail!("session {} was closed {} times", serial, count);
    }
    info!(sessions = closes.len(), "Every session closed exactly once");
    Ok(())
}
