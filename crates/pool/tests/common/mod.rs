//! Shared fixtures for the pool integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hostpool::{BoxError, Session, SessionFactory};
use http::Uri;
use parking_lot::Mutex;

/// Close and adjust counts, shared by every session of one factory.
#[derive(Debug, Default)]
pub struct Ledger {
    created: AtomicUsize,
    adjusted: AtomicUsize,
    closes: Mutex<HashMap<u64, usize>>,
    /// Serials whose close reports an error
    failing: Mutex<HashSet<u64>>,
}

impl Ledger {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn adjusted(&self) -> usize {
        self.adjusted.load(Ordering::SeqCst)
    }

    /// Sessions closed at least once.
    pub fn closed(&self) -> usize {
        self.closes.lock().len()
    }

    /// Whether any session was closed more than once.
    pub fn any_double_close(&self) -> bool {
        self.closes.lock().values().any(|&n| n > 1)
    }

    pub fn close_count(&self, serial: u64) -> usize {
        self.closes.lock().get(&serial).copied().unwrap_or(0)
    }

    /// Make closing session `serial` fail. The attempt is still recorded.
    pub fn fail_close_of(&self, serial: u64) {
        self.failing.lock().insert(serial);
    }
}

#[derive(Debug)]
pub struct MockSession {
    /// Creation order within the factory, starting at 0
    pub serial: u64,
    pub target: Mutex<String>,
    ledger: Arc<Ledger>,
}

impl Session for MockSession {
    fn close(&self) -> Result<(), BoxError> {
        *self.ledger.closes.lock().entry(self.serial).or_default() += 1;
        if self.ledger.failing.lock().contains(&self.serial) {
            return Err("connection reset while closing".into());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockFactory {
    pub ledger: Arc<Ledger>,
    pub fail_create: AtomicBool,
    pub fail_adjust: AtomicBool,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> Arc<Ledger> {
        Arc::clone(&self.ledger)
    }
}

impl SessionFactory for MockFactory {
    type Session = MockSession;

    fn create(&self, address: &Uri) -> Result<MockSession, BoxError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        let serial = self.ledger.created.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(MockSession {
            serial,
            target: Mutex::new(address.to_string()),
            ledger: Arc::clone(&self.ledger),
        })
    }

    fn adjust(&self, address: &Uri, session: &MockSession) -> Result<(), BoxError> {
        if self.fail_adjust.load(Ordering::SeqCst) {
            return Err("authentication expired".into());
        }
        self.ledger.adjusted.fetch_add(1, Ordering::SeqCst);
        *session.target.lock() = address.to_string();
        Ok(())
    }
}

/// Route pool logs through the test output capture.
pub fn init_logging() {
    hostpool_common::init_test_logging();
}

pub fn uri(s: &str) -> Uri {
    s.parse().unwrap()
}

/// Poll `condition` until it holds or `deadline` passes.
pub fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
