//! Idle session cache ordered by admission.
//!
//! Entries are keyed by a per-queue sequence number, so two sessions cached
//! in the same instant still have a strict order and never overwrite each
//! other. The admission time is kept next to each entry and is only used
//! to measure idle age.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::session::SessionCell;

struct IdleEntry<S> {
    cell: Arc<SessionCell<S>>,
    admitted_at: Instant,
}

/// FIFO cache of idle sessions.
pub(crate) struct IdleQueue<S> {
    entries: BTreeMap<u64, IdleEntry<S>>,
    next_seq: u64,
}

impl<S> IdleQueue<S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache a session that became idle at `now`.
    pub(crate) fn admit(&mut self, cell: Arc<SessionCell<S>>, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            seq,
            IdleEntry {
                cell,
                admitted_at: now,
            },
        );
    }

    /// Remove and return the session that has been cached the longest.
    pub(crate) fn pop_oldest(&mut self) -> Option<Arc<SessionCell<S>>> {
        self.entries.pop_first().map(|(_, entry)| entry.cell)
    }

    /// Remove sessions idle for longer than `timeout`, oldest first.
    ///
    /// Stops at the first entry that has not expired yet; everything behind
    /// it was admitted later.
    pub(crate) fn evict_expired(
        &mut self,
        now: Instant,
        timeout: Duration,
    ) -> Vec<Arc<SessionCell<S>>> {
        let mut expired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if now.saturating_duration_since(entry.get().admitted_at) > timeout {
                expired.push(entry.remove().cell);
            } else {
                break;
            }
        }
        expired
    }

    /// Remove every cached session.
    pub(crate) fn drain(&mut self) -> Vec<Arc<SessionCell<S>>> {
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|entry| entry.cell)
            .collect()
    }
}
