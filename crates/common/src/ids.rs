//! Type-safe identifier newtypes for the connection pool.
//!
//! These types keep session identities and host identities from being
//! mixed up with each other or with plain strings and integers.

use http::Uri;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a pooled session.
///
/// Sessions themselves are opaque to the pool, so every session gets an id
/// when it is created and keeps it across any number of idle/active cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next unused session id.
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Identity of a remote host.
///
/// All sessions against the same hostname share one host group, whatever
/// the scheme, port or path of the address they were requested for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostKey(String);

impl HostKey {
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into().to_ascii_lowercase())
    }

    /// Derive the host identity of an address.
    ///
    /// Returns `None` for addresses without an authority, such as `/repo/trunk`.
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        uri.host().filter(|h| !h.is_empty()).map(Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HostKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
