//! Session collaborators and the caller-side lease.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use http::Uri;
use hostpool_common::{HostKey, SessionId};
use tracing::{trace, warn};

use crate::error::BoxError;
use crate::pool::PoolInner;

/// An open connection to a remote host.
///
/// The pool never looks inside a session. It only decides when one is
/// created, reused, cached and closed.
pub trait Session: Send + Sync + 'static {
    /// Close the underlying connection.
    ///
    /// Called at most once per session by the pool. Errors are logged and
    /// otherwise ignored.
    fn close(&self) -> Result<(), BoxError>;
}

/// Creates sessions and re-targets reused ones.
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    /// Open a new session bound to `address`.
    fn create(&self, address: &Uri) -> Result<Self::Session, BoxError>;

    /// Point an idle session at `address` before it is handed out again.
    ///
    /// The session always belongs to the same host as `address`.
    fn adjust(&self, address: &Uri, session: &Self::Session) -> Result<(), BoxError> {
        let _ = (address, session);
        Ok(())
    }
}

/// Shared slot holding one session for its whole life.
///
/// The slot is shared between the caller's lease and the pool's active set,
/// so disposal can close a session that is still checked out.
pub(crate) struct SessionCell<S> {
    id: SessionId,
    session: S,
    closed: AtomicBool,
}

impl<S: Session> SessionCell<S> {
    pub(crate) fn new(session: S) -> Self {
        Self {
            id: SessionId::next(),
            session,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn session(&self) -> &S {
        &self.session
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the session unless that already happened.
    ///
    /// Returns `true` if this call performed the close.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(e) = self.session.close() {
            warn!(session = %self.id, error = %e, "Session close failed");
        } else {
            trace!(session = %self.id, "Session closed");
        }
        true
    }
}

/// A session checked out of a [`HostPool`](crate::HostPool).
///
/// Dereferences to the session. Hand it back with
/// [`HostPool::release`](crate::HostPool::release); a lease that is simply
/// dropped is returned to its pool the same way.
pub struct PooledSession<F: SessionFactory> {
    cell: Option<Arc<SessionCell<F::Session>>>,
    host: HostKey,
    reused: bool,
    pool: Weak<PoolInner<F>>,
}

impl<F: SessionFactory> PooledSession<F> {
    pub(crate) fn new(
        cell: Arc<SessionCell<F::Session>>,
        host: HostKey,
        reused: bool,
        pool: Weak<PoolInner<F>>,
    ) -> Self {
        Self {
            cell: Some(cell),
            host,
            reused,
            pool,
        }
    }

    fn cell(&self) -> &Arc<SessionCell<F::Session>> {
        self.cell.as_ref().expect("session already returned")
    }

    /// Identifier of the underlying session.
    pub fn id(&self) -> SessionId {
        self.cell().id()
    }

    /// Host group this session belongs to.
    pub fn host(&self) -> &HostKey {
        &self.host
    }

    /// Whether the session came out of the idle cache.
    pub fn was_reused(&self) -> bool {
        self.reused
    }

    /// Whether the pool already closed the session (it was disposed meanwhile).
    pub fn is_closed(&self) -> bool {
        self.cell().is_closed()
    }

    pub(crate) fn take_cell(&mut self) -> Option<Arc<SessionCell<F::Session>>> {
        self.cell.take()
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PoolInner<F>>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(pool))
    }
}

impl<F: SessionFactory> Deref for PooledSession<F> {
    type Target = F::Session;

    fn deref(&self) -> &Self::Target {
        self.cell().session()
    }
}

impl<F: SessionFactory> Drop for PooledSession<F> {
    fn drop(&mut self) {
        let Some(cell) = self.cell.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => {
                trace!(
                    host = %self.host,
                    session = %cell.id(),
                    "Session dropped without release, returning to pool"
                );
                pool.return_session(cell, &self.host);
            }
            None => {
                cell.close();
            }
        }
    }
}

impl<F: SessionFactory> fmt::Debug for PooledSession<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("id", &self.cell.as_ref().map(|c| c.id()))
            .field("host", &self.host)
            .field("reused", &self.reused)
            .finish()
    }
}
