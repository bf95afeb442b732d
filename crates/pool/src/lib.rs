//! Per-host session pool.
//!
//! A [`HostPool`] hands out sessions to remote hosts, groups them by host,
//! caches released sessions for reuse and bounds how many sessions each
//! host may have open at once. Callers that hit the limit block until a
//! session is released, the pool is disposed, or their [`CancelCheck`]
//! fires.
//!
//! A [`ConnectionGuard`] shared between pools adds a process-wide ceiling
//! on top of the per-host limits.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hostpool::{ConnectionCountGuard, HostPool, PoolConfig};
//!
//! let guard = Arc::new(ConnectionCountGuard::default());
//! let pool = HostPool::builder(SvnConnector::new())
//!     .config(PoolConfig::with_limits(5, 20))
//!     .guard(guard)
//!     .build();
//!
//! let session = pool.acquire(&"svn://svn.example.com/repo/trunk".parse()?, true)?;
//! session.log("trunk")?;
//! pool.release(session);
//! ```

pub mod cancel;
pub mod clock;
pub mod error;
mod group;
pub mod guard;
mod idle;
pub mod maintenance;
mod pool;
pub mod session;
pub mod stats;

pub use cancel::{CancelCheck, CancellationFlag, NeverCancel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BoxError, PoolError, PoolResult};
pub use guard::{ConnectionCountGuard, ConnectionGuard, IdleShedder, Unbounded};
pub use maintenance::{Sweeper, MIN_SWEEP_INTERVAL};
pub use pool::{HostPool, HostPoolBuilder};
pub use session::{PooledSession, Session, SessionFactory};
pub use stats::{HostStats, PoolStats};

pub use hostpool_common::{HostKey, SessionId};
pub use hostpool_config::{GuardConfig, PoolConfig};
