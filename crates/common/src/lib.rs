//! Shared building blocks for the hostpool workspace.
//!
//! - [`ids`]: identifier newtypes for sessions and hosts
//! - [`logging`]: `tracing` subscriber setup (requires the `runtime` feature)

pub mod ids;
#[cfg(feature = "runtime")]
pub mod logging;

pub use ids::{HostKey, SessionId};
#[cfg(feature = "runtime")]
pub use logging::{init_logging, init_test_logging, LogOptions};
