//! Logging bootstrap shared by the binary and the test suites.

use tracing_subscriber::EnvFilter;

/// Options controlling the installed subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Default to `debug` instead of `info` when `RUST_LOG` is unset
    pub verbose: bool,
    /// Emit newline-delimited JSON instead of human-readable lines
    pub json: bool,
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the verbosity flag. Calling this more
/// than once is harmless; later calls leave the first subscriber in place
/// and return `false`.
pub fn init_logging(options: LogOptions) -> bool {
    let log_level = if options.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let installed = if options.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_target(false)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::debug!(verbose = options.verbose, json = options.json, "Logging initialized");
    }
    installed
}

/// Install a test subscriber writing through the libtest capture.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
