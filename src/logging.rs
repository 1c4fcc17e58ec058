//! Logging setup for binaries and tests
//!
//! The library only emits `tracing` events; installing a subscriber is up
//! to the host application. [`init_tracing`] is a convenience for the
//! common case: human-readable output on stderr filtered by `RUST_LOG`.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence; `default` applies when it is unset or
/// unparsable. Returns `false` if a global subscriber was already
/// installed (e.g. by another test), which is not an error.
pub fn init_tracing(default: LevelFilter) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}
