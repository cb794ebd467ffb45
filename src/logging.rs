//! Structured logging setup.
//!
//! The core emits `tracing` events at every mutation entry point; embedding
//! services install their own subscriber. [`init`] is a convenience for
//! binaries and tests: env-filtered, compact output on stderr.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global subscriber honouring `RUST_LOG` (default `info`).
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
