//! Logging prelude module for convenient access to tracing macros.
//!
//! Re-exports the common tracing macros so engine modules can
//! `use crate::logging::*;` instead of importing each macro separately.

pub use tracing::{debug, error, info, trace, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// Logs at INFO level and above by default. Control the level with the
/// `RUST_LOG` environment variable:
///
/// ```bash
/// RUST_LOG=debug
/// RUST_LOG=nithronsync=trace
/// RUST_LOG=nithronsync::queue=debug,nithronsync::smartsync=trace
/// ```
pub fn init_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.init();
}

// vim: ts=4
