//! Tracing setup for test binaries that use leakwatch.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "LEAKWATCH_LOG";

static INIT: Once = Once::new();

/// Install a test-friendly subscriber once per process.
///
/// The filter comes from `$LEAKWATCH_LOG`, then `$RUST_LOG`, then `warn`.
/// Output goes through the test writer so it is captured per test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"));

        // The host binary may already have installed its own subscriber.
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer().with_ansi(false))
            .with(env_filter)
            .try_init();
    });
}
