//! Logging and assertion helpers shared by unit and integration tests.
//!
//! ```ignore
//! fn init_test(name: &str) {
//!     tributary::test_utils::init_test_logging();
//!     tributary::test_phase!(name);
//! }
//! ```

use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to `tributary=debug`.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tributary=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(false)
            .try_init();
    });
}

/// Logs the start of a named test phase.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!("=== TEST PHASE: {} ===", $name)
    };
}

/// Logs the successful end of a named test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        ::tracing::info!("=== TEST COMPLETE: {} ===", $name)
    };
}

/// Asserts a condition, logging expected and actual values on failure.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {{
        let ok: bool = $cond;
        if !ok {
            ::tracing::error!(
                "assertion failed: {} (expected {:?}, actual {:?})",
                $what,
                $expected,
                $actual
            );
        }
        assert!(
            ok,
            "{}: expected {:?}, actual {:?}",
            $what,
            $expected,
            $actual
        );
    }};
}
