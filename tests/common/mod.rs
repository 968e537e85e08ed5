//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, const_mutex};
use tributary::Hooks;
use tributary::testing::CaptureReporter;

pub use tributary::test_utils::init_test_logging;
pub use tributary::{assert_with_log, test_complete, test_phase};

static HOOKS: Mutex<()> = const_mutex(());

/// Exclusive access to the global hooks for one test.
///
/// Resets every hook on entry and again on drop.
pub struct HooksGuard {
    pub reporter: Arc<CaptureReporter>,
    _lock: MutexGuard<'static, ()>,
}

impl Drop for HooksGuard {
    fn drop(&mut self) {
        Hooks::reset_all();
    }
}

/// Takes the hooks lock and installs a capturing stats reporter.
pub fn capture_stats() -> HooksGuard {
    let lock = HOOKS.lock();
    Hooks::reset_all();
    let reporter = Arc::new(CaptureReporter::new());
    Hooks::set_stats_reporter(Arc::clone(&reporter) as Arc<dyn tributary::StatsReporter>);
    HooksGuard {
        reporter,
        _lock: lock,
    }
}

/// Takes the hooks lock without changing anything but a reset.
pub fn exclusive_hooks() -> MutexGuard<'static, ()> {
    let lock = HOOKS.lock();
    Hooks::reset_all();
    lock
}

pub fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}
