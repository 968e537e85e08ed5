//! Single-drainer gate.
//!
//! Every producer, requester or canceller that has work for a drain loop
//! calls [`DrainGate::enter`]. The caller that moves the counter from zero
//! becomes the drainer; every other caller only records that work was
//! missed. Before leaving, the drainer subtracts the work it covered and
//! loops again if more arrived meanwhile, so no signal is ever lost and no
//! two threads ever drain at once.
//!
//! ```ignore
//! if !gate.enter() {
//!     return;
//! }
//! let mut missed = 1;
//! loop {
//!     drain_once();
//!     missed = gate.leave(missed);
//!     if missed == 0 {
//!         break;
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

/// Work-in-progress counter guarding a drain loop.
#[derive(Debug, Default)]
pub struct DrainGate {
    wip: AtomicUsize,
}

impl DrainGate {
    /// Creates an idle gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            wip: AtomicUsize::new(0),
        }
    }

    /// Registers work; returns true if the caller became the drainer.
    #[must_use]
    pub fn enter(&self) -> bool {
        self.wip.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Ends a pass that covered `missed` registrations.
    ///
    /// Returns the registrations that arrived during the pass; zero means
    /// the gate is idle again and the caller is no longer the drainer.
    #[must_use]
    pub fn leave(&self, missed: usize) -> usize {
        self.wip.fetch_sub(missed, Ordering::AcqRel) - missed
    }

    /// Runs `pass` until no work is left, if the caller becomes the drainer.
    pub fn drain(&self, pass: impl FnMut()) {
        if self.enter() {
            self.run(pass);
        }
    }

    /// Runs `pass` until no work is left. The caller must have become the
    /// drainer through [`DrainGate::enter`], possibly on another thread.
    pub fn run(&self, mut pass: impl FnMut()) {
        let mut missed = 1;
        loop {
            pass();
            missed = self.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }

    /// Returns true if nobody is draining.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.wip.load(Ordering::Acquire) == 0
    }
}
