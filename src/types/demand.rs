//! Demand accounting.
//!
//! Demand is a `u64` where [`UNBOUNDED`] (`u64::MAX`) stands for "∞".
//! Addition saturates at ∞ and an unbounded counter never decreases.

use std::sync::atomic::{AtomicU64, Ordering};

/// Demand value meaning "no limit".
pub const UNBOUNDED: u64 = u64::MAX;

/// Adds two demand values, saturating at [`UNBOUNDED`].
#[must_use]
pub const fn add_cap(a: u64, b: u64) -> u64 {
    a.saturating_add(b)
}

/// Returns true if `n` is a valid `request` amount.
#[must_use]
pub const fn is_valid_request(n: u64) -> bool {
    n > 0
}

/// Formats a demand value, rendering [`UNBOUNDED`] as `∞`.
#[must_use]
pub fn render(n: u64) -> String {
    if n == UNBOUNDED {
        "∞".to_owned()
    } else {
        n.to_string()
    }
}

/// Atomic outstanding-demand counter.
#[derive(Debug, Default)]
pub struct Demand {
    value: AtomicU64,
}

impl Demand {
    /// Creates a counter with no outstanding demand.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Returns the current outstanding demand.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Returns true once the counter reached [`UNBOUNDED`].
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.get() == UNBOUNDED
    }

    /// Adds `n` to the demand and returns the previous value.
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = add_cap(current, n);
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return previous,
                Err(actual) => current = actual,
            }
        }
    }

    /// Takes the whole outstanding amount, leaving zero.
    pub fn take(&self) -> u64 {
        self.value.swap(0, Ordering::AcqRel)
    }

    /// Subtracts `n` delivered elements and returns the remaining demand.
    ///
    /// An unbounded counter stays unbounded.
    pub fn produced(&self, n: u64) -> u64 {
        if n == 0 {
            return self.get();
        }
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = current.saturating_sub(n);
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn add_saturates_to_unbounded() {
        init_test("add_saturates_to_unbounded");
        let demand = Demand::new();
        demand.add(u64::MAX - 1);
        demand.add(5);
        crate::assert_with_log!(demand.is_unbounded(), "saturated", true, demand.get());
        crate::test_complete!("add_saturates_to_unbounded");
    }

    #[test]
    fn unbounded_never_decreases() {
        init_test("unbounded_never_decreases");
        let demand = Demand::new();
        demand.add(UNBOUNDED);
        let remaining = demand.produced(10);
        crate::assert_with_log!(remaining == UNBOUNDED, "still unbounded", UNBOUNDED, remaining);
        crate::test_complete!("unbounded_never_decreases");
    }

    #[test]
    fn produced_subtracts() {
        init_test("produced_subtracts");
        let demand = Demand::new();
        let previous = demand.add(3);
        crate::assert_with_log!(previous == 0, "previous", 0, previous);
        let remaining = demand.produced(2);
        crate::assert_with_log!(remaining == 1, "remaining", 1, remaining);
        crate::test_complete!("produced_subtracts");
    }

    #[test]
    fn render_uses_infinity_sign() {
        init_test("render_uses_infinity_sign");
        crate::assert_with_log!(render(UNBOUNDED) == "∞", "inf", "∞", render(UNBOUNDED));
        crate::assert_with_log!(render(32) == "32", "finite", "32", render(32));
        crate::assert_with_log!(!is_valid_request(0), "zero invalid", false, is_valid_request(0));
        crate::test_complete!("render_uses_infinity_sign");
    }
}
