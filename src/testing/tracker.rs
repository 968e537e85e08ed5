use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Counts {
    created: AtomicUsize,
    released: AtomicUsize,
    leaked: AtomicUsize,
}

/// Creates [`Tracked`] elements and counts what happens to them.
///
/// Clones share the counters.
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    counts: Arc<Counts>,
}

impl Tracker {
    /// Creates a tracker with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates one element carrying `value`.
    #[must_use]
    pub fn track(&self, value: u64) -> Tracked {
        self.counts.created.fetch_add(1, Ordering::SeqCst);
        Tracked {
            value,
            counts: Arc::clone(&self.counts),
            released: false,
        }
    }

    /// Creates `n` elements carrying `0..n`.
    #[must_use]
    pub fn batch(&self, n: usize) -> Vec<Tracked> {
        (0..n as u64).map(|value| self.track(value)).collect()
    }

    /// Elements created so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.counts.created.load(Ordering::SeqCst)
    }

    /// Elements released through [`Tracked::release`].
    #[must_use]
    pub fn released(&self) -> usize {
        self.counts.released.load(Ordering::SeqCst)
    }

    /// Elements dropped without being released.
    #[must_use]
    pub fn leaked(&self) -> usize {
        self.counts.leaked.load(Ordering::SeqCst)
    }

    /// Elements neither released nor dropped yet.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.created() - self.released() - self.leaked()
    }
}

/// A test element that must be released exactly once.
///
/// Dropping it without calling [`Tracked::release`] counts as a leak.
/// Ownership makes a double release impossible.
pub struct Tracked {
    value: u64,
    counts: Arc<Counts>,
    released: bool,
}

impl Tracked {
    /// The value given at creation.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Releases the element.
    pub fn release(mut self) {
        self.released = true;
        self.counts.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        if !self.released {
            self.counts.leaked.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tracked({})", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_releases_and_leaks() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("counts_releases_and_leaks");
        let tracker = Tracker::new();
        let mut batch = tracker.batch(3);
        let leaked = batch.pop();
        drop(leaked);
        batch.into_iter().for_each(Tracked::release);
        crate::assert_with_log!(tracker.created() == 3, "created", 3, tracker.created());
        crate::assert_with_log!(tracker.released() == 2, "released", 2, tracker.released());
        crate::assert_with_log!(tracker.leaked() == 1, "leaked", 1, tracker.leaked());
        crate::assert_with_log!(tracker.outstanding() == 0, "outstanding", 0, tracker.outstanding());
        crate::test_complete!("counts_releases_and_leaks");
    }
}
