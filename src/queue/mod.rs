//! Queues backing buffering operators.
//!
//! A [`SignalQueue`] is owned by exactly one operator instance. Bounded
//! queues are `crossbeam_queue::ArrayQueue`s sized to a power of two;
//! unbounded ones are `SegQueue`s. Both are multi-producer multi-consumer,
//! so a fused consumer polling and a cancelling drainer clearing at the
//! same time never hand out one element twice.

use crossbeam_queue::{ArrayQueue, SegQueue};

use crate::cx::Context;

/// Default prefetch/buffer size.
pub const SMALL_BUFFER_SIZE: usize = 256;

/// Small prefetch used by inner subscribers.
pub const XS_BUFFER_SIZE: usize = 32;

/// Capacity selection for a [`SignalQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
    /// [`SMALL_BUFFER_SIZE`] slots.
    Small,
    /// [`XS_BUFFER_SIZE`] slots.
    Xs,
    /// Grows without bound.
    Unbounded,
    /// At least this many slots, rounded up to a power of two.
    Bounded(usize),
}

impl QueueCapacity {
    /// Picks the capacity for a prefetch amount; `usize::MAX` means unbounded.
    #[must_use]
    pub const fn for_prefetch(prefetch: usize) -> Self {
        match prefetch {
            usize::MAX => Self::Unbounded,
            SMALL_BUFFER_SIZE => Self::Small,
            XS_BUFFER_SIZE => Self::Xs,
            n => Self::Bounded(n),
        }
    }

    /// Returns the slot count, `None` for unbounded.
    #[must_use]
    pub fn slots(self) -> Option<usize> {
        match self {
            Self::Small => Some(SMALL_BUFFER_SIZE),
            Self::Xs => Some(XS_BUFFER_SIZE),
            Self::Unbounded => None,
            Self::Bounded(n) => Some(n.max(1).next_power_of_two()),
        }
    }
}

enum Storage<T> {
    Bounded(ArrayQueue<T>),
    Unbounded(SegQueue<T>),
}

/// FIFO buffer of elements awaiting delivery.
pub struct SignalQueue<T> {
    storage: Storage<T>,
}

impl<T: Send + 'static> SignalQueue<T> {
    /// Creates a queue of the given capacity.
    #[must_use]
    pub fn new(capacity: QueueCapacity) -> Self {
        let storage = match capacity.slots() {
            Some(slots) => Storage::Bounded(ArrayQueue::new(slots)),
            None => Storage::Unbounded(SegQueue::new()),
        };
        Self { storage }
    }

    /// Enqueues `item`; on a full queue the element comes back to the caller,
    /// which must release it.
    pub fn offer(&self, item: T) -> Result<(), T> {
        match &self.storage {
            Storage::Bounded(queue) => queue.push(item),
            Storage::Unbounded(queue) => {
                queue.push(item);
                Ok(())
            }
        }
    }

    /// Dequeues the oldest element. Ownership transfers to the caller.
    pub fn poll(&self) -> Option<T> {
        match &self.storage {
            Storage::Bounded(queue) => queue.pop(),
            Storage::Unbounded(queue) => queue.pop(),
        }
    }

    /// Polls and releases every element; returns how many were released.
    ///
    /// Clearing an empty queue releases nothing.
    pub fn clear(&self, cx: &Context) -> usize {
        let mut released = 0;
        while let Some(item) = self.poll() {
            cx.discard(item);
            released += 1;
        }
        released
    }

    /// Returns true if no element is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.storage {
            Storage::Bounded(queue) => queue.is_empty(),
            Storage::Unbounded(queue) => queue.is_empty(),
        }
    }

    /// Advisory element count.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Bounded(queue) => queue.len(),
            Storage::Unbounded(queue) => queue.len(),
        }
    }

    /// Slot count, `None` for unbounded queues.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        match &self.storage {
            Storage::Bounded(queue) => Some(queue.capacity()),
            Storage::Unbounded(_) => None,
        }
    }
}

impl<T> std::fmt::Debug for SignalQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, len) = match &self.storage {
            Storage::Bounded(queue) => ("bounded", queue.len()),
            Storage::Unbounded(queue) => ("unbounded", queue.len()),
        };
        f.debug_struct("SignalQueue")
            .field("kind", &kind)
            .field("len", &len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn bounded_rounds_up_and_rejects_overflow() {
        init_test("bounded_rounds_up_and_rejects_overflow");
        let queue = SignalQueue::new(QueueCapacity::Bounded(3));
        crate::assert_with_log!(
            queue.capacity() == Some(4),
            "power of two",
            Some(4),
            queue.capacity()
        );
        for i in 0..4 {
            assert!(queue.offer(i).is_ok());
        }
        let rejected = queue.offer(99);
        crate::assert_with_log!(rejected == Err(99), "element returned", Err::<(), i32>(99), rejected);
        crate::test_complete!("bounded_rounds_up_and_rejects_overflow");
    }

    #[test]
    fn preserves_fifo_order() {
        init_test("preserves_fifo_order");
        let queue = SignalQueue::new(QueueCapacity::Unbounded);
        for i in 0..10 {
            assert!(queue.offer(i).is_ok());
        }
        let drained: Vec<_> = std::iter::from_fn(|| queue.poll()).collect();
        crate::assert_with_log!(
            drained == (0..10).collect::<Vec<_>>(),
            "fifo",
            "0..10",
            drained
        );
        crate::test_complete!("preserves_fifo_order");
    }

    #[test]
    fn clear_releases_each_element_once() {
        init_test("clear_releases_each_element_once");
        let released = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&released);
        let cx = Context::empty().on_discard(move |v: u32| sink.lock().push(v));
        let queue = SignalQueue::new(QueueCapacity::Xs);
        for i in 0..5u32 {
            assert!(queue.offer(i).is_ok());
        }
        let first = queue.clear(&cx);
        let second = queue.clear(&cx);
        crate::assert_with_log!(first == 5, "first clear", 5, first);
        crate::assert_with_log!(second == 0, "second clear releases nothing", 0, second);
        let released = released.lock().clone();
        crate::assert_with_log!(released == vec![0, 1, 2, 3, 4], "released", "[0..5]", released);
        crate::test_complete!("clear_releases_each_element_once");
    }

    #[test]
    fn capacity_presets() {
        init_test("capacity_presets");
        crate::assert_with_log!(
            QueueCapacity::for_prefetch(256) == QueueCapacity::Small,
            "small",
            QueueCapacity::Small,
            QueueCapacity::for_prefetch(256)
        );
        crate::assert_with_log!(
            QueueCapacity::for_prefetch(usize::MAX).slots().is_none(),
            "unbounded",
            None::<usize>,
            QueueCapacity::for_prefetch(usize::MAX).slots()
        );
        crate::test_complete!("capacity_presets");
    }
}
