//! Iterator-backed and terminal sources.

use std::iter::Fuse;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::cx::Context;
use crate::error::{FluxError, Result};
use crate::flow::emitter::{Downstream, Emitter};
use crate::flow::{BoxSubscriber, EmptySubscription, Publisher, QueueSubscription, Subscription, Upstream};
use crate::tracing_compat::debug;
use crate::types::{Demand, FusionMode};

type IterBox<T> = Box<dyn Iterator<Item = T> + Send>;
type IterFactory<T> = Box<dyn Fn() -> Option<IterBox<T>> + Send + Sync>;

/// Emits the items of an iterator created per subscription.
pub(crate) struct IterPublisher<T> {
    factory: IterFactory<T>,
}

impl<T: Send + 'static> IterPublisher<T> {
    /// Every subscription iterates a fresh clone of `iterable`.
    pub(crate) fn repeatable<I>(iterable: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self {
            factory: Box::new(move || Some(Box::new(iterable.clone().into_iter()) as IterBox<T>)),
        }
    }

    /// Only the first subscription gets `iterable`.
    pub(crate) fn once<I>(iterable: I) -> Self
    where
        I: IntoIterator<Item = T> + Send + 'static,
        I::IntoIter: Send + 'static,
    {
        let slot = Mutex::new(Some(iterable));
        Self {
            factory: Box::new(move || {
                slot.lock()
                    .take()
                    .map(|iterable| Box::new(iterable.into_iter()) as IterBox<T>)
            }),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::repeatable(std::iter::empty::<T>())
    }
}

impl<T: Send + 'static> Publisher<T> for IterPublisher<T> {
    fn subscribe(&self, mut subscriber: BoxSubscriber<T>) {
        match (self.factory)() {
            Some(iter) => IterSubscription::subscribe(iter, subscriber),
            None => {
                debug!("single-use source subscribed again, completing empty");
                subscriber.on_subscribe(Upstream::plain(EmptySubscription));
                subscriber.on_complete();
            }
        }
    }
}

/// An iterator with one element of lookahead.
struct Lookahead<T> {
    iter: Fuse<IterBox<T>>,
    peeked: Option<T>,
}

impl<T: Send + 'static> Lookahead<T> {
    fn new(iter: IterBox<T>) -> Self {
        Self {
            iter: iter.fuse(),
            peeked: None,
        }
    }

    fn next(&mut self) -> Option<T> {
        self.peeked.take().or_else(|| self.iter.next())
    }

    fn is_exhausted(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.iter.next();
        }
        self.peeked.is_none()
    }

    fn lower_bound(&self) -> usize {
        usize::from(self.peeked.is_some()).saturating_add(self.iter.size_hint().0)
    }

    /// Releases the looked-ahead element, then whatever the iterator still
    /// holds if it is bounded.
    fn release(self, cx: &Context) {
        if let Some(item) = self.peeked {
            cx.discard(item);
        }
        cx.discard_remaining(self.iter);
    }
}

/// Per-subscription state of an [`IterPublisher`].
///
/// Supports `Sync` fusion: a fused consumer pulls items with `poll` and
/// `Ok(None)` means the iterator is exhausted.
struct IterSubscription<T> {
    emitter: Emitter<T>,
    iter: Mutex<Option<Lookahead<T>>>,
    requested: Demand,
    cancelled: AtomicBool,
    bad_request: AtomicBool,
    exhausted: AtomicBool,
    mode: AtomicU8,
}

impl<T: Send + 'static> IterSubscription<T> {
    fn subscribe(iter: IterBox<T>, subscriber: BoxSubscriber<T>) {
        let subscription = Arc::new(Self {
            emitter: Emitter::new(subscriber),
            iter: Mutex::new(Some(Lookahead::new(iter))),
            requested: Demand::new(),
            cancelled: AtomicBool::new(false),
            bad_request: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            mode: AtomicU8::new(FusionMode::None.as_u8()),
        });
        subscription
            .emitter
            .start(Upstream::Fused(Arc::clone(&subscription) as Arc<dyn QueueSubscription<T>>));
        subscription.drain();
    }

    fn drain(&self) {
        self.emitter.drain(|slot| self.pass(slot));
    }

    fn next_item(&self) -> Option<T> {
        self.iter.lock().as_mut().and_then(Lookahead::next)
    }

    fn is_exhausted(&self) -> bool {
        self.iter
            .lock()
            .as_mut()
            .is_none_or(Lookahead::is_exhausted)
    }

    fn release_remaining(&self) {
        let remaining = self.iter.lock().take();
        if let Some(remaining) = remaining {
            remaining.release(self.emitter.cx());
        }
    }

    fn pass(&self, slot: &mut Option<Downstream<T>>) {
        if slot.is_none() {
            return;
        }
        if self.cancelled.load(Ordering::Acquire) {
            slot.take();
            self.release_remaining();
            return;
        }
        if self.bad_request.load(Ordering::Acquire) {
            self.cancelled.store(true, Ordering::Release);
            self.release_remaining();
            if let Some(downstream) = slot.take() {
                downstream.error(FluxError::bad_request());
            }
            return;
        }
        if FusionMode::from_u8(self.mode.load(Ordering::Acquire)) == FusionMode::Sync {
            // The consumer pulls; only let go of it once it saw the end.
            if self.exhausted.load(Ordering::Acquire) {
                slot.take();
            }
            return;
        }
        if self.is_exhausted() {
            if let Some(downstream) = slot.take() {
                downstream.complete();
            }
            return;
        }

        let requested = self.requested.get();
        let mut emitted = 0;
        while emitted != requested {
            if self.cancelled.load(Ordering::Acquire) {
                slot.take();
                self.release_remaining();
                return;
            }
            let Some(item) = self.next_item() else {
                break;
            };
            let Some(downstream) = slot.as_mut() else {
                self.emitter.cx().discard(item);
                return;
            };
            if downstream.next(item) {
                emitted += 1;
            }
            if self.is_exhausted() {
                if let Some(downstream) = slot.take() {
                    downstream.complete();
                }
                return;
            }
        }
        self.requested.produced(emitted);
    }
}

impl<T: Send + 'static> Subscription for IterSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.bad_request.store(true, Ordering::Release);
        } else {
            self.requested.add(n);
        }
        self.drain();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.drain();
    }
}

impl<T: Send + 'static> QueueSubscription<T> for IterSubscription<T> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        if requested.admits(FusionMode::Sync) {
            self.mode.store(FusionMode::Sync.as_u8(), Ordering::Release);
            return FusionMode::Sync;
        }
        FusionMode::None
    }

    fn poll(&self) -> Result<Option<T>> {
        let item = self.next_item();
        if item.is_none() && !self.exhausted.swap(true, Ordering::AcqRel) {
            self.drain();
        }
        Ok(item)
    }

    fn is_empty(&self) -> bool {
        self.is_exhausted()
    }

    fn size(&self) -> usize {
        self.iter
            .lock()
            .as_ref()
            .map_or(0, Lookahead::lower_bound)
    }

    fn clear(&self) {
        self.release_remaining();
    }
}

/// Fails every subscriber with a clone of one error.
pub(crate) struct ErrorPublisher {
    error: FluxError,
}

impl ErrorPublisher {
    pub(crate) fn new(error: FluxError) -> Self {
        Self { error }
    }
}

impl<T: Send + 'static> Publisher<T> for ErrorPublisher {
    fn subscribe(&self, mut subscriber: BoxSubscriber<T>) {
        subscriber.on_subscribe(Upstream::plain(EmptySubscription));
        subscriber.on_error(self.error.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AssertSubscriber, Tracker};
    use crate::types::UNBOUNDED;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn emits_in_order_and_completes_eagerly() {
        init_test("emits_in_order_and_completes_eagerly");
        let publisher = IterPublisher::repeatable(vec![1, 2, 3]);
        let (subscriber, probe) = AssertSubscriber::new(0);
        publisher.subscribe(Box::new(subscriber));
        probe.request(2);
        crate::assert_with_log!(probe.values() == vec![1, 2], "first two", "[1, 2]", probe.values());
        crate::assert_with_log!(!probe.is_terminated(), "not done", false, probe.is_terminated());
        probe.request(1);
        // The last item completes the stream without further demand.
        crate::assert_with_log!(probe.is_completed(), "completed", true, probe.is_completed());
        crate::test_complete!("emits_in_order_and_completes_eagerly");
    }

    #[test]
    fn request_zero_is_a_protocol_error() {
        init_test("request_zero_is_a_protocol_error");
        let tracker = Tracker::new();
        let publisher = IterPublisher::once(tracker.batch(3));
        let (subscriber, probe) = AssertSubscriber::with_context(
            0,
            crate::cx::Context::empty().on_discard(crate::testing::Tracked::release),
        );
        publisher.subscribe(Box::new(subscriber));
        probe.request(0);
        let error = probe.error().map(|e| e.kind());
        crate::assert_with_log!(
            error == Some(crate::ErrorKind::ProtocolViolation),
            "protocol error",
            "ProtocolViolation",
            error
        );
        crate::assert_with_log!(tracker.released() == 3, "remaining released", 3, tracker.released());
        crate::test_complete!("request_zero_is_a_protocol_error");
    }

    #[test]
    fn cancel_releases_remaining_items() {
        init_test("cancel_releases_remaining_items");
        let tracker = Tracker::new();
        let publisher = IterPublisher::once(tracker.batch(5));
        let (subscriber, probe) = AssertSubscriber::with_context(
            0,
            crate::cx::Context::empty().on_discard(crate::testing::Tracked::release),
        );
        publisher.subscribe(Box::new(subscriber));
        probe.request(2);
        probe.cancel();
        probe.cancel();
        probe.take_values().into_iter().for_each(crate::testing::Tracked::release);
        crate::assert_with_log!(tracker.released() == 5, "all released", 5, tracker.released());
        crate::assert_with_log!(tracker.leaked() == 0, "no leaks", 0, tracker.leaked());
        crate::test_complete!("cancel_releases_remaining_items");
    }

    #[test]
    fn second_subscription_of_once_source_is_empty() {
        init_test("second_subscription_of_once_source_is_empty");
        let publisher = IterPublisher::once(vec![1]);
        let (first, first_probe) = AssertSubscriber::new(UNBOUNDED);
        publisher.subscribe(Box::new(first));
        let (second, second_probe) = AssertSubscriber::new(UNBOUNDED);
        publisher.subscribe(Box::new(second));
        crate::assert_with_log!(first_probe.values() == vec![1], "first sees the item", "[1]", first_probe.values());
        crate::assert_with_log!(first_probe.is_completed(), "first ok", true, first_probe.is_completed());
        crate::assert_with_log!(
            second_probe.is_completed() && second_probe.error().is_none(),
            "second completes",
            true,
            second_probe.error()
        );
        crate::assert_with_log!(second_probe.value_count() == 0, "second empty", 0, second_probe.value_count());
        crate::test_complete!("second_subscription_of_once_source_is_empty");
    }

    #[test]
    fn cancel_releases_the_looked_ahead_item_of_an_endless_iterator() {
        init_test("cancel_releases_the_looked_ahead_item_of_an_endless_iterator");
        let tracker = Tracker::new();
        let source_tracker = tracker.clone();
        let publisher = IterPublisher::once((0u64..).map(move |v| source_tracker.track(v)));
        let (subscriber, probe) = AssertSubscriber::with_context(
            0,
            crate::cx::Context::empty().on_discard(crate::testing::Tracked::release),
        );
        publisher.subscribe(Box::new(subscriber));
        probe.request(1);
        probe.cancel();
        probe.take_values().into_iter().for_each(crate::testing::Tracked::release);
        crate::assert_with_log!(tracker.created() == 2, "one emitted, one looked ahead", 2, tracker.created());
        crate::assert_with_log!(tracker.leaked() == 0, "no leaks", 0, tracker.leaked());
        crate::test_complete!("cancel_releases_the_looked_ahead_item_of_an_endless_iterator");
    }

    #[test]
    fn sync_fused_consumer_pulls() {
        init_test("sync_fused_consumer_pulls");
        let publisher = IterPublisher::repeatable(vec![7, 8]);
        let (subscriber, probe) = AssertSubscriber::fused(UNBOUNDED, FusionMode::Any);
        publisher.subscribe(Box::new(subscriber));
        crate::assert_with_log!(
            probe.fusion_mode() == FusionMode::Sync,
            "sync granted",
            FusionMode::Sync,
            probe.fusion_mode()
        );
        crate::assert_with_log!(probe.values() == vec![7, 8], "values", "[7, 8]", probe.values());
        crate::assert_with_log!(probe.is_completed(), "completed", true, probe.is_completed());
        crate::test_complete!("sync_fused_consumer_pulls");
    }
}
