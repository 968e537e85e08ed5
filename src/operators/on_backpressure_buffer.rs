//! `on_backpressure_buffer`: requests everything, buffers what downstream
//! has not asked for yet.
//!
//! Errors are eager: an upstream error (or an overflow of a bounded
//! buffer) releases the buffered elements, then is signalled. The buffer
//! can be drained by an `Async`-fused consumer directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::config;
use crate::cx::Context;
use crate::error::{FluxError, Result};
use crate::flow::emitter::{Downstream, Emitter};
use crate::flow::{BoxSubscriber, Publisher, QueueSubscription, Subscriber, Subscription, SubscriptionSlot, Upstream};
use crate::queue::{QueueCapacity, SignalQueue};
use crate::sync::ErrorSlot;
use crate::tracing_compat::debug;
use crate::types::{Demand, FusionMode, UNBOUNDED};

pub(crate) struct BufferPublisher<T> {
    source: Arc<dyn Publisher<T>>,
    capacity: Option<usize>,
}

impl<T> BufferPublisher<T> {
    /// `None` buffers without bound.
    pub(crate) fn new(source: Arc<dyn Publisher<T>>, capacity: Option<usize>) -> Self {
        Self { source, capacity }
    }
}

impl<T: Send + 'static> Publisher<T> for BufferPublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        let capacity = self
            .capacity
            .map_or(QueueCapacity::Unbounded, QueueCapacity::Bounded);
        let main = Arc::new(BufferMain {
            emitter: Emitter::new(subscriber),
            upstream: SubscriptionSlot::new(),
            queue: SignalQueue::new(capacity),
            limit: self.capacity,
            requested: Demand::new(),
            output_mode: AtomicU8::new(FusionMode::None.as_u8()),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            error: ErrorSlot::new(),
        });
        main.emitter
            .start(Upstream::Fused(Arc::clone(&main) as Arc<dyn QueueSubscription<T>>));
        self.source.subscribe(Box::new(BufferOuter { main }));
    }
}

struct BufferMain<T> {
    emitter: Emitter<T>,
    upstream: SubscriptionSlot<T>,
    queue: SignalQueue<T>,
    /// Requested capacity; the queue itself may round it up.
    limit: Option<usize>,
    requested: Demand,
    output_mode: AtomicU8,
    cancelled: AtomicBool,
    done: AtomicBool,
    error: ErrorSlot,
}

impl<T: Send + 'static> BufferMain<T> {
    fn cx(&self) -> &Context {
        self.emitter.cx()
    }

    fn drain(&self) {
        self.emitter.drain(|slot| self.pass(slot));
    }

    fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.queue.len() >= limit)
    }

    fn pass(&self, slot: &mut Option<Downstream<T>>) {
        loop {
            if slot.is_none() {
                self.queue.clear(self.cx());
                return;
            }
            if self.cancelled.load(Ordering::Acquire) {
                slot.take();
                let released = self.queue.clear(self.cx());
                debug!("onBackpressureBuffer cancelled, released {} buffered elements", released);
                return;
            }
            if let Some(error) = self.error.take() {
                self.cancelled.store(true, Ordering::Release);
                self.queue.clear(self.cx());
                if let Some(downstream) = slot.take() {
                    downstream.error(error);
                }
                return;
            }

            if FusionMode::from_u8(self.output_mode.load(Ordering::Acquire)) == FusionMode::Async {
                let done = self.done.load(Ordering::Acquire);
                if let Some(downstream) = slot.as_mut() {
                    downstream.ready();
                }
                if done {
                    if let Some(downstream) = slot.take() {
                        downstream.complete();
                    }
                }
                return;
            }

            let requested = self.requested.get();
            let mut emitted = 0;
            while emitted != requested {
                if self.cancelled.load(Ordering::Acquire) {
                    break;
                }
                let Some(item) = self.queue.poll() else {
                    break;
                };
                if let Some(downstream) = slot.as_mut() {
                    if downstream.next(item) {
                        emitted += 1;
                    }
                } else {
                    self.cx().discard(item);
                }
            }
            if requested != UNBOUNDED {
                self.requested.produced(emitted);
            }
            if self.done.load(Ordering::Acquire) && self.queue.is_empty() && !self.error.is_set() {
                if let Some(downstream) = slot.take() {
                    downstream.complete();
                }
                return;
            }
            if emitted == 0 {
                return;
            }
        }
    }
}

impl<T: Send + 'static> Subscription for BufferMain<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            // Answered by the source.
            self.upstream.request(n);
            return;
        }
        self.requested.add(n);
        self.drain();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.upstream.cancel();
        self.drain();
    }
}

impl<T: Send + 'static> QueueSubscription<T> for BufferMain<T> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        if requested.admits(FusionMode::Async) {
            self.output_mode.store(FusionMode::Async.as_u8(), Ordering::Release);
            return FusionMode::Async;
        }
        FusionMode::None
    }

    fn poll(&self) -> Result<Option<T>> {
        Ok(self.queue.poll())
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn size(&self) -> usize {
        self.queue.len()
    }

    fn clear(&self) {
        self.queue.clear(self.cx());
    }
}

struct BufferOuter<T> {
    main: Arc<BufferMain<T>>,
}

impl<T: Send + 'static> Subscriber<T> for BufferOuter<T> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        let installed = self.main.upstream.set(upstream);
        self.main.drain();
        if installed {
            self.main.upstream.request(UNBOUNDED);
        }
    }

    fn on_next(&mut self, item: T) {
        let main = &self.main;
        if main.cancelled.load(Ordering::Acquire) || main.done.load(Ordering::Acquire) {
            main.cx().discard(item);
            return;
        }
        let offered = if main.is_full() { Err(item) } else { main.queue.offer(item) };
        if let Err(item) = offered {
            main.cx().discard(item);
            main.done.store(true, Ordering::Release);
            if let Err(error) = main.error.set(FluxError::overflow(
                "onBackpressureBuffer capacity exceeded",
            )) {
                config::error_dropped(&error);
            }
            main.upstream.cancel();
            main.drain();
            return;
        }
        if main.cancelled.load(Ordering::Acquire) {
            main.queue.clear(main.cx());
            return;
        }
        main.drain();
    }

    fn on_error(&mut self, error: FluxError) {
        if self.main.done.swap(true, Ordering::AcqRel) {
            config::error_dropped(&error);
            return;
        }
        if let Err(error) = self.main.error.set(error) {
            config::error_dropped(&error);
        }
        self.main.drain();
    }

    fn on_complete(&mut self) {
        if self.main.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.main.drain();
    }

    fn context(&self) -> Context {
        self.main.cx().clone()
    }
}

#[cfg(test)]
mod tests {
    use crate::cx::Context;
    use crate::error::FluxError;
    use crate::flux::Flux;
    use crate::testing::{AssertSubscriber, TestPublisher, Tracked, Tracker};
    use crate::types::{FusionMode, UNBOUNDED};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn buffers_until_requested() {
        init_test("buffers_until_requested");
        let source = TestPublisher::new();
        let (subscriber, probe) = AssertSubscriber::new(0);
        source.flux().on_backpressure_buffer().subscribe(subscriber);
        crate::assert_with_log!(source.requested() == UNBOUNDED, "unbounded", "∞", source.requested());
        for value in 0..5 {
            source.next(value);
        }
        source.complete();
        probe.request(2);
        crate::assert_with_log!(probe.values() == vec![0, 1], "two", "[0, 1]", probe.values());
        crate::assert_with_log!(!probe.is_completed(), "pending", false, probe.is_completed());
        probe.request(3);
        crate::assert_with_log!(probe.value_count() == 5, "all", 5, probe.value_count());
        crate::assert_with_log!(probe.is_completed(), "completed", true, probe.is_completed());
        crate::test_complete!("buffers_until_requested");
    }

    #[test]
    fn cancel_without_demand_releases_buffer() {
        init_test("cancel_without_demand_releases_buffer");
        let tracker = Tracker::new();
        let source = TestPublisher::new();
        let (subscriber, probe) =
            AssertSubscriber::with_context(0, Context::empty().on_discard(Tracked::release));
        source.flux().on_backpressure_buffer().subscribe(subscriber);
        for value in 0..7 {
            source.next(tracker.track(value));
        }
        probe.cancel();
        probe.cancel();
        crate::assert_with_log!(tracker.released() == 7, "released", 7, tracker.released());
        crate::assert_with_log!(tracker.leaked() == 0, "no leaks", 0, tracker.leaked());
        crate::test_complete!("cancel_without_demand_releases_buffer");
    }

    #[test]
    fn error_releases_then_signals() {
        init_test("error_releases_then_signals");
        let tracker = Tracker::new();
        let source = TestPublisher::new();
        let (subscriber, probe) =
            AssertSubscriber::with_context(1, Context::empty().on_discard(Tracked::release));
        source.flux().on_backpressure_buffer().subscribe(subscriber);
        for value in 0..3 {
            source.next(tracker.track(value));
        }
        source.error(FluxError::upstream("late failure"));
        crate::assert_with_log!(probe.error().is_some(), "errored", true, probe.error().is_some());
        probe.take_values().into_iter().for_each(Tracked::release);
        crate::assert_with_log!(tracker.released() == 3, "released", 3, tracker.released());
        crate::test_complete!("error_releases_then_signals");
    }

    #[test]
    fn bounded_buffer_overflows() {
        init_test("bounded_buffer_overflows");
        let tracker = Tracker::new();
        let source = TestPublisher::new();
        let (subscriber, probe) =
            AssertSubscriber::with_context(0, Context::empty().on_discard(Tracked::release));
        source.flux().on_backpressure_buffer_with(2).subscribe(subscriber);
        for value in 0..3 {
            source.next(tracker.track(value));
        }
        let kind = probe.error().map(|e| e.kind());
        crate::assert_with_log!(kind == Some(crate::ErrorKind::Overflow), "overflow", "Overflow", kind);
        crate::assert_with_log!(source.is_cancelled(), "upstream cancelled", true, source.is_cancelled());
        crate::assert_with_log!(tracker.released() == 3, "released", 3, tracker.released());
        crate::test_complete!("bounded_buffer_overflows");
    }

    #[test]
    fn async_fused_consumer_drains_buffer() {
        init_test("async_fused_consumer_drains_buffer");
        let (subscriber, probe) = AssertSubscriber::fused(UNBOUNDED, FusionMode::Async);
        Flux::from_iter(vec![1, 2, 3])
            .on_backpressure_buffer()
            .subscribe(subscriber);
        crate::assert_with_log!(
            probe.fusion_mode() == FusionMode::Async,
            "async",
            FusionMode::Async,
            probe.fusion_mode()
        );
        crate::assert_with_log!(probe.values() == vec![1, 2, 3], "values", "[1, 2, 3]", probe.values());
        crate::assert_with_log!(probe.is_completed(), "completed", true, probe.is_completed());
        crate::test_complete!("async_fused_consumer_drains_buffer");
    }
}
