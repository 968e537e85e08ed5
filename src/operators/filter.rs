//! `filter`: keeps matching elements, releases the rest.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use super::PredicateFn;
use crate::config;
use crate::cx::Context;
use crate::error::{FluxError, Result};
use crate::flow::{BoxSubscriber, Publisher, QueueSubscription, Subscriber, Subscription, TryNext, Upstream};
use crate::types::FusionMode;

pub(crate) struct FilterPublisher<T> {
    source: Arc<dyn Publisher<T>>,
    predicate: PredicateFn<T>,
}

impl<T> FilterPublisher<T> {
    pub(crate) fn new(source: Arc<dyn Publisher<T>>, predicate: PredicateFn<T>) -> Self {
        Self { source, predicate }
    }
}

impl<T: Send + 'static> Publisher<T> for FilterPublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        let cx = subscriber.context();
        let conditional = subscriber.is_conditional();
        self.source.subscribe(Box::new(FilterSubscriber {
            actual: subscriber,
            conditional,
            predicate: Arc::clone(&self.predicate),
            upstream: None,
            done: false,
            cx,
        }));
    }
}

/// Always conditional: a dropped element does not consume upstream demand,
/// and plain upstreams get a replacement `request(1)` instead.
struct FilterSubscriber<T> {
    actual: BoxSubscriber<T>,
    conditional: bool,
    predicate: PredicateFn<T>,
    upstream: Option<Upstream<T>>,
    done: bool,
    cx: Context,
}

impl<T: Send + 'static> Subscriber<T> for FilterSubscriber<T> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        self.upstream = Some(upstream.clone());
        let downstream = match upstream {
            Upstream::Plain(subscription) => Upstream::Plain(subscription),
            Upstream::Fused(queue) => Upstream::Fused(Arc::new(FilterQueue {
                source: queue,
                predicate: Arc::clone(&self.predicate),
                mode: AtomicU8::new(FusionMode::None.as_u8()),
                cx: self.cx.clone(),
            })),
        };
        self.actual.on_subscribe(downstream);
    }

    fn on_next(&mut self, item: T) {
        if let TryNext::Dropped = self.try_on_next(item) {
            if let Some(upstream) = &self.upstream {
                upstream.request(1);
            }
        }
    }

    fn try_on_next(&mut self, item: T) -> TryNext<T> {
        if self.done {
            self.cx.discard(item);
            return TryNext::Dropped;
        }
        if !(self.predicate)(&item) {
            self.cx.discard(item);
            return TryNext::Dropped;
        }
        if !self.conditional {
            self.actual.on_next(item);
            return TryNext::Delivered;
        }
        match self.actual.try_on_next(item) {
            TryNext::Rejected(item) => {
                self.cx.discard(item);
                TryNext::Dropped
            }
            outcome => outcome,
        }
    }

    fn is_conditional(&self) -> bool {
        true
    }

    fn on_ready(&mut self) {
        self.actual.on_ready();
    }

    fn on_error(&mut self, error: FluxError) {
        if self.done {
            config::error_dropped(&error);
            return;
        }
        self.done = true;
        self.upstream = None;
        self.actual.on_error(error);
    }

    fn on_complete(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.upstream = None;
        self.actual.on_complete();
    }

    fn context(&self) -> Context {
        self.cx.clone()
    }
}

struct FilterQueue<T> {
    source: Arc<dyn QueueSubscription<T>>,
    predicate: PredicateFn<T>,
    mode: AtomicU8,
    cx: Context,
}

impl<T: Send + 'static> Subscription for FilterQueue<T> {
    fn request(&self, n: u64) {
        self.source.request(n);
    }

    fn cancel(&self) {
        self.source.cancel();
    }
}

impl<T: Send + 'static> QueueSubscription<T> for FilterQueue<T> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        let granted = self.source.request_fusion(requested);
        self.mode.store(granted.as_u8(), Ordering::Release);
        granted
    }

    fn poll(&self) -> Result<Option<T>> {
        let mut dropped = 0;
        let polled = loop {
            match self.source.poll() {
                Ok(Some(item)) if (self.predicate)(&item) => break Ok(Some(item)),
                Ok(Some(item)) => {
                    self.cx.discard(item);
                    dropped += 1;
                }
                other => break other,
            }
        };
        if dropped > 0 && FusionMode::from_u8(self.mode.load(Ordering::Acquire)) == FusionMode::Async {
            self.source.request(dropped);
        }
        polled
    }

    fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    fn size(&self) -> usize {
        self.source.size()
    }

    fn clear(&self) {
        self.source.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::cx::Context;
    use crate::flux::Flux;
    use crate::testing::{AssertSubscriber, TestPublisher, Tracked, Tracker};
    use crate::types::{FusionMode, UNBOUNDED};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn dropped_elements_are_released_and_replaced() {
        init_test("dropped_elements_are_released_and_replaced");
        let tracker = Tracker::new();
        let source = TestPublisher::new();
        let (subscriber, probe) =
            AssertSubscriber::with_context(2, Context::empty().on_discard(Tracked::release));
        source
            .flux()
            .hide()
            .filter(|item: &Tracked| item.value() % 2 == 0)
            .subscribe(subscriber);
        for value in 0..3 {
            source.next(tracker.track(value));
        }
        // The odd element was replaced by a fresh request(1).
        crate::assert_with_log!(source.requested() == 0, "demand used", 0, source.requested());
        crate::assert_with_log!(probe.value_count() == 2, "delivered", 2, probe.value_count());
        probe.take_values().into_iter().for_each(Tracked::release);
        crate::assert_with_log!(tracker.released() == 3, "released", 3, tracker.released());
        crate::test_complete!("dropped_elements_are_released_and_replaced");
    }

    #[test]
    fn conditional_path_skips_demand_accounting() {
        init_test("conditional_path_skips_demand_accounting");
        let (subscriber, probe) = AssertSubscriber::new(3);
        Flux::from_iter(0..10).filter(|i| i % 3 == 0).subscribe(subscriber);
        crate::assert_with_log!(probe.values() == vec![0, 3, 6], "values", "[0, 3, 6]", probe.values());
        probe.request(1);
        crate::assert_with_log!(probe.is_completed(), "completed", true, probe.is_completed());
        crate::test_complete!("conditional_path_skips_demand_accounting");
    }

    #[test]
    fn fused_poll_skips_non_matching() {
        init_test("fused_poll_skips_non_matching");
        let tracker = Tracker::new();
        let (subscriber, probe) = AssertSubscriber::builder()
            .request(UNBOUNDED)
            .fusion(FusionMode::Sync)
            .context(Context::empty().on_discard(Tracked::release))
            .build();
        Flux::from_iter_once(tracker.batch(6))
            .filter(|item: &Tracked| item.value() >= 3)
            .subscribe(subscriber);
        crate::assert_with_log!(probe.value_count() == 3, "delivered", 3, probe.value_count());
        probe.take_values().into_iter().for_each(Tracked::release);
        crate::assert_with_log!(tracker.released() == 6, "released", 6, tracker.released());
        crate::test_complete!("fused_poll_skips_non_matching");
    }
}
