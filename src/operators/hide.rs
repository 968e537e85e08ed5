//! `hide`: masks fusion and conditional delivery.

use std::sync::Arc;

use crate::cx::Context;
use crate::error::FluxError;
use crate::flow::{BoxSubscriber, Publisher, Subscriber, Upstream};

pub(crate) struct HidePublisher<T> {
    source: Arc<dyn Publisher<T>>,
}

impl<T> HidePublisher<T> {
    pub(crate) fn new(source: Arc<dyn Publisher<T>>) -> Self {
        Self { source }
    }
}

impl<T: Send + 'static> Publisher<T> for HidePublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        self.source.subscribe(Box::new(HideSubscriber { actual: subscriber }));
    }
}

struct HideSubscriber<T> {
    actual: BoxSubscriber<T>,
}

impl<T: Send + 'static> Subscriber<T> for HideSubscriber<T> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        self.actual.on_subscribe(Upstream::Plain(upstream.into_plain()));
    }

    fn on_next(&mut self, item: T) {
        self.actual.on_next(item);
    }

    fn on_error(&mut self, error: FluxError) {
        self.actual.on_error(error);
    }

    fn on_complete(&mut self) {
        self.actual.on_complete();
    }

    fn context(&self) -> Context {
        self.actual.context()
    }
}

#[cfg(test)]
mod tests {
    use crate::flux::Flux;
    use crate::testing::AssertSubscriber;
    use crate::types::{FusionMode, UNBOUNDED};

    #[test]
    fn hides_fusion() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("hides_fusion");
        let (subscriber, probe) = AssertSubscriber::fused(UNBOUNDED, FusionMode::Any);
        Flux::from_iter(vec![1, 2]).hide().subscribe(subscriber);
        crate::assert_with_log!(
            probe.fusion_mode() == FusionMode::None,
            "not fused",
            FusionMode::None,
            probe.fusion_mode()
        );
        crate::assert_with_log!(probe.values() == vec![1, 2], "values", "[1, 2]", probe.values());
        crate::test_complete!("hides_fusion");
    }
}
