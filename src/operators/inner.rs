//! Inner subscriptions of the fan-in operators (`flat_map`, `merge`,
//! `concat_map`).
//!
//! Each inner publisher is subscribed with an [`InnerSubscriber`] that
//! negotiates fusion with it and otherwise prefetches into a private
//! [`SignalQueue`]. The parent drains the inner through its
//! [`InnerHandle`] and owns the handle for as long as the inner is active.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use super::{prefetch_request, replenish_limit};
use crate::cx::Context;
use crate::error::{FluxError, Result};
use crate::flow::{Subscriber, SubscriptionSlot, Upstream};
use crate::queue::{QueueCapacity, SignalQueue};
use crate::types::FusionMode;

/// What an inner reports to the operator that owns it.
pub(crate) trait InnerParent<R>: Send + Sync {
    /// Runs (or schedules) the parent's drain loop.
    fn drain(&self);

    /// Returns true once the parent was cancelled or terminated.
    fn is_cancelled(&self) -> bool;

    /// Reports an inner failure.
    fn inner_error(&self, index: usize, error: FluxError);
}

/// The parent's view of one inner subscription.
pub(crate) struct InnerHandle<R> {
    index: usize,
    upstream: SubscriptionSlot<R>,
    queue: SignalQueue<R>,
    mode: AtomicU8,
    done: AtomicBool,
    consumed: AtomicU64,
    prefetch: usize,
    limit: u64,
}

impl<R: Send + 'static> InnerHandle<R> {
    pub(crate) fn new(index: usize, prefetch: usize) -> Self {
        Self {
            index,
            upstream: SubscriptionSlot::new(),
            queue: SignalQueue::new(QueueCapacity::for_prefetch(prefetch)),
            mode: AtomicU8::new(FusionMode::None.as_u8()),
            done: AtomicBool::new(false),
            consumed: AtomicU64::new(0),
            prefetch,
            limit: replenish_limit(prefetch),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    fn mode(&self) -> FusionMode {
        FusionMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Returns true once the inner completed. Under `Sync` fusion that is
    /// only known after a poll returned `Ok(None)`.
    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Takes the next element, if one is ready.
    pub(crate) fn poll(&self) -> Result<Option<R>> {
        match self.mode() {
            FusionMode::None | FusionMode::Any => Ok(self.queue.poll()),
            mode => {
                let Some(queue) = self.upstream.get().and_then(Upstream::queue) else {
                    return Ok(None);
                };
                let polled = queue.poll();
                if mode == FusionMode::Sync && matches!(polled, Ok(None)) {
                    self.done.store(true, Ordering::Release);
                }
                polled
            }
        }
    }

    /// Returns true if nothing is ready.
    pub(crate) fn is_empty(&self) -> bool {
        match self.mode() {
            FusionMode::None | FusionMode::Any => self.queue.is_empty(),
            FusionMode::Sync => self.is_done(),
            FusionMode::Async => self
                .upstream
                .get()
                .and_then(Upstream::queue)
                .is_none_or(|queue| queue.is_empty()),
        }
    }

    /// Accounts for one element the parent took; replenishes the prefetch
    /// window once enough were taken.
    pub(crate) fn consumed(&self) {
        if self.mode() == FusionMode::Sync {
            return;
        }
        let consumed = self.consumed.load(Ordering::Relaxed) + 1;
        if consumed == self.limit {
            self.consumed.store(0, Ordering::Relaxed);
            self.upstream.request(consumed);
        } else {
            self.consumed.store(consumed, Ordering::Relaxed);
        }
    }

    /// Cancels the inner and releases everything it still holds.
    pub(crate) fn cancel(&self, cx: &Context) {
        self.upstream.cancel();
        self.clear(cx);
    }

    /// Releases every element ready to be polled.
    pub(crate) fn clear(&self, cx: &Context) {
        match self.mode() {
            FusionMode::None | FusionMode::Any => {
                self.queue.clear(cx);
            }
            _ => {
                if let Some(queue) = self.upstream.get().and_then(Upstream::queue) {
                    queue.clear();
                }
            }
        }
    }
}

/// Subscriber attached to one inner publisher.
pub(crate) struct InnerSubscriber<R> {
    parent: Arc<dyn InnerParent<R>>,
    handle: Arc<InnerHandle<R>>,
    cx: Context,
}

impl<R: Send + 'static> InnerSubscriber<R> {
    /// `cx` is the parent's downstream context; the inner sees it marked
    /// with the handle's index.
    pub(crate) fn new(parent: Arc<dyn InnerParent<R>>, handle: Arc<InnerHandle<R>>, cx: &Context) -> Self {
        let cx = cx.with_inner_index(handle.index);
        Self { parent, handle, cx }
    }
}

impl<R: Send + 'static> Subscriber<R> for InnerSubscriber<R> {
    fn on_subscribe(&mut self, upstream: Upstream<R>) {
        let granted = upstream
            .queue()
            .map_or(FusionMode::None, |queue| queue.request_fusion(FusionMode::Any));
        self.handle.mode.store(granted.as_u8(), Ordering::Release);
        if !self.handle.upstream.set(upstream) {
            return;
        }
        match granted {
            FusionMode::Sync => self.parent.drain(),
            _ => self.handle.upstream.request(prefetch_request(self.handle.prefetch)),
        }
    }

    fn on_next(&mut self, item: R) {
        if self.parent.is_cancelled() {
            self.cx.discard(item);
            return;
        }
        if let Err(item) = self.handle.queue.offer(item) {
            self.cx.discard(item);
            self.handle.upstream.cancel();
            self.parent.inner_error(self.handle.index, FluxError::queue_full());
            return;
        }
        if self.parent.is_cancelled() {
            // Lost the race with a cancelling drainer.
            self.handle.queue.clear(&self.cx);
            return;
        }
        self.parent.drain();
    }

    fn on_ready(&mut self) {
        self.parent.drain();
    }

    fn on_error(&mut self, error: FluxError) {
        self.handle.done.store(true, Ordering::Release);
        self.parent.inner_error(self.handle.index, error);
    }

    fn on_complete(&mut self) {
        self.handle.done.store(true, Ordering::Release);
        self.parent.drain();
    }

    fn context(&self) -> Context {
        self.cx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flux::Flux;
    use crate::testing::{TestPublisher, Tracked, Tracker};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Parent {
        cancelled: AtomicBool,
        drains: AtomicUsize,
        errors: AtomicUsize,
    }

    impl<R> InnerParent<R> for Parent {
        fn drain(&self) {
            self.drains.fetch_add(1, Ordering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }

        fn inner_error(&self, _index: usize, _error: FluxError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn sync_fused_inner_is_polled_directly() {
        init_test("sync_fused_inner_is_polled_directly");
        let parent = Arc::new(Parent::default());
        let handle = Arc::new(InnerHandle::new(0, 4));
        let subscriber = InnerSubscriber::new(parent.clone(), Arc::clone(&handle), &Context::empty());
        Flux::from_iter(vec![1, 2]).subscribe(subscriber);

        let mut values = Vec::new();
        while let Ok(Some(value)) = handle.poll() {
            values.push(value);
        }
        crate::assert_with_log!(values == vec![1, 2], "polled", "[1, 2]", values);
        crate::assert_with_log!(handle.is_done(), "done", true, handle.is_done());
        crate::test_complete!("sync_fused_inner_is_polled_directly");
    }

    #[test]
    fn queued_inner_replenishes_and_releases_on_cancel() {
        init_test("queued_inner_replenishes_and_releases_on_cancel");
        let tracker = Tracker::new();
        let cx = Context::empty().on_discard(Tracked::release);
        let parent = Arc::new(Parent::default());
        let handle = Arc::new(InnerHandle::new(1, 4));
        let source = TestPublisher::new();
        source
            .flux()
            .subscribe(InnerSubscriber::new(parent.clone(), Arc::clone(&handle), &cx));
        crate::assert_with_log!(source.requested() == 4, "prefetch", 4, source.requested());

        for value in 0..4 {
            source.next(tracker.track(value));
        }
        for _ in 0..3 {
            if let Ok(Some(item)) = handle.poll() {
                item.release();
            }
            handle.consumed();
        }
        crate::assert_with_log!(source.requested() == 3, "replenished", 3, source.requested());

        handle.cancel(&cx);
        crate::assert_with_log!(source.is_cancelled(), "cancelled", true, source.is_cancelled());
        crate::assert_with_log!(tracker.released() == 4, "released", 4, tracker.released());
        crate::test_complete!("queued_inner_replenishes_and_releases_on_cancel");
    }

    #[test]
    fn elements_after_parent_cancel_are_released() {
        init_test("elements_after_parent_cancel_are_released");
        let tracker = Tracker::new();
        let cx = Context::empty().on_discard(Tracked::release);
        let parent = Arc::new(Parent::default());
        let handle = Arc::new(InnerHandle::new(0, 2));
        let source = TestPublisher::new();
        source
            .flux()
            .subscribe(InnerSubscriber::new(parent.clone(), Arc::clone(&handle), &cx));
        parent.cancelled.store(true, Ordering::SeqCst);
        source.next(tracker.track(0));
        crate::assert_with_log!(tracker.released() == 1, "released", 1, tracker.released());
        crate::assert_with_log!(handle.is_empty(), "nothing queued", true, handle.is_empty());
        crate::test_complete!("elements_after_parent_cancel_are_released");
    }
}
