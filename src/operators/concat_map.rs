//! `concat_map`: sequential fan-in.
//!
//! Upstream elements are prefetched (or pulled through fusion) and mapped
//! one at a time; the next inner is subscribed only after the active one
//! completed. The first error from either side cancels everything,
//! releases the prefetched upstream elements and the active inner's
//! buffer, then is signalled.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::inner::{InnerHandle, InnerParent, InnerSubscriber};
use super::{FlatMapFn, prefetch_request, replenish_limit};
use crate::config;
use crate::cx::Context;
use crate::error::{FluxError, Result};
use crate::flow::emitter::{Downstream, Emitter};
use crate::flow::{BoxSubscriber, Publisher, Subscriber, Subscription, SubscriptionSlot, Upstream};
use crate::queue::{QueueCapacity, SignalQueue};
use crate::sync::ErrorSlot;
use crate::types::{Demand, FusionMode, UNBOUNDED};

pub(crate) struct ConcatMapPublisher<T, R> {
    source: Arc<dyn Publisher<T>>,
    mapper: FlatMapFn<T, R>,
    prefetch: usize,
}

impl<T, R> ConcatMapPublisher<T, R> {
    pub(crate) fn new(source: Arc<dyn Publisher<T>>, mapper: FlatMapFn<T, R>, prefetch: usize) -> Self {
        Self {
            source,
            mapper,
            prefetch,
        }
    }
}

impl<T: Send + 'static, R: Send + 'static> Publisher<R> for ConcatMapPublisher<T, R> {
    fn subscribe(&self, subscriber: BoxSubscriber<R>) {
        let main = Arc::new_cyclic(|this| ConcatMapMain {
            this: this.clone(),
            emitter: Emitter::new(subscriber),
            upstream: SubscriptionSlot::new(),
            main_mode: AtomicU8::new(FusionMode::None.as_u8()),
            queue: SignalQueue::new(QueueCapacity::for_prefetch(self.prefetch)),
            consumed: AtomicU64::new(0),
            limit: replenish_limit(self.prefetch),
            mapper: Arc::clone(&self.mapper),
            prefetch: self.prefetch,
            requested: Demand::new(),
            cancelled: AtomicBool::new(false),
            bad_request: AtomicBool::new(false),
            done: AtomicBool::new(false),
            error: ErrorSlot::new(),
            active: Mutex::new(None),
            next_index: AtomicUsize::new(0),
        });
        main.emitter
            .start(Upstream::Plain(Arc::clone(&main) as Arc<dyn Subscription>));
        self.source.subscribe(Box::new(ConcatMapOuter { main }));
    }
}

struct ConcatMapMain<T, R> {
    this: Weak<Self>,
    emitter: Emitter<R>,
    upstream: SubscriptionSlot<T>,
    main_mode: AtomicU8,
    queue: SignalQueue<T>,
    consumed: AtomicU64,
    limit: u64,
    mapper: FlatMapFn<T, R>,
    prefetch: usize,
    requested: Demand,
    cancelled: AtomicBool,
    bad_request: AtomicBool,
    done: AtomicBool,
    error: ErrorSlot,
    active: Mutex<Option<Arc<InnerHandle<R>>>>,
    next_index: AtomicUsize,
}

impl<T: Send + 'static, R: Send + 'static> ConcatMapMain<T, R> {
    fn cx(&self) -> &Context {
        self.emitter.cx()
    }

    fn main_mode(&self) -> FusionMode {
        FusionMode::from_u8(self.main_mode.load(Ordering::Acquire))
    }

    fn drain(&self) {
        self.emitter.drain(|slot| self.pass(slot));
    }

    fn fail(&self, error: FluxError) {
        if let Err(error) = self.error.set(error) {
            config::error_dropped(&error);
        }
        self.upstream.cancel();
        self.drain();
    }

    fn poll_main(&self) -> Result<Option<T>> {
        match self.main_mode() {
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

    fn main_consumed(&self) {
        if self.main_mode() == FusionMode::Sync {
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

    fn release_all(&self) {
        let active = self.active.lock().take();
        if let Some(handle) = active {
            handle.cancel(self.cx());
        }
        match self.main_mode() {
            FusionMode::None | FusionMode::Any => {
                self.queue.clear(self.cx());
            }
            _ => {
                if let Some(queue) = self.upstream.get().and_then(Upstream::queue) {
                    queue.clear();
                }
            }
        }
    }

    fn subscribe_next(&self, item: T) {
        let Some(this) = self.this.upgrade() else {
            self.cx().discard(item);
            return;
        };
        let inner = (self.mapper)(item);
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(InnerHandle::new(index, self.prefetch));
        *self.active.lock() = Some(Arc::clone(&handle));
        let parent: Arc<dyn InnerParent<R>> = this;
        inner.subscribe(InnerSubscriber::new(parent, handle, self.cx()));
    }

    fn pass(&self, slot: &mut Option<Downstream<R>>) {
        loop {
            if slot.is_none() {
                self.release_all();
                return;
            }
            if self.cancelled.load(Ordering::Acquire) {
                slot.take();
                self.release_all();
                return;
            }
            if self.bad_request.load(Ordering::Acquire) {
                if let Err(error) = self.error.set(FluxError::bad_request()) {
                    config::error_dropped(&error);
                }
            }
            if let Some(error) = self.error.take() {
                self.cancelled.store(true, Ordering::Release);
                self.upstream.cancel();
                self.release_all();
                if let Some(downstream) = slot.take() {
                    downstream.error(error);
                }
                return;
            }

            let active = self.active.lock().clone();
            let Some(handle) = active else {
                let main_done = self.done.load(Ordering::Acquire);
                match self.poll_main() {
                    Ok(Some(item)) => {
                        self.main_consumed();
                        self.subscribe_next(item);
                        continue;
                    }
                    Ok(None) => {
                        let exhausted = self.main_mode() == FusionMode::Sync && self.done.load(Ordering::Acquire);
                        if main_done || exhausted {
                            if let Some(downstream) = slot.take() {
                                downstream.complete();
                            }
                        }
                        return;
                    }
                    Err(error) => {
                        if let Err(error) = self.error.set(error) {
                            config::error_dropped(&error);
                        }
                        continue;
                    }
                }
            };

            let requested = self.requested.get();
            let mut emitted = 0;
            let mut interrupted = false;
            while emitted != requested {
                if self.cancelled.load(Ordering::Acquire) || self.error.is_set() {
                    interrupted = true;
                    break;
                }
                match handle.poll() {
                    Ok(Some(item)) => {
                        handle.consumed();
                        if self.cancelled.load(Ordering::Acquire) {
                            self.cx().discard(item);
                            interrupted = true;
                            break;
                        }
                        if let Some(downstream) = slot.as_mut() {
                            if downstream.next(item) {
                                emitted += 1;
                            }
                        } else {
                            self.cx().discard(item);
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        if let Err(error) = self.error.set(error) {
                            config::error_dropped(&error);
                        }
                        interrupted = true;
                        break;
                    }
                }
            }
            if requested != UNBOUNDED {
                self.requested.produced(emitted);
            }
            if interrupted {
                continue;
            }
            if handle.is_done() && handle.is_empty() {
                self.active.lock().take();
                continue;
            }
            if emitted == 0 {
                return;
            }
        }
    }
}

impl<T: Send + 'static, R: Send + 'static> Subscription for ConcatMapMain<T, R> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.bad_request.store(true, Ordering::Release);
            self.upstream.cancel();
        } else {
            self.requested.add(n);
        }
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

impl<T: Send + 'static, R: Send + 'static> InnerParent<R> for ConcatMapMain<T, R> {
    fn drain(&self) {
        ConcatMapMain::drain(self);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn inner_error(&self, _index: usize, error: FluxError) {
        self.fail(error);
    }
}

struct ConcatMapOuter<T, R> {
    main: Arc<ConcatMapMain<T, R>>,
}

impl<T: Send + 'static, R: Send + 'static> Subscriber<T> for ConcatMapOuter<T, R> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        let granted = upstream
            .queue()
            .map_or(FusionMode::None, |queue| queue.request_fusion(FusionMode::Any));
        self.main.main_mode.store(granted.as_u8(), Ordering::Release);
        let installed = self.main.upstream.set(upstream);
        self.main.drain();
        if installed && granted != FusionMode::Sync {
            self.main.upstream.request(prefetch_request(self.main.prefetch));
        }
    }

    fn on_next(&mut self, item: T) {
        let main = &self.main;
        if main.cancelled.load(Ordering::Acquire) {
            main.cx().discard(item);
            return;
        }
        if let Err(item) = main.queue.offer(item) {
            main.cx().discard(item);
            main.fail(FluxError::queue_full());
            return;
        }
        if main.cancelled.load(Ordering::Acquire) {
            main.queue.clear(main.cx());
            return;
        }
        main.drain();
    }

    fn on_ready(&mut self) {
        self.main.drain();
    }

    fn on_error(&mut self, error: FluxError) {
        if self.main.done.swap(true, Ordering::AcqRel) {
            config::error_dropped(&error);
            return;
        }
        self.main.fail(error);
    }

    fn on_complete(&mut self) {
        self.main.done.store(true, Ordering::Release);
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
    use crate::types::UNBOUNDED;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn inners_are_emitted_in_order() {
        init_test("inners_are_emitted_in_order");
        let (subscriber, probe) = AssertSubscriber::new(UNBOUNDED);
        Flux::from_iter(vec![1, 2, 3])
            .concat_map(|i| Flux::from_iter(vec![i, i * 10]))
            .subscribe(subscriber);
        let values = probe.values();
        crate::assert_with_log!(values == vec![1, 10, 2, 20, 3, 30], "ordered", "[1, 10, 2, 20, 3, 30]", values);
        crate::assert_with_log!(probe.is_completed(), "completed", true, probe.is_completed());
        crate::test_complete!("inners_are_emitted_in_order");
    }

    #[test]
    fn next_inner_waits_for_active_one() {
        init_test("next_inner_waits_for_active_one");
        let first = TestPublisher::new();
        let second = TestPublisher::new();
        let inners = vec![first.flux(), second.flux()];
        let (subscriber, probe) = AssertSubscriber::new(UNBOUNDED);
        Flux::from_iter(vec![0usize, 1])
            .concat_map(move |i| inners[i].clone())
            .subscribe(subscriber);
        crate::assert_with_log!(first.was_subscribed(), "first active", true, first.was_subscribed());
        crate::assert_with_log!(!second.was_subscribed(), "second waiting", false, second.was_subscribed());
        first.next(1);
        first.complete();
        second.next(2);
        second.complete();
        crate::assert_with_log!(probe.values() == vec![1, 2], "values", "[1, 2]", probe.values());
        crate::assert_with_log!(probe.is_completed(), "completed", true, probe.is_completed());
        crate::test_complete!("next_inner_waits_for_active_one");
    }

    #[test]
    fn inner_error_releases_prefetched_upstream() {
        init_test("inner_error_releases_prefetched_upstream");
        let tracker = Tracker::new();
        let main = TestPublisher::new();
        let inner = TestPublisher::<Tracked>::new();
        let inner_flux = inner.flux();
        let (subscriber, probe) =
            AssertSubscriber::with_context(UNBOUNDED, Context::empty().on_discard(Tracked::release));
        main.flux()
            .hide()
            .concat_map(move |item: Tracked| {
                item.release();
                inner_flux.clone()
            })
            .subscribe(subscriber);
        for value in 0..4 {
            main.next(tracker.track(value));
        }
        inner.next(tracker.track(100));
        inner.error(FluxError::upstream("inner failed"));
        crate::assert_with_log!(main.is_cancelled(), "main cancelled", true, main.is_cancelled());
        crate::assert_with_log!(probe.error().is_some(), "errored", true, probe.error().is_some());
        probe.take_values().into_iter().for_each(Tracked::release);
        crate::assert_with_log!(tracker.released() == 5, "released", 5, tracker.released());
        crate::test_complete!("inner_error_releases_prefetched_upstream");
    }
}
