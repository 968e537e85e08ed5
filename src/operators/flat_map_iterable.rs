//! `flat_map_iterable`: flattens an iterator per upstream element.
//!
//! The iterator being emitted is a scratch slot owned by the operator: on
//! cancel or error its remaining items are released together with the
//! prefetched upstream elements.

use std::iter::Peekable;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{IterFn, prefetch_request, replenish_limit};
use crate::config;
use crate::cx::Context;
use crate::error::{FluxError, Result};
use crate::flow::emitter::{Downstream, Emitter};
use crate::flow::{BoxSubscriber, Publisher, QueueSubscription, Subscriber, Subscription, SubscriptionSlot, Upstream};
use crate::queue::{QueueCapacity, SignalQueue};
use crate::sync::ErrorSlot;
use crate::types::{Demand, FusionMode};

type Current<R> = Peekable<Box<dyn Iterator<Item = R> + Send>>;

pub(crate) struct FlatMapIterablePublisher<T, R> {
    source: Arc<dyn Publisher<T>>,
    mapper: IterFn<T, R>,
    prefetch: usize,
}

impl<T, R> FlatMapIterablePublisher<T, R> {
    pub(crate) fn new(source: Arc<dyn Publisher<T>>, mapper: IterFn<T, R>, prefetch: usize) -> Self {
        Self {
            source,
            mapper,
            prefetch,
        }
    }
}

impl<T: Send + 'static, R: Send + 'static> Publisher<R> for FlatMapIterablePublisher<T, R> {
    fn subscribe(&self, subscriber: BoxSubscriber<R>) {
        let main = Arc::new(FlattenMain {
            emitter: Emitter::new(subscriber),
            upstream: SubscriptionSlot::new(),
            main_mode: AtomicU8::new(FusionMode::None.as_u8()),
            output_mode: AtomicU8::new(FusionMode::None.as_u8()),
            queue: SignalQueue::new(QueueCapacity::for_prefetch(self.prefetch)),
            consumed: AtomicU64::new(0),
            limit: replenish_limit(self.prefetch),
            mapper: Arc::clone(&self.mapper),
            prefetch: self.prefetch,
            current: Mutex::new(None),
            requested: Demand::new(),
            cancelled: AtomicBool::new(false),
            bad_request: AtomicBool::new(false),
            done: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            error: ErrorSlot::new(),
        });
        main.emitter
            .start(Upstream::Fused(Arc::clone(&main) as Arc<dyn QueueSubscription<R>>));
        self.source.subscribe(Box::new(FlattenOuter { main }));
    }
}

struct FlattenMain<T, R> {
    emitter: Emitter<R>,
    upstream: SubscriptionSlot<T>,
    main_mode: AtomicU8,
    output_mode: AtomicU8,
    queue: SignalQueue<T>,
    consumed: AtomicU64,
    limit: u64,
    mapper: IterFn<T, R>,
    prefetch: usize,
    current: Mutex<Option<Current<R>>>,
    requested: Demand,
    cancelled: AtomicBool,
    bad_request: AtomicBool,
    done: AtomicBool,
    /// A fused consumer saw the end.
    exhausted: AtomicBool,
    error: ErrorSlot,
}

impl<T: Send + 'static, R: Send + 'static> FlattenMain<T, R> {
    fn cx(&self) -> &Context {
        self.emitter.cx()
    }

    fn main_mode(&self) -> FusionMode {
        FusionMode::from_u8(self.main_mode.load(Ordering::Acquire))
    }

    fn drain(&self) {
        self.emitter.drain(|slot| self.pass(slot));
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

    /// Takes the next item of the current iterator; returns `None` and
    /// clears the slot when it ran dry.
    fn next_of_current(&self) -> Option<R> {
        let mut current = self.current.lock();
        let item = current.as_mut().and_then(Iterator::next);
        if item.is_none() {
            current.take();
        }
        item
    }

    fn current_is_dry(&self) -> bool {
        let mut current = self.current.lock();
        let dry = current.as_mut().is_none_or(|iter| iter.peek().is_none());
        if dry {
            current.take();
        }
        dry
    }

    fn release_all(&self) {
        let current = self.current.lock().take();
        if let Some(current) = current {
            self.cx().discard_remaining(current);
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

    fn pass(&self, slot: &mut Option<Downstream<R>>) {
        if FusionMode::from_u8(self.output_mode.load(Ordering::Acquire)) == FusionMode::Sync {
            if self.cancelled.load(Ordering::Acquire) {
                slot.take();
                self.release_all();
            } else if self.exhausted.load(Ordering::Acquire) {
                slot.take();
            }
            return;
        }

        let mut requested = self.requested.get();
        let mut emitted = 0;
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

            if self.current_is_dry() {
                let main_done = self.done.load(Ordering::Acquire);
                match self.poll_main() {
                    Ok(Some(item)) => {
                        self.main_consumed();
                        *self.current.lock() = Some((self.mapper)(item).peekable());
                        continue;
                    }
                    Ok(None) => {
                        let exhausted = self.main_mode() == FusionMode::Sync && self.done.load(Ordering::Acquire);
                        if main_done || exhausted {
                            if let Some(downstream) = slot.take() {
                                downstream.complete();
                            }
                        } else {
                            self.requested.produced(emitted);
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
            }

            if emitted == requested {
                requested = self.requested.produced(emitted);
                emitted = 0;
                if requested == 0 {
                    return;
                }
            }
            let Some(item) = self.next_of_current() else {
                continue;
            };
            if self.cancelled.load(Ordering::Acquire) {
                self.cx().discard(item);
                continue;
            }
            if let Some(downstream) = slot.as_mut() {
                if downstream.next(item) {
                    emitted += 1;
                }
            } else {
                self.cx().discard(item);
            }
        }
    }
}

impl<T: Send + 'static, R: Send + 'static> Subscription for FlattenMain<T, R> {
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

impl<T: Send + 'static, R: Send + 'static> QueueSubscription<R> for FlattenMain<T, R> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        if requested.admits(FusionMode::Sync) && self.main_mode() == FusionMode::Sync {
            self.output_mode.store(FusionMode::Sync.as_u8(), Ordering::Release);
            return FusionMode::Sync;
        }
        FusionMode::None
    }

    fn poll(&self) -> Result<Option<R>> {
        loop {
            if let Some(item) = self.next_of_current() {
                return Ok(Some(item));
            }
            match self.poll_main()? {
                Some(item) => *self.current.lock() = Some((self.mapper)(item).peekable()),
                None => {
                    if !self.exhausted.swap(true, Ordering::AcqRel) {
                        self.drain();
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.current_is_dry() && self.upstream.get().and_then(Upstream::queue).is_none_or(|queue| queue.is_empty())
    }

    fn size(&self) -> usize {
        self.current
            .lock()
            .as_ref()
            .map_or(0, |iter| iter.size_hint().0)
    }

    fn clear(&self) {
        self.release_all();
    }
}

struct FlattenOuter<T, R> {
    main: Arc<FlattenMain<T, R>>,
}

impl<T: Send + 'static, R: Send + 'static> Subscriber<T> for FlattenOuter<T, R> {
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
            if let Err(error) = main.error.set(FluxError::queue_full()) {
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

    fn on_ready(&mut self) {
        self.main.drain();
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
        self.main.done.store(true, Ordering::Release);
        self.main.drain();
    }

    fn context(&self) -> Context {
        self.main.cx().clone()
    }
}
