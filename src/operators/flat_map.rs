//! `flat_map` and `merge`: concurrent fan-in of inner publishers.
//!
//! The main subscriber maps every upstream element to an inner publisher
//! and subscribes to it right away, up to `max_concurrency` inners at a
//! time. Inners prefetch into their own queues (or fuse); the drain loop
//! moves elements from the inners to the downstream subscriber within its
//! demand. Errors are immediate: the first one cancels the upstream and
//! every inner, releases everything buffered, then is signalled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use slab::Slab;

use super::FlatMapFn;
use super::inner::{InnerHandle, InnerParent, InnerSubscriber};
use crate::config;
use crate::cx::Context;
use crate::error::FluxError;
use crate::flow::emitter::{Downstream, Emitter};
use crate::flow::{BoxSubscriber, CancelledSubscriber, Publisher, Subscriber, Subscription, SubscriptionSlot, Upstream};
use crate::sync::ErrorSlot;
use crate::tracing_compat::{debug, warn};
use crate::types::{Demand, UNBOUNDED};

pub(crate) struct FlatMapPublisher<T, R> {
    source: Arc<dyn Publisher<T>>,
    mapper: FlatMapFn<T, R>,
    max_concurrency: usize,
    prefetch: usize,
}

impl<T, R> FlatMapPublisher<T, R> {
    pub(crate) fn new(
        source: Arc<dyn Publisher<T>>,
        mapper: FlatMapFn<T, R>,
        max_concurrency: usize,
        prefetch: usize,
    ) -> Self {
        Self {
            source,
            mapper,
            max_concurrency,
            prefetch,
        }
    }
}

impl<T: Send + 'static, R: Send + 'static> Publisher<R> for FlatMapPublisher<T, R> {
    fn subscribe(&self, subscriber: BoxSubscriber<R>) {
        let main = Arc::new(FlatMapMain {
            emitter: Emitter::new(subscriber),
            upstream: SubscriptionSlot::new(),
            mapper: Arc::clone(&self.mapper),
            max_concurrency: self.max_concurrency,
            prefetch: self.prefetch,
            requested: Demand::new(),
            cancelled: AtomicBool::new(false),
            bad_request: AtomicBool::new(false),
            done: AtomicBool::new(false),
            error: ErrorSlot::new(),
            inners: Mutex::new(Slab::new()),
            next_index: AtomicUsize::new(0),
        });
        main.emitter
            .start(Upstream::Plain(Arc::clone(&main) as Arc<dyn Subscription>));
        self.source.subscribe(Box::new(FlatMapOuter { main }));
    }
}

struct FlatMapMain<T, R> {
    emitter: Emitter<R>,
    upstream: SubscriptionSlot<T>,
    mapper: FlatMapFn<T, R>,
    max_concurrency: usize,
    prefetch: usize,
    requested: Demand,
    cancelled: AtomicBool,
    bad_request: AtomicBool,
    done: AtomicBool,
    error: ErrorSlot,
    inners: Mutex<Slab<Arc<InnerHandle<R>>>>,
    next_index: AtomicUsize,
}

impl<T: Send + 'static, R: Send + 'static> FlatMapMain<T, R> {
    fn cx(&self) -> &Context {
        self.emitter.cx()
    }

    fn drain(&self) {
        self.emitter.drain(|slot| self.pass(slot));
    }

    fn on_next(self: &Arc<Self>, item: T) {
        if self.cancelled.load(Ordering::Acquire) || self.done.load(Ordering::Acquire) {
            self.cx().discard(item);
            return;
        }
        let inner = (self.mapper)(item);
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(InnerHandle::new(index, self.prefetch));
        let admitted = {
            let mut inners = self.inners.lock();
            if inners.len() < self.max_concurrency {
                inners.insert(Arc::clone(&handle));
                true
            } else {
                false
            }
        };
        if !admitted {
            warn!("flatMap upstream ignored backpressure (max concurrency {})", self.max_concurrency);
            inner.subscribe(CancelledSubscriber::new(self.cx().clone()));
            self.fail(FluxError::overflow(
                "flatMap received more inners than its concurrency allows",
            ));
            return;
        }
        if self.cancelled.load(Ordering::Acquire) {
            // The inner releases whatever it emits; the next pass drops it.
            handle.cancel(self.cx());
            inner.subscribe(CancelledSubscriber::new(self.cx().clone()));
            self.drain();
            return;
        }
        let parent: Arc<dyn InnerParent<R>> = Arc::clone(self) as Arc<dyn InnerParent<R>>;
        inner.subscribe(InnerSubscriber::new(parent, handle, self.cx()));
    }

    fn fail(&self, error: FluxError) {
        if let Err(error) = self.error.set(error) {
            config::error_dropped(&error);
        }
        self.upstream.cancel();
        self.drain();
    }

    fn release_all(&self) {
        let handles: Vec<_> = self.inners.lock().drain().collect();
        for handle in handles {
            handle.cancel(self.cx());
        }
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

            let main_done = self.done.load(Ordering::Acquire);
            let handles: Vec<(usize, Arc<InnerHandle<R>>)> = self
                .inners
                .lock()
                .iter()
                .map(|(key, handle)| (key, Arc::clone(handle)))
                .collect();
            if main_done && handles.is_empty() {
                if let Some(downstream) = slot.take() {
                    downstream.complete();
                }
                return;
            }

            let requested = self.requested.get();
            let mut emitted = 0;
            let mut finished = 0;
            'inners: for (key, handle) in handles {
                while emitted != requested {
                    if self.cancelled.load(Ordering::Acquire) || self.error.is_set() {
                        break 'inners;
                    }
                    match handle.poll() {
                        Ok(Some(item)) => {
                            handle.consumed();
                            if self.cancelled.load(Ordering::Acquire) {
                                self.cx().discard(item);
                                break 'inners;
                            }
                            let Some(downstream) = slot.as_mut() else {
                                self.cx().discard(item);
                                break 'inners;
                            };
                            if downstream.next(item) {
                                emitted += 1;
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            debug!("flatMap inner {} failed on poll", handle.index());
                            if let Err(error) = self.error.set(error) {
                                config::error_dropped(&error);
                            }
                            break 'inners;
                        }
                    }
                }
                if handle.is_done() && handle.is_empty() {
                    self.inners.lock().try_remove(key);
                    finished += 1;
                }
            }

            if requested != UNBOUNDED {
                self.requested.produced(emitted);
            }
            if finished > 0 && !main_done {
                self.upstream.request(finished);
            }
            if emitted == 0
                && finished == 0
                && !self.error.is_set()
                && !self.cancelled.load(Ordering::Acquire)
            {
                return;
            }
        }
    }
}

impl<T: Send + 'static, R: Send + 'static> Subscription for FlatMapMain<T, R> {
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

impl<T: Send + 'static, R: Send + 'static> InnerParent<R> for FlatMapMain<T, R> {
    fn drain(&self) {
        FlatMapMain::drain(self);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn inner_error(&self, _index: usize, error: FluxError) {
        self.fail(error);
    }
}

/// Subscribed to the main upstream.
struct FlatMapOuter<T, R> {
    main: Arc<FlatMapMain<T, R>>,
}

impl<T: Send + 'static, R: Send + 'static> Subscriber<T> for FlatMapOuter<T, R> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        let installed = self.main.upstream.set(upstream);
        self.main.drain();
        if installed {
            let initial = if self.main.max_concurrency == usize::MAX {
                UNBOUNDED
            } else {
                self.main.max_concurrency as u64
            };
            self.main.upstream.request(initial);
        }
    }

    fn on_next(&mut self, item: T) {
        self.main.on_next(item);
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
