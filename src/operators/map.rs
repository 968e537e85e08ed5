//! `map`: element-wise transformation.

use std::sync::Arc;

use super::MapFn;
use crate::config;
use crate::cx::Context;
use crate::error::{FluxError, Rejected, Result};
use crate::flow::{BoxSubscriber, Publisher, QueueSubscription, Subscriber, Subscription, TryNext, Upstream};
use crate::types::FusionMode;

pub(crate) struct MapPublisher<T, R> {
    source: Arc<dyn Publisher<T>>,
    mapper: MapFn<T, R>,
}

impl<T, R> MapPublisher<T, R> {
    pub(crate) fn new(source: Arc<dyn Publisher<T>>, mapper: MapFn<T, R>) -> Self {
        Self { source, mapper }
    }
}

impl<T: Send + 'static, R: Send + 'static> Publisher<R> for MapPublisher<T, R> {
    fn subscribe(&self, subscriber: BoxSubscriber<R>) {
        let cx = subscriber.context();
        let conditional = subscriber.is_conditional();
        self.source.subscribe(Box::new(MapSubscriber {
            actual: subscriber,
            conditional,
            mapper: Arc::clone(&self.mapper),
            upstream: None,
            done: false,
            cx,
        }));
    }
}

struct MapSubscriber<T, R> {
    actual: BoxSubscriber<R>,
    conditional: bool,
    mapper: MapFn<T, R>,
    upstream: Option<Upstream<T>>,
    done: bool,
    cx: Context,
}

impl<T: Send + 'static, R: Send + 'static> MapSubscriber<T, R> {
    fn reject(&mut self, rejected: Rejected<T>) {
        self.cx.discard(rejected.element);
        self.done = true;
        if let Some(upstream) = self.upstream.take() {
            upstream.cancel();
        }
        self.actual.on_error(rejected.error);
    }
}

impl<T: Send + 'static, R: Send + 'static> Subscriber<T> for MapSubscriber<T, R> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        self.upstream = Some(upstream.clone());
        let downstream = match upstream {
            Upstream::Plain(subscription) => Upstream::Plain(subscription),
            Upstream::Fused(queue) => Upstream::Fused(Arc::new(MapQueue {
                source: queue,
                mapper: Arc::clone(&self.mapper),
                cx: self.cx.clone(),
            })),
        };
        self.actual.on_subscribe(downstream);
    }

    fn on_next(&mut self, item: T) {
        if self.done {
            self.cx.discard(item);
            return;
        }
        match (self.mapper)(item) {
            Ok(mapped) => self.actual.on_next(mapped),
            Err(rejected) => self.reject(rejected),
        }
    }

    fn try_on_next(&mut self, item: T) -> TryNext<T> {
        if self.done {
            self.cx.discard(item);
            return TryNext::Dropped;
        }
        match (self.mapper)(item) {
            Ok(mapped) => match self.actual.try_on_next(mapped) {
                TryNext::Delivered => TryNext::Delivered,
                TryNext::Dropped => TryNext::Dropped,
                TryNext::Rejected(mapped) => {
                    self.cx.discard(mapped);
                    TryNext::Dropped
                }
            },
            Err(rejected) => {
                self.reject(rejected);
                TryNext::Dropped
            }
        }
    }

    fn is_conditional(&self) -> bool {
        self.conditional
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

/// Fused view: maps on `poll`.
struct MapQueue<T, R> {
    source: Arc<dyn QueueSubscription<T>>,
    mapper: MapFn<T, R>,
    cx: Context,
}

impl<T: Send + 'static, R: Send + 'static> Subscription for MapQueue<T, R> {
    fn request(&self, n: u64) {
        self.source.request(n);
    }

    fn cancel(&self) {
        self.source.cancel();
    }
}

impl<T: Send + 'static, R: Send + 'static> QueueSubscription<R> for MapQueue<T, R> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        self.source.request_fusion(requested)
    }

    fn poll(&self) -> Result<Option<R>> {
        let Some(item) = self.source.poll()? else {
            return Ok(None);
        };
        match (self.mapper)(item) {
            Ok(mapped) => Ok(Some(mapped)),
            Err(rejected) => {
                self.cx.discard(rejected.element);
                Err(rejected.error)
            }
        }
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
