//! Callback subscriber behind [`Flux::subscribe_with`](super::Flux::subscribe_with).

use std::sync::Arc;

use crate::config;
use crate::cx::Context;
use crate::error::FluxError;
use crate::flow::{Subscriber, SubscriptionSlot, Upstream};
use crate::scheduler::Disposable;
use crate::types::UNBOUNDED;

use super::Flux;

struct LambdaSubscriber<T, N, E, C> {
    upstream: Arc<SubscriptionSlot<T>>,
    on_next: N,
    on_error: Option<E>,
    on_complete: Option<C>,
}

impl<T, N, E, C> Subscriber<T> for LambdaSubscriber<T, N, E, C>
where
    T: Send + 'static,
    N: FnMut(T) + Send + 'static,
    E: FnOnce(FluxError) + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        if self.upstream.set(upstream) {
            self.upstream.request(UNBOUNDED);
        }
    }

    fn on_next(&mut self, item: T) {
        (self.on_next)(item);
    }

    fn on_error(&mut self, error: FluxError) {
        match self.on_error.take() {
            Some(callback) => callback(error),
            None => config::error_dropped(&error),
        }
        self.on_complete.take();
    }

    fn on_complete(&mut self) {
        if let Some(callback) = self.on_complete.take() {
            callback();
        }
        self.on_error.take();
    }

    fn context(&self) -> Context {
        Context::empty()
    }
}

struct Cancellation<T> {
    upstream: Arc<SubscriptionSlot<T>>,
}

impl<T: 'static> Disposable for Cancellation<T> {
    fn dispose(&self) {
        self.upstream.cancel();
    }

    fn is_disposed(&self) -> bool {
        self.upstream.is_cancelled()
    }
}

pub(crate) fn subscribe<T, N, E, C>(flux: &Flux<T>, on_next: N, on_error: E, on_complete: C) -> Box<dyn Disposable>
where
    T: Send + 'static,
    N: FnMut(T) + Send + 'static,
    E: FnOnce(FluxError) + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    let upstream = Arc::new(SubscriptionSlot::new());
    flux.subscribe(LambdaSubscriber {
        upstream: Arc::clone(&upstream),
        on_next,
        on_error: Some(on_error),
        on_complete: Some(on_complete),
    });
    Box::new(Cancellation { upstream })
}
