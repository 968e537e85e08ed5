//! `do_on_discard`: installs a discard hook for everything upstream.

use std::sync::Arc;

use crate::cx::{Context, DiscardHook};
use crate::error::FluxError;
use crate::flow::{BoxSubscriber, Publisher, Subscriber, TryNext, Upstream};

pub(crate) struct OnDiscardPublisher<T> {
    source: Arc<dyn Publisher<T>>,
    hook: DiscardHook,
}

impl<T> OnDiscardPublisher<T> {
    pub(crate) fn new(source: Arc<dyn Publisher<T>>, hook: DiscardHook) -> Self {
        Self { source, hook }
    }
}

impl<T: Send + 'static> Publisher<T> for OnDiscardPublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        let cx = subscriber.context().with_discard_hook(self.hook.clone());
        self.source.subscribe(Box::new(OnDiscardSubscriber {
            actual: subscriber,
            cx,
        }));
    }
}

/// Forwards every signal; only the context differs.
struct OnDiscardSubscriber<T> {
    actual: BoxSubscriber<T>,
    cx: Context,
}

impl<T: Send + 'static> Subscriber<T> for OnDiscardSubscriber<T> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        self.actual.on_subscribe(upstream);
    }

    fn on_next(&mut self, item: T) {
        self.actual.on_next(item);
    }

    fn try_on_next(&mut self, item: T) -> TryNext<T> {
        self.actual.try_on_next(item)
    }

    fn is_conditional(&self) -> bool {
        self.actual.is_conditional()
    }

    fn on_ready(&mut self) {
        self.actual.on_ready();
    }

    fn on_error(&mut self, error: FluxError) {
        self.actual.on_error(error);
    }

    fn on_complete(&mut self) {
        self.actual.on_complete();
    }

    fn context(&self) -> Context {
        self.cx.clone()
    }
}
