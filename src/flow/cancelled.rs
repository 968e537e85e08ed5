//! A subscriber that cancels as soon as it is subscribed.

use crate::config;
use crate::cx::Context;
use crate::error::FluxError;
use crate::flow::{Subscriber, Upstream};

/// Subscribes and immediately cancels, releasing anything still emitted.
///
/// Fan-in operators attach it to inner publishers they will not consume, so
/// those publishers get a chance to release what they were about to emit.
pub struct CancelledSubscriber {
    cx: Context,
}

impl CancelledSubscriber {
    /// Creates a subscriber releasing elements through `cx`.
    #[must_use]
    pub const fn new(cx: Context) -> Self {
        Self { cx }
    }
}

impl<T: Send + 'static> Subscriber<T> for CancelledSubscriber {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        upstream.cancel();
        if let Some(queue) = upstream.queue() {
            queue.clear();
        }
    }

    fn on_next(&mut self, item: T) {
        self.cx.discard(item);
    }

    fn on_error(&mut self, error: FluxError) {
        config::error_dropped(&error);
    }

    fn on_complete(&mut self) {}

    fn context(&self) -> Context {
        self.cx.clone()
    }
}
