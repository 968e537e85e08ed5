use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::cx::Context;
use crate::error::FluxError;
use crate::flow::{BoxSubscriber, Publisher, Subscription, Upstream};
use crate::flux::Flux;
use crate::types::{Demand, UNBOUNDED};

/// Protocol rules a [`TestPublisher`] can be told to break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Violation {
    /// Keep emitting after `cancel`, as a source racing its cancellation.
    DeferCancellation,
    /// Emit beyond the outstanding demand.
    RequestOverflow,
}

struct Shared<T> {
    subscriber: Mutex<Option<BoxSubscriber<T>>>,
    cx: Mutex<Context>,
    requested: Demand,
    cancelled: AtomicBool,
    subscribed: AtomicBool,
    violations: Vec<Violation>,
}

impl<T> Shared<T> {
    fn allows(&self, violation: Violation) -> bool {
        self.violations.contains(&violation)
    }
}

struct TestSubscription<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Subscription for TestSubscription<T> {
    fn request(&self, n: u64) {
        self.shared.requested.add(n);
    }

    fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }
}

/// A source the test drives by hand.
///
/// The latest subscriber receives the signals. Requests and cancellation
/// are only recorded. A compliant publisher releases elements emitted
/// after cancellation and fails the subscriber with an overflow when an
/// element arrives without demand.
pub struct TestPublisher<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TestPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Default for TestPublisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> TestPublisher<T> {
    /// A publisher that follows the protocol.
    #[must_use]
    pub fn new() -> Self {
        Self::non_compliant(&[])
    }

    /// A publisher that breaks the given rules.
    #[must_use]
    pub fn non_compliant(violations: &[Violation]) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscriber: Mutex::new(None),
                cx: Mutex::new(Context::empty()),
                requested: Demand::new(),
                cancelled: AtomicBool::new(false),
                subscribed: AtomicBool::new(false),
                violations: violations.to_vec(),
            }),
        }
    }

    /// This publisher as a [`Flux`].
    #[must_use]
    pub fn flux(&self) -> Flux<T> {
        Flux::from_publisher(self.clone())
    }

    /// Emits one element.
    pub fn next(&self, item: T) {
        let cx = self.shared.cx.lock().clone();
        if self.is_cancelled() && !self.shared.allows(Violation::DeferCancellation) {
            cx.discard(item);
            return;
        }
        let mut slot = self.shared.subscriber.lock();
        let Some(subscriber) = slot.as_mut() else {
            drop(slot);
            cx.discard(item);
            return;
        };
        let outstanding = self.shared.requested.get();
        if outstanding == 0 && !self.shared.allows(Violation::RequestOverflow) {
            cx.discard(item);
            if let Some(mut subscriber) = slot.take() {
                subscriber.on_error(FluxError::overflow("test publisher emitted without demand"));
            }
            return;
        }
        if outstanding != UNBOUNDED && outstanding > 0 {
            self.shared.requested.produced(1);
        }
        subscriber.on_next(item);
    }

    /// Emits every element of `items` in order.
    pub fn emit(&self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.next(item);
        }
    }

    /// Completes the current subscriber.
    pub fn complete(&self) {
        let subscriber = self.shared.subscriber.lock().take();
        if let Some(mut subscriber) = subscriber {
            subscriber.on_complete();
        }
    }

    /// Fails the current subscriber.
    pub fn error(&self, error: FluxError) {
        let subscriber = self.shared.subscriber.lock().take();
        if let Some(mut subscriber) = subscriber {
            subscriber.on_error(error);
        }
    }

    /// Returns true once the subscriber cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Outstanding demand.
    #[must_use]
    pub fn requested(&self) -> u64 {
        self.shared.requested.get()
    }

    /// Returns true once anybody subscribed.
    #[must_use]
    pub fn was_subscribed(&self) -> bool {
        self.shared.subscribed.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> Publisher<T> for TestPublisher<T> {
    fn subscribe(&self, mut subscriber: BoxSubscriber<T>) {
        *self.shared.cx.lock() = subscriber.context();
        self.shared.subscribed.store(true, Ordering::Release);
        subscriber.on_subscribe(Upstream::plain(TestSubscription {
            shared: Arc::clone(&self.shared),
        }));
        *self.shared.subscriber.lock() = Some(subscriber);
    }
}
