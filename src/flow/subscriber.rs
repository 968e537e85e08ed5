//! The subscriber side of the protocol.

use crate::cx::Context;
use crate::error::FluxError;
use crate::flow::Upstream;

/// Outcome of offering an element to a conditional subscriber.
#[derive(Debug, PartialEq, Eq)]
pub enum TryNext<T> {
    /// Delivered; counts against demand.
    Delivered,
    /// Not delivered and already released by the callee.
    /// Does not count against demand.
    Dropped,
    /// Not delivered; ownership returns to the caller, which must release it.
    /// Does not count against demand.
    Rejected(T),
}

impl<T> TryNext<T> {
    /// Returns true for [`TryNext::Delivered`].
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Receiver of stream signals.
///
/// Implementations must accept signals from any thread, but never
/// concurrently for the same subscription.
pub trait Subscriber<T>: Send {
    /// Receives the upstream subscription. Called exactly once, first.
    fn on_subscribe(&mut self, upstream: Upstream<T>);

    /// Receives an element. Ownership moves to the subscriber.
    fn on_next(&mut self, item: T);

    /// Offers an element without necessarily consuming demand.
    ///
    /// The default delivers through [`Subscriber::on_next`].
    fn try_on_next(&mut self, item: T) -> TryNext<T> {
        self.on_next(item);
        TryNext::Delivered
    }

    /// Returns true if [`Subscriber::try_on_next`] may decline elements.
    ///
    /// Producers read this once at subscription time.
    fn is_conditional(&self) -> bool {
        false
    }

    /// Under `Async` fusion, signals that the producer's queue has data.
    fn on_ready(&mut self) {}

    /// Receives the terminal error.
    fn on_error(&mut self, error: FluxError);

    /// Receives the terminal completion.
    fn on_complete(&mut self);

    /// Returns the context operators upstream of this subscriber see.
    fn context(&self) -> Context {
        Context::empty()
    }
}

/// A boxed, type-erased subscriber.
pub type BoxSubscriber<T> = Box<dyn Subscriber<T>>;

impl<T, S> Subscriber<T> for Box<S>
where
    S: Subscriber<T> + ?Sized,
{
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        (**self).on_subscribe(upstream);
    }

    fn on_next(&mut self, item: T) {
        (**self).on_next(item);
    }

    fn try_on_next(&mut self, item: T) -> TryNext<T> {
        (**self).try_on_next(item)
    }

    fn is_conditional(&self) -> bool {
        (**self).is_conditional()
    }

    fn on_ready(&mut self) {
        (**self).on_ready();
    }

    fn on_error(&mut self, error: FluxError) {
        (**self).on_error(error);
    }

    fn on_complete(&mut self) {
        (**self).on_complete();
    }

    fn context(&self) -> Context {
        (**self).context()
    }
}

/// Delivers `item` on the conditional or plain path.
///
/// Returns true if the element counts against demand. Rejected elements are
/// released through `cx`.
pub(crate) fn deliver<T: Send + 'static>(
    subscriber: &mut dyn Subscriber<T>,
    conditional: bool,
    item: T,
    cx: &Context,
) -> bool {
    if !conditional {
        subscriber.on_next(item);
        return true;
    }
    match subscriber.try_on_next(item) {
        TryNext::Delivered => true,
        TryNext::Dropped => false,
        TryNext::Rejected(item) => {
            cx.discard(item);
            false
        }
    }
}
