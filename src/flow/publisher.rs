//! The publisher side of the protocol.

use super::BoxSubscriber;

/// A source of elements.
///
/// Publishers are re-subscribable: every call to
/// [`Publisher::subscribe`] starts an independent subscription with fresh
/// state.
pub trait Publisher<T>: Send + Sync {
    /// Subscribes `subscriber`. Its `on_subscribe` is called before this
    /// returns, possibly followed by more signals.
    fn subscribe(&self, subscriber: BoxSubscriber<T>);
}
