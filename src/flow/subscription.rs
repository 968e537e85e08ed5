//! The subscription side of the protocol, including fusion.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::types::FusionMode;

/// Handle a subscriber uses to signal demand and cancellation upstream.
///
/// Both methods may be called from any thread, concurrently with signals
/// travelling downstream. `cancel` is idempotent.
pub trait Subscription: Send + Sync {
    /// Requests `n` more elements. `n == 0` is a protocol violation.
    fn request(&self, n: u64);

    /// Stops the flow. Buffered elements are released.
    fn cancel(&self);
}

/// A subscription that can also hand elements over through its queue.
pub trait QueueSubscription<T>: Subscription {
    /// Negotiates fusion; returns the granted mode or [`FusionMode::None`].
    ///
    /// Called at most once, from within `on_subscribe`.
    fn request_fusion(&self, requested: FusionMode) -> FusionMode;

    /// Takes the next element. Ownership transfers to the caller.
    ///
    /// Under `Sync` fusion `Ok(None)` means the source completed. An error
    /// means the element involved was already released.
    fn poll(&self) -> Result<Option<T>>;

    /// Returns true if nothing is ready to be polled.
    fn is_empty(&self) -> bool;

    /// Advisory count of ready elements.
    fn size(&self) -> usize;

    /// Releases everything still held.
    fn clear(&self);
}

/// The capability an upstream advertises during `on_subscribe`.
pub enum Upstream<T> {
    /// Regular request/cancel subscription.
    Plain(Arc<dyn Subscription>),
    /// Subscription that also supports fusion.
    Fused(Arc<dyn QueueSubscription<T>>),
}

impl<T> Clone for Upstream<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(s) => Self::Plain(Arc::clone(s)),
            Self::Fused(q) => Self::Fused(Arc::clone(q)),
        }
    }
}

impl<T> fmt::Debug for Upstream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Upstream::Plain"),
            Self::Fused(_) => f.write_str("Upstream::Fused"),
        }
    }
}

impl<T: 'static> Upstream<T> {
    /// Wraps a plain subscription.
    pub fn plain(subscription: impl Subscription + 'static) -> Self {
        Self::Plain(Arc::new(subscription))
    }

    /// Forwards a request upstream.
    pub fn request(&self, n: u64) {
        match self {
            Self::Plain(s) => s.request(n),
            Self::Fused(q) => q.request(n),
        }
    }

    /// Forwards cancellation upstream.
    pub fn cancel(&self) {
        match self {
            Self::Plain(s) => s.cancel(),
            Self::Fused(q) => q.cancel(),
        }
    }

    /// Returns the fused view, if advertised.
    #[must_use]
    pub fn queue(&self) -> Option<&Arc<dyn QueueSubscription<T>>> {
        match self {
            Self::Plain(_) => None,
            Self::Fused(q) => Some(q),
        }
    }

    /// Returns a plain view that hides fusion.
    #[must_use]
    pub fn into_plain(self) -> Arc<dyn Subscription> {
        match self {
            Self::Plain(s) => s,
            Self::Fused(q) => Arc::new(FusedAsPlain(q)),
        }
    }
}

struct FusedAsPlain<T>(Arc<dyn QueueSubscription<T>>);

impl<T> Subscription for FusedAsPlain<T> {
    fn request(&self, n: u64) {
        self.0.request(n);
    }

    fn cancel(&self) {
        self.0.cancel();
    }
}

/// A subscription that ignores every signal.
///
/// Handed out by sources that terminate immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recording {
        requested: AtomicU64,
        cancels: AtomicUsize,
    }

    impl Subscription for Recording {
        fn request(&self, n: u64) {
            self.requested.fetch_add(n, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl QueueSubscription<u8> for Recording {
        fn request_fusion(&self, _requested: FusionMode) -> FusionMode {
            FusionMode::None
        }

        fn poll(&self) -> Result<Option<u8>> {
            Ok(None)
        }

        fn is_empty(&self) -> bool {
            true
        }

        fn size(&self) -> usize {
            0
        }

        fn clear(&self) {}
    }

    #[test]
    fn plain_view_forwards_to_fused() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("plain_view_forwards_to_fused");
        let inner = Arc::new(Recording::default());
        let upstream: Upstream<u8> = Upstream::Fused(inner.clone());
        let plain = upstream.clone().into_plain();
        plain.request(3);
        upstream.request(2);
        plain.cancel();
        crate::assert_with_log!(
            inner.requested.load(Ordering::SeqCst) == 5,
            "requests forwarded",
            5,
            inner.requested.load(Ordering::SeqCst)
        );
        crate::assert_with_log!(
            inner.cancels.load(Ordering::SeqCst) == 1,
            "cancel forwarded",
            1,
            inner.cancels.load(Ordering::SeqCst)
        );
        crate::test_complete!("plain_view_forwards_to_fused");
    }
}
