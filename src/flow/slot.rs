//! A subscription slot that tolerates signals before the upstream arrives.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

use super::Upstream;
use crate::tracing_compat::warn;
use crate::types::Demand;

const SET: u8 = 0b01;
const CANCELLED: u8 = 0b10;

/// Holds an operator's upstream subscription.
///
/// Requests issued before [`SubscriptionSlot::set`] accumulate and are
/// forwarded once the upstream arrives; a cancel issued before it cancels
/// the upstream as soon as it is set.
pub struct SubscriptionSlot<T> {
    upstream: OnceLock<Upstream<T>>,
    /// `SET` and `CANCELLED` bits; whichever side flips its bit second
    /// cancels the upstream.
    state: AtomicU8,
    pending: Demand,
}

impl<T: 'static> SubscriptionSlot<T> {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            upstream: OnceLock::new(),
            state: AtomicU8::new(0),
            pending: Demand::new(),
        }
    }

    /// Installs the upstream. Returns false (and cancels `upstream`) if the
    /// slot was already set or cancelled.
    pub fn set(&self, upstream: Upstream<T>) -> bool {
        if self.upstream.set(upstream.clone()).is_err() {
            warn!("on_subscribe received twice; cancelling the second subscription");
            upstream.cancel();
            return false;
        }
        if self.state.fetch_or(SET, Ordering::AcqRel) & CANCELLED != 0 {
            upstream.cancel();
            return false;
        }
        let pending = self.pending.take();
        if pending > 0 {
            upstream.request(pending);
        }
        true
    }

    /// Returns the upstream once set.
    #[must_use]
    pub fn get(&self) -> Option<&Upstream<T>> {
        self.upstream.get()
    }

    /// Requests from the upstream, or records the request until it arrives.
    pub fn request(&self, n: u64) {
        if let Some(upstream) = self.upstream.get() {
            upstream.request(n);
            return;
        }
        self.pending.add(n);
        if let Some(upstream) = self.upstream.get() {
            let pending = self.pending.take();
            if pending > 0 {
                upstream.request(pending);
            }
        }
    }

    /// Cancels the upstream. Idempotent.
    pub fn cancel(&self) {
        let prev = self.state.fetch_or(CANCELLED, Ordering::AcqRel);
        if prev & CANCELLED != 0 || prev & SET == 0 {
            return;
        }
        if let Some(upstream) = self.upstream.get() {
            upstream.cancel();
        }
    }

    /// Returns true once [`SubscriptionSlot::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) & CANCELLED != 0
    }
}

impl<T: 'static> Default for SubscriptionSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
