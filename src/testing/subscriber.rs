use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cx::Context;
use crate::error::FluxError;
use crate::flow::{QueueSubscription, Subscriber, SubscriptionSlot, TryNext, Upstream};
use crate::types::FusionMode;

type Accept<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct ProbeState<T> {
    values: Mutex<Vec<T>>,
    terminal: Mutex<Option<Result<(), FluxError>>>,
    terminated: Condvar,
    upstream: SubscriptionSlot<T>,
    fusion: AtomicU8,
}

impl<T: Send + 'static> ProbeState<T> {
    fn push(&self, item: T) {
        self.values.lock().push(item);
    }

    fn finish(&self, outcome: Result<(), FluxError>) {
        let mut terminal = self.terminal.lock();
        if terminal.is_none() {
            *terminal = Some(outcome);
        }
        drop(terminal);
        self.terminated.notify_all();
    }
}

/// A subscriber that records every signal for assertions.
///
/// The test keeps the [`AssertProbe`] returned alongside it.
pub struct AssertSubscriber<T> {
    state: Arc<ProbeState<T>>,
    initial: u64,
    fusion: FusionMode,
    accept: Option<Accept<T>>,
    cx: Context,
    queue: Option<Arc<dyn QueueSubscription<T>>>,
}

/// Test-side handle of an [`AssertSubscriber`].
pub struct AssertProbe<T> {
    state: Arc<ProbeState<T>>,
}

/// Configures an [`AssertSubscriber`].
pub struct AssertSubscriberBuilder<T> {
    initial: u64,
    fusion: FusionMode,
    accept: Option<Accept<T>>,
    cx: Context,
}

impl<T: Send + 'static> AssertSubscriberBuilder<T> {
    /// Demand requested from `on_subscribe`; zero requests nothing.
    #[must_use]
    pub const fn request(mut self, initial: u64) -> Self {
        self.initial = initial;
        self
    }

    /// Fusion mode to negotiate with a fusable upstream.
    #[must_use]
    pub const fn fusion(mut self, mode: FusionMode) -> Self {
        self.fusion = mode;
        self
    }

    /// Context exposed to the operators upstream.
    #[must_use]
    pub fn context(mut self, cx: Context) -> Self {
        self.cx = cx;
        self
    }

    /// Makes the subscriber conditional: elements failing `accept` are
    /// declined and handed back to the producer.
    #[must_use]
    pub fn accept_if(mut self, accept: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.accept = Some(Arc::new(accept));
        self
    }

    /// Creates the subscriber and its probe.
    #[must_use]
    pub fn build(self) -> (AssertSubscriber<T>, AssertProbe<T>) {
        let state = Arc::new(ProbeState {
            values: Mutex::new(Vec::new()),
            terminal: Mutex::new(None),
            terminated: Condvar::new(),
            upstream: SubscriptionSlot::new(),
            fusion: AtomicU8::new(FusionMode::None.as_u8()),
        });
        let subscriber = AssertSubscriber {
            state: Arc::clone(&state),
            initial: self.initial,
            fusion: self.fusion,
            accept: self.accept,
            cx: self.cx,
            queue: None,
        };
        (subscriber, AssertProbe { state })
    }
}

impl<T: Send + 'static> AssertSubscriber<T> {
    /// Starts a builder with no demand, no fusion and an empty context.
    #[must_use]
    pub fn builder() -> AssertSubscriberBuilder<T> {
        AssertSubscriberBuilder {
            initial: 0,
            fusion: FusionMode::None,
            accept: None,
            cx: Context::empty(),
        }
    }

    /// A plain subscriber requesting `initial` on subscription.
    #[must_use]
    pub fn new(initial: u64) -> (Self, AssertProbe<T>) {
        Self::builder().request(initial).build()
    }

    /// Like [`AssertSubscriber::new`], exposing `cx` upstream.
    #[must_use]
    pub fn with_context(initial: u64, cx: Context) -> (Self, AssertProbe<T>) {
        Self::builder().request(initial).context(cx).build()
    }

    /// A subscriber negotiating `mode` with a fusable upstream.
    #[must_use]
    pub fn fused(initial: u64, mode: FusionMode) -> (Self, AssertProbe<T>) {
        Self::builder().request(initial).fusion(mode).build()
    }

    fn drain_queue(&mut self) {
        let Some(queue) = self.queue.clone() else {
            return;
        };
        loop {
            if self.state.upstream.is_cancelled() {
                return;
            }
            match queue.poll() {
                Ok(Some(item)) => self.state.push(item),
                Ok(None) => {
                    if FusionMode::from_u8(self.state.fusion.load(Ordering::Acquire)) == FusionMode::Sync {
                        self.queue = None;
                        self.state.finish(Ok(()));
                    }
                    return;
                }
                Err(error) => {
                    self.queue = None;
                    self.state.upstream.cancel();
                    self.state.finish(Err(error));
                    return;
                }
            }
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for AssertSubscriber<T> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        let granted = match (upstream.queue(), self.fusion) {
            (Some(queue), requested) if requested != FusionMode::None => queue.request_fusion(requested),
            _ => FusionMode::None,
        };
        self.state.fusion.store(granted.as_u8(), Ordering::Release);
        if granted.is_fused() {
            self.queue = upstream.queue().cloned();
        }
        if !self.state.upstream.set(upstream) {
            return;
        }
        match granted {
            FusionMode::Sync => self.drain_queue(),
            FusionMode::Async => {}
            _ => {
                if self.initial > 0 {
                    self.state.upstream.request(self.initial);
                }
            }
        }
    }

    fn on_next(&mut self, item: T) {
        self.state.push(item);
    }

    fn try_on_next(&mut self, item: T) -> TryNext<T> {
        match &self.accept {
            Some(accept) if !accept(&item) => TryNext::Rejected(item),
            _ => {
                self.state.push(item);
                TryNext::Delivered
            }
        }
    }

    fn is_conditional(&self) -> bool {
        self.accept.is_some()
    }

    fn on_ready(&mut self) {
        self.drain_queue();
    }

    fn on_error(&mut self, error: FluxError) {
        self.drain_queue();
        self.state.finish(Err(error));
    }

    fn on_complete(&mut self) {
        self.drain_queue();
        self.state.finish(Ok(()));
    }

    fn context(&self) -> Context {
        self.cx.clone()
    }
}

impl<T: Send + 'static> AssertProbe<T> {
    /// Requests `n` more elements.
    pub fn request(&self, n: u64) {
        self.state.upstream.request(n);
    }

    /// Cancels the subscription.
    pub fn cancel(&self) {
        self.state.upstream.cancel();
    }

    /// Copies of the elements received so far.
    #[must_use]
    pub fn values(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.state.values.lock().clone()
    }

    /// Moves the elements received so far out of the probe.
    #[must_use]
    pub fn take_values(&self) -> Vec<T> {
        std::mem::take(&mut *self.state.values.lock())
    }

    /// Number of elements held by the probe.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.state.values.lock().len()
    }

    /// The terminal error, if one was received.
    #[must_use]
    pub fn error(&self) -> Option<FluxError> {
        match &*self.state.terminal.lock() {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    /// Returns true if the stream completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(*self.state.terminal.lock(), Some(Ok(())))
    }

    /// Returns true once any terminal signal arrived.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state.terminal.lock().is_some()
    }

    /// The fusion mode granted by the upstream.
    #[must_use]
    pub fn fusion_mode(&self) -> FusionMode {
        FusionMode::from_u8(self.state.fusion.load(Ordering::Acquire))
    }

    /// Waits up to `timeout` for a terminal signal; returns true if one
    /// arrived.
    pub fn await_terminal(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut terminal = self.state.terminal.lock();
        while terminal.is_none() {
            if self.state.terminated.wait_until(&mut terminal, deadline).timed_out() {
                return terminal.is_some();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flux::Flux;
    use crate::types::UNBOUNDED;

    #[test]
    fn conditional_variant_declines_elements() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("conditional_variant_declines_elements");
        let (subscriber, probe) = AssertSubscriber::builder()
            .request(UNBOUNDED)
            .accept_if(|i: &i32| *i != 2)
            .build();
        Flux::from_iter(vec![1, 2, 3]).subscribe(subscriber);
        crate::assert_with_log!(probe.values() == vec![1, 3], "declined 2", "[1, 3]", probe.values());
        crate::assert_with_log!(probe.is_completed(), "completed", true, probe.is_completed());
        crate::test_complete!("conditional_variant_declines_elements");
    }
}
