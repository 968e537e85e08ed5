//! Serialized delivery to a downstream subscriber.
//!
//! Operators that receive work from several threads (upstream signals,
//! downstream requests, cancellation, scheduler tasks) own an [`Emitter`].
//! Only the thread holding its [`DrainGate`] touches the subscriber, and
//! the subscriber's `on_subscribe` is delivered by the first pass, so a
//! request issued from inside `on_subscribe` becomes missed work for the
//! same drainer instead of a recursive drain.

use parking_lot::Mutex;

use super::subscriber::deliver;
use super::{BoxSubscriber, Upstream};
use crate::cx::Context;
use crate::error::FluxError;
use crate::sync::DrainGate;

/// The subscriber an [`Emitter`] delivers to.
pub(crate) struct Downstream<T> {
    subscriber: BoxSubscriber<T>,
    conditional: bool,
    pending: Option<Upstream<T>>,
    cx: Context,
}

impl<T: Send + 'static> Downstream<T> {
    /// Delivers an element; returns true if it counts against demand.
    pub(crate) fn next(&mut self, item: T) -> bool {
        deliver(&mut *self.subscriber, self.conditional, item, &self.cx)
    }

    /// Signals that fused data is available.
    pub(crate) fn ready(&mut self) {
        self.subscriber.on_ready();
    }

    /// Delivers the terminal error.
    pub(crate) fn error(mut self, error: FluxError) {
        self.subscriber.on_error(error);
    }

    /// Delivers the terminal completion.
    pub(crate) fn complete(mut self) {
        self.subscriber.on_complete();
    }
}

/// A drain gate plus the subscriber it guards.
pub(crate) struct Emitter<T> {
    gate: DrainGate,
    downstream: Mutex<Option<Downstream<T>>>,
    cx: Context,
}

impl<T: Send + 'static> Emitter<T> {
    /// Wraps `subscriber`.
    pub(crate) fn new(subscriber: BoxSubscriber<T>) -> Self {
        let cx = subscriber.context();
        let conditional = subscriber.is_conditional();
        Self {
            gate: DrainGate::new(),
            downstream: Mutex::new(Some(Downstream {
                subscriber,
                conditional,
                pending: None,
                cx: cx.clone(),
            })),
            cx,
        }
    }

    /// Queues `upstream` for delivery to `on_subscribe` by the next pass.
    ///
    /// Called once, before the first drain.
    pub(crate) fn start(&self, upstream: Upstream<T>) {
        if let Some(downstream) = self.downstream.lock().as_mut() {
            downstream.pending = Some(upstream);
        }
    }

    /// Context of the wrapped subscriber.
    pub(crate) fn cx(&self) -> &Context {
        &self.cx
    }

    /// Drains if the caller becomes the drainer.
    pub(crate) fn drain(&self, pass: impl FnMut(&mut Option<Downstream<T>>)) {
        if self.gate.enter() {
            self.run(pass);
        }
    }

    /// Registers work; returns true if the caller must run (or schedule) the
    /// drain loop with [`Emitter::run`].
    pub(crate) fn enter(&self) -> bool {
        self.gate.enter()
    }

    /// Runs the drain loop after a successful [`Emitter::enter`].
    pub(crate) fn run(&self, mut pass: impl FnMut(&mut Option<Downstream<T>>)) {
        self.gate.run(|| {
            let mut slot = self.downstream.lock();
            if let Some(downstream) = slot.as_mut() {
                if let Some(upstream) = downstream.pending.take() {
                    downstream.subscriber.on_subscribe(upstream);
                }
            }
            pass(&mut slot);
        });
    }
}
