//! Blocking terminal consumption.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use super::Flux;
use crate::cx::Context;
use crate::error::FluxError;
use crate::flow::{Subscriber, SubscriptionSlot, Upstream};
use crate::tracing_compat::debug;
use crate::types::UNBOUNDED;

/// Failure of a blocking call.
#[derive(Debug, Error)]
pub enum BlockingError {
    /// The stream signalled an error.
    #[error(transparent)]
    Failed(#[from] FluxError),
    /// The stream did not terminate in time; it was cancelled.
    #[error("timed out after {0:?} waiting for a terminal signal")]
    Timeout(Duration),
}

impl BlockingError {
    /// Folds a timeout into an [`ErrorKind::Upstream`](crate::ErrorKind::Upstream) error.
    #[must_use]
    pub fn into_flux_error(self) -> FluxError {
        match self {
            Self::Failed(error) => error,
            Self::Timeout(after) => FluxError::upstream(format!("timed out after {after:?}")),
        }
    }
}

struct State<T> {
    last: Option<T>,
    outcome: Option<Result<(), FluxError>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    terminated: Condvar,
    upstream: SubscriptionSlot<T>,
    cx: Context,
}

struct LastSubscriber<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Subscriber<T> for LastSubscriber<T> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        if self.shared.upstream.set(upstream) {
            self.shared.upstream.request(UNBOUNDED);
        }
    }

    fn on_next(&mut self, item: T) {
        let replaced = {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() {
                Some(item)
            } else {
                state.last.replace(item)
            }
        };
        if let Some(previous) = replaced {
            self.shared.cx.discard(previous);
        }
    }

    fn on_error(&mut self, error: FluxError) {
        let last = {
            let mut state = self.shared.state.lock();
            state.outcome = Some(Err(error));
            state.last.take()
        };
        if let Some(last) = last {
            self.shared.cx.discard(last);
        }
        self.shared.terminated.notify_all();
    }

    fn on_complete(&mut self) {
        self.shared.state.lock().outcome = Some(Ok(()));
        self.shared.terminated.notify_all();
    }

    fn context(&self) -> Context {
        self.shared.cx.clone()
    }
}

/// Subscribes, waits for the terminal signal and returns the last element.
pub(crate) fn block_last<T: Send + 'static>(
    flux: &Flux<T>,
    timeout: Option<Duration>,
) -> Result<Option<T>, BlockingError> {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            last: None,
            outcome: None,
        }),
        terminated: Condvar::new(),
        upstream: SubscriptionSlot::new(),
        cx: Context::empty(),
    });
    flux.subscribe(LastSubscriber {
        shared: Arc::clone(&shared),
    });

    let deadline = timeout.map(|after| Instant::now() + after);
    let mut state = shared.state.lock();
    while state.outcome.is_none() {
        match deadline {
            Some(deadline) => {
                if shared.terminated.wait_until(&mut state, deadline).timed_out() && state.outcome.is_none() {
                    let last = state.last.take();
                    drop(state);
                    shared.upstream.cancel();
                    if let Some(last) = last {
                        shared.cx.discard(last);
                    }
                    let after = timeout.unwrap_or_default();
                    debug!("block_last timed out after {:?}", after);
                    return Err(BlockingError::Timeout(after));
                }
            }
            None => shared.terminated.wait(&mut state),
        }
    }
    match state.outcome.take() {
        Some(Err(error)) => Err(BlockingError::Failed(error)),
        _ => Ok(state.last.take()),
    }
}
