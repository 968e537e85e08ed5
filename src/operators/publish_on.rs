//! `publish_on`: moves delivery onto a scheduler worker.
//!
//! Upstream signals are queued (or pulled through fusion) and every drain
//! pass runs as a task on one [`Worker`]. A worker that rejects a task, or
//! drops a queued one unrun because its scheduler was disposed, fails the
//! stream with [`ErrorKind::SchedulerRejected`] and the pass runs inline so
//! buffered elements are still released.
//!
//! [`ErrorKind::SchedulerRejected`]: crate::error::ErrorKind::SchedulerRejected

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::{prefetch_request, replenish_limit};
use crate::config;
use crate::cx::Context;
use crate::error::{FluxError, Result};
use crate::flow::emitter::{Downstream, Emitter};
use crate::flow::{BoxSubscriber, Publisher, QueueSubscription, Subscriber, Subscription, SubscriptionSlot, Upstream};
use crate::queue::{QueueCapacity, SignalQueue};
use crate::scheduler::{Scheduler, Worker};
use crate::sync::ErrorSlot;
use crate::tracing_compat::{debug, warn};
use crate::types::{Demand, FusionMode, UNBOUNDED};

pub(crate) struct PublishOnPublisher<T> {
    source: Arc<dyn Publisher<T>>,
    scheduler: Arc<dyn Scheduler>,
    eager: bool,
    prefetch: usize,
}

impl<T> PublishOnPublisher<T> {
    pub(crate) fn new(source: Arc<dyn Publisher<T>>, scheduler: Arc<dyn Scheduler>, eager: bool, prefetch: usize) -> Self {
        Self {
            source,
            scheduler,
            eager,
            prefetch,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for PublishOnPublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        let main = Arc::new_cyclic(|this| PublishOnMain {
            this: this.clone(),
            emitter: Emitter::new(subscriber),
            worker: self.scheduler.create_worker(),
            upstream: SubscriptionSlot::new(),
            input_mode: AtomicU8::new(FusionMode::None.as_u8()),
            output_mode: AtomicU8::new(FusionMode::None.as_u8()),
            queue: SignalQueue::new(QueueCapacity::for_prefetch(self.prefetch)),
            consumed: AtomicU64::new(0),
            limit: replenish_limit(self.prefetch),
            prefetch: self.prefetch,
            eager: self.eager,
            requested: Demand::new(),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            immediate: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            error: ErrorSlot::new(),
        });
        main.emitter
            .start(Upstream::Fused(Arc::clone(&main) as Arc<dyn QueueSubscription<T>>));
        self.source.subscribe(Box::new(PublishOnOuter { main }));
    }
}

struct PublishOnMain<T> {
    this: Weak<Self>,
    emitter: Emitter<T>,
    worker: Box<dyn Worker>,
    upstream: SubscriptionSlot<T>,
    input_mode: AtomicU8,
    output_mode: AtomicU8,
    queue: SignalQueue<T>,
    consumed: AtomicU64,
    limit: u64,
    prefetch: usize,
    eager: bool,
    requested: Demand,
    cancelled: AtomicBool,
    done: AtomicBool,
    /// The pending error skips the buffered elements.
    immediate: AtomicBool,
    terminated: AtomicBool,
    error: ErrorSlot,
}

impl<T: Send + 'static> PublishOnMain<T> {
    fn cx(&self) -> &Context {
        self.emitter.cx()
    }

    fn input_mode(&self) -> FusionMode {
        FusionMode::from_u8(self.input_mode.load(Ordering::Acquire))
    }

    fn schedule(&self) {
        if !self.emitter.enter() {
            return;
        }
        let Some(main) = self.this.upgrade() else {
            return;
        };
        let live = !self.terminated.load(Ordering::Acquire);
        let task = DrainTask { main: Some(main) };
        // A rejected task has already been dropped and drained inline.
        if let Err(err) = self.worker.schedule(Box::new(move || task.run())) {
            if live {
                warn!("publishOn worker rejected a drain task: {}", err);
            }
        }
    }

    /// The scheduled pass was dropped unrun; the gate is still ours.
    fn abandoned(&self) {
        if !self.terminated.load(Ordering::Acquire) {
            debug!("publishOn drain task dropped by its worker");
            self.fail_now(FluxError::scheduler_rejected("drain task dropped by a disposed worker"));
        }
        self.run();
    }

    fn run(&self) {
        self.emitter.run(|slot| self.pass(slot));
    }

    /// Records an error that is signalled ahead of buffered elements.
    fn fail_now(&self, error: FluxError) {
        if let Err(error) = self.error.set(error) {
            config::error_dropped(&error);
        }
        self.immediate.store(true, Ordering::Release);
        self.done.store(true, Ordering::Release);
        self.upstream.cancel();
    }

    fn poll_input(&self) -> Result<Option<T>> {
        match self.input_mode() {
            FusionMode::None | FusionMode::Any => Ok(self.queue.poll()),
            FusionMode::Sync | FusionMode::Async => self
                .upstream
                .get()
                .and_then(Upstream::queue)
                .map_or(Ok(None), |queue| queue.poll()),
        }
    }

    fn input_empty(&self) -> bool {
        match self.input_mode() {
            FusionMode::None | FusionMode::Any => self.queue.is_empty(),
            FusionMode::Sync | FusionMode::Async => self
                .upstream
                .get()
                .and_then(Upstream::queue)
                .is_none_or(|queue| queue.is_empty()),
        }
    }

    fn consumed(&self) {
        if self.input_mode() == FusionMode::Sync {
            return;
        }
        let consumed = self.consumed.load(Ordering::Relaxed) + 1;
        if consumed == self.limit {
            self.consumed.store(0, Ordering::Relaxed);
            self.upstream.request(consumed);
        } else {
            self.consumed.store(consumed, Ordering::Relaxed);
        }
    }

    fn release_all(&self) {
        match self.input_mode() {
            FusionMode::None | FusionMode::Any => {
                self.queue.clear(self.cx());
            }
            _ => {
                if let Some(queue) = self.upstream.get().and_then(Upstream::queue) {
                    queue.clear();
                }
            }
        }
    }

    fn terminate(&self, slot: &mut Option<Downstream<T>>, error: Option<FluxError>) {
        self.terminated.store(true, Ordering::Release);
        if self.input_mode() == FusionMode::Sync {
            // A pulled source lets go of us once it reports its end.
            if let Ok(Some(item)) = self.poll_input() {
                self.cx().discard(item);
            }
        }
        if let Some(downstream) = slot.take() {
            match error {
                Some(error) => downstream.error(error),
                None => downstream.complete(),
            }
        }
        self.worker.dispose();
    }

    fn pass(&self, slot: &mut Option<Downstream<T>>) {
        loop {
            if slot.is_none() {
                self.release_all();
                return;
            }
            if self.cancelled.load(Ordering::Acquire) {
                slot.take();
                self.release_all();
                self.terminated.store(true, Ordering::Release);
                self.worker.dispose();
                return;
            }
            let done = self.done.load(Ordering::Acquire);
            if done && (self.eager || self.immediate.load(Ordering::Acquire)) {
                if let Some(error) = self.error.take() {
                    self.cancelled.store(true, Ordering::Release);
                    self.release_all();
                    self.terminate(slot, Some(error));
                    return;
                }
            }

            if FusionMode::from_u8(self.output_mode.load(Ordering::Acquire)) == FusionMode::Async {
                if let Some(downstream) = slot.as_mut() {
                    downstream.ready();
                }
                if done && self.input_empty() {
                    let error = self.error.take();
                    self.terminate(slot, error);
                }
                return;
            }

            let requested = self.requested.get();
            let mut emitted = 0;
            while emitted != requested {
                if self.cancelled.load(Ordering::Acquire) {
                    break;
                }
                match self.poll_input() {
                    Ok(Some(item)) => {
                        self.consumed();
                        if let Some(downstream) = slot.as_mut() {
                            if downstream.next(item) {
                                emitted += 1;
                            }
                        } else {
                            self.cx().discard(item);
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        self.fail_now(error);
                        break;
                    }
                }
            }
            if requested != UNBOUNDED {
                self.requested.produced(emitted);
            }
            if self.cancelled.load(Ordering::Acquire) || self.immediate.load(Ordering::Acquire) {
                continue;
            }
            if self.done.load(Ordering::Acquire) && self.input_empty() {
                let error = self.error.take();
                self.terminate(slot, error);
                return;
            }
            if emitted == 0 {
                return;
            }
        }
    }
}

impl<T: Send + 'static> Subscription for PublishOnMain<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.fail_now(FluxError::bad_request());
        } else {
            self.requested.add(n);
        }
        self.schedule();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.upstream.cancel();
        self.schedule();
    }
}

impl<T: Send + 'static> QueueSubscription<T> for PublishOnMain<T> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        if requested.admits(FusionMode::Async) {
            self.output_mode.store(FusionMode::Async.as_u8(), Ordering::Release);
            return FusionMode::Async;
        }
        FusionMode::None
    }

    fn poll(&self) -> Result<Option<T>> {
        let polled = self.poll_input();
        match polled {
            Ok(Some(_)) => self.consumed(),
            // The consumer found the input drained; a pass delivers the terminal.
            Ok(None) if self.done.load(Ordering::Acquire) => self.schedule(),
            _ => {}
        }
        polled
    }

    fn is_empty(&self) -> bool {
        self.input_empty()
    }

    fn size(&self) -> usize {
        self.queue.len()
    }

    fn clear(&self) {
        self.release_all();
    }
}

/// One scheduled drain pass.
///
/// A worker that drops it without running it hands the pass back to the
/// stream, which fails and drains inline.
struct DrainTask<T: Send + 'static> {
    main: Option<Arc<PublishOnMain<T>>>,
}

impl<T: Send + 'static> DrainTask<T> {
    fn run(mut self) {
        if let Some(main) = self.main.take() {
            main.run();
        }
    }
}

impl<T: Send + 'static> Drop for DrainTask<T> {
    fn drop(&mut self) {
        if let Some(main) = self.main.take() {
            main.abandoned();
        }
    }
}

struct PublishOnOuter<T> {
    main: Arc<PublishOnMain<T>>,
}

impl<T: Send + 'static> Subscriber<T> for PublishOnOuter<T> {
    fn on_subscribe(&mut self, upstream: Upstream<T>) {
        let granted = upstream
            .queue()
            .map_or(FusionMode::None, |queue| queue.request_fusion(FusionMode::Any));
        self.main.input_mode.store(granted.as_u8(), Ordering::Release);
        if granted == FusionMode::Sync {
            // Everything a pulled source has is already there.
            self.main.done.store(true, Ordering::Release);
        }
        let installed = self.main.upstream.set(upstream);
        debug!("publishOn subscribed, input fusion {:?}", granted);
        self.main.schedule();
        if installed && granted != FusionMode::Sync {
            self.main.upstream.request(prefetch_request(self.main.prefetch));
        }
    }

    fn on_next(&mut self, item: T) {
        let main = &self.main;
        if main.cancelled.load(Ordering::Acquire) || main.done.load(Ordering::Acquire) {
            main.cx().discard(item);
            return;
        }
        if let Err(item) = main.queue.offer(item) {
            main.cx().discard(item);
            main.fail_now(FluxError::queue_full());
            main.schedule();
            return;
        }
        if main.cancelled.load(Ordering::Acquire) {
            main.queue.clear(main.cx());
            return;
        }
        main.schedule();
    }

    fn on_ready(&mut self) {
        self.main.schedule();
    }

    fn on_error(&mut self, error: FluxError) {
        if self.main.done.load(Ordering::Acquire) {
            config::error_dropped(&error);
            return;
        }
        if let Err(error) = self.main.error.set(error) {
            config::error_dropped(&error);
        }
        self.main.done.store(true, Ordering::Release);
        self.main.schedule();
    }

    fn on_complete(&mut self) {
        self.main.done.store(true, Ordering::Release);
        self.main.schedule();
    }

    fn context(&self) -> Context {
        self.main.cx().clone()
    }
}
