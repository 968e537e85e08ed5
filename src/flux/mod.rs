//! The fluent assembly surface.
//!
//! A [`Flux`] is a cheap handle to a publisher. Every builder method wraps
//! the current publisher in a new operator and returns a new handle; nothing
//! runs until a subscriber subscribes.
//!
//! ```ignore
//! use tributary::Flux;
//!
//! let last = Flux::from_iter(vec![1, 2, 3])
//!     .map(|i| i * 10)
//!     .filter(|i| *i > 10)
//!     .block_last()?;
//! assert_eq!(last, Some(30));
//! ```
//!
//! Builder methods are `#[track_caller]`: the location of the user code
//! calling them is captured when operator debug or stats recording is
//! enabled (see [`Hooks`](crate::config::Hooks)).

mod block;
mod lambda;

use std::sync::Arc;
use std::time::Duration;

use crate::config::Hooks;
use crate::cx::DiscardHook;
use crate::error::{FluxError, Rejected, Result};
use crate::flow::{Publisher, Subscriber};
use crate::observability::assembly::OnAssembly;
use crate::observability::stats::StatsPublisher;
use crate::observability::{AssemblySite, CallSite};
use crate::operators::concat_map::ConcatMapPublisher;
use crate::operators::flat_map::FlatMapPublisher;
use crate::operators::flat_map_iterable::FlatMapIterablePublisher;
use crate::operators::hide::HidePublisher;
use crate::operators::map::MapPublisher;
use crate::operators::filter::FilterPublisher;
use crate::operators::on_backpressure_buffer::BufferPublisher;
use crate::operators::on_discard::OnDiscardPublisher;
use crate::operators::publish_on::PublishOnPublisher;
use crate::operators::source::{ErrorPublisher, IterPublisher};
use crate::queue::{SMALL_BUFFER_SIZE, XS_BUFFER_SIZE};
use crate::scheduler::{Disposable, Scheduler};
use crate::tracing_compat::trace;

pub use block::BlockingError;

/// A handle to an assembled stream of `T`.
pub struct Flux<T> {
    source: Arc<dyn Publisher<T>>,
}

impl<T> Clone for Flux<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T> std::fmt::Debug for Flux<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flux").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Publisher<T> for Flux<T> {
    fn subscribe(&self, subscriber: crate::flow::BoxSubscriber<T>) {
        self.source.subscribe(subscriber);
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Wraps `publisher` as an operator named `name`, adding the
    /// diagnostics enabled at this moment.
    #[track_caller]
    pub(crate) fn assemble(name: &'static str, publisher: impl Publisher<T> + 'static) -> Self {
        let hooks = Hooks::snapshot();
        let mut source: Arc<dyn Publisher<T>> = Arc::new(publisher);
        if !hooks.operator_debug && !hooks.stats_recording {
            return Self { source };
        }
        let call_site = if hooks.operator_debug {
            CallSite::capture(&hooks.frame_filter)
        } else {
            CallSite::here()
        };
        let site = Arc::new(AssemblySite::new(name, call_site));
        trace!("assembled {}", site);
        if hooks.operator_debug {
            source = Arc::new(OnAssembly::new(source, Arc::clone(&site)));
        }
        if hooks.stats_recording {
            source = Arc::new(StatsPublisher::new(source, site));
        }
        Self { source }
    }

    fn upstream(&self) -> Arc<dyn Publisher<T>> {
        Arc::clone(&self.source)
    }

    /// Emits a clone of `value` to every subscriber, then completes.
    #[track_caller]
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::assemble("Flux.just", IterPublisher::repeatable(std::iter::once(value)))
    }

    /// Emits `value` to the first subscriber only; later subscribers get a
    /// protocol error.
    #[track_caller]
    pub fn just_owned(value: T) -> Self {
        Self::assemble("Flux.just", IterPublisher::once(std::iter::once(value)))
    }

    /// Emits the items of a fresh clone of `iterable` to every subscriber.
    #[track_caller]
    pub fn from_iter<I>(iterable: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::assemble("Flux.fromIterable", IterPublisher::repeatable(iterable))
    }

    /// Emits the items of `iterable` to the first subscriber only; later
    /// subscribers see an empty stream that completes immediately.
    #[track_caller]
    pub fn from_iter_once<I>(iterable: I) -> Self
    where
        I: IntoIterator<Item = T> + Send + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::assemble("Flux.fromIterable", IterPublisher::once(iterable))
    }

    /// Completes without emitting.
    #[track_caller]
    pub fn empty() -> Self {
        Self::assemble("Flux.empty", IterPublisher::<T>::empty())
    }

    /// Fails every subscriber with `error`.
    #[track_caller]
    pub fn error(error: FluxError) -> Self {
        Self::assemble("Flux.error", ErrorPublisher::new(error))
    }

    /// Adapts any publisher.
    #[track_caller]
    pub fn from_publisher(publisher: impl Publisher<T> + 'static) -> Self {
        Self::assemble("Flux.from", publisher)
    }

    /// Interleaves the elements of every source, subscribing to all of them
    /// at once.
    #[track_caller]
    pub fn merge(sources: Vec<Self>) -> Self {
        Self::merge_with_prefetch(sources, XS_BUFFER_SIZE)
    }

    /// Like [`Flux::merge`], requesting `prefetch` elements from each source
    /// at a time.
    #[track_caller]
    pub fn merge_with_prefetch(sources: Vec<Self>, prefetch: usize) -> Self {
        let concurrency = sources.len().max(1);
        let main: Arc<dyn Publisher<Self>> = Arc::new(IterPublisher::repeatable(sources));
        Self::assemble(
            "Flux.merge",
            FlatMapPublisher::new(main, Arc::new(|inner: Self| inner), concurrency, prefetch),
        )
    }

    /// Transforms every element.
    #[track_caller]
    pub fn map<R, F>(&self, mapper: F) -> Flux<R>
    where
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Flux::assemble(
            "Flux.map",
            MapPublisher::new(
                self.upstream(),
                Arc::new(move |item| Ok::<R, Rejected<T>>(mapper(item))),
            ),
        )
    }

    /// Transforms every element with a mapper that may reject it.
    ///
    /// A rejected element is released, the upstream is cancelled and the
    /// rejection's error is signalled downstream.
    #[track_caller]
    pub fn try_map<R, F>(&self, mapper: F) -> Flux<R>
    where
        R: Send + 'static,
        F: Fn(T) -> std::result::Result<R, Rejected<T>> + Send + Sync + 'static,
    {
        Flux::assemble("Flux.map", MapPublisher::new(self.upstream(), Arc::new(mapper)))
    }

    /// Keeps elements matching `predicate`; the others are released.
    #[track_caller]
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::assemble("Flux.filter", FilterPublisher::new(self.upstream(), Arc::new(predicate)))
    }

    /// Hides the identity and capabilities (fusion, conditional delivery) of
    /// the upstream.
    #[track_caller]
    pub fn hide(&self) -> Self {
        Self::assemble("Flux.hide", HidePublisher::new(self.upstream()))
    }

    /// Maps every element to an inner stream and merges the inners.
    #[track_caller]
    pub fn flat_map<R, F>(&self, mapper: F) -> Flux<R>
    where
        R: Send + 'static,
        F: Fn(T) -> Flux<R> + Send + Sync + 'static,
    {
        self.flat_map_with(mapper, SMALL_BUFFER_SIZE, XS_BUFFER_SIZE)
    }

    /// Like [`Flux::flat_map`] with at most `concurrency` inners subscribed
    /// at once, each prefetching `prefetch` elements.
    #[track_caller]
    pub fn flat_map_with<R, F>(&self, mapper: F, concurrency: usize, prefetch: usize) -> Flux<R>
    where
        R: Send + 'static,
        F: Fn(T) -> Flux<R> + Send + Sync + 'static,
    {
        Flux::assemble(
            "Flux.flatMap",
            FlatMapPublisher::new(self.upstream(), Arc::new(mapper), concurrency.max(1), prefetch.max(1)),
        )
    }

    /// Maps every element to an iterable and emits its items in order.
    #[track_caller]
    pub fn flat_map_iterable<R, I, F>(&self, mapper: F) -> Flux<R>
    where
        R: Send + 'static,
        I: IntoIterator<Item = R>,
        I::IntoIter: Send + 'static,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        Flux::assemble(
            "Flux.flatMapIterable",
            FlatMapIterablePublisher::new(
                self.upstream(),
                Arc::new(move |item| Box::new(mapper(item).into_iter()) as Box<dyn Iterator<Item = R> + Send>),
                SMALL_BUFFER_SIZE,
            ),
        )
    }

    /// Maps every element to an inner stream and emits the inners one after
    /// the other.
    #[track_caller]
    pub fn concat_map<R, F>(&self, mapper: F) -> Flux<R>
    where
        R: Send + 'static,
        F: Fn(T) -> Flux<R> + Send + Sync + 'static,
    {
        self.concat_map_with(mapper, XS_BUFFER_SIZE)
    }

    /// Like [`Flux::concat_map`], prefetching `prefetch` upstream elements.
    #[track_caller]
    pub fn concat_map_with<R, F>(&self, mapper: F, prefetch: usize) -> Flux<R>
    where
        R: Send + 'static,
        F: Fn(T) -> Flux<R> + Send + Sync + 'static,
    {
        Flux::assemble(
            "Flux.concatMap",
            ConcatMapPublisher::new(self.upstream(), Arc::new(mapper), prefetch.max(1)),
        )
    }

    /// Requests everything upstream and buffers what downstream has not
    /// requested yet, without bound.
    #[track_caller]
    pub fn on_backpressure_buffer(&self) -> Self {
        Self::assemble("Flux.onBackpressureBuffer", BufferPublisher::new(self.upstream(), None))
    }

    /// Like [`Flux::on_backpressure_buffer`], failing with
    /// [`ErrorKind::Overflow`](crate::ErrorKind::Overflow) once more than
    /// `capacity` elements are buffered.
    #[track_caller]
    pub fn on_backpressure_buffer_with(&self, capacity: usize) -> Self {
        Self::assemble(
            "Flux.onBackpressureBuffer",
            BufferPublisher::new(self.upstream(), Some(capacity.max(1))),
        )
    }

    /// Delivers signals on a worker of `scheduler`, holding errors back
    /// until buffered elements are delivered.
    #[track_caller]
    pub fn publish_on(&self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.publish_on_with(scheduler, false, SMALL_BUFFER_SIZE)
    }

    /// Delivers signals on a worker of `scheduler`, prefetching `prefetch`
    /// elements.
    ///
    /// With `eager` an upstream error releases the buffered elements and is
    /// signalled at once.
    #[track_caller]
    pub fn publish_on_with(&self, scheduler: Arc<dyn Scheduler>, eager: bool, prefetch: usize) -> Self {
        Self::assemble(
            "Flux.publishOn",
            PublishOnPublisher::new(self.upstream(), scheduler, eager, prefetch.max(1)),
        )
    }

    /// Releases elements of type `E` discarded upstream with `release`.
    #[track_caller]
    pub fn do_on_discard<E, F>(&self, release: F) -> Self
    where
        E: Send + 'static,
        F: Fn(E) + Send + Sync + 'static,
    {
        Self::assemble(
            "Flux.doOnDiscard",
            OnDiscardPublisher::new(self.upstream(), DiscardHook::typed(release)),
        )
    }

    /// Applies a function to this flux, for reusable operator groups.
    pub fn transform<R, F>(self, f: F) -> Flux<R>
    where
        F: FnOnce(Self) -> Flux<R>,
    {
        f(self)
    }

    /// Subscribes `subscriber`.
    pub fn subscribe(&self, subscriber: impl Subscriber<T> + 'static) {
        self.source.subscribe(Box::new(subscriber));
    }

    /// Subscribes with callbacks, requesting everything. The handle cancels
    /// the subscription when disposed.
    pub fn subscribe_with<N, E, C>(&self, on_next: N, on_error: E, on_complete: C) -> Box<dyn Disposable>
    where
        N: FnMut(T) + Send + 'static,
        E: FnOnce(FluxError) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        lambda::subscribe(self, on_next, on_error, on_complete)
    }

    /// Subscribes, blocks until the stream terminates and returns the last
    /// element.
    pub fn block_last(&self) -> Result<Option<T>> {
        block::block_last(self, None).map_err(BlockingError::into_flux_error)
    }

    /// Like [`Flux::block_last`], cancelling and failing after `timeout`.
    pub fn block_last_timeout(&self, timeout: Duration) -> std::result::Result<Option<T>, BlockingError> {
        block::block_last(self, Some(timeout))
    }
}
