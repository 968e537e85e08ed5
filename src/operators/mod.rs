//! Operator implementations behind the [`Flux`](crate::Flux) builder.
//!
//! Every operator owns the elements it holds (queued, polled, or being
//! mapped) and either delivers them downstream or releases them through the
//! subscriber [`Context`](crate::cx::Context). Operators that buffer funnel
//! all delivery through an [`Emitter`](crate::flow::emitter::Emitter) so a
//! cancellation racing with delivery is seen by the single drainer, which
//! then releases whatever is left.

pub(crate) mod concat_map;
pub(crate) mod filter;
pub(crate) mod flat_map;
pub(crate) mod flat_map_iterable;
pub(crate) mod hide;
pub(crate) mod inner;
pub(crate) mod map;
pub(crate) mod on_backpressure_buffer;
pub(crate) mod on_discard;
pub(crate) mod publish_on;
pub(crate) mod source;

use std::sync::Arc;

use crate::error::Rejected;
use crate::flux::Flux;

/// Fallible element transformation.
pub(crate) type MapFn<T, R> = Arc<dyn Fn(T) -> Result<R, Rejected<T>> + Send + Sync>;

/// Element to inner stream.
pub(crate) type FlatMapFn<T, R> = Arc<dyn Fn(T) -> Flux<R> + Send + Sync>;

/// Element to iterator of results.
pub(crate) type IterFn<T, R> = Arc<dyn Fn(T) -> Box<dyn Iterator<Item = R> + Send> + Send + Sync>;

/// Element filter.
pub(crate) type PredicateFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Replenishment threshold for a prefetch window: request more once three
/// quarters of the window were consumed.
pub(crate) const fn replenish_limit(prefetch: usize) -> u64 {
    if prefetch == usize::MAX {
        return u64::MAX;
    }
    let limit = prefetch - (prefetch >> 2);
    if limit == 0 { 1 } else { limit as u64 }
}

/// Converts a prefetch amount to the initial upstream request.
pub(crate) const fn prefetch_request(prefetch: usize) -> u64 {
    if prefetch == usize::MAX {
        crate::types::UNBOUNDED
    } else {
        prefetch as u64
    }
}
