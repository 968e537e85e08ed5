//! Tributary: reactive streams with demand-driven backpressure, guaranteed
//! element release and per-operator statistics.
//!
//! # Overview
//!
//! A [`Flux`] is an assembled chain of operators. Nothing runs until a
//! [`Subscriber`] subscribes; from then on elements flow downstream only as
//! far as the demand the subscriber requested, and cancellation flows
//! upstream.
//!
//! # Core Guarantees
//!
//! - **No leaked elements**: every element an operator drops, filters out,
//!   buffers past cancellation or holds when an error occurs is handed to
//!   the discard hook registered in the subscriber's [`Context`], exactly
//!   once
//! - **Serialized delivery**: a subscriber never sees two signals at once,
//!   whichever threads produce, request and cancel
//! - **Immediate errors**: an error releases every buffered element and
//!   cancels upstream before it is signalled
//! - **Diagnostics on demand**: with [`Hooks::enable_stats_recording`] every
//!   operator assembled afterwards records signal counts and timings and a
//!   report is emitted when the chain terminates or is cancelled
//!
//! # Module Structure
//!
//! - [`flow`]: the subscriber / subscription / publisher protocol and fusion
//! - [`flux`]: the fluent assembly surface
//! - [`cx`]: subscriber context and discard hooks
//! - [`types`]: demand accounting, fusion modes, signal kinds
//! - [`queue`]: bounded and unbounded element queues
//! - [`sync`]: drain gates and error slots
//! - [`scheduler`]: where `publish_on` delivers
//! - [`observability`]: call sites, assembly traces and stats reports
//! - [`config`]: global hooks and their configuration sources
//! - [`error`](mod@error): the error taxonomy
//! - [`tracing_compat`]: optional tracing integration (requires `tracing-integration` feature)
//! - [`testing`]: leak tracker and test doubles (requires `test-internals` feature)
//!
//! # Example
//!
//! ```ignore
//! use tributary::{Context, Flux};
//!
//! let (subscriber, probe) = tributary::testing::AssertSubscriber::with_context(
//!     2,
//!     Context::empty().on_discard(|buffer: Vec<u8>| drop(buffer)),
//! );
//! Flux::from_iter(vec![vec![1u8], vec![2], vec![3]])
//!     .on_backpressure_buffer()
//!     .subscribe(subscriber);
//! probe.cancel();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

// ── Protocol and assembly ───────────────────────────────────────────────
pub mod config;
pub mod cx;
pub mod error;
pub mod flow;
pub mod flux;
pub mod observability;
pub(crate) mod operators;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod tracing_compat;
pub mod types;

// ── Test-only modules ───────────────────────────────────────────────────
#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;
#[cfg(any(test, feature = "test-internals"))]
pub mod testing;

// Re-exports for convenient access to core types
pub use config::{ConfigError, Hooks, HooksConfig, StatsConfig};
pub use cx::{Context, DiscardHook};
pub use error::{ErrorKind, FluxError, Rejected, Result};
pub use flow::{
    BoxSubscriber, CancelledSubscriber, EmptySubscription, Publisher, QueueSubscription, Subscriber,
    Subscription, SubscriptionSlot, TryNext, Upstream,
};
pub use flux::{BlockingError, Flux};
pub use observability::{LogReporter, StatsReport, StatsReporter, WriterReporter};
pub use queue::{SMALL_BUFFER_SIZE, XS_BUFFER_SIZE};
pub use scheduler::{Disposable, Scheduler, SchedulerError, Worker};
pub use types::{Demand, FusionMode, SignalType, StageState, UNBOUNDED};
