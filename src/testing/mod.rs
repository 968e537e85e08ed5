//! Test doubles for exercising operators.
//!
//! - [`Tracker`] / [`Tracked`]: reference-counted test elements that count
//!   releases and report leaks
//! - [`AssertSubscriber`] / [`AssertProbe`]: a recording subscriber and the
//!   handle the test drives it with
//! - [`TestPublisher`]: a manually driven source, optionally misbehaving
//!   in the ways listed by [`Violation`]
//! - [`race`] / [`race3`]: run closures concurrently from a common start
//! - [`CaptureReporter`]: a stats reporter that keeps rendered reports
//!
//! ```ignore
//! let tracker = Tracker::new();
//! let (subscriber, probe) =
//!     AssertSubscriber::with_context(0, Context::empty().on_discard(Tracked::release));
//! Flux::from_iter_once(tracker.batch(4)).subscribe(subscriber);
//! probe.cancel();
//! assert_eq!(tracker.leaked(), 0);
//! ```

mod publisher;
mod race;
mod reporter;
mod subscriber;
mod tracker;

pub use publisher::{TestPublisher, Violation};
pub use race::{race, race3};
pub use reporter::CaptureReporter;
pub use subscriber::{AssertProbe, AssertSubscriber, AssertSubscriberBuilder};
pub use tracker::{Tracked, Tracker};
