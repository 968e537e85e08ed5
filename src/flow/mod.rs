//! The subscriber/subscription/publisher protocol.
//!
//! # Signals
//!
//! A [`Publisher`] delivers, to each [`Subscriber`] that subscribes to it,
//! exactly one `on_subscribe` followed by any number of `on_next` calls
//! bounded by the demand the subscriber requested, followed by at most one
//! terminal signal (`on_error` or `on_complete`). The subscriber talks back
//! through the [`Subscription`] it received (`request`, `cancel`).
//!
//! Signals towards one subscriber are serialized: components that may be
//! called from several threads funnel delivery through a
//! [`DrainGate`](crate::sync::DrainGate) so only one thread touches the
//! subscriber at a time.
//!
//! # Ownership
//!
//! Elements move by value. Whoever holds an element and does not pass it on
//! releases it through [`Context::discard`](crate::cx::Context::discard).

pub mod cancelled;
pub(crate) mod emitter;
pub mod publisher;
pub mod slot;
pub mod subscriber;
pub mod subscription;

pub use cancelled::CancelledSubscriber;
pub use publisher::Publisher;
pub use slot::SubscriptionSlot;
pub use subscriber::{BoxSubscriber, Subscriber, TryNext};
pub use subscription::{EmptySubscription, QueueSubscription, Subscription, Upstream};
