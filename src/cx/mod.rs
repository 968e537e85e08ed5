//! Subscriber context.
//!
//! A [`Context`] travels from a subscriber to every operator upstream of it
//! during subscription. It carries the user's discard hooks, which the
//! runtime calls for every element it owns and cannot deliver, plus the
//! bookkeeping the stats layer needs to link stages into chains.

pub mod context;
pub mod discard;

pub use context::Context;
pub use discard::DiscardHook;
