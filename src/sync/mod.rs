//! Synchronization primitives for drain loops.
//!
//! - [`DrainGate`]: single-drainer gate with missed-work accounting
//! - [`ErrorSlot`]: first-wins holder for a pending terminal error

pub mod drain_gate;
pub mod error_slot;

pub use drain_gate::DrainGate;
pub use error_slot::ErrorSlot;
