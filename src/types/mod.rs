//! Core types for the stream runtime.
//!
//! - [`demand`]: Saturating demand arithmetic and the atomic outstanding-demand counter
//! - [`signal`]: Signal kinds and per-stage terminal state, as recorded by the stats layer
//! - [`fusion`]: Fusion modes negotiated between adjacent operators

pub mod demand;
pub mod fusion;
pub mod signal;

pub use demand::{Demand, UNBOUNDED};
pub use fusion::FusionMode;
pub use signal::{SignalType, StageState};
