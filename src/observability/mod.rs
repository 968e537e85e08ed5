//! Diagnostics attached to assembled operators.
//!
//! # Components
//!
//! - [`CallSite`]: where an operator was declared, optionally with the
//!   declaring method resolved from the stack
//! - [`AssemblySite`]: operator name plus call site; appended to errors
//!   travelling through operators assembled with operator debug
//! - [`StageStats`] / [`StatsChain`]: per-stage counters recorded while
//!   stats recording is enabled
//! - [`StatsReport`]: snapshot and text rendering of a chain
//! - [`StatsReporter`]: where rendered reports go ([`LogReporter`] by
//!   default, [`WriterReporter`] for any `io::Write`)

pub mod assembly;
pub mod call_site;
pub mod report;
pub mod reporter;
pub mod stats;

pub use assembly::AssemblySite;
pub use call_site::CallSite;
pub use report::{ChainSnapshot, InnerSnapshot, StageSnapshot, StatsReport, format_elapsed};
pub use reporter::{LogReporter, StatsReporter, WriterReporter};
pub use stats::{StageStats, StatsChain};
