//! Fusion modes.
//!
//! Two adjacent operators may agree, during `on_subscribe`, to skip the
//! `on_next` signal path and hand elements over through the producer's
//! queue instead:
//!
//! - `Sync`: the consumer pulls with `poll` whenever it likes; `None` from
//!   `poll` means the producer completed.
//! - `Async`: the producer still pushes into its buffer and raises
//!   `on_ready`; the consumer drains with `poll` on its own cadence.

use core::fmt;

/// A fusion mode, as requested by a consumer or granted by a producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FusionMode {
    /// No fusion; regular signals.
    #[default]
    None,
    /// Synchronous pull fusion.
    Sync,
    /// Asynchronous push-then-pull fusion.
    Async,
    /// Request only: either `Sync` or `Async`, producer's choice.
    Any,
}

impl FusionMode {
    /// Returns true if a request for `self` admits the `granted` mode.
    #[must_use]
    pub const fn admits(self, granted: Self) -> bool {
        match (self, granted) {
            (Self::Any, Self::Sync | Self::Async) => true,
            (Self::Sync, Self::Sync) | (Self::Async, Self::Async) => true,
            _ => false,
        }
    }

    /// Returns true for `Sync` and `Async`.
    #[must_use]
    pub const fn is_fused(self) -> bool {
        matches!(self, Self::Sync | Self::Async)
    }

    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Sync => 1,
            Self::Async => 2,
            Self::Any => 3,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Sync,
            2 => Self::Async,
            3 => Self::Any,
            _ => Self::None,
        }
    }
}

impl fmt::Display for FusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Sync => "SYNC",
            Self::Async => "ASYNC",
            Self::Any => "ANY",
        };
        f.write_str(name)
    }
}
