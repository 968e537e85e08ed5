//! Signal kinds and stage state.
//!
//! These are the values the stats layer records for each traced stage.
//! [`SignalType`] is the last flow signal seen (`onSubscribe`, `request`,
//! `onNext`); terminal signals and cancellation only move [`StageState`].

use core::fmt;

use serde::Serialize;

/// A flow signal observed on a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum SignalType {
    /// No signal observed yet.
    #[default]
    None = 0,
    /// The stage handed its subscription downstream.
    OnSubscribe = 1,
    /// Downstream requested more elements.
    Request = 2,
    /// The stage delivered an element.
    OnNext = 3,
}

impl SignalType {
    /// Returns the rendered name (`onSubscribe`, `request`, `onNext`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::OnSubscribe => "onSubscribe",
            Self::Request => "request",
            Self::OnNext => "onNext",
        }
    }

    /// Decodes the `repr(u8)` value, defaulting to [`SignalType::None`].
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::OnSubscribe,
            2 => Self::Request,
            3 => Self::OnNext,
            _ => Self::None,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a stage subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum StageState {
    /// Subscribed and not terminated.
    #[default]
    Active = 0,
    /// Delivered `on_complete`.
    Completed = 1,
    /// Delivered `on_error`.
    Errored = 2,
    /// Cancelled by downstream.
    Canceled = 3,
}

impl StageState {
    /// Returns the rendered name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Canceled => "canceled",
        }
    }

    /// Decodes the `repr(u8)` value, defaulting to [`StageState::Active`].
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Completed,
            2 => Self::Errored,
            3 => Self::Canceled,
            _ => Self::Active,
        }
    }

    /// Returns true for every state except [`StageState::Active`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
