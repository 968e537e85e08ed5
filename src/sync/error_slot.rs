//! First-wins storage for a pending terminal error.

use parking_lot::Mutex;

use crate::error::FluxError;

/// Holds the first error an operator observed until a drain loop signals it.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    state: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    error: Option<FluxError>,
    taken: bool,
}

impl ErrorSlot {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                error: None,
                taken: false,
            }),
        }
    }

    /// Stores `error` if no error was stored before; otherwise hands it back.
    pub fn set(&self, error: FluxError) -> Result<(), FluxError> {
        let mut state = self.state.lock();
        if state.taken || state.error.is_some() {
            return Err(error);
        }
        state.error = Some(error);
        Ok(())
    }

    /// Returns true if an error is stored or was already taken.
    #[must_use]
    pub fn is_set(&self) -> bool {
        let state = self.state.lock();
        state.taken || state.error.is_some()
    }

    /// Takes the stored error for signalling. Later [`ErrorSlot::set`] calls
    /// are rejected.
    pub fn take(&self) -> Option<FluxError> {
        let mut state = self.state.lock();
        let error = state.error.take();
        if error.is_some() {
            state.taken = true;
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("first_error_wins");
        let slot = ErrorSlot::new();
        let first = slot.set(FluxError::callback("first"));
        crate::assert_with_log!(first.is_ok(), "first stored", true, first.is_ok());
        let second = slot.set(FluxError::callback("second"));
        crate::assert_with_log!(second.is_err(), "second rejected", true, second.is_ok());

        let taken = slot.take().map(|e| e.message().to_owned());
        crate::assert_with_log!(
            taken.as_deref() == Some("first"),
            "first taken",
            Some("first"),
            taken
        );
        let late = slot.set(FluxError::callback("late"));
        crate::assert_with_log!(late.is_err(), "late rejected", true, late.is_ok());
        crate::assert_with_log!(slot.is_set(), "still set", true, slot.is_set());
        crate::test_complete!("first_error_wins");
    }
}
