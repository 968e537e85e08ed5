//! Discard hooks.
//!
//! A hook is type-directed: it receives the element boxed as `dyn Any` and
//! either consumes it (the element matched) or hands it back so the next
//! hook can try. A hook that panics is logged and treated as having
//! consumed the element; it never changes the stream's terminal signal.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::tracing_compat::warn;

/// A boxed element on its way to a discard hook.
pub type Discarded = Box<dyn Any + Send>;

type HookFn = dyn Fn(Discarded) -> Option<Discarded> + Send + Sync;

/// A release callback for elements of one type.
#[derive(Clone)]
pub struct DiscardHook {
    type_name: &'static str,
    apply: Arc<HookFn>,
}

impl DiscardHook {
    /// Creates a hook that releases elements of type `E` and passes
    /// everything else on.
    pub fn typed<E, F>(release: F) -> Self
    where
        E: Send + 'static,
        F: Fn(E) + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<E>(),
            apply: Arc::new(move |element: Discarded| match element.downcast::<E>() {
                Ok(element) => {
                    release(*element);
                    None
                }
                Err(other) => Some(other),
            }),
        }
    }

    /// Creates a hook that consumes every element regardless of type.
    pub fn any<F>(release: F) -> Self
    where
        F: Fn(Discarded) + Send + Sync + 'static,
    {
        Self {
            type_name: "dyn Any",
            apply: Arc::new(move |element: Discarded| {
                release(element);
                None
            }),
        }
    }

    /// Name of the element type this hook releases.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Offers `element` to the hook; returns it if the type did not match.
    pub(crate) fn apply(&self, element: Discarded) -> Option<Discarded> {
        match catch_unwind(AssertUnwindSafe(|| (self.apply)(element))) {
            Ok(unmatched) => unmatched,
            Err(_) => {
                warn!("discard hook for {} panicked; element dropped", self.type_name);
                None
            }
        }
    }
}

impl fmt::Debug for DiscardHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscardHook")
            .field("type_name", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn typed_hook_passes_other_types_on() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("typed_hook_passes_other_types_on");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let hook = DiscardHook::typed(move |value: u32| {
            counter.fetch_add(value as usize, Ordering::SeqCst);
        });

        let matched = hook.apply(Box::new(7u32));
        crate::assert_with_log!(matched.is_none(), "u32 consumed", true, matched.is_some());

        let unmatched = hook.apply(Box::new("text"));
        crate::assert_with_log!(unmatched.is_some(), "str returned", true, unmatched.is_none());
        crate::assert_with_log!(
            hits.load(Ordering::SeqCst) == 7,
            "hook ran once",
            7,
            hits.load(Ordering::SeqCst)
        );
        crate::test_complete!("typed_hook_passes_other_types_on");
    }

    #[test]
    fn panicking_hook_is_contained() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("panicking_hook_is_contained");
        let hook = DiscardHook::typed(|_: u8| panic!("release failed"));
        let result = hook.apply(Box::new(1u8));
        crate::assert_with_log!(result.is_none(), "treated as consumed", true, result.is_some());
        crate::test_complete!("panicking_hook_is_contained");
    }
}
