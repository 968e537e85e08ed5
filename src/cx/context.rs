//! The immutable subscriber context.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::discard::{DiscardHook, Discarded};
use crate::observability::stats::StatsScope;
use crate::tracing_compat::trace;

/// Context attached to a subscriber and visible to every operator upstream.
///
/// Contexts are immutable; the `with_*` methods return a new context that
/// shares the rest of the entries. Cloning is a reference-count bump.
#[derive(Clone, Default)]
pub struct Context {
    inner: Option<Arc<Entries>>,
}

#[derive(Clone, Default)]
struct Entries {
    /// Closest to the discarding operator first.
    discard: SmallVec<[DiscardHook; 2]>,
    stats: Option<StatsScope>,
    inner_index: Option<usize>,
}

impl Context {
    /// Returns the empty context.
    #[must_use]
    pub const fn empty() -> Self {
        Self { inner: None }
    }

    fn entries(&self) -> Entries {
        self.inner.as_deref().cloned().unwrap_or_default()
    }

    fn from_entries(entries: Entries) -> Self {
        Self {
            inner: Some(Arc::new(entries)),
        }
    }

    /// Adds a discard hook in front of the existing ones.
    #[must_use]
    pub fn with_discard_hook(&self, hook: DiscardHook) -> Self {
        let mut entries = self.entries();
        entries.discard.insert(0, hook);
        Self::from_entries(entries)
    }

    /// Adds a hook releasing elements of type `E`.
    #[must_use]
    pub fn on_discard<E, F>(&self, release: F) -> Self
    where
        E: Send + 'static,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.with_discard_hook(DiscardHook::typed(release))
    }

    /// Returns true if at least one discard hook is installed.
    #[must_use]
    pub fn has_discard_hook(&self) -> bool {
        self.inner
            .as_deref()
            .is_some_and(|entries| !entries.discard.is_empty())
    }

    /// Releases an element the caller owns and will not deliver.
    ///
    /// The first hook whose type matches consumes it; without a matching
    /// hook the element is dropped.
    pub fn discard<E: Send + 'static>(&self, element: E) {
        let Some(entries) = self.inner.as_deref() else {
            return;
        };
        if entries.discard.is_empty() {
            return;
        }
        let mut boxed: Discarded = Box::new(element);
        for hook in &entries.discard {
            match hook.apply(boxed) {
                None => return,
                Some(unmatched) => boxed = unmatched,
            }
        }
        trace!("discarded element of unhooked type dropped");
    }

    /// Releases every element of `elements`; returns how many were released.
    pub fn discard_all<E, I>(&self, elements: I) -> usize
    where
        E: Send + 'static,
        I: IntoIterator<Item = E>,
    {
        let mut count = 0;
        for element in elements {
            self.discard(element);
            count += 1;
        }
        count
    }

    /// Releases the rest of an iterator when it is known to be finite.
    ///
    /// Iterators whose `size_hint` has no upper bound may be infinite and are
    /// dropped without being drained.
    pub fn discard_remaining<E, I>(&self, iter: I) -> usize
    where
        E: Send + 'static,
        I: Iterator<Item = E>,
    {
        if iter.size_hint().1.is_none() {
            return 0;
        }
        self.discard_all(iter)
    }

    pub(crate) fn stats_scope(&self) -> Option<&StatsScope> {
        self.inner.as_deref().and_then(|entries| entries.stats.as_ref())
    }

    pub(crate) fn with_stats_scope(&self, scope: StatsScope) -> Self {
        let mut entries = self.entries();
        entries.stats = Some(scope);
        entries.inner_index = None;
        Self::from_entries(entries)
    }

    /// Marks the context of an inner subscriber of a fan-out operator.
    pub(crate) fn with_inner_index(&self, index: usize) -> Self {
        let mut entries = self.entries();
        entries.inner_index = Some(index);
        Self::from_entries(entries)
    }

    pub(crate) fn inner_index(&self) -> Option<usize> {
        self.inner.as_deref().and_then(|entries| entries.inner_index)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.inner.as_deref();
        f.debug_struct("Context")
            .field("discard_hooks", &entries.map_or(0, |e| e.discard.len()))
            .field("traced", &entries.is_some_and(|e| e.stats.is_some()))
            .field("inner_index", &entries.and_then(|e| e.inner_index))
            .finish()
    }
}
