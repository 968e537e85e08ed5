//! Error types for stream signals.
//!
//! A [`FluxError`] is the payload of an `on_error` signal. It carries an
//! [`ErrorKind`] that classifies where the failure came from, a message, an
//! optional source error, and (when operator debug is enabled) the assembly
//! sites of the operators it travelled through.
//!
//! User callbacks that can fail hand the element they were given back
//! through [`Rejected`], so the operator can release it before the error
//! propagates.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use thiserror::Error;

use crate::observability::AssemblySite;

/// Convenience alias for results carrying a [`FluxError`].
pub type Result<T, E = FluxError> = std::result::Result<T, E>;

/// Classification of a stream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A user supplied callback (mapper, predicate) failed.
    Callback,
    /// A component broke the subscriber/subscription protocol
    /// (null mapping, next without demand, zero demand, duplicate subscribe).
    ProtocolViolation,
    /// A bounded buffer could not accept an element.
    Overflow,
    /// A scheduler refused to run a task.
    SchedulerRejected,
    /// An error produced by a source on behalf of the user.
    Upstream,
    /// An unrecoverable failure; bypasses user hooks.
    Fatal,
}

impl ErrorKind {
    /// Returns a short lowercase name for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Callback => "callback failed",
            Self::ProtocolViolation => "protocol violation",
            Self::Overflow => "overflow",
            Self::SchedulerRejected => "scheduler rejected task",
            Self::Upstream => "upstream error",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error payload of an `on_error` signal.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct FluxError {
    kind: ErrorKind,
    message: Cow<'static, str>,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    assembly: SmallVec<[Arc<AssemblySite>; 2]>,
}

impl FluxError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            assembly: SmallVec::new(),
        }
    }

    /// A user callback failed.
    pub fn callback(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Callback, message)
    }

    /// A user callback produced no value where one was required.
    #[must_use]
    pub fn null_value(callback: &'static str) -> Self {
        Self::new(
            ErrorKind::ProtocolViolation,
            format!("The {callback} returned a null value."),
        )
    }

    /// A protocol violation.
    pub fn protocol(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, message)
    }

    /// The violation raised for `request(0)`.
    #[must_use]
    pub fn bad_request() -> Self {
        Self::protocol("request amount must be positive (request(0) received)")
    }

    /// A bounded buffer overflowed.
    pub fn overflow(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Overflow, message)
    }

    /// The standard overflow raised when a source ignores backpressure.
    #[must_use]
    pub fn queue_full() -> Self {
        Self::overflow("Queue is full: source doesn't respect backpressure")
    }

    /// A scheduler refused a task.
    pub fn scheduler_rejected(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::SchedulerRejected, message)
    }

    /// A user-provided upstream error.
    pub fn upstream(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    /// An unrecoverable failure.
    pub fn fatal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Attaches a source error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true for [`ErrorKind::Fatal`].
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Fatal)
    }

    /// Returns the assembly sites this error passed through, closest to the
    /// failure first.
    #[must_use]
    pub fn assembly_trace(&self) -> &[Arc<AssemblySite>] {
        &self.assembly
    }

    /// Records that the error passed through an operator assembled at `site`.
    pub(crate) fn push_assembly(&mut self, site: Arc<AssemblySite>) {
        if self.assembly.iter().any(|known| Arc::ptr_eq(known, &site)) {
            return;
        }
        self.assembly.push(site);
    }

    /// Renders the message followed by the assembly trace, one site per line.
    #[must_use]
    pub fn traceback(&self) -> String {
        let mut out = self.to_string();
        if self.assembly.is_empty() {
            return out;
        }
        out.push_str("\nAssembly trace:");
        for site in &self.assembly {
            out.push_str("\n\t");
            out.push_str(site.name());
            out.push_str(" ⇢ at ");
            out.push_str(&site.call_site().to_string());
        }
        out
    }
}

/// A failed user callback handing its input back for release.
///
/// Returned by fallible mappers (see [`crate::Flux::try_map`]). The operator
/// releases `element` through the subscriber context, cancels its upstream,
/// and signals `error` downstream.
#[derive(Debug)]
pub struct Rejected<T> {
    /// The element the callback was given.
    pub element: T,
    /// The error to signal downstream.
    pub error: FluxError,
}

impl<T> Rejected<T> {
    /// Rejects `element` with a custom error.
    pub fn new(element: T, error: FluxError) -> Self {
        Self { element, error }
    }

    /// Rejects `element` the way a mapper returning no value would.
    pub fn null(element: T) -> Self {
        Self {
            element,
            error: FluxError::null_value("mapper"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::CallSite;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn display_includes_kind_and_message() {
        init_test("display_includes_kind_and_message");
        let err = FluxError::null_value("mapper");
        let rendered = err.to_string();
        crate::assert_with_log!(
            rendered == "protocol violation: The mapper returned a null value.",
            "display",
            "protocol violation: The mapper returned a null value.",
            rendered
        );
        crate::test_complete!("display_includes_kind_and_message");
    }

    #[test]
    fn source_is_exposed() {
        init_test("source_is_exposed");
        let io = std::io::Error::other("disk gone");
        let err = FluxError::upstream("read failed").with_source(io);
        let source = std::error::Error::source(&err).map(ToString::to_string);
        crate::assert_with_log!(
            source.as_deref() == Some("disk gone"),
            "source",
            Some("disk gone"),
            source
        );
        crate::test_complete!("source_is_exposed");
    }

    #[test]
    fn assembly_sites_are_deduplicated() {
        init_test("assembly_sites_are_deduplicated");
        let site = Arc::new(AssemblySite::new("Flux.map", CallSite::here()));
        let mut err = FluxError::callback("boom");
        err.push_assembly(Arc::clone(&site));
        err.push_assembly(Arc::clone(&site));
        crate::assert_with_log!(
            err.assembly_trace().len() == 1,
            "one site",
            1,
            err.assembly_trace().len()
        );
        let traceback = err.traceback();
        crate::assert_with_log!(
            traceback.contains("Flux.map ⇢ at "),
            "traceback names operator",
            true,
            traceback
        );
        crate::test_complete!("assembly_sites_are_deduplicated");
    }

    #[test]
    fn fatal_is_flagged() {
        init_test("fatal_is_flagged");
        let err = FluxError::fatal("vm error");
        crate::assert_with_log!(err.is_fatal(), "fatal", true, err.is_fatal());
        crate::assert_with_log!(
            !FluxError::queue_full().is_fatal(),
            "overflow not fatal",
            false,
            FluxError::queue_full().is_fatal()
        );
        crate::test_complete!("fatal_is_flagged");
    }
}
