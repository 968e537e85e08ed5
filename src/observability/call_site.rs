//! Call-site capture.
//!
//! Every assembly method is `#[track_caller]`, so the file and line of the
//! user code that declared an operator are free to obtain. Resolving the
//! *method* that contains that line needs a stack walk and symbol lookup;
//! it only happens with operator debug enabled and the `stack-capture`
//! feature compiled in.

use std::fmt;
use std::panic::Location;

use serde::Serialize;

/// Where an operator was declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSite {
    file: &'static str,
    line: u32,
    column: u32,
    method: Option<String>,
}

impl CallSite {
    /// Captures the caller's location without resolving the method.
    #[track_caller]
    #[must_use]
    pub fn here() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
            method: None,
        }
    }

    /// Captures the caller's location and the first stack frame whose
    /// demangled path does not start with one of `frame_filter`.
    #[track_caller]
    #[must_use]
    pub fn capture(frame_filter: &[String]) -> Self {
        let mut site = Self::here();
        site.method = resolve_method(frame_filter);
        site
    }

    /// Source file path as recorded by the compiler.
    #[must_use]
    pub const fn file(&self) -> &'static str {
        self.file
    }

    /// Final path component of [`CallSite::file`].
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        let file = self.file;
        file.rsplit(['/', '\\']).next().unwrap_or(file)
    }

    /// One-based line number.
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    /// One-based column number.
    #[must_use]
    pub const fn column(&self) -> u32 {
        self.column
    }

    /// Demangled path of the declaring function, if resolved.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{}({}:{})", method, self.file_name(), self.line),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// Returns true if `path` belongs to a filtered namespace.
///
/// Trait-impl frames render as `<path as Trait>::method`; the leading `<`
/// is ignored.
pub(crate) fn is_filtered(path: &str, frame_filter: &[String]) -> bool {
    let path = path.trim_start_matches('<');
    frame_filter.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

#[cfg(feature = "stack-capture")]
fn resolve_method(frame_filter: &[String]) -> Option<String> {
    let mut found: Option<String> = None;
    backtrace::trace(|frame| {
        backtrace::resolve_frame(frame, |symbol| {
            if found.is_some() {
                return;
            }
            let Some(name) = symbol.name() else {
                return;
            };
            let demangled = match name.as_str() {
                Some(raw) => format!("{:#}", rustc_demangle::demangle(raw)),
                None => format!("{name:#}"),
            };
            if !demangled.contains("::") || is_filtered(&demangled, frame_filter) {
                return;
            }
            found = Some(demangled);
        });
        found.is_none()
    });
    found
}

#[cfg(not(feature = "stack-capture"))]
fn resolve_method(_frame_filter: &[String]) -> Option<String> {
    None
}
