//! Optional tracing integration.
//!
//! With the `tracing-integration` feature the logging macros are the ones
//! from the `tracing` crate. Without it they expand to nothing, while still
//! type-checking their format arguments, so call sites never need `cfg`
//! guards.
//!
//! Only the format-string form (`debug!("x = {}", x)`) is used inside the
//! crate.

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __tributary_log_noop {
    ($($arg:tt)*) => {{
        if false {
            let _ = ::std::format_args!($($arg)*);
        }
    }};
}

#[cfg(not(feature = "tracing-integration"))]
pub use crate::__tributary_log_noop as debug;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__tributary_log_noop as error;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__tributary_log_noop as info;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__tributary_log_noop as trace;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__tributary_log_noop as warn;
