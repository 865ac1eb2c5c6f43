//! Diagnostic events that cost nothing unless asked for.
//!
//! With the `tracing` feature enabled, the macros here forward to the [`tracing`] crate. Without
//! it, they expand to nothing at all, so the hot CAS loops stay free of any logging overhead.
//!
//! ```bash
//! RUST_LOG=conlist=trace cargo test --features tracing par_remove_same
//! ```

#![allow(unused_macros)]

/// Trace-level event, for the per-retry chatter of the CAS loops.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {{}};
}

/// Debug-level event.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {{}};
}
