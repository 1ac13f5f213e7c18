//! Logging macros that cost nothing unless the `tracing` feature is on.
//!
//! With the feature enabled each macro forwards to the `tracing` macro of the
//! same level; without it the macro expands to nothing.
//!
//! ```bash
//! # Library build, no logging code at all
//! cargo build --release
//!
//! # Tests with split/layer/retry events
//! RUST_LOG=masstrie::tree=debug cargo test --features tracing --test stress_tests
//! ```
//!
//! Functions on the write path carry
//! `#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]`
//! so their spans appear only in traced builds.

#![allow(unused_macros, unused_imports)]

/// Trace-level event.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
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
    ($($arg:tt)*) => {};
}

/// Warn-level event.
#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
pub(crate) use warn_log;
