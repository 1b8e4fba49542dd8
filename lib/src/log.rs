// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Event macros for the MMU.
//!
//! `tracing` is only linked with the `log` feature. Without it the event
//! macros only type-check their format arguments and never evaluate them, so
//! events must use the plain format-string form.

#![allow(unused_imports, unused_macros, reason = "Not every level is used")]

#[cfg(feature = "log")]
mod events {
    // The only place the tracing dependency may be named

    pub(crate) use __tracing_do_not_use_directly::{debug, error, trace, warn as warning};
}

#[cfg(not(feature = "log"))]
mod events {
    macro_rules! error {
        ($($args:tt)*) => {
            if false {
                let _ = format_args!($($args)*);
            }
        };
    }

    /// `warn` is taken by the lint attribute
    macro_rules! warning {
        ($($args:tt)*) => {
            if false {
                let _ = format_args!($($args)*);
            }
        };
    }

    macro_rules! debug {
        ($($args:tt)*) => {
            if false {
                let _ = format_args!($($args)*);
            }
        };
    }

    macro_rules! trace {
        ($($args:tt)*) => {
            if false {
                let _ = format_args!($($args)*);
            }
        };
    }

    pub(crate) use debug;
    pub(crate) use error;
    pub(crate) use trace;
    pub(crate) use warning;
}

/// The `tracing` version events are emitted with, for embedders installing
/// a subscriber
#[cfg(feature = "log")]
#[doc(hidden)]
pub use __tracing_do_not_use_directly as tracing_internal;

pub(crate) use events::*;
