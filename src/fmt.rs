//! Logging macros used throughout the crate.
//!
//! Firmware builds log via defmt (RTT).  Host builds of the library, which
//! is how the engine and dispatcher are tested, log via the `log` facade
//! instead, so the same call sites work in both.  Anything passed to these
//! macros must therefore implement both `defmt::Format` (when the `defmt`
//! feature is enabled) and `core::fmt::Display`.
//!
//! The macros are defined under prefixed names and re-exported under the
//! usual ones, as a plain `use warn;` clashes with the built-in attribute.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![allow(unused_macros)]

macro_rules! log_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::trace!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        ::log::trace!($($arg)*);
    }};
}
pub(crate) use log_trace as trace;

macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        ::log::debug!($($arg)*);
    }};
}
pub(crate) use log_debug as debug;

macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        ::log::info!($($arg)*);
    }};
}
pub(crate) use log_info as info;

macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        ::log::warn!($($arg)*);
    }};
}
pub(crate) use log_warn as warn;

macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        ::log::error!($($arg)*);
    }};
}
pub(crate) use log_error as error;
