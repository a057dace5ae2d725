// SPDX-License-Identifier: MIT

//! Thin severity layer on top of the `log` facade.
//!
//! The design's error table uses a `NOTICE` level between `INFO` and
//! `WARN` for auth/replay drops — one step quieter than a warning
//! because a single bad packet on an otherwise healthy connection is
//! expected, not exceptional. `log` has no such level, so `notice!`
//! logs at `Level::Info` with a `"NOTICE"` tag callers can grep for.

/// Log a packet-plane drop at NOTICE severity (auth failure, replay).
#[macro_export]
macro_rules! notice {
    ($($arg:tt)+) => {
        log::info!(target: "anytun::notice", $($arg)+)
    };
}

/// Log a route-miss drop at DEBUG severity per the design's `RouteFailure` row.
#[macro_export]
macro_rules! route_debug {
    ($($arg:tt)+) => {
        log::debug!(target: "anytun::route", $($arg)+)
    };
}

pub use crate::notice;
pub use crate::route_debug;
