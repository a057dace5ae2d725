// SPDX-License-Identifier: MIT

//! Error taxonomy for the packet-plane engine.
//!
//! Each variant maps to one row of the error table in the design: a
//! kind, the propagation rule that goes with it, and (for packet-level
//! failures) the log level a caller should use when dropping the
//! packet that triggered it.

use std::fmt;
use std::net::AddrParseError;

/// Top-level error type returned by fallible `anytun_core` operations.
///
/// Packet-level variants (`Auth`, `Replay`, `Route`, `Crypto`,
/// `Network`, `Device`) never mutate cross-packet state; the caller is
/// expected to log and drop the packet rather than propagate further.
#[derive(Debug)]
pub enum Error {
    /// Unknown algorithm name, invalid key length, malformed prefix, etc.
    Config(String),
    /// Startup name resolution failure.
    Resolve(String),
    /// TUN/TAP device read or write failure.
    Device(String),
    /// UDP send/recv failure.
    Network(String),
    /// HMAC key load or AES keying failure.
    Crypto(String),
    /// Authentication tag did not verify.
    AuthFailure,
    /// Sequence number was a replay or fell outside the window.
    ReplayFailure,
    /// No route matched the destination address.
    RouteFailure,
    /// Sync-protocol frame was malformed or violated field constraints.
    SyncProtocol(String),
    /// The requested multiplex id has no connection.
    NotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(s) => write!(f, "configuration error: {s}"),
            Self::Resolve(s) => write!(f, "resolve error: {s}"),
            Self::Device(s) => write!(f, "device error: {s}"),
            Self::Network(s) => write!(f, "network error: {s}"),
            Self::Crypto(s) => write!(f, "crypto error: {s}"),
            Self::AuthFailure => write!(f, "authentication tag mismatch"),
            Self::ReplayFailure => write!(f, "sequence number replay or too old"),
            Self::RouteFailure => write!(f, "no route to destination"),
            Self::SyncProtocol(s) => write!(f, "sync protocol error: {s}"),
            Self::NotFound => write!(f, "connection not found"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<AddrParseError> for Error {
    fn from(e: AddrParseError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;
