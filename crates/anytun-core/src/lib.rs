// SPDX-License-Identifier: MIT

//! Packet-plane engine for a SATP-style secure anycast tunnel: key
//! schedule, cipher, replay window, connection/routing tables, the
//! packet pipeline and the cluster sync protocol.

pub mod authalgo;
pub mod buffer;
pub mod cipher;
pub mod connectionlist;
pub mod device;
pub mod error;
#[macro_use]
pub mod logging;
pub mod keyderivation;
pub mod pipeline;
pub mod resolver;
pub mod routingtable;
pub mod seqwindow;
pub mod sync;

pub use error::{Error, Result};
