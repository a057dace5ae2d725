// SPDX-License-Identifier: MIT

//! Cluster sync: keeps `ConnectionList` and `RoutingTable` consistent
//! across members via a TCP listener plus persistent outbound
//! connections to other members.

pub mod client;
pub mod framing;
pub mod record;
pub mod server;

pub use record::{ConnectionRecord, Record, RouteRecord};
pub use server::SyncServer;
