// SPDX-License-Identifier: MIT

//! The packet-plane pipeline: channels, pools and the six worker
//! loops that move packets between the TUN device and the network.

pub mod channels;
pub mod pool;
pub mod workers;

pub use channels::Channels;
pub use pool::{Guarded, Pool};
pub use workers::{decrypt_worker, encrypt_worker, tun_reader, tun_writer, udp_reader, udp_writer, PipelineContext, StopFlag};
