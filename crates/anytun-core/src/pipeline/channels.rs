// SPDX-License-Identifier: MIT

//! The four bounded channels and two pools wiring the six pipeline
//! tasks together. Sizing follows the design directly: channel
//! capacity is `2N + 4` where `N` is the detected CPU count (floored
//! at 4), and each pool is pre-filled with one object per slot across
//! both channels it feeds, plus one spare.

use crossbeam_channel::{bounded, Receiver, Sender};

use super::pool::Pool;
use crate::buffer::{EncryptedPacket, PlainPacket};

fn channel_capacity(num_cpus: usize) -> usize {
    let n = num_cpus.max(4);
    2 * n + 4
}

pub struct Channels {
    pub plain_in_tx: Sender<PlainPacket>,
    pub plain_in_rx: Receiver<PlainPacket>,
    pub plain_out_tx: Sender<PlainPacket>,
    pub plain_out_rx: Receiver<PlainPacket>,
    pub enc_in_tx: Sender<EncryptedPacket>,
    pub enc_in_rx: Receiver<EncryptedPacket>,
    pub enc_out_tx: Sender<EncryptedPacket>,
    pub enc_out_rx: Receiver<EncryptedPacket>,
    pub plain_pool: Pool<PlainPacket>,
    pub enc_pool: Pool<EncryptedPacket>,
}

impl Channels {
    pub fn new(num_cpus: usize) -> Self {
        let cap = channel_capacity(num_cpus);
        let (plain_in_tx, plain_in_rx) = bounded(cap);
        let (plain_out_tx, plain_out_rx) = bounded(cap);
        let (enc_in_tx, enc_in_rx) = bounded(cap);
        let (enc_out_tx, enc_out_rx) = bounded(cap);

        let plain_pool = Pool::new(2 * cap + 1, PlainPacket::new);
        let enc_pool = Pool::new(2 * cap + 1, EncryptedPacket::new);

        Self {
            plain_in_tx,
            plain_in_rx,
            plain_out_tx,
            plain_out_rx,
            enc_in_tx,
            enc_in_rx,
            enc_out_tx,
            enc_out_rx,
            plain_pool,
            enc_pool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_floors_at_four_cpus() {
        assert_eq!(channel_capacity(1), 12);
        assert_eq!(channel_capacity(8), 20);
    }

    #[test]
    fn pools_sized_from_both_feeding_channels() {
        let channels = Channels::new(4);
        assert!(channels.plain_pool.try_acquire().is_some());
        assert!(channels.enc_pool.try_acquire().is_some());
    }
}
