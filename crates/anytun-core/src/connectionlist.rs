// SPDX-License-Identifier: MIT

//! Multiplex-id keyed connection table: mux -> key derivation, replay
//! window, next outbound sequence number and the peer's UDP endpoint.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::RwLock;

use crate::error::Result;
use crate::keyderivation::{KeyDerivation, Role};
use crate::seqwindow::SeqWindow;

/// Everything about a connection needed to reconstruct it elsewhere:
/// the sync protocol's wire shape, without coupling this module to
/// `sync::record`'s encoding.
pub struct ConnectionSnapshot {
    pub role: Role,
    pub key_length: u16,
    pub master_salt: [u8; 14],
    pub master_key: Vec<u8>,
    pub window_size: u32,
    pub next_seq_nr: u32,
    pub remote_endpoint: Option<SocketAddr>,
}

/// Per-connection state keyed by multiplex id in [`ConnectionList`].
pub struct ConnectionParam {
    pub kd: KeyDerivation,
    pub seq_window: SeqWindow,
    pub next_seq_nr: u32,
    pub remote_endpoint: Option<SocketAddr>,
}

impl ConnectionParam {
    pub fn new(kd: KeyDerivation, window_size: u32) -> Self {
        Self {
            kd,
            seq_window: SeqWindow::new(window_size),
            next_seq_nr: 0,
            remote_endpoint: None,
        }
    }

    /// Update the remote endpoint unless `addr` is the all-zero
    /// sentinel, which means "not set" and must never overwrite an
    /// existing endpoint.
    pub fn set_remote_endpoint(&mut self, addr: SocketAddr) {
        if is_zero_endpoint(addr) {
            return;
        }
        self.remote_endpoint = Some(addr);
    }
}

fn is_zero_endpoint(addr: SocketAddr) -> bool {
    addr.port() == 0 && addr.ip().is_unspecified()
}

/// RW-lock guarded `mux -> ConnectionParam` map. Readers (every
/// packet) take a shared lock; writers (sync-in, auto-registration,
/// roaming updates) take an exclusive one.
#[derive(Default)]
pub struct ConnectionList {
    inner: RwLock<HashMap<u16, ConnectionParam>>,
}

impl ConnectionList {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Overwrites any prior entry for `mux`.
    pub fn add(&self, mux: u16, params: ConnectionParam) {
        self.inner.write().insert(mux, params);
    }

    pub fn with_read<R>(&self, mux: u16, f: impl FnOnce(&ConnectionParam) -> R) -> Option<R> {
        self.inner.read().get(&mux).map(f)
    }

    pub fn with_write<R>(&self, mux: u16, f: impl FnOnce(&mut ConnectionParam) -> R) -> Option<R> {
        self.inner.write().get_mut(&mux).map(f)
    }

    /// Returns the mux of an arbitrary existing connection, used by
    /// the encrypt worker when routing is disabled.
    pub fn first_mux(&self) -> Option<u16> {
        self.inner.read().keys().next().copied()
    }

    /// Used by sync deserialization: inserts a default-initialized
    /// entry (null key derivation material, zero window) on miss, then
    /// hands the caller a chance to populate it under the write lock.
    pub fn get_or_new_unlocked(&self, mux: u16, f: impl FnOnce(&mut ConnectionParam)) {
        let mut guard = self.inner.write();
        let entry = guard.entry(mux).or_insert_with(|| {
            let kd = KeyDerivation::new(Role::Left, 128, &[0u8; 16], &[0u8; 14])
                .expect("all-zero 128-bit key is valid");
            ConnectionParam::new(kd, 0)
        });
        f(entry);
    }

    /// Full table snapshot, used to seed a newly-connected sync peer
    /// and to build `anytun-config`/`anytun-controld` output.
    pub fn snapshot(&self) -> Vec<(u16, ConnectionSnapshot)> {
        self.inner
            .read()
            .iter()
            .map(|(&mux, p)| {
                (
                    mux,
                    ConnectionSnapshot {
                        role: p.kd.role(),
                        key_length: p.kd.key_length(),
                        master_salt: *p.kd.master_salt(),
                        master_key: p.kd.master_key().to_vec(),
                        window_size: p.seq_window.window_size(),
                        next_seq_nr: p.next_seq_nr,
                        remote_endpoint: p.remote_endpoint,
                    },
                )
            })
            .collect()
    }

    /// Rebuild and insert a connection from a snapshot received over
    /// sync (either the initial snapshot push or a later delta).
    pub fn apply_snapshot(&self, mux: u16, snap: ConnectionSnapshot) -> Result<()> {
        let kd = KeyDerivation::new(snap.role, snap.key_length, &snap.master_key, &snap.master_salt)?;
        let mut param = ConnectionParam::new(kd, snap.window_size);
        param.next_seq_nr = snap.next_seq_nr;
        param.remote_endpoint = snap.remote_endpoint;
        self.add(mux, param);
        Ok(())
    }
}
