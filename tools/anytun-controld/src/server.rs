// SPDX-License-Identifier: MIT

//! Turns a [`ControldConfig`] into the snapshot a connecting sync peer
//! receives: one connection record per configured entry, one route
//! record per configured route.

use std::net::IpAddr;

use anytun_core::keyderivation::{KeyDerivation, Role};
use anytun_core::routingtable::{AddressFamily, NetworkPrefix};
use anytun_core::sync::record::{ConnectionRecord, RouteRecord};
use anytun_core::sync::Record;

use crate::config::{ConnectionConfig, ControldConfig, RoleConfig};

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn build_key_derivation(c: &ConnectionConfig) -> anytun_core::Result<KeyDerivation> {
    let role = match c.role {
        RoleConfig::Left => Role::Left,
        RoleConfig::Right => Role::Right,
    };
    if let (Some(key_hex), Some(salt_hex)) = (&c.key_hex, &c.salt_hex) {
        let key = decode_hex(key_hex).ok_or_else(|| anytun_core::Error::Config("invalid key_hex".into()))?;
        let salt = decode_hex(salt_hex).ok_or_else(|| anytun_core::Error::Config("invalid salt_hex".into()))?;
        KeyDerivation::new(role, (key.len() * 8) as u16, &key, &salt)
    } else if let Some(passphrase) = &c.passphrase {
        KeyDerivation::from_passphrase(role, c.key_length, passphrase)
    } else {
        Err(anytun_core::Error::Config(format!(
            "connection mux {} has no key material",
            c.mux
        )))
    }
}

fn connection_record(c: &ConnectionConfig) -> anytun_core::Result<Record> {
    let kd = build_key_derivation(c)?;
    let (remote_address, remote_port) = match &c.remote {
        Some(r) => {
            let (host, port) = r
                .rsplit_once(':')
                .ok_or_else(|| anytun_core::Error::Config(format!("remote {r:?} must be \"host:port\"")))?;
            let addr: IpAddr = host
                .parse()
                .map_err(|_| anytun_core::Error::Config(format!("remote host {host:?} must be a literal IP")))?;
            let port: u16 = port
                .parse()
                .map_err(|_| anytun_core::Error::Config(format!("invalid remote port {port:?}")))?;
            (addr, port)
        }
        None => (IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0),
    };
    Ok(Record::Connection(ConnectionRecord {
        mux: c.mux,
        role: kd.role(),
        key_length: kd.key_length(),
        master_salt: *kd.master_salt(),
        master_key: kd.master_key().to_vec(),
        window_size: c.window_size,
        next_seq_nr: 0,
        remote_address,
        remote_port,
    }))
}

/// Builds the full snapshot served to every connecting sync peer.
/// Entries with invalid key material are logged and skipped rather
/// than aborting the whole snapshot.
pub fn build_snapshot(config: &ControldConfig) -> Vec<Record> {
    let mut records = Vec::with_capacity(config.connections.len() + config.routes.len());

    for c in &config.connections {
        match connection_record(c) {
            Ok(record) => records.push(record),
            Err(e) => log::warn!("skipping connection mux {}: {e}", c.mux),
        }
    }

    for r in &config.routes {
        let addr: IpAddr = match r.network.parse() {
            Ok(addr) => addr,
            Err(_) => {
                log::warn!("skipping route with invalid network {:?}", r.network);
                continue;
            }
        };
        let (family, bytes) = match addr {
            IpAddr::V4(v4) => (AddressFamily::Ipv4, v4.octets().to_vec()),
            IpAddr::V6(v6) => (AddressFamily::Ipv6, v6.octets().to_vec()),
        };
        match NetworkPrefix::new(family, bytes, r.prefix_length) {
            Ok(prefix) => records.push(Record::Route(RouteRecord {
                family: prefix.family,
                address: prefix.address,
                prefix_length: prefix.prefix_length,
                mux: r.mux,
            })),
            Err(e) => log::warn!("skipping route {}/{}: {e}", r.network, r.prefix_length),
        }
    }

    records
}
