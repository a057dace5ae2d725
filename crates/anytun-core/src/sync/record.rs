// SPDX-License-Identifier: MIT

//! Sync record encoding: a compact fixed-field ASCII format, not
//! JSON — the framing in [`super::framing`] only guarantees a
//! length-prefixed byte string, the payload encoding is ours to pick.
//!
//! Each record is one line of space-separated tokens, chosen because
//! it is trivial to parse without pulling in a serialization crate
//! for something this small, and keeps the wire format legible when
//! captured for debugging.

use crate::error::{Error, Result};
use crate::keyderivation::Role;
use crate::routingtable::AddressFamily;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// A `ConnectionParam` as it travels over the sync protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    pub mux: u16,
    pub role: Role,
    pub key_length: u16,
    pub master_salt: [u8; 14],
    pub master_key: Vec<u8>,
    pub window_size: u32,
    pub next_seq_nr: u32,
    pub remote_address: IpAddr,
    pub remote_port: u16,
}

impl ConnectionRecord {
    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        if self.remote_port == 0 && self.remote_address.is_unspecified() {
            None
        } else {
            Some(SocketAddr::new(self.remote_address, self.remote_port))
        }
    }
}

/// A `NetworkPrefix -> mux` route as it travels over the sync protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRecord {
    pub family: AddressFamily,
    pub address: Vec<u8>,
    pub prefix_length: u8,
    pub mux: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Connection(ConnectionRecord),
    Route(RouteRecord),
}

fn role_token(role: Role) -> &'static str {
    match role {
        Role::Left => "left",
        Role::Right => "right",
    }
}

fn parse_role(tok: &str) -> Result<Role> {
    match tok {
        "left" => Ok(Role::Left),
        "right" => Ok(Role::Right),
        other => Err(Error::SyncProtocol(format!("invalid role {other:?}"))),
    }
}

fn family_token(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::Ipv4 => "ipv4",
        AddressFamily::Ipv6 => "ipv6",
        AddressFamily::Ethernet => "ethernet",
    }
}

fn parse_family(tok: &str) -> Result<AddressFamily> {
    match tok {
        "ipv4" => Ok(AddressFamily::Ipv4),
        "ipv6" => Ok(AddressFamily::Ipv6),
        "ethernet" => Ok(AddressFamily::Ethernet),
        other => Err(Error::SyncProtocol(format!("invalid family {other:?}"))),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::SyncProtocol("odd-length hex field".into()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| Error::SyncProtocol("invalid hex field".into()))
        })
        .collect()
}

fn next<'a>(it: &mut impl Iterator<Item = &'a str>) -> Result<&'a str> {
    it.next().ok_or_else(|| Error::SyncProtocol("truncated record".into()))
}

impl Record {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Record::Connection(c) => {
                let remote = c.remote_endpoint();
                let (addr, port) = match remote {
                    Some(sa) => (sa.ip().to_string(), sa.port()),
                    None => ("0.0.0.0".to_string(), 0),
                };
                format!(
                    "connection {} {} {} {} {} {} {} {} {}",
                    c.mux,
                    role_token(c.role),
                    c.key_length,
                    to_hex(&c.master_salt),
                    to_hex(&c.master_key),
                    c.window_size,
                    c.next_seq_nr,
                    addr,
                    port,
                )
                .into_bytes()
            }
            Record::Route(r) => format!(
                "route {} {} {} {}",
                family_token(r.family),
                to_hex(&r.address),
                r.prefix_length,
                r.mux,
            )
            .into_bytes(),
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::SyncProtocol("non-UTF-8 record".into()))?;
        let mut tokens = text.split(' ');
        let kind = next(&mut tokens)?;
        match kind {
            "connection" => {
                let mux: u16 = next(&mut tokens)?
                    .parse()
                    .map_err(|_| Error::SyncProtocol("invalid mux".into()))?;
                let role = parse_role(next(&mut tokens)?)?;
                let key_length: u16 = next(&mut tokens)?
                    .parse()
                    .map_err(|_| Error::SyncProtocol("invalid key_length".into()))?;
                let salt_bytes = from_hex(next(&mut tokens)?)?;
                if salt_bytes.len() != 14 {
                    return Err(Error::SyncProtocol("master salt must be 14 bytes".into()));
                }
                let mut master_salt = [0u8; 14];
                master_salt.copy_from_slice(&salt_bytes);
                let master_key = from_hex(next(&mut tokens)?)?;
                let window_size: u32 = next(&mut tokens)?
                    .parse()
                    .map_err(|_| Error::SyncProtocol("invalid window_size".into()))?;
                let next_seq_nr: u32 = next(&mut tokens)?
                    .parse()
                    .map_err(|_| Error::SyncProtocol("invalid next_seq_nr".into()))?;
                let remote_address: IpAddr = next(&mut tokens)?
                    .parse()
                    .map_err(|_| Error::SyncProtocol("invalid remote address".into()))?;
                let remote_port: u16 = next(&mut tokens)?
                    .parse()
                    .map_err(|_| Error::SyncProtocol("invalid remote port".into()))?;
                Ok(Record::Connection(ConnectionRecord {
                    mux,
                    role,
                    key_length,
                    master_salt,
                    master_key,
                    window_size,
                    next_seq_nr,
                    remote_address,
                    remote_port,
                }))
            }
            "route" => {
                let family = parse_family(next(&mut tokens)?)?;
                let address = from_hex(next(&mut tokens)?)?;
                let prefix_length: u8 = next(&mut tokens)?
                    .parse()
                    .map_err(|_| Error::SyncProtocol("invalid prefix_length".into()))?;
                let mux: u16 = next(&mut tokens)?
                    .parse()
                    .map_err(|_| Error::SyncProtocol("invalid mux".into()))?;
                Ok(Record::Route(RouteRecord {
                    family,
                    address,
                    prefix_length,
                    mux,
                }))
            }
            other => Err(Error::SyncProtocol(format!("unknown record type {other:?}"))),
        }
    }
}

/// The all-zero endpoint sentinel used when a connection has no remote yet.
pub fn zero_endpoint() -> (IpAddr, u16) {
    (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

pub fn zero_v6() -> IpAddr {
    IpAddr::V6(Ipv6Addr::UNSPECIFIED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_record_roundtrip() {
        let rec = ConnectionRecord {
            mux: 7,
            role: Role::Left,
            key_length: 128,
            master_salt: [1u8; 14],
            master_key: vec![2u8; 16],
            window_size: 64,
            next_seq_nr: 100,
            remote_address: "10.0.0.1".parse().unwrap(),
            remote_port: 4000,
        };
        let encoded = Record::Connection(rec.clone()).encode();
        let decoded = Record::decode(&encoded).unwrap();
        assert_eq!(decoded, Record::Connection(rec));
    }

    #[test]
    fn route_record_roundtrip() {
        let rec = RouteRecord {
            family: AddressFamily::Ipv4,
            address: vec![10, 0, 0, 0],
            prefix_length: 24,
            mux: 3,
        };
        let encoded = Record::Route(rec.clone()).encode();
        let decoded = Record::decode(&encoded).unwrap();
        assert_eq!(decoded, Record::Route(rec));
    }

    #[test]
    fn zero_endpoint_decodes_to_none() {
        let rec = ConnectionRecord {
            mux: 1,
            role: Role::Right,
            key_length: 128,
            master_salt: [0u8; 14],
            master_key: vec![0u8; 16],
            window_size: 0,
            next_seq_nr: 0,
            remote_address: zero_endpoint().0,
            remote_port: 0,
        };
        assert_eq!(rec.remote_endpoint(), None);
    }

    #[test]
    fn malformed_record_rejected() {
        assert!(Record::decode(b"connection notanumber").is_err());
        assert!(Record::decode(b"bogus 1 2 3").is_err());
    }
}
