// SPDX-License-Identifier: MIT

//! `anytun-config` — builds one or more sync-protocol records
//! describing a connection and/or routes, and writes them
//! length-framed to stdout. Intended to be piped into a listening
//! `anytun-controld` instance or concatenated into a static seed file.

use std::net::IpAddr;

use anyhow::{bail, Context as _};
use clap::Parser;
use tokio::io::AsyncWriteExt;

use anytun_core::keyderivation::{KeyDerivation, Role};
use anytun_core::routingtable::{AddressFamily, NetworkPrefix};
use anytun_core::sync::record::{ConnectionRecord, RouteRecord};
use anytun_core::sync::{framing, Record};

/// Emit sync records describing a connection and its routes.
#[derive(Parser, Debug)]
#[command(name = "anytun-config", author, version, about, long_about = None)]
struct Args {
    /// Multiplex id this connection belongs to
    #[arg(short = 'm', long = "mux", default_value_t = 0)]
    mux: u16,

    /// Role: left or right
    #[arg(short = 'e', long = "role", default_value = "left")]
    role: String,

    /// Passphrase to derive the master key/salt from
    #[arg(short = 'E', long = "passphrase")]
    passphrase: Option<String>,

    /// Master key, hex-encoded
    #[arg(short = 'K', long = "key")]
    key_hex: Option<String>,

    /// Master salt, hex-encoded (14 bytes)
    #[arg(short = 'A', long = "salt")]
    salt_hex: Option<String>,

    /// Master key length in bits when deriving from a passphrase (128/192/256)
    #[arg(long = "key-length", default_value_t = 128)]
    key_length: u16,

    /// Anti-replay window size
    #[arg(short = 'w', long = "window", default_value_t = 64)]
    window_size: u32,

    /// Remote endpoint already known for this connection, "host:port"
    #[arg(short = 'r', long = "remote")]
    remote: Option<String>,

    /// Route in "network/prefix:mux" form; may repeat
    #[arg(short = 'R', long = "route")]
    routes: Vec<String>,

    /// Emit only routes, no connection record
    #[arg(long = "routes-only")]
    routes_only: bool,
}

fn parse_role(s: &str) -> anyhow::Result<Role> {
    match s {
        "left" => Ok(Role::Left),
        "right" => Ok(Role::Right),
        other => bail!("invalid role {other:?}, expected \"left\" or \"right\""),
    }
}

fn decode_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        bail!("odd-length hex string");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).context("invalid hex digit"))
        .collect()
}

fn build_key_derivation(args: &Args, role: Role) -> anyhow::Result<KeyDerivation> {
    match (&args.key_hex, &args.salt_hex, &args.passphrase) {
        (Some(key_hex), Some(salt_hex), _) => {
            let key = decode_hex(key_hex)?;
            let salt = decode_hex(salt_hex)?;
            Ok(KeyDerivation::new(role, (key.len() * 8) as u16, &key, &salt)?)
        }
        (_, _, Some(passphrase)) => Ok(KeyDerivation::from_passphrase(role, args.key_length, passphrase)?),
        _ => bail!("must supply either --passphrase, or both --key and --salt"),
    }
}

fn parse_route(s: &str) -> anyhow::Result<(NetworkPrefix, u16)> {
    let (prefix_part, mux_part) = s.split_once(':').context("route must be \"prefix/len:mux\"")?;
    let (addr_part, len_part) = prefix_part.split_once('/').context("route must be \"prefix/len:mux\"")?;
    let mux: u16 = mux_part.parse().context("invalid mux in route")?;
    let prefix_length: u8 = len_part.parse().context("invalid prefix length in route")?;
    let addr: IpAddr = addr_part.parse().context("invalid route address")?;
    let (family, bytes) = match addr {
        IpAddr::V4(v4) => (AddressFamily::Ipv4, v4.octets().to_vec()),
        IpAddr::V6(v6) => (AddressFamily::Ipv6, v6.octets().to_vec()),
    };
    Ok((NetworkPrefix::new(family, bytes, prefix_length)?, mux))
}

fn build_records(args: &Args) -> anyhow::Result<Vec<Record>> {
    let role = parse_role(&args.role)?;
    let mut records = Vec::new();

    if !args.routes_only {
        let kd = build_key_derivation(args, role)?;
        let (remote_address, remote_port) = match &args.remote {
            Some(r) => {
                let (host, port) = r.rsplit_once(':').context("remote must be \"host:port\"")?;
                let addr: IpAddr = host.parse().context("remote host must be a literal IP address")?;
                (addr, port.parse().context("invalid remote port")?)
            }
            None => (IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0),
        };
        records.push(Record::Connection(ConnectionRecord {
            mux: args.mux,
            role,
            key_length: kd.key_length(),
            master_salt: *kd.master_salt(),
            master_key: kd.master_key().to_vec(),
            window_size: args.window_size,
            next_seq_nr: 0,
            remote_address,
            remote_port,
        }));
    }

    for route in &args.routes {
        let (prefix, mux) = parse_route(route).with_context(|| format!("parsing route {route:?}"))?;
        records.push(Record::Route(RouteRecord {
            family: prefix.family,
            address: prefix.address,
            prefix_length: prefix.prefix_length,
            mux,
        }));
    }

    Ok(records)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let records = build_records(&args)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    runtime.block_on(async {
        let mut stdout = tokio::io::stdout();
        for record in &records {
            framing::write_frame(&mut stdout, &record.encode()).await?;
        }
        stdout.flush().await?;
        Ok::<_, anytun_core::Error>(())
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            mux: 0,
            role: "left".to_string(),
            passphrase: Some("correct horse battery staple".to_string()),
            key_hex: None,
            salt_hex: None,
            key_length: 128,
            window_size: 64,
            remote: None,
            routes: Vec::new(),
            routes_only: false,
        }
    }

    #[test]
    fn parse_role_accepts_both_sides() {
        assert_eq!(parse_role("left").unwrap(), Role::Left);
        assert_eq!(parse_role("right").unwrap(), Role::Right);
        assert!(parse_role("up").is_err());
    }

    #[test]
    fn decode_hex_rejects_odd_length() {
        assert!(decode_hex("abc").is_err());
        assert_eq!(decode_hex("0a1b").unwrap(), vec![0x0a, 0x1b]);
    }

    #[test]
    fn parse_route_splits_prefix_and_mux() {
        let (prefix, mux) = parse_route("10.0.0.0/24:7").unwrap();
        assert_eq!(prefix.family, AddressFamily::Ipv4);
        assert_eq!(prefix.prefix_length, 24);
        assert_eq!(mux, 7);
    }

    #[test]
    fn parse_route_rejects_missing_mux() {
        assert!(parse_route("10.0.0.0/24").is_err());
    }

    #[test]
    fn build_records_from_passphrase_includes_connection() {
        let args = base_args();
        let records = build_records(&args).unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], Record::Connection(_)));
    }

    #[test]
    fn routes_only_skips_connection_record() {
        let mut args = base_args();
        args.routes_only = true;
        args.routes = vec!["10.0.0.0/24:7".to_string()];
        let records = build_records(&args).unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], Record::Route(_)));
    }

    #[test]
    fn missing_key_material_is_an_error() {
        let mut args = base_args();
        args.passphrase = None;
        assert!(build_records(&args).is_err());
    }

    #[test]
    fn explicit_key_and_salt_round_trip_into_a_record() {
        let mut args = base_args();
        args.passphrase = None;
        args.key_hex = Some("00".repeat(16));
        args.salt_hex = Some("00".repeat(14));
        let records = build_records(&args).unwrap();
        match &records[0] {
            Record::Connection(c) => assert_eq!(c.key_length, 128),
            _ => panic!("expected a connection record"),
        }
    }
}
