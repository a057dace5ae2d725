// SPDX-License-Identifier: MIT

//! `anytun` — the SATP data-plane daemon: opens a TUN/TAP device and a
//! UDP socket, wires the six packet-pipeline tasks between them, and
//! runs the cluster sync protocol (listener and/or outbound peers) on
//! a Tokio runtime alongside the pipeline's own OS threads.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::Parser;

use anytun_core::connectionlist::{ConnectionList, ConnectionParam, ConnectionSnapshot};
use anytun_core::device::{DeviceType, TunDevice};
use anytun_core::keyderivation::{KeyDerivation, Role};
use anytun_core::pipeline::{Channels, PipelineContext, StopFlag};
use anytun_core::resolver::{self, AddressFilter};
use anytun_core::routingtable::{AddressFamily, NetworkPrefix, RoutingTable};
use anytun_core::sync::{Record, SyncServer};

/// SATP secure anycast tunnel data-plane daemon.
#[derive(Parser, Debug)]
#[command(name = "anytun", author, version, about, long_about = None)]
struct Args {
    /// Local interface/address to bind the UDP socket to
    #[arg(short = 'i', long = "interface", default_value = "0.0.0.0")]
    interface: String,

    /// Local UDP port
    #[arg(short = 'p', long = "port", default_value_t = 4865)]
    port: u16,

    /// Remote host of the initial connection (client-initiated mode)
    #[arg(short = 'r', long = "remote-host")]
    remote_host: Option<String>,

    /// Remote UDP port of the initial connection
    #[arg(short = 'o', long = "remote-port")]
    remote_port: Option<u16>,

    /// TUN/TAP device name
    #[arg(short = 'd', long = "dev", default_value = "anytun0")]
    dev_name: String,

    /// Device type: tun or tap
    #[arg(short = 't', long = "type", default_value = "tun")]
    dev_type: String,

    /// Device address/prefix; recorded for operator tooling only, the
    /// daemon itself does not call ifconfig
    #[arg(short = 'n', long = "ifconfig")]
    ifconfig: Option<String>,

    /// Route in "network/prefix:mux" form (e.g. "10.0.0.0/24:7"); may repeat
    #[arg(short = 'R', long = "route")]
    routes: Vec<String>,

    /// This peer's sender id
    #[arg(short = 's', long = "sender-id", default_value_t = 0)]
    sender_id: u16,

    /// Multiplex id of the initial connection
    #[arg(short = 'm', long = "mux", default_value_t = 0)]
    mux: u16,

    /// Anti-replay window size (0 disables replay protection)
    #[arg(short = 'w', long = "window", default_value_t = 64)]
    window_size: u32,

    /// Cipher: aes-ctr or null
    #[arg(short = 'c', long = "cipher", default_value = "aes-ctr")]
    cipher: String,

    /// Auth algorithm: hmac-sha1 or null
    #[arg(short = 'a', long = "auth-algo", default_value = "hmac-sha1")]
    auth_algo: String,

    /// Auth tag length in bytes (0..=20)
    #[arg(short = 'b', long = "tag-length", default_value_t = 10)]
    tag_len: usize,

    /// Key derivation: aes-ctr or null
    #[arg(short = 'k', long = "kd", default_value = "aes-ctr")]
    kd_type: String,

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

    /// Sync protocol bind interface
    #[arg(short = 'I', long = "sync-interface")]
    sync_interface: Option<String>,

    /// Sync protocol bind port
    #[arg(short = 'S', long = "sync-port")]
    sync_port: Option<u16>,

    /// Sync peer in "host:port" form; may repeat
    #[arg(short = 'M', long = "sync-peer")]
    sync_peers: Vec<String>,

    /// Log target filter passed through to env_logger (e.g. "anytun=debug")
    #[arg(short = 'L', long = "log")]
    log_targets: Option<String>,

    /// Enable debug logging
    #[arg(short = 'U', long = "debug")]
    debug: bool,

    /// Disable the endpoint-rewrite-on-roam behavior (see the design
    /// notes on the source's auto-detect-peer caveat)
    #[arg(long = "no-auto-roam")]
    no_auto_roam: bool,
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();
    match &args.log_targets {
        Some(filter) => builder.parse_filters(filter),
        None => builder.filter_level(if args.debug { log::LevelFilter::Debug } else { log::LevelFilter::Info }),
    };
    builder.init();
}

fn parse_role(s: &str) -> anyhow::Result<Role> {
    match s {
        "left" => Ok(Role::Left),
        "right" => Ok(Role::Right),
        other => bail!("invalid role {other:?}, expected \"left\" or \"right\""),
    }
}

fn parse_device_type(s: &str) -> anyhow::Result<DeviceType> {
    match s {
        "tun" => Ok(DeviceType::Tun),
        "tap" => Ok(DeviceType::Tap),
        other => bail!("invalid device type {other:?}, expected \"tun\" or \"tap\""),
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

/// Build this peer's `KeyDerivation` from the passphrase or explicit
/// key/salt flags. `--kd null` still produces a real all-zero-keyed
/// instance rather than a distinct type, matching how the connection
/// table's own auto-registration default is built.
fn build_key_derivation(args: &Args, role: Role) -> anyhow::Result<KeyDerivation> {
    if args.kd_type == "null" {
        let key = vec![0u8; (args.key_length / 8) as usize];
        let salt = [0u8; 14];
        return Ok(KeyDerivation::new(role, args.key_length, &key, &salt)?);
    }

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
    let prefix = NetworkPrefix::new(family, bytes, prefix_length)?;
    Ok((prefix, mux))
}

fn build_snapshot(connections: &ConnectionList, routing: &RoutingTable) -> Vec<Record> {
    let mut records = Vec::new();
    for (mux, snap) in connections.snapshot() {
        let (remote_address, remote_port) = match snap.remote_endpoint {
            Some(addr) => (addr.ip(), addr.port()),
            None => (IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0),
        };
        records.push(Record::Connection(anytun_core::sync::record::ConnectionRecord {
            mux,
            role: snap.role,
            key_length: snap.key_length,
            master_salt: snap.master_salt,
            master_key: snap.master_key,
            window_size: snap.window_size,
            next_seq_nr: snap.next_seq_nr,
            remote_address,
            remote_port,
        }));
    }
    for (prefix, mux) in routing.snapshot() {
        records.push(Record::Route(anytun_core::sync::record::RouteRecord {
            family: prefix.family,
            address: prefix.address,
            prefix_length: prefix.prefix_length,
            mux,
        }));
    }
    records
}

fn apply_record(connections: &ConnectionList, routing: &RoutingTable, record: Record) {
    match record {
        Record::Connection(c) => {
            let remote_endpoint = c.remote_endpoint();
            let snap = ConnectionSnapshot {
                role: c.role,
                key_length: c.key_length,
                master_salt: c.master_salt,
                master_key: c.master_key,
                window_size: c.window_size,
                next_seq_nr: c.next_seq_nr,
                remote_endpoint,
            };
            if let Err(e) = connections.apply_snapshot(c.mux, snap) {
                log::warn!("rejected connection record for mux {}: {e}", c.mux);
            }
        }
        Record::Route(r) => {
            match NetworkPrefix::new(r.family, r.address, r.prefix_length) {
                Ok(prefix) => routing.add_route(prefix, r.mux),
                Err(e) => log::warn!("rejected route record: {e}"),
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    if let Some(ifconfig) = &args.ifconfig {
        log::info!("ifconfig {ifconfig} recorded for operator tooling; not applied by this daemon");
    }

    let role = parse_role(&args.role)?;
    let device_type = parse_device_type(&args.dev_type)?;
    if args.tag_len > 20 {
        bail!("tag length must be 0..=20");
    }
    if args.auth_algo != "hmac-sha1" && args.auth_algo != "null" {
        bail!("unknown auth algorithm {:?}", args.auth_algo);
    }
    if args.cipher != "aes-ctr" && args.cipher != "null" {
        bail!("unknown cipher {:?}", args.cipher);
    }
    let tag_len = if args.auth_algo == "null" { 0 } else { args.tag_len };

    let kd = build_key_derivation(&args, role)?;

    let connections = Arc::new(ConnectionList::new());
    let mut param = ConnectionParam::new(kd, args.window_size);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    if let (Some(host), Some(port)) = (&args.remote_host, args.remote_port) {
        let addrs = runtime
            .block_on(resolver::resolve(host, port, AddressFilter::Any))
            .with_context(|| format!("resolving remote {host}:{port}"))?;
        param.set_remote_endpoint(addrs[0]);
    }
    connections.add(args.mux, param);

    let routing = Arc::new(RoutingTable::new());
    for route in &args.routes {
        let (prefix, mux) = parse_route(route).with_context(|| format!("parsing route {route:?}"))?;
        routing.add_route(prefix, mux);
    }
    let routing_enabled = !args.routes.is_empty();

    let bind_addr: SocketAddr = format!("{}:{}", args.interface, args.port)
        .parse()
        .context("invalid bind interface/port")?;
    let socket = UdpSocket::bind(bind_addr).context("binding UDP socket")?;
    socket.set_nonblocking(true)?;
    let socket = Arc::new(socket);

    let num_cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let channels = Arc::new(Channels::new(num_cpus));

    let ctx = Arc::new(PipelineContext {
        connections: connections.clone(),
        routing: routing.clone(),
        routing_enabled,
        sender_id: args.sender_id,
        auto_register: true,
        auto_roam: !args.no_auto_roam,
        tag_len,
    });

    let stop = Arc::new(StopFlag::new());

    let device: Box<dyn TunDevice> = open_device(&args.dev_name, device_type)?;
    let reader_device = device.try_clone().context("cloning device handle for reader thread")?;
    let writer_device = device;

    let mut handles = Vec::new();

    {
        let channels = channels.clone();
        let stop = stop.clone();
        let mut device = reader_device;
        handles.push(std::thread::spawn(move || {
            anytun_core::pipeline::workers::tun_reader(&mut *device, &channels.plain_in_tx, &channels.plain_pool, &stop);
        }));
    }
    {
        let channels = channels.clone();
        let stop = stop.clone();
        let mut device = writer_device;
        handles.push(std::thread::spawn(move || {
            anytun_core::pipeline::workers::tun_writer(&mut *device, &channels.plain_out_rx, &channels.plain_pool, &stop);
        }));
    }
    {
        let socket = socket.clone();
        let channels = channels.clone();
        let stop = stop.clone();
        handles.push(std::thread::spawn(move || {
            anytun_core::pipeline::workers::udp_reader(&socket, &channels.enc_in_tx, &channels.enc_pool, tag_len, &stop);
        }));
    }
    {
        let socket = socket.clone();
        let channels = channels.clone();
        let stop = stop.clone();
        handles.push(std::thread::spawn(move || {
            anytun_core::pipeline::workers::udp_writer(&socket, &channels.enc_out_rx, &channels.enc_pool, &stop);
        }));
    }
    {
        let ctx = ctx.clone();
        let channels = channels.clone();
        let stop = stop.clone();
        handles.push(std::thread::spawn(move || {
            anytun_core::pipeline::workers::encrypt_worker(
                &ctx,
                &channels.plain_in_rx,
                &channels.enc_out_tx,
                &channels.plain_pool,
                &channels.enc_pool,
                &stop,
            );
        }));
    }
    {
        let ctx = ctx.clone();
        let channels = channels.clone();
        let stop = stop.clone();
        handles.push(std::thread::spawn(move || {
            anytun_core::pipeline::workers::decrypt_worker(
                &ctx,
                &channels.enc_in_rx,
                &channels.plain_out_tx,
                &channels.plain_pool,
                &channels.enc_pool,
                device_type,
                &stop,
            );
        }));
    }

    log::info!(
        "anytun running: dev={} {:?}, udp={}, mux={}, sender_id={}",
        args.dev_name,
        device_type,
        bind_addr,
        args.mux,
        args.sender_id
    );

    runtime.block_on(run_sync_and_wait(
        &args,
        connections.clone(),
        routing.clone(),
        stop.clone(),
    ))?;

    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn open_device(name: &str, device_type: DeviceType) -> anyhow::Result<Box<dyn TunDevice>> {
    Ok(Box::new(
        anytun_core::device::LinuxTunDevice::open(name, device_type).context("opening TUN/TAP device")?,
    ))
}

#[cfg(not(target_os = "linux"))]
fn open_device(_name: &str, _device_type: DeviceType) -> anyhow::Result<Box<dyn TunDevice>> {
    bail!("no TUN/TAP backend is available on this platform")
}

/// Runs the sync listener and outbound peer connections (if
/// configured) until a shutdown signal arrives, then flips the stop
/// flag and closes every pipeline channel so the OS-thread workers
/// observe a sentinel on their next iteration.
async fn run_sync_and_wait(
    args: &Args,
    connections: Arc<ConnectionList>,
    routing: Arc<RoutingTable>,
    stop: Arc<StopFlag>,
) -> anyhow::Result<()> {
    let sync_server = if let Some(port) = args.sync_port {
        let interface = args.sync_interface.clone().unwrap_or_else(|| "0.0.0.0".to_string());
        let bind_addr: SocketAddr = format!("{interface}:{port}").parse().context("invalid sync bind address")?;
        let server = Arc::new(SyncServer::new());
        let run_server = server.clone();
        let snapshot_connections = connections.clone();
        let snapshot_routing = routing.clone();
        tokio::spawn(async move {
            let snapshot = move || build_snapshot(&snapshot_connections, &snapshot_routing);
            if let Err(e) = run_server.run(bind_addr, snapshot).await {
                log::error!("sync listener failed: {e}");
            }
        });
        Some(server)
    } else {
        None
    };

    let shutdown = Arc::new(tokio::sync::Notify::new());
    for peer in &args.sync_peers {
        let peer_addr: SocketAddr = resolve_sync_peer(peer).await?;
        let connections = connections.clone();
        let routing = routing.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            anytun_core::sync::client::run_outbound(peer_addr, &shutdown, |record| {
                apply_record(&connections, &routing, record);
            })
            .await;
        });
    }

    tokio::signal::ctrl_c().await.ok();
    log::info!("shutdown signal received");
    stop.stop();
    shutdown.notify_waiters();
    if let Some(server) = sync_server {
        server.shutdown();
    }
    Ok(())
}

async fn resolve_sync_peer(peer: &str) -> anyhow::Result<SocketAddr> {
    let (host, port) = peer.rsplit_once(':').context("sync peer must be \"host:port\"")?;
    let port: u16 = port.parse().context("invalid sync peer port")?;
    let addrs = resolver::resolve(host, port, AddressFilter::Any)
        .await
        .with_context(|| format!("resolving sync peer {peer}"))?;
    Ok(addrs[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            interface: "0.0.0.0".to_string(),
            port: 4865,
            remote_host: None,
            remote_port: None,
            dev_name: "anytun0".to_string(),
            dev_type: "tun".to_string(),
            ifconfig: None,
            routes: Vec::new(),
            sender_id: 0,
            mux: 0,
            window_size: 64,
            cipher: "aes-ctr".to_string(),
            auth_algo: "hmac-sha1".to_string(),
            tag_len: 10,
            kd_type: "aes-ctr".to_string(),
            role: "left".to_string(),
            passphrase: Some("correct horse battery staple".to_string()),
            key_hex: None,
            salt_hex: None,
            key_length: 128,
            sync_interface: None,
            sync_port: None,
            sync_peers: Vec::new(),
            log_targets: None,
            debug: false,
            no_auto_roam: false,
        }
    }

    #[test]
    fn parse_role_accepts_both_sides() {
        assert_eq!(parse_role("left").unwrap(), Role::Left);
        assert_eq!(parse_role("right").unwrap(), Role::Right);
        assert!(parse_role("up").is_err());
    }

    #[test]
    fn parse_device_type_rejects_unknown() {
        assert_eq!(parse_device_type("tun").unwrap(), DeviceType::Tun);
        assert_eq!(parse_device_type("tap").unwrap(), DeviceType::Tap);
        assert!(parse_device_type("ppp").is_err());
    }

    #[test]
    fn decode_hex_roundtrips() {
        assert_eq!(decode_hex("0a1b").unwrap(), vec![0x0a, 0x1b]);
        assert!(decode_hex("abc").is_err());
        assert!(decode_hex("zz").is_err());
    }

    #[test]
    fn parse_route_splits_prefix_and_mux() {
        let (prefix, mux) = parse_route("10.0.0.0/24:7").unwrap();
        assert_eq!(prefix.family, AddressFamily::Ipv4);
        assert_eq!(prefix.prefix_length, 24);
        assert_eq!(mux, 7);
    }

    #[test]
    fn parse_route_rejects_malformed_input() {
        assert!(parse_route("10.0.0.0:7").is_err());
        assert!(parse_route("not-an-ip/24:7").is_err());
    }

    #[test]
    fn build_key_derivation_from_passphrase() {
        let args = base_args();
        let kd = build_key_derivation(&args, Role::Left).unwrap();
        assert_eq!(kd.key_length(), 128);
    }

    #[test]
    fn build_key_derivation_null_kd_is_all_zero() {
        let mut args = base_args();
        args.kd_type = "null".to_string();
        args.passphrase = None;
        let kd = build_key_derivation(&args, Role::Left).unwrap();
        assert_eq!(kd.master_key(), vec![0u8; 16].as_slice());
    }

    #[test]
    fn build_key_derivation_requires_some_key_material() {
        let mut args = base_args();
        args.passphrase = None;
        assert!(build_key_derivation(&args, Role::Left).is_err());
    }

    #[test]
    fn build_key_derivation_accepts_explicit_key_and_salt() {
        let mut args = base_args();
        args.passphrase = None;
        args.key_hex = Some("00".repeat(16));
        args.salt_hex = Some("00".repeat(14));
        let kd = build_key_derivation(&args, Role::Left).unwrap();
        assert_eq!(kd.key_length(), 128);
    }

    #[test]
    fn snapshot_and_apply_record_round_trip_a_connection() {
        let connections = ConnectionList::new();
        let kd = KeyDerivation::new(Role::Left, 128, &[7u8; 16], &[0u8; 14]).unwrap();
        let mut param = ConnectionParam::new(kd, 64);
        param.set_remote_endpoint("10.0.0.1:4000".parse().unwrap());
        connections.add(3, param);
        let routing = RoutingTable::new();
        routing.add_route(
            NetworkPrefix::new(AddressFamily::Ipv4, vec![10, 0, 0, 0], 24).unwrap(),
            3,
        );

        let records = build_snapshot(&connections, &routing);
        assert_eq!(records.len(), 2);

        let other_connections = ConnectionList::new();
        let other_routing = RoutingTable::new();
        for record in records {
            apply_record(&other_connections, &other_routing, record);
        }
        assert_eq!(
            other_connections.with_read(3, |p| p.remote_endpoint),
            Some(Some("10.0.0.1:4000".parse().unwrap()))
        );
        assert_eq!(
            other_routing.get_route(AddressFamily::Ipv4, &[10, 0, 0, 5]).unwrap(),
            3
        );
    }
}
