// SPDX-License-Identifier: MIT

//! The six long-running pipeline tasks: TUN reader/writer, UDP
//! reader/writer, and the encrypt/decrypt workers that sit between
//! them. Every function here owns one task's loop and is meant to be
//! handed to its own OS thread.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::authalgo::AuthAlgo;
use crate::buffer::{EncryptedPacket, PayloadType, PlainPacket};
use crate::cipher::Cipher;
use crate::connectionlist::ConnectionList;
use crate::device::{DeviceType, TunDevice};
use crate::keyderivation::Direction;
use crate::routingtable::{AddressFamily, RoutingTable};

use super::pool::Pool;

/// Cooperative shutdown flag: tasks check it between packets rather
/// than being cancelled mid-flight.
#[derive(Default)]
pub struct StopFlag(AtomicBool);

impl StopFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Shared, per-daemon state the pipeline workers read from.
pub struct PipelineContext {
    pub connections: Arc<ConnectionList>,
    pub routing: Arc<RoutingTable>,
    pub routing_enabled: bool,
    pub sender_id: u16,
    pub auto_register: bool,
    pub auto_roam: bool,
    pub tag_len: usize,
}

fn address_family_for(payload_type: PayloadType) -> Option<AddressFamily> {
    match payload_type {
        PayloadType::Ipv4 => Some(AddressFamily::Ipv4),
        PayloadType::Ipv6 => Some(AddressFamily::Ipv6),
        PayloadType::Ethernet => Some(AddressFamily::Ethernet),
        PayloadType::Unspecified => None,
    }
}

/// Encrypt worker: plain_in -> enc_out. See the contract in the
/// design doc's packet pipeline section for the numbered steps this
/// mirrors.
pub fn encrypt_worker(
    ctx: &PipelineContext,
    plain_in: &Receiver<PlainPacket>,
    enc_out: &Sender<EncryptedPacket>,
    plain_pool: &Pool<PlainPacket>,
    enc_pool: &Pool<EncryptedPacket>,
    stop: &StopFlag,
) {
    let auth = AuthAlgo::new(ctx.tag_len);

    while !stop.is_stopped() {
        let plain = match plain_in.recv_timeout(std::time::Duration::from_millis(200)) {
            Ok(p) => p,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let enc = enc_pool.acquire();
        let plain_guard = super::pool::Guarded::new(plain_pool, plain);
        let mut enc_guard = super::pool::Guarded::new(enc_pool, enc);

        if ctx.connections.is_empty() {
            continue;
        }

        let mux = if ctx.routing_enabled {
            let (family, addr) = match (
                address_family_for(plain_guard.get().payload_type()),
                plain_guard.get().dst_addr(),
            ) {
                (Some(f), Some(a)) => (f, a.to_vec()),
                _ => continue,
            };
            match ctx.routing.get_route(family, &addr) {
                Ok(mux) => mux,
                Err(_) => {
                    route_debug!("no route for destination, dropping packet");
                    continue;
                }
            }
        } else {
            match ctx.connections.first_mux() {
                Some(mux) => mux,
                None => continue,
            }
        };

        let sender_id = ctx.sender_id;
        let remote = ctx.connections.with_write(mux, |param| {
            let remote = param.remote_endpoint?;
            let seq_nr = param.next_seq_nr;
            param.next_seq_nr = param.next_seq_nr.wrapping_add(1);

            let enc = enc_guard.get_mut();
            enc.clear();
            enc.set_len(EncryptedPacket::header_length());
            enc.set_seq_nr(seq_nr);
            enc.set_sender_id(sender_id);
            enc.set_mux(mux);

            let plain_payload = plain_guard.get().payload();
            let start = EncryptedPacket::header_length();
            let end = start + plain_payload.len();
            enc.raw_mut()[start..end].copy_from_slice(plain_payload);
            enc.set_len(end);

            Cipher::transform(&param.kd, Direction::Outbound, seq_nr, sender_id, mux, enc.payload_mut());

            let tag = auth.generate(&param.kd, Direction::Outbound, seq_nr, enc.auth_portion(0));
            enc.set_tag(&tag);

            Some(remote)
        });

        match remote.flatten() {
            Some(remote) => {
                let enc = enc_guard.get_mut();
                enc.set_remote(remote);
                if enc_out.send(enc_guard.take()).is_err() {
                    break;
                }
            }
            None => continue,
        }
    }
}

/// Decrypt worker: enc_in -> plain_out.
pub fn decrypt_worker(
    ctx: &PipelineContext,
    enc_in: &Receiver<EncryptedPacket>,
    plain_out: &Sender<PlainPacket>,
    plain_pool: &Pool<PlainPacket>,
    enc_pool: &Pool<EncryptedPacket>,
    device_type: DeviceType,
    stop: &StopFlag,
) {
    let auth = AuthAlgo::new(ctx.tag_len);

    while !stop.is_stopped() {
        let enc = match enc_in.recv_timeout(std::time::Duration::from_millis(200)) {
            Ok(e) => e,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let plain = plain_pool.acquire();
        let enc_guard = super::pool::Guarded::new(enc_pool, enc);
        let mut plain_guard = super::pool::Guarded::new(plain_pool, plain);

        let mux = enc_guard.get().mux();
        let sender_id = enc_guard.get().sender_id();
        let seq_nr = enc_guard.get().seq_nr();
        let source = enc_guard.get().remote();

        if ctx.connections.is_empty() && ctx.auto_register {
            if let Some(source) = source {
                ctx.connections.get_or_new_unlocked(mux, |param| {
                    param.set_remote_endpoint(source);
                });
            }
        }

        let tag_len = ctx.tag_len;
        if enc_guard.get().len() <= EncryptedPacket::header_length() + tag_len {
            continue;
        }

        let result = ctx.connections.with_write(mux, |param| {
            let auth_portion = enc_guard.get().auth_portion(tag_len).to_vec();
            let tag = enc_guard.get().tag(tag_len).to_vec();
            if !auth.verify(&param.kd, Direction::Inbound, seq_nr, &auth_portion, &tag) {
                notice!("auth failure on mux {mux} from sender {sender_id}");
                return None;
            }
            if param.seq_window.check_and_add(sender_id, seq_nr) {
                notice!("replay dropped on mux {mux} seq {seq_nr}");
                return None;
            }
            if ctx.auto_roam {
                if let Some(src) = source {
                    if param.remote_endpoint != Some(src) {
                        param.set_remote_endpoint(src);
                    }
                }
            }
            Some(())
        });

        if result.flatten().is_none() {
            continue;
        }

        let payload_len = enc_guard.get().len() - EncryptedPacket::header_length() - tag_len;
        if payload_len + PlainPacket::header_length() > PlainPacket::header_length() + plain_guard.get().payload_capacity() {
            continue;
        }

        let decrypted = ctx.connections.with_read(mux, |param| {
            let mut buf = enc_guard.get().payload()[..payload_len].to_vec();
            Cipher::transform(&param.kd, Direction::Inbound, seq_nr, sender_id, mux, &mut buf);
            buf
        });

        if let Some(buf) = decrypted {
            let payload_type = match device_type {
                DeviceType::Tun if !buf.is_empty() && (buf[0] >> 4) == 6 => PayloadType::Ipv6,
                DeviceType::Tun => PayloadType::Ipv4,
                DeviceType::Tap => PayloadType::Ethernet,
            };
            let plain = plain_guard.get_mut();
            plain.clear();
            plain.set_payload_type(payload_type);
            let start = PlainPacket::header_length();
            plain.raw_mut()[start..start + buf.len()].copy_from_slice(&buf);
            plain.set_len(start + buf.len());
            if plain_out.send(plain_guard.take()).is_err() {
                break;
            }
        }
    }
}

/// TUN reader: device -> plain_in.
pub fn tun_reader(
    device: &mut dyn TunDevice,
    plain_in: &Sender<PlainPacket>,
    plain_pool: &Pool<PlainPacket>,
    stop: &StopFlag,
) {
    while !stop.is_stopped() {
        let packet = plain_pool.acquire();
        let mut guard = super::pool::Guarded::new(plain_pool, packet);
        let device_type = device.device_type();
        let payload_type = match device_type {
            DeviceType::Tun => PayloadType::Ipv4,
            DeviceType::Tap => PayloadType::Ethernet,
        };

        let header = PlainPacket::header_length();
        let n = match device.read(&mut guard.get_mut().raw_mut()[header..]) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }
            Err(_) => continue,
        };

        let plain = guard.get_mut();
        plain.set_payload_type(payload_type);
        plain.set_len(header + n);
        if plain_in.send(guard.take()).is_err() {
            break;
        }
    }
}

/// TUN writer: plain_out -> device.
pub fn tun_writer(
    device: &mut dyn TunDevice,
    plain_out: &Receiver<PlainPacket>,
    plain_pool: &Pool<PlainPacket>,
    stop: &StopFlag,
) {
    while !stop.is_stopped() {
        let plain = match plain_out.recv_timeout(std::time::Duration::from_millis(200)) {
            Ok(p) => p,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let guard = super::pool::Guarded::new(plain_pool, plain);
        if !device.device_type().accepts(guard.get().payload_type()) {
            continue;
        }
        let _ = device.write(guard.get().payload());
    }
}

/// UDP reader: socket -> enc_in.
pub fn udp_reader(
    socket: &UdpSocket,
    enc_in: &Sender<EncryptedPacket>,
    enc_pool: &Pool<EncryptedPacket>,
    tag_len: usize,
    stop: &StopFlag,
) {
    while !stop.is_stopped() {
        let enc = enc_pool.acquire();
        let mut guard = super::pool::Guarded::new(enc_pool, enc);
        let (n, from) = match socket.recv_from(guard.get_mut().raw_mut()) {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                continue;
            }
            Err(_) => continue,
        };
        if n < EncryptedPacket::header_length() + tag_len {
            continue;
        }
        let enc = guard.get_mut();
        enc.set_len(n);
        enc.set_remote(from);
        if enc_in.send(guard.take()).is_err() {
            break;
        }
    }
}

/// UDP writer: enc_out -> socket.
pub fn udp_writer(
    socket: &UdpSocket,
    enc_out: &Receiver<EncryptedPacket>,
    enc_pool: &Pool<EncryptedPacket>,
    stop: &StopFlag,
) {
    while !stop.is_stopped() {
        let enc = match enc_out.recv_timeout(std::time::Duration::from_millis(200)) {
            Ok(e) => e,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let guard = super::pool::Guarded::new(enc_pool, enc);
        if let Some(remote) = guard.get().remote() {
            let _ = socket.send_to(guard.get().raw(), remote);
        }
    }
}
