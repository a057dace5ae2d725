// SPDX-License-Identifier: MIT

//! Persistent outbound connection to one cluster peer: connect with a
//! 12-second timeout, consume the peer's snapshot+delta stream,
//! handing each record to a caller-supplied sink, and retry with a
//! 10-second backoff on disconnect. Sync is best-effort — a peer that
//! never comes back simply never contributes state.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Notify;

use super::framing::read_frame;
use super::record::Record;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(12);
const RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Runs forever (until `shutdown` fires), reconnecting to `peer_addr`
/// and forwarding every record it receives to `on_record`.
pub async fn run_outbound<F>(peer_addr: SocketAddr, shutdown: &Notify, mut on_record: F)
where
    F: FnMut(Record),
{
    loop {
        tokio::select! {
            result = connect_and_drain(peer_addr, &mut on_record) => {
                match result {
                    Ok(()) => log::info!("sync outbound to {peer_addr} closed"),
                    Err(e) => log::warn!("sync outbound to {peer_addr} failed: {e}"),
                }
            }
            _ = shutdown.notified() => return,
        }

        tokio::select! {
            _ = tokio::time::sleep(RETRY_BACKOFF) => {}
            _ = shutdown.notified() => return,
        }
    }
}

async fn connect_and_drain<F>(peer_addr: SocketAddr, on_record: &mut F) -> std::io::Result<()>
where
    F: FnMut(Record),
{
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(peer_addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "sync connect timed out"))??;

    log::info!("sync outbound connected to {peer_addr}");
    loop {
        match read_frame(&mut stream).await {
            Ok(Some(payload)) => match Record::decode(&payload) {
                Ok(record) => on_record(record),
                Err(e) => {
                    log::warn!("malformed sync record from {peer_addr}: {e}");
                    return Ok(());
                }
            },
            Ok(None) => return Ok(()),
            Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyderivation::Role;
    use crate::sync::framing::write_frame;
    use crate::sync::record::ConnectionRecord;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn drains_records_until_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let record = Record::Connection(ConnectionRecord {
                mux: 1,
                role: Role::Left,
                key_length: 128,
                master_salt: [0u8; 14],
                master_key: vec![0u8; 16],
                window_size: 64,
                next_seq_nr: 0,
                remote_address: "0.0.0.0".parse().unwrap(),
                remote_port: 0,
            });
            write_frame(&mut stream, &record.encode()).await.unwrap();
        });

        let mut received = Vec::new();
        let mut stream = tokio::time::timeout(Duration::from_secs(1), TcpStream::connect(addr))
            .await
            .unwrap()
            .unwrap();
        while let Some(payload) = read_frame(&mut stream).await.unwrap() {
            received.push(Record::decode(&payload).unwrap());
        }

        server.await.unwrap();
        assert_eq!(received.len(), 1);
    }
}
