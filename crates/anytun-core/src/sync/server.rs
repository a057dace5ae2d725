// SPDX-License-Identifier: MIT

//! TCP sync listener: accepts peer connections, pushes a full
//! snapshot on connect, then fans out deltas as they are produced by
//! local mutations (auto-registration, roaming, `anytun-config`
//! insertions).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify, RwLock};

use super::framing::{read_frame, write_frame};
use super::record::Record;
use crate::error::{Error, Result};

type PeerId = u64;

struct PeerHandle {
    tx: mpsc::Sender<Record>,
}

/// Registry of currently-connected sync peers plus the snapshot
/// source used to initialize a newly-connected one.
pub struct SyncServer {
    peers: RwLock<HashMap<PeerId, PeerHandle>>,
    next_peer_id: AtomicU64,
    shutdown: Notify,
}

impl Default for SyncServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncServer {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            next_peer_id: AtomicU64::new(0),
            shutdown: Notify::new(),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Fan a freshly-produced delta record out to every connected peer.
    pub async fn broadcast(&self, record: Record) {
        let peers = self.peers.read().await;
        for handle in peers.values() {
            let _ = handle.tx.send(record.clone()).await;
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Accept loop. `snapshot` is called once per new connection to
    /// produce the connection+route records pushed before deltas.
    pub async fn run<F>(self: &Arc<Self>, bind_addr: SocketAddr, snapshot: F) -> Result<()>
    where
        F: Fn() -> Vec<Record> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(bind_addr).await?;
        log::info!("sync listener bound on {bind_addr}");
        let snapshot = Arc::new(snapshot);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    let server = self.clone();
                    let snapshot = snapshot.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_peer(stream, peer_addr, snapshot).await {
                            log::warn!("sync peer {peer_addr} error: {e}");
                        }
                    });
                }
                _ = self.shutdown.notified() => {
                    log::info!("sync listener shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_peer<F>(
        self: Arc<Self>,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        snapshot: Arc<F>,
    ) -> Result<()>
    where
        F: Fn() -> Vec<Record> + Send + Sync + 'static,
    {
        log::info!("sync peer connected: {peer_addr}");
        let (tx, mut rx) = mpsc::channel::<Record>(256);
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        self.peers.write().await.insert(id, PeerHandle { tx });

        for record in snapshot() {
            write_frame(&mut stream, &record.encode()).await?;
        }

        let (mut read_half, mut write_half) = stream.into_split();

        let shutdown = self.clone();
        let reader = async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(_payload)) => {
                        // Inbound records from peers are not acted on here;
                        // the caller observes deltas via its own channel and
                        // decides what to merge into local state.
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("sync peer {peer_addr} read error: {e}");
                        break;
                    }
                }
            }
        };

        let writer = async move {
            loop {
                tokio::select! {
                    maybe_record = rx.recv() => {
                        match maybe_record {
                            Some(record) => {
                                if write_frame(&mut write_half, &record.encode()).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = shutdown.shutdown.notified() => break,
                }
            }
        };

        tokio::join!(reader, writer);

        self.peers.write().await.remove(&id);
        log::info!("sync peer disconnected: {peer_addr}");
        Ok(())
    }
}

/// Parses the payload of a single frame into a [`Record`]; a
/// malformed record terminates the connection it arrived on but does
/// not affect local state, per the sync protocol's failure semantics.
pub fn parse_record(payload: &[u8]) -> Result<Record> {
    Record::decode(payload).map_err(|e| match e {
        Error::SyncProtocol(msg) => Error::SyncProtocol(msg),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyderivation::Role as RecordRole;
    use crate::sync::record::ConnectionRecord;

    #[tokio::test]
    async fn snapshot_then_delta_roundtrip() {
        let server = Arc::new(SyncServer::new());
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(bind_addr).await.unwrap();
        let actual_addr = listener.local_addr().unwrap();
        drop(listener);

        let server_clone = server.clone();
        let handle = tokio::spawn(async move {
            let _ = server_clone
                .run(actual_addr, || {
                    vec![Record::Route(crate::sync::record::RouteRecord {
                        family: crate::routingtable::AddressFamily::Ipv4,
                        address: vec![10, 0, 0, 0],
                        prefix_length: 24,
                        mux: 1,
                    })]
                })
                .await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let mut client = TcpStream::connect(actual_addr).await.unwrap();
        let snapshot_frame = read_frame(&mut client).await.unwrap().unwrap();
        let snapshot_record = Record::decode(&snapshot_frame).unwrap();
        assert!(matches!(snapshot_record, Record::Route(_)));

        let delta = Record::Connection(ConnectionRecord {
            mux: 2,
            role: RecordRole::Left,
            key_length: 128,
            master_salt: [0u8; 14],
            master_key: vec![0u8; 16],
            window_size: 64,
            next_seq_nr: 0,
            remote_address: "0.0.0.0".parse().unwrap(),
            remote_port: 0,
        });
        server.broadcast(delta.clone()).await;
        let delta_frame = read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(Record::decode(&delta_frame).unwrap(), delta);

        server.shutdown();
        let _ = handle.await;
    }
}
