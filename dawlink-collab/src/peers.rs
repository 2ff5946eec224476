//! Connected peer registry with ordered fan-out.
//!
//! Each peer owns an unbounded queue drained by its connection's writer
//! task. `broadcast` pushes synchronously into every queue, so it can
//! run inside the host's apply critical section: whatever order applies
//! happen in is the order every peer's queue sees, per connection,
//! reliably. A lossy broadcast channel cannot give that guarantee.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::session::EditorTag;

/// Which side of the session a peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Host,
    Client,
}

/// Everything the host tracks about one connected peer.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    pub peer_id: Uuid,
    pub role: PeerRole,
    pub addr: SocketAddr,
    pub editor: EditorTag,
    pub connected_at: Instant,
    pub last_seen: Instant,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl PeerIdentity {
    pub fn new(peer_id: Uuid, role: PeerRole, addr: SocketAddr, editor: EditorTag) -> Self {
        let now = Instant::now();
        Self {
            peer_id,
            role,
            addr,
            editor,
            connected_at: now,
            last_seen: now,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }
}

struct PeerEntry {
    identity: PeerIdentity,
    queue: mpsc::UnboundedSender<Arc<Vec<u8>>>,
}

/// Aggregate registry counters.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub peer_count: usize,
    pub total_joins: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Registry of live peers keyed by peer id.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<Uuid, PeerEntry>>,
    total_joins: std::sync::atomic::AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and hand back the receiving end of its queue.
    ///
    /// Re-registering an existing peer id replaces its queue; the old
    /// writer task sees its receiver close and exits.
    pub fn register(
        &self,
        identity: PeerIdentity,
    ) -> mpsc::UnboundedReceiver<Arc<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer_id = identity.peer_id;
        if let Ok(mut peers) = self.peers.write() {
            peers.insert(
                peer_id,
                PeerEntry {
                    identity,
                    queue: tx,
                },
            );
        }
        self.total_joins
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        log::debug!("peer {peer_id} registered");
        rx
    }

    pub fn remove(&self, peer_id: &Uuid) -> Option<PeerIdentity> {
        let removed = self
            .peers
            .write()
            .ok()
            .and_then(|mut peers| peers.remove(peer_id))
            .map(|e| e.identity);
        if removed.is_some() {
            log::debug!("peer {peer_id} removed");
        }
        removed
    }

    /// Push a pre-encoded frame into every peer queue. Synchronous, so
    /// callers may hold the apply gate across it.
    pub fn broadcast(&self, frame: Arc<Vec<u8>>) {
        if let Ok(mut peers) = self.peers.write() {
            peers.retain(|peer_id, entry| {
                entry.identity.bytes_sent += frame.len() as u64;
                match entry.queue.send(frame.clone()) {
                    Ok(()) => true,
                    Err(_) => {
                        log::debug!("peer {peer_id} queue closed, dropping");
                        false
                    }
                }
            });
        }
    }

    /// Send to one peer only (join snapshots, resync answers).
    pub fn send_to(&self, peer_id: &Uuid, frame: Arc<Vec<u8>>) -> bool {
        if let Ok(mut peers) = self.peers.write() {
            if let Some(entry) = peers.get_mut(peer_id) {
                entry.identity.bytes_sent += frame.len() as u64;
                return entry.queue.send(frame).is_ok();
            }
        }
        false
    }

    /// Refresh a peer's liveness and received-bytes counter.
    pub fn touch(&self, peer_id: &Uuid, bytes_received: u64) {
        if let Ok(mut peers) = self.peers.write() {
            if let Some(entry) = peers.get_mut(peer_id) {
                entry.identity.last_seen = Instant::now();
                entry.identity.bytes_received += bytes_received;
            }
        }
    }

    /// Peers whose last_seen is older than `timeout`.
    pub fn stale_peers(&self, timeout: Duration) -> Vec<Uuid> {
        let now = Instant::now();
        self.peers
            .read()
            .map(|peers| {
                peers
                    .values()
                    .filter(|e| now.duration_since(e.identity.last_seen) > timeout)
                    .map(|e| e.identity.peer_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn contains(&self, peer_id: &Uuid) -> bool {
        self.peers
            .read()
            .map(|p| p.contains_key(peer_id))
            .unwrap_or(false)
    }

    pub fn identities(&self) -> Vec<PeerIdentity> {
        self.peers
            .read()
            .map(|peers| peers.values().map(|e| e.identity.clone()).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> RegistryStats {
        let (peer_count, bytes_sent, bytes_received) = self
            .peers
            .read()
            .map(|peers| {
                let sent = peers.values().map(|e| e.identity.bytes_sent).sum();
                let received = peers.values().map(|e| e.identity.bytes_received).sum();
                (peers.len(), sent, received)
            })
            .unwrap_or((0, 0, 0));
        RegistryStats {
            peer_count,
            total_joins: self
                .total_joins
                .load(std::sync::atomic::Ordering::Relaxed),
            bytes_sent,
            bytes_received,
        }
    }
}
