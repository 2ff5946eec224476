//! Host session: the single write authority for a replicated session.
//!
//! ```text
//! client conns ──► proposal mpsc ──► apply loop ──► LocalSession
//!                                        │ (apply gate)
//!                                        └──► PeerRegistry.broadcast
//! ```
//!
//! Proposals from every connection funnel into one queue; receipt order
//! is the resolved total order, there is no merging. Each application
//! commits into the host's own local session and broadcasts the
//! resulting record, inside the apply gate, so broadcast order equals
//! apply order. Host-local commit/undo/redo take the same gate.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use dawlink_core::{CommitRecord, Project, SparseDiff};

use crate::endpoint::{encode_token, EndpointDescriptor, TokenError};
use crate::peers::{PeerIdentity, PeerRegistry, PeerRole, RegistryStats};
use crate::protocol::{MessageKind, NetworkError, WireMessage};
use crate::session::{LocalSession, SessionError};

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Address to bind to; port 0 picks a free port.
    pub bind_addr: String,
    /// Interval between host keepalive broadcasts.
    pub keepalive_interval: Duration,
    /// A peer silent for longer than this is dropped.
    pub peer_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7440".to_string(),
            keepalive_interval: Duration::from_secs(10),
            peer_timeout: Duration::from_secs(30),
        }
    }
}

/// Host-side counters.
#[derive(Debug, Clone, Default)]
pub struct HostStats {
    pub peer_count: usize,
    pub total_joins: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub applied_count: usize,
    pub next_sequence: u64,
}

struct Proposal {
    peer_id: Uuid,
    message: String,
    state: Project,
}

/// A hosted, replicated session.
pub struct HostSession {
    local: Arc<LocalSession>,
    registry: Arc<PeerRegistry>,
    /// Serializes every history application with its broadcast.
    apply_gate: Arc<Mutex<()>>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for HostSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSession")
            .field("local_addr", &self.local_addr)
            .field("peer_count", &self.registry.peer_count())
            .finish_non_exhaustive()
    }
}

impl HostSession {
    /// Bind the listener and start the accept loop, the apply loop, and
    /// the keepalive sweeper. Takes ownership of the local session.
    pub async fn open(local: LocalSession, config: HostConfig) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|e| NetworkError::Bind(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| NetworkError::Bind(e.to_string()))?;
        log::info!("hosting session on {local_addr}");

        let local = Arc::new(local);
        let registry = Arc::new(PeerRegistry::new());
        let apply_gate = Arc::new(Mutex::new(()));
        let (proposal_tx, proposal_rx) = mpsc::unbounded_channel::<Proposal>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let conn_tasks = Arc::new(Mutex::new(Vec::new()));

        let accept = tokio::spawn(accept_loop(
            listener,
            local.clone(),
            registry.clone(),
            apply_gate.clone(),
            proposal_tx,
            conn_tasks.clone(),
            shutdown_rx.clone(),
        ));
        let apply = tokio::spawn(apply_loop(
            proposal_rx,
            local.clone(),
            registry.clone(),
            apply_gate.clone(),
            shutdown_rx.clone(),
        ));
        let sweep = tokio::spawn(keepalive_loop(
            registry.clone(),
            config.keepalive_interval,
            config.peer_timeout,
            shutdown_rx,
        ));

        Ok(Self {
            local,
            registry,
            apply_gate,
            local_addr,
            shutdown_tx,
            workers: Mutex::new(vec![accept, apply, sweep]),
            conn_tasks,
        })
    }

    /// Commit the host's working file and broadcast the record.
    pub fn commit(&self, message: &str) -> Result<CommitRecord, SessionError> {
        let _gate = self.apply_gate.lock().map_err(|_| SessionError::Closed)?;
        let record = self.local.commit(message)?;
        broadcast_commit(&self.registry, &record);
        Ok(record)
    }

    /// Undo on the authoritative history; broadcast on success only.
    pub fn undo(&self) -> Result<(), SessionError> {
        let _gate = self.apply_gate.lock().map_err(|_| SessionError::Closed)?;
        self.local.undo()?;
        let frame = WireMessage::undo_broadcast(self.local.applied_count() as u64);
        broadcast_frame(&self.registry, &frame);
        Ok(())
    }

    /// Redo on the authoritative history; broadcast on success only.
    pub fn redo(&self) -> Result<(), SessionError> {
        let _gate = self.apply_gate.lock().map_err(|_| SessionError::Closed)?;
        self.local.redo()?;
        let frame = WireMessage::redo_broadcast(self.local.applied_count() as u64);
        broadcast_frame(&self.registry, &frame);
        Ok(())
    }

    pub fn local(&self) -> &LocalSession {
        &self.local
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint token a joining client can paste in.
    pub fn shareable_token(&self) -> Result<String, TokenError> {
        encode_token(&EndpointDescriptor::from(self.local_addr))
    }

    pub fn peer_count(&self) -> usize {
        self.registry.peer_count()
    }

    pub fn diff_from_last_commit(&self) -> SparseDiff {
        self.local.diff_from_last_commit()
    }

    pub fn stats(&self) -> HostStats {
        let RegistryStats {
            peer_count,
            total_joins,
            bytes_sent,
            bytes_received,
        } = self.registry.stats();
        HostStats {
            peer_count,
            total_joins,
            bytes_sent,
            bytes_received,
            applied_count: self.local.applied_count(),
            next_sequence: self.local.next_sequence(),
        }
    }

    /// Stop the workers, then close the local session. Does not return
    /// before the accept, apply, and sweeper tasks and every connection
    /// handler have exited.
    pub async fn close(&self) -> Result<(), SessionError> {
        let _ = self.shutdown_tx.send(true);
        let workers = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            let _ = worker.await;
        }
        let conns = match self.conn_tasks.lock() {
            Ok(mut conns) => conns.drain(..).collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };
        for conn in conns {
            let _ = conn.await;
        }
        self.local.close()
    }
}

fn broadcast_commit(registry: &PeerRegistry, record: &CommitRecord) {
    match WireMessage::commit_broadcast(record.sequence, &record.message, &record.state)
        .and_then(|m| m.encode())
    {
        Ok(bytes) => registry.broadcast(Arc::new(bytes)),
        Err(e) => log::error!("cannot encode commit broadcast: {e}"),
    }
}

fn broadcast_frame(registry: &PeerRegistry, frame: &WireMessage) {
    match frame.encode() {
        Ok(bytes) => registry.broadcast(Arc::new(bytes)),
        Err(e) => log::error!("cannot encode broadcast: {e}"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop(
    listener: TcpListener,
    local: Arc<LocalSession>,
    registry: Arc<PeerRegistry>,
    apply_gate: Arc<Mutex<()>>,
    proposal_tx: mpsc::UnboundedSender<Proposal>,
    conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("accept failed: {e}");
                        continue;
                    }
                };
                log::debug!("connection from {addr}");
                let local = local.clone();
                let registry = registry.clone();
                let apply_gate = apply_gate.clone();
                let proposal_tx = proposal_tx.clone();
                let shutdown = shutdown.clone();
                let task = tokio::spawn(async move {
                    if let Err(e) = handle_connection(
                        stream, addr, local, registry, apply_gate, proposal_tx, shutdown,
                    )
                    .await
                    {
                        log::warn!("connection {addr} ended with error: {e}");
                    }
                });
                if let Ok(mut tasks) = conn_tasks.lock() {
                    tasks.retain(|t| !t.is_finished());
                    tasks.push(task);
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    local: Arc<LocalSession>,
    registry: Arc<PeerRegistry>,
    apply_gate: Arc<Mutex<()>>,
    proposal_tx: mpsc::UnboundedSender<Proposal>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (ws_sender, mut ws_receiver) = ws.split();
    // Moved into the writer task on first join.
    let mut ws_sender = Some(ws_sender);

    let mut peer_id: Option<Uuid> = None;
    let mut writer: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            msg = ws_receiver.next() => {
                let data = match msg {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        // Only answerable before the writer task owns the
                        // sink; afterwards tungstenite queues pongs itself.
                        if let Some(sink) = ws_sender.as_mut() {
                            sink.send(Message::Pong(data)).await?;
                        }
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        log::debug!("socket error from {addr}: {e}");
                        break;
                    }
                };
                let bytes: Vec<u8> = data.into();
                let frame = match WireMessage::decode(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("undecodable frame from {addr}: {e}");
                        continue;
                    }
                };
                if let Some(pid) = peer_id {
                    registry.touch(&pid, bytes.len() as u64);
                }

                match frame.kind {
                    MessageKind::Join => {
                        let tag = frame.editor_tag()?;
                        if !tag.compatible_with(local.editor_tag()) {
                            log::warn!(
                                "refusing {addr}: editor {tag} incompatible with {}",
                                local.editor_tag()
                            );
                            break;
                        }

                        if peer_id.is_none() {
                            // First join: snapshot + registration are atomic
                            // under the gate, so no broadcast falls between
                            // the snapshot and the peer's queue.
                            peer_id = Some(frame.peer_id);
                            let rx = {
                                let _gate =
                                    apply_gate.lock().map_err(|_| NetworkError::ChannelClosed)?;
                                let snapshot = local.history_snapshot()?;
                                let rx = registry.register(PeerIdentity::new(
                                    frame.peer_id,
                                    PeerRole::Client,
                                    addr,
                                    tag,
                                ));
                                let snap = WireMessage::join_snapshot(&snapshot)?.encode()?;
                                registry.send_to(&frame.peer_id, Arc::new(snap));
                                rx
                            };
                            if let Some(mut sink) = ws_sender.take() {
                                let mut rx = rx;
                                writer = Some(tokio::spawn(async move {
                                    while let Some(frame) = rx.recv().await {
                                        let payload: Vec<u8> = (*frame).clone();
                                        if sink
                                            .send(Message::Binary(payload.into()))
                                            .await
                                            .is_err()
                                        {
                                            break;
                                        }
                                    }
                                }));
                            }
                            log::info!("peer {} joined from {addr}", frame.peer_id);
                        } else {
                            // Re-join on a live connection: resync snapshot.
                            let _gate =
                                apply_gate.lock().map_err(|_| NetworkError::ChannelClosed)?;
                            let snapshot = local.history_snapshot()?;
                            let snap = WireMessage::join_snapshot(&snapshot)?.encode()?;
                            registry.send_to(&frame.peer_id, Arc::new(snap));
                            log::info!("peer {} resynced", frame.peer_id);
                        }
                    }
                    MessageKind::CommitProposal => {
                        let Some(pid) = peer_id else {
                            log::warn!("proposal before join from {addr}");
                            break;
                        };
                        let body = frame.commit_body()?;
                        if proposal_tx
                            .send(Proposal {
                                peer_id: pid,
                                message: body.message,
                                state: body.state,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    MessageKind::Keepalive => {
                        if peer_id.is_none() {
                            log::warn!("keepalive before join from {addr}");
                            break;
                        }
                        // touch above already refreshed last_seen
                    }
                    other => {
                        log::debug!("ignoring {other:?} from {addr}");
                    }
                }
            }
        }
    }

    if let Some(pid) = peer_id {
        registry.remove(&pid);
        log::info!("peer {pid} disconnected");
    }
    if let Some(writer) = writer {
        writer.abort();
    }
    Ok(())
}

async fn apply_loop(
    mut proposals: mpsc::UnboundedReceiver<Proposal>,
    local: Arc<LocalSession>,
    registry: Arc<PeerRegistry>,
    apply_gate: Arc<Mutex<()>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            proposal = proposals.recv() => {
                let Some(proposal) = proposal else { break };
                let Ok(_gate) = apply_gate.lock() else { break };
                match local.commit_state(&proposal.message, proposal.state) {
                    Ok(record) => {
                        log::info!(
                            "applied proposal from {} as #{}",
                            proposal.peer_id,
                            record.sequence
                        );
                        broadcast_commit(&registry, &record);
                    }
                    Err(e) => {
                        log::error!("cannot apply proposal from {}: {e}", proposal.peer_id);
                    }
                }
            }
        }
    }
}

async fn keepalive_loop(
    registry: Arc<PeerRegistry>,
    interval: Duration,
    peer_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                for peer_id in registry.stale_peers(peer_timeout) {
                    log::warn!("peer {peer_id} timed out");
                    registry.remove(&peer_id);
                }
                broadcast_frame(&registry, &WireMessage::keepalive(Uuid::nil()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_config_default() {
        let config = HostConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:7440");
        assert_eq!(config.keepalive_interval, Duration::from_secs(10));
        assert_eq!(config.peer_timeout, Duration::from_secs(30));
    }
}
