//! Client session: a follower replica of a hosted session.
//!
//! The client never owns the history. `commit` ships a proposal to the
//! host and returns; the commit takes effect locally only when the
//! host's broadcast comes back with an assigned sequence. Undo/redo are
//! not part of the client surface at all.
//!
//! Ordering: the reader tracks the next expected commit sequence. A
//! broadcast that is not exactly the expected one is never applied and
//! never reordered; the client sends a fresh Join and rebuilds from the
//! snapshot that answers it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use dawlink_core::{CommitRecord, SparseDiff};

use crate::endpoint::decode_token;
use crate::protocol::{MessageKind, NetworkError, WireMessage};
use crate::session::{EditorTag, LocalSession, SessionError};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for the join snapshot before giving up.
    pub join_timeout: Duration,
    /// Interval between client keepalives.
    pub keepalive_interval: Duration,
    /// A host silent for longer than this counts as gone.
    pub host_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
            host_timeout: Duration::from_secs(30),
        }
    }
}

/// Events emitted toward the owning layer.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A broadcast commit was applied in order.
    CommitApplied { sequence: u64, message: String },
    UndoApplied { applied: u64 },
    RedoApplied { applied: u64 },
    /// The history was rebuilt from a fresh snapshot.
    Resynced,
    Disconnected,
}

/// A replica session following a host.
pub struct ClientSession {
    peer_id: Uuid,
    local: Arc<LocalSession>,
    outgoing_tx: mpsc::UnboundedSender<Vec<u8>>,
    connected: Arc<AtomicBool>,
    event_rx: Option<mpsc::UnboundedReceiver<ClientEvent>>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("peer_id", &self.peer_id)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Connect to a host, join, and build the replica.
    ///
    /// `target` is an endpoint token or a plain `ip:port`. Blocks until
    /// the join snapshot arrives; a timeout produces no session (and no
    /// editor process).
    pub async fn connect(
        tag: EditorTag,
        executable: &Path,
        target: &str,
        config: ClientConfig,
    ) -> Result<Self, SessionError> {
        let addr = match target.parse::<std::net::SocketAddr>() {
            Ok(addr) => addr,
            Err(_) => decode_token(target)
                .map_err(|e| NetworkError::Connect(e.to_string()))?
                .socket_addr(),
        };

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .map_err(|e| SessionError::from(NetworkError::Connect(e.to_string())))?;
        let (mut ws_sender, mut ws_receiver) = ws.split();

        let peer_id = Uuid::new_v4();
        let join = WireMessage::join(peer_id, &tag)
            .and_then(|m| m.encode())
            .map_err(|e| NetworkError::Connect(e.to_string()))?;
        ws_sender
            .send(Message::Binary(join.into()))
            .await
            .map_err(|_| SessionError::from(NetworkError::Disconnected))?;

        // Block on the snapshot; nothing is constructed on timeout.
        let history = tokio::time::timeout(config.join_timeout, async {
            loop {
                match ws_receiver.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        if let Ok(frame) = WireMessage::decode(&bytes) {
                            if frame.kind == MessageKind::JoinSnapshot {
                                return frame.snapshot_history().ok();
                            }
                        }
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(_)) | None => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
        .ok_or(SessionError::Network(NetworkError::JoinTimeout))?;

        let local = Arc::new(LocalSession::from_history(tag, executable, history)?);
        log::info!(
            "joined host {addr} as {peer_id} at {} applied commits",
            local.applied_count()
        );

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));

        let writer = {
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        frame = outgoing_rx.recv() => {
                            let Some(frame) = frame else { break };
                            if ws_sender.send(Message::Binary(frame.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = ws_sender.close().await;
            })
        };

        let last_heard = Arc::new(Mutex::new(std::time::Instant::now()));
        let reader = tokio::spawn(reader_loop(
            ws_receiver,
            local.clone(),
            outgoing_tx.clone(),
            event_tx.clone(),
            connected.clone(),
            last_heard.clone(),
            peer_id,
            tag_for_rejoin(&local),
            shutdown_rx.clone(),
        ));

        let keepalive = tokio::spawn(keepalive_loop(
            outgoing_tx.clone(),
            event_tx,
            connected.clone(),
            last_heard,
            peer_id,
            config.keepalive_interval,
            config.host_timeout,
            shutdown_rx,
        ));

        Ok(Self {
            peer_id,
            local,
            outgoing_tx,
            connected,
            event_rx: Some(event_rx),
            shutdown_tx,
            workers: Mutex::new(vec![writer, reader, keepalive]),
        })
    }

    /// Translate the working file and propose it to the host.
    ///
    /// Returns once the proposal is queued; the commit is applied when
    /// (and only when) the matching broadcast arrives.
    pub fn commit(&self, message: &str) -> Result<(), SessionError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SessionError::Network(NetworkError::Disconnected));
        }
        let state = self.local.translate_working()?;
        let frame = WireMessage::commit_proposal(self.peer_id, message, &state)
            .and_then(|m| m.encode())
            .map_err(|e| NetworkError::Connect(e.to_string()))?;
        self.outgoing_tx
            .send(frame)
            .map_err(|_| SessionError::Network(NetworkError::Disconnected))?;
        log::debug!("proposed commit \"{message}\"");
        Ok(())
    }

    /// Clients never move the cursor themselves.
    pub fn undo(&self) -> Result<(), SessionError> {
        Err(SessionError::HostOnly)
    }

    pub fn redo(&self) -> Result<(), SessionError> {
        Err(SessionError::HostOnly)
    }

    pub fn can_commit(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.local.can_commit()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    pub fn local(&self) -> &LocalSession {
        &self.local
    }

    pub fn applied_count(&self) -> usize {
        self.local.applied_count()
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.local.commits()
    }

    pub fn diff_from_last_commit(&self) -> SparseDiff {
        self.local.diff_from_last_commit()
    }

    /// Take the event receiver (once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Stop the workers, then close the local session.
    pub async fn close(&self) -> Result<(), SessionError> {
        let _ = self.shutdown_tx.send(true);
        let workers = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            let _ = worker.await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.local.close()
    }
}

fn tag_for_rejoin(local: &LocalSession) -> EditorTag {
    local.editor_tag().clone()
}

#[allow(clippy::too_many_arguments)]
async fn reader_loop(
    mut ws_receiver: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    >,
    local: Arc<LocalSession>,
    outgoing_tx: mpsc::UnboundedSender<Vec<u8>>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    connected: Arc<AtomicBool>,
    last_heard: Arc<Mutex<std::time::Instant>>,
    peer_id: Uuid,
    tag: EditorTag,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut expected = local.next_sequence();
    let mut resyncing = false;

    let request_resync = |resyncing: &mut bool| {
        if *resyncing {
            return;
        }
        *resyncing = true;
        match WireMessage::join(peer_id, &tag).and_then(|m| m.encode()) {
            Ok(frame) => {
                let _ = outgoing_tx.send(frame);
            }
            Err(e) => log::error!("cannot encode resync join: {e}"),
        }
    };

    loop {
        let data = tokio::select! {
            _ = shutdown.changed() => break,
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Close(_))) | None => {
                    connected.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(ClientEvent::Disconnected);
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    log::debug!("socket error: {e}");
                    connected.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(ClientEvent::Disconnected);
                    break;
                }
            },
        };
        let bytes: Vec<u8> = data.into();
        let frame = match WireMessage::decode(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("undecodable frame: {e}");
                continue;
            }
        };
        if let Ok(mut heard) = last_heard.lock() {
            *heard = std::time::Instant::now();
        }

        match frame.kind {
            MessageKind::CommitBroadcast => {
                if resyncing {
                    continue;
                }
                if frame.sequence != expected {
                    log::warn!(
                        "broadcast gap: expected #{expected}, got #{}; resyncing",
                        frame.sequence
                    );
                    request_resync(&mut resyncing);
                    continue;
                }
                let body = match frame.commit_body() {
                    Ok(body) => body,
                    Err(e) => {
                        log::error!("bad commit broadcast: {e}");
                        request_resync(&mut resyncing);
                        continue;
                    }
                };
                match local.commit_state(&body.message, body.state) {
                    Ok(record) => {
                        expected = local.next_sequence();
                        let _ = event_tx.send(ClientEvent::CommitApplied {
                            sequence: record.sequence,
                            message: record.message,
                        });
                    }
                    Err(e) => {
                        log::error!("cannot apply broadcast #{}: {e}", frame.sequence);
                        request_resync(&mut resyncing);
                    }
                }
            }
            MessageKind::UndoBroadcast | MessageKind::RedoBroadcast => {
                if resyncing {
                    continue;
                }
                let mirrored = if frame.kind == MessageKind::UndoBroadcast {
                    local.undo()
                } else {
                    local.redo()
                };
                let applied = local.applied_count() as u64;
                if mirrored.is_err() || applied != frame.sequence {
                    log::warn!(
                        "cursor mismatch after {:?} (host {}, local {applied}); resyncing",
                        frame.kind,
                        frame.sequence
                    );
                    request_resync(&mut resyncing);
                    continue;
                }
                let event = if frame.kind == MessageKind::UndoBroadcast {
                    ClientEvent::UndoApplied { applied }
                } else {
                    ClientEvent::RedoApplied { applied }
                };
                let _ = event_tx.send(event);
            }
            MessageKind::JoinSnapshot => {
                // Answer to a resync join (or a duplicate at join time).
                match frame.snapshot_history() {
                    Ok(history) => {
                        if let Err(e) = local.reset_history(history) {
                            log::error!("cannot reset history: {e}");
                            continue;
                        }
                        expected = local.next_sequence();
                        resyncing = false;
                        let _ = event_tx.send(ClientEvent::Resynced);
                        log::info!("resynced at {} applied commits", local.applied_count());
                    }
                    Err(e) => log::error!("bad snapshot: {e}"),
                }
            }
            MessageKind::Keepalive => {
                // last_heard already refreshed above
            }
            other => {
                log::debug!("ignoring {other:?} from host");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn keepalive_loop(
    outgoing_tx: mpsc::UnboundedSender<Vec<u8>>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    connected: Arc<AtomicBool>,
    last_heard: Arc<Mutex<std::time::Instant>>,
    peer_id: Uuid,
    interval: Duration,
    host_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let silent = last_heard
                    .lock()
                    .map(|heard| heard.elapsed())
                    .unwrap_or(Duration::ZERO);
                if silent > host_timeout {
                    log::warn!("host silent for {silent:?}, marking disconnected");
                    connected.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(ClientEvent::Disconnected);
                    break;
                }
                match WireMessage::keepalive(peer_id).encode() {
                    Ok(frame) => {
                        if outgoing_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::error!("cannot encode keepalive: {e}"),
                }
            }
        }
    }
}
