//! Wire protocol for host/client replication.
//!
//! Every frame is a [`WireMessage`] encoded with bincode and sent as one
//! binary WebSocket message:
//! ```text
//! ┌──────┬─────────┬──────────┬─────────────────────┐
//! │ kind │ peer_id │ sequence │ payload (per kind)  │
//! └──────┴─────────┴──────────┴─────────────────────┘
//! ```
//!
//! `sequence` is kind-dependent: the commit index for CommitBroadcast,
//! the resulting applied count for Undo/RedoBroadcast, zero elsewhere.
//! Snapshot payloads are lz4-compressed; everything else is raw bincode.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dawlink_core::{Project, VersionHistory};

use crate::session::EditorTag;

/// Message kinds with fixed wire numbers.
///
/// Numbers are part of the protocol and never reused; 5 and 6 belonged
/// to retired message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageKind {
    /// Client → host: identity + editor tag, requests a snapshot.
    Join = 1,
    /// Host → client: full history snapshot (lz4 payload).
    JoinSnapshot = 2,
    /// Client → host: proposed commit (message + state).
    CommitProposal = 3,
    /// Host → all: applied commit with its sequence index.
    CommitBroadcast = 4,
    /// Host → all: undo applied; sequence = resulting applied count.
    UndoBroadcast = 7,
    /// Host → all: redo applied; sequence = resulting applied count.
    RedoBroadcast = 8,
    /// Either direction: liveness probe.
    Keepalive = 9,
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageKind::Join),
            2 => Ok(MessageKind::JoinSnapshot),
            3 => Ok(MessageKind::CommitProposal),
            4 => Ok(MessageKind::CommitBroadcast),
            7 => Ok(MessageKind::UndoBroadcast),
            8 => Ok(MessageKind::RedoBroadcast),
            9 => Ok(MessageKind::Keepalive),
            other => Err(format!("unknown message kind {other}")),
        }
    }
}

/// Commit body carried by proposals and broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitBody {
    pub message: String,
    pub state: Project,
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub kind: MessageKind,
    /// Sender identity; nil for host-originated broadcasts.
    pub peer_id: Uuid,
    pub sequence: u64,
    pub payload: Vec<u8>,
}

/// Protocol-level errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    Encode(String),
    Decode(String),
    /// A payload accessor was called on the wrong message kind.
    WrongKind(MessageKind),
    /// A broadcast arrived with an unexpected sequence index.
    OutOfOrder { expected: u64, got: u64 },
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Encode(e) => write!(f, "encode error: {e}"),
            ProtocolError::Decode(e) => write!(f, "decode error: {e}"),
            ProtocolError::WrongKind(k) => write!(f, "unexpected message kind {k:?}"),
            ProtocolError::OutOfOrder { expected, got } => {
                write!(f, "out-of-order broadcast: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Connection-level errors.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkError {
    Bind(String),
    Connect(String),
    /// No snapshot arrived within the join timeout.
    JoinTimeout,
    Disconnected,
    /// The peer runs a different editor or an incompatible version.
    IncompatibleEditor(String),
    ChannelClosed,
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::Bind(e) => write!(f, "bind failed: {e}"),
            NetworkError::Connect(e) => write!(f, "connect failed: {e}"),
            NetworkError::JoinTimeout => write!(f, "timed out waiting for join snapshot"),
            NetworkError::Disconnected => write!(f, "connection lost"),
            NetworkError::IncompatibleEditor(e) => write!(f, "incompatible editor: {e}"),
            NetworkError::ChannelClosed => write!(f, "internal channel closed"),
        }
    }
}

impl std::error::Error for NetworkError {}

impl WireMessage {
    pub fn join(peer_id: Uuid, editor: &EditorTag) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(editor, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::Join,
            peer_id,
            sequence: 0,
            payload,
        })
    }

    pub fn join_snapshot(history: &VersionHistory) -> Result<Self, ProtocolError> {
        let encoded = bincode::serde::encode_to_vec(history, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::JoinSnapshot,
            peer_id: Uuid::nil(),
            sequence: history.applied_count() as u64,
            payload: lz4_flex::compress_prepend_size(&encoded),
        })
    }

    pub fn commit_proposal(
        peer_id: Uuid,
        message: &str,
        state: &Project,
    ) -> Result<Self, ProtocolError> {
        let body = CommitBody {
            message: message.to_string(),
            state: state.clone(),
        };
        let payload = bincode::serde::encode_to_vec(&body, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::CommitProposal,
            peer_id,
            sequence: 0,
            payload,
        })
    }

    pub fn commit_broadcast(
        sequence: u64,
        message: &str,
        state: &Project,
    ) -> Result<Self, ProtocolError> {
        let body = CommitBody {
            message: message.to_string(),
            state: state.clone(),
        };
        let payload = bincode::serde::encode_to_vec(&body, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::CommitBroadcast,
            peer_id: Uuid::nil(),
            sequence,
            payload,
        })
    }

    pub fn undo_broadcast(applied: u64) -> Self {
        Self {
            kind: MessageKind::UndoBroadcast,
            peer_id: Uuid::nil(),
            sequence: applied,
            payload: Vec::new(),
        }
    }

    pub fn redo_broadcast(applied: u64) -> Self {
        Self {
            kind: MessageKind::RedoBroadcast,
            peer_id: Uuid::nil(),
            sequence: applied,
            payload: Vec::new(),
        }
    }

    pub fn keepalive(peer_id: Uuid) -> Self {
        Self {
            kind: MessageKind::Keepalive,
            peer_id,
            sequence: 0,
            payload: Vec::new(),
        }
    }

    /// Decode the editor tag from a Join payload.
    pub fn editor_tag(&self) -> Result<EditorTag, ProtocolError> {
        if self.kind != MessageKind::Join {
            return Err(ProtocolError::WrongKind(self.kind));
        }
        let (tag, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(tag)
    }

    /// Decompress and decode the history from a JoinSnapshot payload.
    pub fn snapshot_history(&self) -> Result<VersionHistory, ProtocolError> {
        if self.kind != MessageKind::JoinSnapshot {
            return Err(ProtocolError::WrongKind(self.kind));
        }
        let decompressed = lz4_flex::decompress_size_prepended(&self.payload)
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        let (history, _) =
            bincode::serde::decode_from_slice(&decompressed, bincode::config::standard())
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(history)
    }

    /// Decode the commit body from a proposal or broadcast payload.
    pub fn commit_body(&self) -> Result<CommitBody, ProtocolError> {
        if self.kind != MessageKind::CommitProposal && self.kind != MessageKind::CommitBroadcast {
            return Err(ProtocolError::WrongKind(self.kind));
        }
        let (body, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(body)
    }

    /// Encode the frame for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode a frame from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(msg)
    }
}
