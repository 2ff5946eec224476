//! Container file: a serialized [`VersionHistory`] under the `dlc`
//! extension.
//!
//! Layout:
//! ```text
//! ┌───────────┬────────────────────────────────────────────┐
//! │ magic      │ lz4 (size-prepended)                       │
//! │ "DLC1"     │   └─ bincode { format_version, history }   │
//! └───────────┴────────────────────────────────────────────┘
//! ```
//!
//! Written when a session closes or exports, read when a session resumes
//! from an existing container.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::history::VersionHistory;

/// Fixed extension for container files.
pub const CONTAINER_EXTENSION: &str = "dlc";

const MAGIC: &[u8; 4] = b"DLC1";
const FORMAT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct ContainerBody {
    format_version: u16,
    history: VersionHistory,
}

/// Container errors.
#[derive(Debug, Clone)]
pub enum ContainerError {
    Io(String),
    BadMagic,
    UnsupportedVersion(u16),
    Encode(String),
    Decode(String),
}

impl std::fmt::Display for ContainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerError::Io(e) => write!(f, "container I/O error: {e}"),
            ContainerError::BadMagic => write!(f, "not a dawlink container"),
            ContainerError::UnsupportedVersion(v) => {
                write!(f, "unsupported container format version {v}")
            }
            ContainerError::Encode(e) => write!(f, "container encode error: {e}"),
            ContainerError::Decode(e) => write!(f, "container decode error: {e}"),
        }
    }
}

impl std::error::Error for ContainerError {}

/// Write `history` to `path` as a container file.
pub fn export_container(path: &Path, history: &VersionHistory) -> Result<(), ContainerError> {
    let body = ContainerBody {
        format_version: FORMAT_VERSION,
        history: history.clone(),
    };
    let encoded = bincode::serde::encode_to_vec(&body, bincode::config::standard())
        .map_err(|e| ContainerError::Encode(e.to_string()))?;
    let compressed = lz4_flex::compress_prepend_size(&encoded);

    let mut bytes = Vec::with_capacity(MAGIC.len() + compressed.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&compressed);
    fs::write(path, bytes).map_err(|e| ContainerError::Io(e.to_string()))
}

/// Read a container file back into a [`VersionHistory`].
pub fn import_container(path: &Path) -> Result<VersionHistory, ContainerError> {
    let bytes = fs::read(path).map_err(|e| ContainerError::Io(e.to_string()))?;
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(ContainerError::BadMagic);
    }

    let decompressed = lz4_flex::decompress_size_prepended(&bytes[MAGIC.len()..])
        .map_err(|e| ContainerError::Decode(e.to_string()))?;
    let (body, _): (ContainerBody, _) =
        bincode::serde::decode_from_slice(&decompressed, bincode::config::standard())
            .map_err(|e| ContainerError::Decode(e.to_string()))?;

    if body.format_version != FORMAT_VERSION {
        return Err(ContainerError::UnsupportedVersion(body.format_version));
    }
    Ok(body.history)
}
