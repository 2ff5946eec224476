//! Translation between the internal model and the Harmonia project
//! schema (`.hprj`, JSON).
//!
//! The native schema is owned by the editor, not by us. We mirror only
//! the fields we version; everything else the editor writes would be
//! dropped on import, so translation is lossy by construction and the
//! working file is always regenerated from the internal model, never
//! patched in place.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::project::{Clip, Project, Track, TrackKind};

/// Fixed extension for native Harmonia project files.
pub const NATIVE_EXTENSION: &str = "hprj";

/// Top-level native document. Field names follow the editor's schema,
/// not ours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeProject {
    pub title: String,
    pub bpm: f64,
    /// Ticks per quarter note.
    pub resolution: u32,
    #[serde(default)]
    pub tracks: Vec<NativeTrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeTrack {
    pub label: String,
    /// "audio" or "midi".
    pub kind: String,
    pub volume_db: f64,
    pub pan: f64,
    #[serde(default)]
    pub clips: Vec<NativeClip>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeClip {
    pub label: String,
    pub start: u64,
    pub length: u64,
    pub looped: bool,
}

/// Translation errors.
#[derive(Debug, Clone)]
pub enum TranslationError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for TranslationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslationError::Io(e) => write!(f, "native file I/O error: {e}"),
            TranslationError::Parse(e) => write!(f, "native file parse error: {e}"),
        }
    }
}

impl std::error::Error for TranslationError {}

/// Map the internal model onto the native schema. Pure.
pub fn to_native(project: &Project) -> NativeProject {
    NativeProject {
        title: project.name.clone(),
        bpm: project.tempo_bpm,
        resolution: project.ppq,
        tracks: project
            .tracks
            .iter()
            .map(|t| NativeTrack {
                label: t.name.clone(),
                kind: match t.kind {
                    TrackKind::Audio => "audio".to_string(),
                    TrackKind::Midi => "midi".to_string(),
                },
                volume_db: t.gain_db,
                pan: t.pan,
                clips: t
                    .clips
                    .iter()
                    .map(|c| NativeClip {
                        label: c.name.clone(),
                        start: c.start_tick,
                        length: c.length_ticks,
                        looped: c.is_loop,
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Map a native document back onto the internal model. Pure.
///
/// An unknown track kind string maps to [`TrackKind::Audio`]; the editor
/// also treats unrecognized kinds as plain audio lanes.
pub fn from_native(native: &NativeProject) -> Project {
    Project {
        name: native.title.clone(),
        tempo_bpm: native.bpm,
        ppq: native.resolution,
        tracks: native
            .tracks
            .iter()
            .map(|t| Track {
                name: t.label.clone(),
                kind: if t.kind == "midi" {
                    TrackKind::Midi
                } else {
                    TrackKind::Audio
                },
                gain_db: t.volume_db,
                pan: t.pan,
                clips: t
                    .clips
                    .iter()
                    .map(|c| Clip {
                        name: c.label.clone(),
                        start_tick: c.start,
                        length_ticks: c.length,
                        is_loop: c.looped,
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Write `project` as a native file at `path`.
pub fn export_native(path: &Path, project: &Project) -> Result<(), TranslationError> {
    let native = to_native(project);
    let json = serde_json::to_string_pretty(&native)
        .map_err(|e| TranslationError::Parse(e.to_string()))?;
    fs::write(path, json).map_err(|e| TranslationError::Io(e.to_string()))
}

/// Read a native file at `path` into the internal model.
pub fn import_native(path: &Path) -> Result<Project, TranslationError> {
    let json = fs::read_to_string(path).map_err(|e| TranslationError::Io(e.to_string()))?;
    let native: NativeProject =
        serde_json::from_str(&json).map_err(|e| TranslationError::Parse(e.to_string()))?;
    Ok(from_native(&native))
}
