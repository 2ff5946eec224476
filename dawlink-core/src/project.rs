//! Internal project model.
//!
//! This is the representation that gets versioned. It is deliberately
//! smaller than any native editor schema: only the fields the
//! translation layer can round-trip are carried.

use serde::{Deserialize, Serialize};

/// Pulses per quarter note used for all internal clip positions.
pub const DEFAULT_PPQ: u32 = 960;

/// Track flavor. Midi tracks carry clips too; their payload (notes,
/// instrument) is outside the supported field set for now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Midi,
}

/// A clip on a track timeline. Positions are in ticks at [`Project::ppq`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub name: String,
    pub start_tick: u64,
    pub length_ticks: u64,
    pub is_loop: bool,
}

/// One mixer lane with its timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub kind: TrackKind,
    /// Fader gain in dB, 0.0 = unity.
    pub gain_db: f64,
    /// Stereo pan, -1.0 (left) to 1.0 (right).
    pub pan: f64,
    pub clips: Vec<Clip>,
}

impl Track {
    pub fn new(name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            name: name.into(),
            kind,
            gain_db: 0.0,
            pan: 0.0,
            clips: Vec::new(),
        }
    }
}

/// A whole project: the unit of versioning.
///
/// Immutable once committed — history stores full clones, diffs are
/// recomputed on demand and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub tempo_bpm: f64,
    pub ppq: u32,
    pub tracks: Vec<Track>,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            name: "Untitled".to_string(),
            tempo_bpm: 120.0,
            ppq: DEFAULT_PPQ,
            tracks: Vec::new(),
        }
    }
}

impl Project {
    pub fn track(&self, name: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_project_is_empty() {
        let p = Project::default();
        assert_eq!(p.name, "Untitled");
        assert_eq!(p.ppq, DEFAULT_PPQ);
        assert!(p.tracks.is_empty());
    }

    #[test]
    fn test_track_lookup() {
        let mut p = Project::default();
        p.tracks.push(Track::new("Drums", TrackKind::Audio));
        p.tracks.push(Track::new("Bass", TrackKind::Midi));

        assert!(p.track("Drums").is_some());
        assert_eq!(p.track("Bass").unwrap().kind, TrackKind::Midi);
        assert!(p.track("Vocals").is_none());
    }
}
