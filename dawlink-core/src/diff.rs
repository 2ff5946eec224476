//! Sparse preview diff between two project states.
//!
//! The diff is a UI artifact: it tells the user what changed since the
//! last commit. It is recomputed from full states on every reload and
//! never persisted or sent over the wire — replication ships whole
//! states, the host does not merge.

use crate::project::{Clip, Project, Track};

/// One changed scalar field, pre-rendered for display.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: &'static str,
    pub before: String,
    pub after: String,
}

impl FieldChange {
    fn new(field: &'static str, before: impl ToString, after: impl ToString) -> Self {
        Self {
            field,
            before: before.to_string(),
            after: after.to_string(),
        }
    }
}

/// A single entry in a sparse diff.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffEntry {
    ProjectChanged { fields: Vec<FieldChange> },
    TrackAdded { track: String },
    TrackRemoved { track: String },
    TrackChanged { track: String, fields: Vec<FieldChange> },
    ClipAdded { track: String, clip: String },
    ClipRemoved { track: String, clip: String },
    ClipChanged { track: String, clip: String, fields: Vec<FieldChange> },
}

/// Delta between two project states. Empty means the states are equal
/// within the supported field set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseDiff {
    pub entries: Vec<DiffEntry>,
}

impl SparseDiff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Compute the sparse diff from `old` to `new`.
///
/// Tracks and clips are matched by name; a rename therefore shows up as
/// a remove + add, which matches what the watcher reports for file
/// renames one layer down.
pub fn diff(old: &Project, new: &Project) -> SparseDiff {
    let mut entries = Vec::new();

    let mut project_fields = Vec::new();
    if old.name != new.name {
        project_fields.push(FieldChange::new("name", &old.name, &new.name));
    }
    if old.tempo_bpm != new.tempo_bpm {
        project_fields.push(FieldChange::new("tempo_bpm", old.tempo_bpm, new.tempo_bpm));
    }
    if old.ppq != new.ppq {
        project_fields.push(FieldChange::new("ppq", old.ppq, new.ppq));
    }
    if !project_fields.is_empty() {
        entries.push(DiffEntry::ProjectChanged {
            fields: project_fields,
        });
    }

    for old_track in &old.tracks {
        match new.track(&old_track.name) {
            None => entries.push(DiffEntry::TrackRemoved {
                track: old_track.name.clone(),
            }),
            Some(new_track) => diff_track(old_track, new_track, &mut entries),
        }
    }
    for new_track in &new.tracks {
        if old.track(&new_track.name).is_none() {
            entries.push(DiffEntry::TrackAdded {
                track: new_track.name.clone(),
            });
        }
    }

    SparseDiff { entries }
}

fn diff_track(old: &Track, new: &Track, entries: &mut Vec<DiffEntry>) {
    let mut fields = Vec::new();
    if old.kind != new.kind {
        fields.push(FieldChange::new(
            "kind",
            format!("{:?}", old.kind),
            format!("{:?}", new.kind),
        ));
    }
    if old.gain_db != new.gain_db {
        fields.push(FieldChange::new("gain_db", old.gain_db, new.gain_db));
    }
    if old.pan != new.pan {
        fields.push(FieldChange::new("pan", old.pan, new.pan));
    }
    if !fields.is_empty() {
        entries.push(DiffEntry::TrackChanged {
            track: old.name.clone(),
            fields,
        });
    }

    let find = |clips: &[Clip], name: &str| clips.iter().find(|c| c.name == name).cloned();

    for old_clip in &old.clips {
        match find(&new.clips, &old_clip.name) {
            None => entries.push(DiffEntry::ClipRemoved {
                track: old.name.clone(),
                clip: old_clip.name.clone(),
            }),
            Some(new_clip) => {
                let mut fields = Vec::new();
                if old_clip.start_tick != new_clip.start_tick {
                    fields.push(FieldChange::new(
                        "start_tick",
                        old_clip.start_tick,
                        new_clip.start_tick,
                    ));
                }
                if old_clip.length_ticks != new_clip.length_ticks {
                    fields.push(FieldChange::new(
                        "length_ticks",
                        old_clip.length_ticks,
                        new_clip.length_ticks,
                    ));
                }
                if old_clip.is_loop != new_clip.is_loop {
                    fields.push(FieldChange::new("is_loop", old_clip.is_loop, new_clip.is_loop));
                }
                if !fields.is_empty() {
                    entries.push(DiffEntry::ClipChanged {
                        track: old.name.clone(),
                        clip: old_clip.name.clone(),
                        fields,
                    });
                }
            }
        }
    }
    for new_clip in &new.clips {
        if find(&old.clips, &new_clip.name).is_none() {
            entries.push(DiffEntry::ClipAdded {
                track: old.name.clone(),
                clip: new_clip.name.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::TrackKind;

    fn project_with_track(track: Track) -> Project {
        Project {
            tracks: vec![track],
            ..Project::default()
        }
    }

    #[test]
    fn test_identical_projects_empty_diff() {
        let p = project_with_track(Track::new("Drums", TrackKind::Audio));
        let d = diff(&p, &p.clone());
        assert!(d.is_empty());
    }

    #[test]
    fn test_track_added_and_removed() {
        let old = project_with_track(Track::new("Drums", TrackKind::Audio));
        let new = project_with_track(Track::new("Bass", TrackKind::Midi));

        let d = diff(&old, &new);
        assert_eq!(d.len(), 2);
        assert!(d.entries.contains(&DiffEntry::TrackRemoved {
            track: "Drums".to_string()
        }));
        assert!(d.entries.contains(&DiffEntry::TrackAdded {
            track: "Bass".to_string()
        }));
    }

    #[test]
    fn test_track_field_change() {
        let old = project_with_track(Track::new("Drums", TrackKind::Audio));
        let mut changed = Track::new("Drums", TrackKind::Audio);
        changed.gain_db = -6.0;
        let new = project_with_track(changed);

        let d = diff(&old, &new);
        assert_eq!(d.len(), 1);
        match &d.entries[0] {
            DiffEntry::TrackChanged { track, fields } => {
                assert_eq!(track, "Drums");
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "gain_db");
                assert_eq!(fields[0].after, "-6");
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn test_clip_changes() {
        let mut old_track = Track::new("Drums", TrackKind::Audio);
        old_track.clips.push(Clip {
            name: "Intro".to_string(),
            start_tick: 0,
            length_ticks: 3840,
            is_loop: false,
        });
        let mut new_track = old_track.clone();
        new_track.clips[0].start_tick = 960;
        new_track.clips.push(Clip {
            name: "Verse".to_string(),
            start_tick: 3840,
            length_ticks: 3840,
            is_loop: true,
        });

        let d = diff(
            &project_with_track(old_track),
            &project_with_track(new_track),
        );
        assert_eq!(d.len(), 2);
        assert!(matches!(&d.entries[0], DiffEntry::ClipChanged { clip, .. } if clip == "Intro"));
        assert!(matches!(&d.entries[1], DiffEntry::ClipAdded { clip, .. } if clip == "Verse"));
    }

    #[test]
    fn test_project_level_change() {
        let old = Project::default();
        let new = Project {
            tempo_bpm: 140.0,
            ..Project::default()
        };

        let d = diff(&old, &new);
        assert_eq!(d.len(), 1);
        match &d.entries[0] {
            DiffEntry::ProjectChanged { fields } => {
                assert_eq!(fields[0].field, "tempo_bpm");
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }
}
