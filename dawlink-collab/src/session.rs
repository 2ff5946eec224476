//! Local editor session: one editor instance, one working file, one
//! version history.
//!
//! Lifecycle:
//! ```text
//! open ──► Ready ──► {Committing | Undoing | Redoing} ──► Ready ──► Closed
//! ```
//!
//! The session materializes the current history state as a native
//! working file in a private temp directory, launches the editor on it,
//! and watches the file for saves. Saves become a pending state + diff
//! preview; `commit` turns the pending state into a history record.
//!
//! All mutable state lives in `SessionCore` behind one mutex. Watcher
//! callbacks, replication appliers, and direct calls serialize on it,
//! which is the whole concurrency story for a local session.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use dawlink_core::{
    export_native, import_container, import_native, CommitRecord, ContainerError, HistoryError,
    Project, SparseDiff, TranslationError, VersionHistory, CONTAINER_EXTENSION,
};

use crate::process::{EditorProcess, ProcessError};
use crate::watch::{ChangeWatcher, SubscriptionError};

/// File name of the working copy inside the session's temp directory.
pub const WORKING_FILE_NAME: &str = "dawlink.hprj";

/// Debounce window for working file saves. Editors write project files
/// in bursts; one save must collapse to one reload.
const SAVE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Supported editors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditorKind {
    Harmonia,
}

/// Editor identity carried in Join messages. Hosts refuse peers whose
/// tag is incompatible with their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorTag {
    pub kind: EditorKind,
    pub version: String,
}

impl EditorTag {
    pub fn new(kind: EditorKind, version: impl Into<String>) -> Self {
        Self {
            kind,
            version: version.into(),
        }
    }

    /// Same editor and same major version. Harmonia project files break
    /// across majors but not across minors.
    pub fn compatible_with(&self, other: &EditorTag) -> bool {
        let major = |v: &str| v.split('.').next().unwrap_or("").to_string();
        self.kind == other.kind && major(&self.version) == major(&other.version)
    }
}

impl std::fmt::Display for EditorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {}", self.kind, self.version)
    }
}

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Ready,
    Committing,
    Undoing,
    Redoing,
    Closed,
}

/// Session errors.
#[derive(Debug)]
pub enum SessionError {
    /// Open-time validation failed; nothing was constructed.
    Validation(String),
    Translation(TranslationError),
    History(HistoryError),
    Process(ProcessError),
    Container(ContainerError),
    Watch(SubscriptionError),
    Network(crate::protocol::NetworkError),
    Closed,
    /// Undo/redo invoked on a session that does not own the history.
    HostOnly,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Validation(e) => write!(f, "validation failed: {e}"),
            SessionError::Translation(e) => write!(f, "{e}"),
            SessionError::History(e) => write!(f, "{e}"),
            SessionError::Process(e) => write!(f, "{e}"),
            SessionError::Container(e) => write!(f, "{e}"),
            SessionError::Watch(e) => write!(f, "{e}"),
            SessionError::Network(e) => write!(f, "{e}"),
            SessionError::Closed => write!(f, "session is closed"),
            SessionError::HostOnly => write!(f, "operation is reserved to the host"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<TranslationError> for SessionError {
    fn from(e: TranslationError) -> Self {
        SessionError::Translation(e)
    }
}

impl From<HistoryError> for SessionError {
    fn from(e: HistoryError) -> Self {
        SessionError::History(e)
    }
}

impl From<ProcessError> for SessionError {
    fn from(e: ProcessError) -> Self {
        SessionError::Process(e)
    }
}

impl From<ContainerError> for SessionError {
    fn from(e: ContainerError) -> Self {
        SessionError::Container(e)
    }
}

impl From<SubscriptionError> for SessionError {
    fn from(e: SubscriptionError) -> Self {
        SessionError::Watch(e)
    }
}

impl From<crate::protocol::NetworkError> for SessionError {
    fn from(e: crate::protocol::NetworkError) -> Self {
        SessionError::Network(e)
    }
}

/// All mutable session state. Single-writer via the outer mutex.
struct SessionCore {
    history: VersionHistory,
    /// Last translated save, not yet committed.
    pending_state: Option<Project>,
    pending_diff: SparseDiff,
    phase: SessionPhase,
    working_file: PathBuf,
}

impl SessionCore {
    fn note_saved(&mut self, state: Project) {
        let diff = self.history.diff_from_current(&state);
        if diff.is_empty() {
            // Our own re-materialization or a no-op save.
            self.pending_state = None;
            self.pending_diff = SparseDiff::default();
        } else {
            self.pending_state = Some(state);
            self.pending_diff = diff;
        }
    }

    fn rematerialize(&self) -> Result<(), SessionError> {
        export_native(&self.working_file, &self.history.current_state())?;
        Ok(())
    }
}

/// A versioned editor session on one machine.
///
/// Field order matters for drop: the watcher joins its dispatch thread
/// before the process handle kills the editor, and both go before the
/// temp directory is deleted.
pub struct LocalSession {
    tag: EditorTag,
    watcher: Mutex<Option<ChangeWatcher>>,
    process: Mutex<Option<EditorProcess>>,
    core: Arc<Mutex<SessionCore>>,
    work_dir: TempDir,
}

impl std::fmt::Debug for LocalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSession")
            .field("tag", &self.tag)
            .field("work_dir", &self.work_dir.path())
            .finish_non_exhaustive()
    }
}

impl LocalSession {
    /// Open a session: validate, import the container (if any),
    /// materialize the working file, launch the editor, start watching.
    ///
    /// Validation runs before anything is constructed; a failing open
    /// leaves no temp directory and no process behind.
    pub fn open(
        tag: EditorTag,
        executable: &Path,
        container: Option<&Path>,
    ) -> Result<Self, SessionError> {
        if !executable.is_file() {
            return Err(SessionError::Validation(format!(
                "editor executable not found: {}",
                executable.display()
            )));
        }
        if let Some(container) = container {
            if container.extension().and_then(|e| e.to_str()) != Some(CONTAINER_EXTENSION) {
                return Err(SessionError::Validation(format!(
                    "not a .{CONTAINER_EXTENSION} container: {}",
                    container.display()
                )));
            }
            if !container.is_file() {
                return Err(SessionError::Validation(format!(
                    "container not found: {}",
                    container.display()
                )));
            }
        }

        let history = match container {
            Some(path) => import_container(path)?,
            None => VersionHistory::new(),
        };
        Self::open_with_history(tag, executable, history)
    }

    /// Open a session over an already-built history (replication join).
    pub fn from_history(
        tag: EditorTag,
        executable: &Path,
        history: VersionHistory,
    ) -> Result<Self, SessionError> {
        if !executable.is_file() {
            return Err(SessionError::Validation(format!(
                "editor executable not found: {}",
                executable.display()
            )));
        }
        Self::open_with_history(tag, executable, history)
    }

    fn open_with_history(
        tag: EditorTag,
        executable: &Path,
        history: VersionHistory,
    ) -> Result<Self, SessionError> {
        let work_dir = tempfile::tempdir()
            .map_err(|e| SessionError::Validation(format!("cannot create working directory: {e}")))?;
        let working_file = work_dir.path().join(WORKING_FILE_NAME);
        export_native(&working_file, &history.current_state())?;

        let process = EditorProcess::launch(executable, &working_file)?;

        let core = Arc::new(Mutex::new(SessionCore {
            history,
            pending_state: None,
            pending_diff: SparseDiff::default(),
            phase: SessionPhase::Ready,
            working_file: working_file.clone(),
        }));

        let watcher = ChangeWatcher::subscribe(&working_file, SAVE_DEBOUNCE)?;
        let reload = {
            let core = core.clone();
            move |path: &Path| {
                // Mid-write saves parse as garbage; skip and wait for the
                // next event.
                match import_native(path) {
                    Ok(state) => {
                        if let Ok(mut core) = core.lock() {
                            if core.phase != SessionPhase::Closed {
                                core.note_saved(state);
                            }
                        }
                    }
                    Err(TranslationError::Parse(e)) => {
                        log::debug!("ignoring unparseable working file save: {e}");
                    }
                    Err(TranslationError::Io(e)) => {
                        log::warn!("cannot read working file: {e}");
                    }
                }
            }
        };
        watcher.on_modified(reload.clone());
        watcher.on_created(reload);

        log::info!("session open on {}", working_file.display());
        Ok(Self {
            tag,
            watcher: Mutex::new(Some(watcher)),
            process: Mutex::new(Some(process)),
            core,
            work_dir,
        })
    }

    fn lock_core(&self) -> Result<MutexGuard<'_, SessionCore>, SessionError> {
        // A poisoned lock means a writer panicked mid-update; nothing
        // sound can happen after that.
        self.core.lock().map_err(|_| SessionError::Closed)
    }

    fn lock_ready(&self) -> Result<MutexGuard<'_, SessionCore>, SessionError> {
        let core = self.lock_core()?;
        if core.phase == SessionPhase::Closed {
            return Err(SessionError::Closed);
        }
        Ok(core)
    }

    /// Commit the current working file state under `message`.
    ///
    /// Uses the last watcher-translated state when one is pending,
    /// otherwise translates the working file on the spot.
    pub fn commit(&self, message: &str) -> Result<CommitRecord, SessionError> {
        let mut core = self.lock_ready()?;
        core.phase = SessionPhase::Committing;
        let state = match core.pending_state.take() {
            Some(state) => state,
            None => match import_native(&core.working_file) {
                Ok(state) => state,
                Err(e) => {
                    core.phase = SessionPhase::Ready;
                    return Err(e.into());
                }
            },
        };
        let record = core.history.commit(message, state).clone();
        core.pending_diff = SparseDiff::default();
        core.phase = SessionPhase::Ready;
        log::info!("commit #{} \"{}\"", record.sequence, record.message);
        Ok(record)
    }

    /// Apply an externally ordered commit (host apply loop, client
    /// broadcast) and re-materialize the working file from it.
    pub fn commit_state(&self, message: &str, state: Project) -> Result<CommitRecord, SessionError> {
        let mut core = self.lock_ready()?;
        core.phase = SessionPhase::Committing;
        let record = core.history.commit(message, state).clone();
        core.pending_state = None;
        core.pending_diff = SparseDiff::default();
        let rematerialized = core.rematerialize();
        core.phase = SessionPhase::Ready;
        rematerialized?;
        Ok(record)
    }

    /// Step the history back and re-materialize the working file, so the
    /// editor reopens on the previous state.
    pub fn undo(&self) -> Result<(), SessionError> {
        self.step(SessionPhase::Undoing)
    }

    /// Step the history forward and re-materialize the working file.
    pub fn redo(&self) -> Result<(), SessionError> {
        self.step(SessionPhase::Redoing)
    }

    fn step(&self, phase: SessionPhase) -> Result<(), SessionError> {
        let mut core = self.lock_ready()?;
        core.phase = phase;
        let moved = if phase == SessionPhase::Undoing {
            core.history.undo()
        } else {
            core.history.redo()
        };
        if let Err(e) = moved {
            core.phase = SessionPhase::Ready;
            return Err(e.into());
        }
        core.pending_state = None;
        core.pending_diff = SparseDiff::default();
        let rematerialized = core.rematerialize();
        core.phase = SessionPhase::Ready;
        rematerialized
    }

    pub fn can_commit(&self) -> bool {
        self.core
            .lock()
            .map(|c| c.phase != SessionPhase::Closed)
            .unwrap_or(false)
    }

    pub fn can_undo(&self) -> bool {
        self.core.lock().map(|c| c.history.can_undo()).unwrap_or(false)
    }

    pub fn can_redo(&self) -> bool {
        self.core.lock().map(|c| c.history.can_redo()).unwrap_or(false)
    }

    pub fn applied_count(&self) -> usize {
        self.core
            .lock()
            .map(|c| c.history.applied_count())
            .unwrap_or(0)
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.core
            .lock()
            .map(|c| c.history.commits().to_vec())
            .unwrap_or_default()
    }

    /// Preview of uncommitted working file changes.
    pub fn diff_from_last_commit(&self) -> SparseDiff {
        self.core
            .lock()
            .map(|c| c.pending_diff.clone())
            .unwrap_or_default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.core
            .lock()
            .map(|c| c.phase)
            .unwrap_or(SessionPhase::Closed)
    }

    pub fn editor_tag(&self) -> &EditorTag {
        &self.tag
    }

    pub fn temp_directory_path(&self) -> &Path {
        self.work_dir.path()
    }

    pub fn working_file_path(&self) -> PathBuf {
        self.work_dir.path().join(WORKING_FILE_NAME)
    }

    /// Clone of the full history, for join snapshots and export.
    pub fn history_snapshot(&self) -> Result<VersionHistory, SessionError> {
        Ok(self.lock_core()?.history.clone())
    }

    /// Replace the whole history (client resync) and re-materialize.
    pub fn reset_history(&self, history: VersionHistory) -> Result<(), SessionError> {
        let mut core = self.lock_ready()?;
        core.history = history;
        core.pending_state = None;
        core.pending_diff = SparseDiff::default();
        core.rematerialize()
    }

    /// Translate the working file without committing.
    pub fn translate_working(&self) -> Result<Project, SessionError> {
        let core = self.lock_ready()?;
        Ok(import_native(&core.working_file)?)
    }

    /// The sequence index the next commit will receive.
    pub fn next_sequence(&self) -> u64 {
        self.core
            .lock()
            .map(|c| c.history.next_sequence())
            .unwrap_or(0)
    }

    /// Close the session: stop the watcher (joined), terminate the
    /// editor, mark closed. The working directory is deleted on drop.
    ///
    /// The watcher goes first; its callbacks lock the core, so taking
    /// the core lock while the dispatch thread is live would deadlock
    /// the join.
    pub fn close(&self) -> Result<(), SessionError> {
        let watcher = self.watcher.lock().map_err(|_| SessionError::Closed)?.take();
        if let Some(watcher) = watcher {
            watcher.unsubscribe();
        }

        let process = self.process.lock().map_err(|_| SessionError::Closed)?.take();
        if let Some(mut process) = process {
            match process.request_save() {
                Err(ProcessError::AutomationUnavailable) => {
                    log::debug!("no automation interface, terminating editor");
                }
                other => {
                    if let Err(e) = other {
                        log::warn!("save request failed: {e}");
                    }
                }
            }
            process.terminate();
        }

        let mut core = self.lock_core()?;
        if core.phase == SessionPhase::Closed {
            return Ok(());
        }
        core.phase = SessionPhase::Closed;
        log::info!("session closed");
        Ok(())
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use dawlink_core::{export_container, Track, TrackKind};

    fn fake_editor(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-editor.sh");
        std::fs::write(&path, "#!/bin/sh\nsleep 60\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn tag() -> EditorTag {
        EditorTag::new(EditorKind::Harmonia, "2.3")
    }

    fn named(name: &str) -> Project {
        Project {
            name: name.to_string(),
            ..Project::default()
        }
    }

    fn wait_until(mut pred: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if pred() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_editor_tag_compatibility() {
        let a = EditorTag::new(EditorKind::Harmonia, "2.3");
        let b = EditorTag::new(EditorKind::Harmonia, "2.7");
        let c = EditorTag::new(EditorKind::Harmonia, "3.0");
        assert!(a.compatible_with(&b));
        assert!(!a.compatible_with(&c));
    }

    #[test]
    fn test_open_validates_executable_first() {
        let err = LocalSession::open(tag(), Path::new("/no/such/editor"), None).unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
    }

    #[test]
    fn test_open_validates_container() {
        let dir = tempfile::tempdir().unwrap();
        let editor = fake_editor(dir.path());

        // wrong extension
        let bad = dir.path().join("history.txt");
        std::fs::write(&bad, "x").unwrap();
        let err = LocalSession::open(tag(), &editor, Some(&bad)).unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));

        // missing file
        let missing = dir.path().join("absent.dlc");
        let err = LocalSession::open(tag(), &editor, Some(&missing)).unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
    }

    #[test]
    fn test_open_empty_materializes_untitled() {
        let dir = tempfile::tempdir().unwrap();
        let session = LocalSession::open(tag(), &fake_editor(dir.path()), None).unwrap();

        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.applied_count(), 0);
        assert!(format!("{session:?}").contains("LocalSession"));
        let working = import_native(&session.working_file_path()).unwrap();
        assert_eq!(working, Project::default());

        session.close().unwrap();
    }

    #[test]
    fn test_open_from_container() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("song.dlc");
        let mut history = VersionHistory::new();
        history.commit("init", named("Song"));
        export_container(&container, &history).unwrap();

        let session =
            LocalSession::open(tag(), &fake_editor(dir.path()), Some(&container)).unwrap();
        assert_eq!(session.applied_count(), 1);
        let working = import_native(&session.working_file_path()).unwrap();
        assert_eq!(working.name, "Song");

        session.close().unwrap();
    }

    #[test]
    fn test_commit_translates_working_file() {
        let dir = tempfile::tempdir().unwrap();
        let session = LocalSession::open(tag(), &fake_editor(dir.path()), None).unwrap();

        let mut state = named("Take 1");
        state.tracks.push(Track::new("Drums", TrackKind::Audio));
        export_native(&session.working_file_path(), &state).unwrap();

        let record = session.commit("first take").unwrap();
        assert_eq!(record.sequence, 1);
        assert_eq!(record.state.name, "Take 1");
        assert_eq!(session.applied_count(), 1);
        assert!(session.diff_from_last_commit().is_empty());

        session.close().unwrap();
    }

    #[test]
    fn test_save_surfaces_pending_diff() {
        let dir = tempfile::tempdir().unwrap();
        let session = LocalSession::open(tag(), &fake_editor(dir.path()), None).unwrap();

        export_native(&session.working_file_path(), &named("Edited")).unwrap();
        assert!(wait_until(|| !session.diff_from_last_commit().is_empty()));

        session.commit("pick up the save").unwrap();
        assert_eq!(session.commits()[0].state.name, "Edited");

        session.close().unwrap();
    }

    #[test]
    fn test_undo_redo_rematerialize() {
        let dir = tempfile::tempdir().unwrap();
        let session = LocalSession::open(tag(), &fake_editor(dir.path()), None).unwrap();

        export_native(&session.working_file_path(), &named("one")).unwrap();
        session.commit("one").unwrap();
        export_native(&session.working_file_path(), &named("two")).unwrap();
        session.commit("two").unwrap();

        session.undo().unwrap();
        assert_eq!(import_native(&session.working_file_path()).unwrap().name, "one");

        session.redo().unwrap();
        assert_eq!(import_native(&session.working_file_path()).unwrap().name, "two");

        // failing undo/redo are reported no-ops
        session.redo().unwrap_err();
        assert_eq!(session.applied_count(), 2);

        session.close().unwrap();
    }

    #[test]
    fn test_closed_session_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let session = LocalSession::open(tag(), &fake_editor(dir.path()), None).unwrap();
        session.close().unwrap();

        assert!(matches!(session.commit("late"), Err(SessionError::Closed)));
        assert!(matches!(session.undo(), Err(SessionError::Closed)));
        assert!(!session.can_commit());

        // close is idempotent
        session.close().unwrap();
    }

    #[test]
    fn test_reset_history_rematerializes() {
        let dir = tempfile::tempdir().unwrap();
        let session = LocalSession::open(tag(), &fake_editor(dir.path()), None).unwrap();

        let mut history = VersionHistory::new();
        history.commit("a", named("replacement"));
        session.reset_history(history).unwrap();

        assert_eq!(session.applied_count(), 1);
        assert_eq!(
            import_native(&session.working_file_path()).unwrap().name,
            "replacement"
        );

        session.close().unwrap();
    }

    #[test]
    fn test_unparseable_save_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let session = LocalSession::open(tag(), &fake_editor(dir.path()), None).unwrap();

        std::fs::write(session.working_file_path(), "{ mid-write").unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert!(session.diff_from_last_commit().is_empty());
        assert_eq!(session.phase(), SessionPhase::Ready);

        session.close().unwrap();
    }
}
