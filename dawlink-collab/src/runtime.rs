//! Runtime: the single owner of at most one active session.
//!
//! The runtime is an explicit value the embedding application holds; no
//! globals. It enforces the one-session rule before any construction
//! side effect and performs no history logic of its own.

use std::path::Path;

use dawlink_core::{CommitRecord, SparseDiff};

use crate::client::{ClientConfig, ClientSession};
use crate::host::{HostConfig, HostSession};
use crate::session::{EditorTag, LocalSession, SessionError};

/// The three session flavors behind one surface.
#[derive(Debug)]
pub enum Session {
    Local(LocalSession),
    Host(HostSession),
    Client(ClientSession),
}

impl Session {
    /// Commit the working file. Local and host sessions return the
    /// applied record; a client returns `None` because its proposal is
    /// only applied when the host's broadcast arrives.
    pub fn commit(&self, message: &str) -> Result<Option<CommitRecord>, SessionError> {
        match self {
            Session::Local(s) => s.commit(message).map(Some),
            Session::Host(s) => s.commit(message).map(Some),
            Session::Client(s) => s.commit(message).map(|_| None),
        }
    }

    pub fn undo(&self) -> Result<(), SessionError> {
        match self {
            Session::Local(s) => s.undo(),
            Session::Host(s) => s.undo(),
            Session::Client(s) => s.undo(),
        }
    }

    pub fn redo(&self) -> Result<(), SessionError> {
        match self {
            Session::Local(s) => s.redo(),
            Session::Host(s) => s.redo(),
            Session::Client(s) => s.redo(),
        }
    }

    pub fn can_commit(&self) -> bool {
        match self {
            Session::Local(s) => s.can_commit(),
            Session::Host(s) => s.local().can_commit(),
            Session::Client(s) => s.can_commit(),
        }
    }

    pub fn can_undo(&self) -> bool {
        match self {
            Session::Local(s) => s.can_undo(),
            Session::Host(s) => s.local().can_undo(),
            // the cursor belongs to the host
            Session::Client(_) => false,
        }
    }

    pub fn can_redo(&self) -> bool {
        match self {
            Session::Local(s) => s.can_redo(),
            Session::Host(s) => s.local().can_redo(),
            Session::Client(_) => false,
        }
    }

    pub fn applied_count(&self) -> usize {
        match self {
            Session::Local(s) => s.applied_count(),
            Session::Host(s) => s.local().applied_count(),
            Session::Client(s) => s.applied_count(),
        }
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        match self {
            Session::Local(s) => s.commits(),
            Session::Host(s) => s.local().commits(),
            Session::Client(s) => s.commits(),
        }
    }

    pub fn diff_from_last_commit(&self) -> SparseDiff {
        match self {
            Session::Local(s) => s.diff_from_last_commit(),
            Session::Host(s) => s.diff_from_last_commit(),
            Session::Client(s) => s.diff_from_last_commit(),
        }
    }

    pub fn temp_directory_path(&self) -> &Path {
        match self {
            Session::Local(s) => s.temp_directory_path(),
            Session::Host(s) => s.local().temp_directory_path(),
            Session::Client(s) => s.local().temp_directory_path(),
        }
    }
}

/// Runtime errors.
#[derive(Debug)]
pub enum RuntimeError {
    /// A session is already active; close it first.
    AlreadyOpen,
    NotOpen,
    Session(SessionError),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::AlreadyOpen => write!(f, "a session is already open"),
            RuntimeError::NotOpen => write!(f, "no session is open"),
            RuntimeError::Session(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<SessionError> for RuntimeError {
    fn from(e: SessionError) -> Self {
        RuntimeError::Session(e)
    }
}

/// Holder of the single active session.
#[derive(Default)]
pub struct Runtime {
    active: Option<Session>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    /// Open a purely local session.
    pub fn open_local(
        &mut self,
        tag: EditorTag,
        executable: &Path,
        container: Option<&Path>,
    ) -> Result<&Session, RuntimeError> {
        if self.active.is_some() {
            return Err(RuntimeError::AlreadyOpen);
        }
        let session = LocalSession::open(tag, executable, container)?;
        Ok(self.active.insert(Session::Local(session)))
    }

    /// Open a local session and host it.
    pub async fn open_host(
        &mut self,
        tag: EditorTag,
        executable: &Path,
        container: Option<&Path>,
        config: HostConfig,
    ) -> Result<&Session, RuntimeError> {
        if self.active.is_some() {
            return Err(RuntimeError::AlreadyOpen);
        }
        let local = LocalSession::open(tag, executable, container)?;
        let host = HostSession::open(local, config)
            .await
            .map_err(|e| RuntimeError::Session(SessionError::Network(e)))?;
        Ok(self.active.insert(Session::Host(host)))
    }

    /// Join a hosted session as a client.
    pub async fn open_client(
        &mut self,
        tag: EditorTag,
        executable: &Path,
        target: &str,
        config: ClientConfig,
    ) -> Result<&Session, RuntimeError> {
        if self.active.is_some() {
            return Err(RuntimeError::AlreadyOpen);
        }
        let client = ClientSession::connect(tag, executable, target, config).await?;
        Ok(self.active.insert(Session::Client(client)))
    }

    /// Close and drop the active session.
    pub async fn close_session(&mut self) -> Result<(), RuntimeError> {
        let session = self.active.take().ok_or(RuntimeError::NotOpen)?;
        match session {
            Session::Local(s) => s.close()?,
            Session::Host(s) => s.close().await?,
            Session::Client(s) => s.close().await?,
        }
        Ok(())
    }
}
