//! Handle on the external editor process.
//!
//! The editor is GUI-only: it exposes no scripting surface and no IPC.
//! The only levers are spawning it with a project file argument and
//! killing it. Save detection happens one layer up through the
//! filesystem watcher, never through the process handle.

use std::path::{Path, PathBuf};
use std::process::{Child, Command};

/// Process errors.
#[derive(Debug)]
pub enum ProcessError {
    Spawn(String),
    /// The editor cannot be driven programmatically. Returned by every
    /// remote-control operation so callers fall back to the watcher.
    AutomationUnavailable,
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::Spawn(e) => write!(f, "failed to launch editor: {e}"),
            ProcessError::AutomationUnavailable => {
                write!(f, "editor has no automation interface")
            }
        }
    }
}

impl std::error::Error for ProcessError {}

/// A running (or exited) editor instance.
#[derive(Debug)]
pub struct EditorProcess {
    executable: PathBuf,
    child: Child,
    project: PathBuf,
}

impl EditorProcess {
    /// Spawn the editor with `project` as its sole argument.
    pub fn launch(executable: &Path, project: &Path) -> Result<Self, ProcessError> {
        let child = Command::new(executable)
            .arg(project)
            .spawn()
            .map_err(|e| ProcessError::Spawn(e.to_string()))?;
        log::info!(
            "launched editor {} (pid {}) on {}",
            executable.display(),
            child.id(),
            project.display()
        );
        Ok(Self {
            executable: executable.to_path_buf(),
            child,
            project: project.to_path_buf(),
        })
    }

    /// Point the editor at a different project file.
    ///
    /// There is no "open file" command to send, so this is kill + respawn.
    pub fn load(&mut self, project: &Path) -> Result<(), ProcessError> {
        self.terminate();
        let child = Command::new(&self.executable)
            .arg(project)
            .spawn()
            .map_err(|e| ProcessError::Spawn(e.to_string()))?;
        log::info!(
            "relaunched editor (pid {}) on {}",
            child.id(),
            project.display()
        );
        self.child = child;
        self.project = project.to_path_buf();
        Ok(())
    }

    /// Ask the editor to save. Always fails; saves are user-driven.
    pub fn request_save(&self) -> Result<(), ProcessError> {
        Err(ProcessError::AutomationUnavailable)
    }

    /// Ask the editor to save elsewhere. Always fails.
    pub fn request_save_as(&self, _target: &Path) -> Result<(), ProcessError> {
        Err(ProcessError::AutomationUnavailable)
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Whether the process is still alive. Non-blocking.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the process and reap it. Idempotent.
    pub fn terminate(&mut self) {
        if self.is_running() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

impl Drop for EditorProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}
