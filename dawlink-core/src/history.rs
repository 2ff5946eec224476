//! Linear version history: append-only commit log plus a cursor.
//!
//! ```text
//! commits:  [ #1 ] [ #2 ] [ #3 ] [ #5 ]
//!                          ▲
//!                       applied
//! ```
//!
//! The cursor (`applied`) moves on undo/redo; records themselves are
//! immutable. A commit after an undo discards the forward tail, and the
//! sequence counter keeps counting — indices are globally unique and
//! monotonically increasing even across discarded tails, which the
//! replication layer relies on for its ordering check.

use serde::{Deserialize, Serialize};

use crate::diff::{diff, SparseDiff};
use crate::project::Project;

/// One immutable, named snapshot in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Globally unique, monotonically increasing index.
    pub sequence: u64,
    pub message: String,
    pub state: Project,
}

/// History errors. Both are reported no-ops: the history is unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    NothingToUndo,
    NothingToRedo,
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::NothingToUndo => write!(f, "nothing to undo"),
            HistoryError::NothingToRedo => write!(f, "nothing to redo"),
        }
    }
}

impl std::error::Error for HistoryError {}

/// The sole source of truth for a session's history.
///
/// Invariant: `0 <= applied <= commits.len()` after every operation,
/// including failing ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionHistory {
    commits: Vec<CommitRecord>,
    applied: usize,
    next_sequence: u64,
}

impl Default for VersionHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionHistory {
    pub fn new() -> Self {
        Self {
            commits: Vec::new(),
            applied: 0,
            next_sequence: 1,
        }
    }

    /// Append a commit at the cursor, discarding any redoable tail.
    pub fn commit(&mut self, message: impl Into<String>, state: Project) -> &CommitRecord {
        self.commits.truncate(self.applied);
        let record = CommitRecord {
            sequence: self.next_sequence,
            message: message.into(),
            state,
        };
        self.next_sequence += 1;
        self.commits.push(record);
        self.applied = self.commits.len();
        // truncate + push keeps the invariant: applied == len
        &self.commits[self.applied - 1]
    }

    /// Move the cursor one commit back.
    pub fn undo(&mut self) -> Result<(), HistoryError> {
        if self.applied == 0 {
            return Err(HistoryError::NothingToUndo);
        }
        self.applied -= 1;
        Ok(())
    }

    /// Move the cursor one commit forward.
    pub fn redo(&mut self) -> Result<(), HistoryError> {
        if self.applied == self.commits.len() {
            return Err(HistoryError::NothingToRedo);
        }
        self.applied += 1;
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        self.applied > 0
    }

    pub fn can_redo(&self) -> bool {
        self.applied < self.commits.len()
    }

    pub fn applied_count(&self) -> usize {
        self.applied
    }

    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }

    /// The sequence index the next commit will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// The state at the cursor; the empty project when nothing is applied.
    pub fn current_state(&self) -> Project {
        if self.applied == 0 {
            Project::default()
        } else {
            self.commits[self.applied - 1].state.clone()
        }
    }

    /// Preview diff between the state at the cursor and `state`.
    pub fn diff_from_current(&self, state: &Project) -> SparseDiff {
        diff(&self.current_state(), state)
    }
}
