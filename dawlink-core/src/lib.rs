//! # dawlink-core — Versioned project model for dawlink
//!
//! The pure half of dawlink: the internal project model that gets
//! versioned, the sparse preview diff, the linear version history
//! (commit log + cursor), the `.dlc` container file, and the
//! translation to/from the native editor schema.
//!
//! ```text
//! ┌──────────────┐  to_native / from_native  ┌──────────────┐
//! │   Project     │ ◄───────────────────────► │ NativeProject │
//! │ (internal)    │                           │ (.hprj JSON)  │
//! └──────┬───────┘                           └──────────────┘
//!        │ commit / undo / redo
//!        ▼
//! ┌──────────────┐   export / import         ┌──────────────┐
//! │VersionHistory │ ◄───────────────────────► │  .dlc file    │
//! │ (commit log)  │      (lz4 + bincode)      │ (container)   │
//! └──────────────┘                           └──────────────┘
//! ```
//!
//! Everything in this crate is deterministic and does no I/O except the
//! explicit file import/export entry points.

pub mod container;
pub mod diff;
pub mod history;
pub mod native;
pub mod project;

pub use container::{export_container, import_container, ContainerError, CONTAINER_EXTENSION};
pub use diff::{diff, DiffEntry, FieldChange, SparseDiff};
pub use history::{CommitRecord, HistoryError, VersionHistory};
pub use native::{
    export_native, from_native, import_native, to_native, NativeProject, TranslationError,
    NATIVE_EXTENSION,
};
pub use project::{Clip, Project, Track, TrackKind};
