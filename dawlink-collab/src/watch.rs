//! Filesystem change watcher for a working file or a directory.
//!
//! The editor owns the working file and saves it whenever the user hits
//! save; we only ever observe. For a file target the OS watcher runs on
//! its parent directory and events are filtered down to the one file;
//! for a directory target the directory itself is watched and every
//! child path dispatches:
//! ```text
//! notify backend ──► std mpsc ──► dispatch thread ──► callbacks
//!                                  (debounce per path)
//! ```
//!
//! Callbacks run on the dispatch thread and must not block for long.
//! Editors that save via rename (write temp, rename over target) show up
//! as removed + created; subscribers treat created like modified.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};

/// Callback signature: receives the watched path.
pub type ChangeCallback = Box<dyn Fn(&Path) + Send + 'static>;

/// Subscription errors.
#[derive(Debug)]
pub enum SubscriptionError {
    /// The target has no parent directory or the parent does not exist.
    TargetNotFound(PathBuf),
    Backend(String),
}

impl std::fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionError::TargetNotFound(p) => {
                write!(f, "cannot watch {}: no parent directory", p.display())
            }
            SubscriptionError::Backend(e) => write!(f, "watch failed: {e}"),
        }
    }
}

impl std::error::Error for SubscriptionError {}

#[derive(Default)]
struct Callbacks {
    created: Option<ChangeCallback>,
    modified: Option<ChangeCallback>,
    removed: Option<ChangeCallback>,
}

enum WorkerMsg {
    Fs(notify::Event),
    Shutdown,
}

/// An active watch on one file or directory.
///
/// Dropping the watcher stops the OS watch and joins the dispatch
/// thread; no callback runs after drop returns.
pub struct ChangeWatcher {
    // Kept alive for the duration of the subscription.
    _watcher: notify::RecommendedWatcher,
    tx: mpsc::Sender<WorkerMsg>,
    worker: Option<JoinHandle<()>>,
    callbacks: Arc<Mutex<Callbacks>>,
    target: PathBuf,
}

impl ChangeWatcher {
    /// Watch `target` with the given per-path debounce window.
    ///
    /// A file target may not exist yet, but its parent directory must.
    /// A directory target is watched directly and callbacks fire for
    /// every direct child path.
    pub fn subscribe(
        target: impl AsRef<Path>,
        debounce: Duration,
    ) -> Result<Self, SubscriptionError> {
        let target = target.as_ref().to_path_buf();
        let directory = target.is_dir();
        let watch_root = if directory {
            target.clone()
        } else {
            target
                .parent()
                .filter(|p| p.is_dir())
                .ok_or_else(|| SubscriptionError::TargetNotFound(target.clone()))?
                .to_path_buf()
        };

        let (tx, rx) = mpsc::channel::<WorkerMsg>();
        let fs_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let _ = fs_tx.send(WorkerMsg::Fs(event));
                }
                Err(e) => log::warn!("watch backend error: {e}"),
            }
        })
        .map_err(|e| SubscriptionError::Backend(e.to_string()))?;

        watcher
            .watch(&watch_root, RecursiveMode::NonRecursive)
            .map_err(|e| SubscriptionError::Backend(e.to_string()))?;

        let callbacks = Arc::new(Mutex::new(Callbacks::default()));
        let worker = {
            let callbacks = callbacks.clone();
            let target = target.clone();
            std::thread::spawn(move || dispatch_loop(rx, callbacks, target, directory, debounce))
        };

        log::debug!("watching {} (debounce {debounce:?})", target.display());
        Ok(Self {
            _watcher: watcher,
            tx,
            worker: Some(worker),
            callbacks,
            target,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn on_created(&self, f: impl Fn(&Path) + Send + 'static) {
        if let Ok(mut cbs) = self.callbacks.lock() {
            cbs.created = Some(Box::new(f));
        }
    }

    pub fn on_modified(&self, f: impl Fn(&Path) + Send + 'static) {
        if let Ok(mut cbs) = self.callbacks.lock() {
            cbs.modified = Some(Box::new(f));
        }
    }

    pub fn on_removed(&self, f: impl Fn(&Path) + Send + 'static) {
        if let Ok(mut cbs) = self.callbacks.lock() {
            cbs.removed = Some(Box::new(f));
        }
    }

    /// Stop watching and wait for the dispatch thread to exit.
    pub fn unsubscribe(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.tx.send(WorkerMsg::Shutdown);
            let _ = worker.join();
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Created,
    Modified,
    Removed,
}

fn dispatch_loop(
    rx: mpsc::Receiver<WorkerMsg>,
    callbacks: Arc<Mutex<Callbacks>>,
    target: PathBuf,
    directory: bool,
    debounce: Duration,
) {
    let mut last_fired: HashMap<PathBuf, Instant> = HashMap::new();

    while let Ok(msg) = rx.recv() {
        let event = match msg {
            WorkerMsg::Fs(event) => event,
            WorkerMsg::Shutdown => break,
        };

        // A paired rename carries [from, to]: the old path was removed,
        // the new one created.
        let changes: Vec<(PathBuf, Change)> = match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut pair = Vec::new();
                if let Some(from) = event.paths.first() {
                    pair.push((from.clone(), Change::Removed));
                }
                if let Some(to) = event.paths.get(1) {
                    pair.push((to.clone(), Change::Created));
                }
                pair
            }
            _ => {
                let change = match event.kind {
                    EventKind::Create(_) => Change::Created,
                    EventKind::Remove(_) => Change::Removed,
                    // A rename away from the target reads as removal, a
                    // rename onto it as creation.
                    EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Change::Removed,
                    EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Change::Created,
                    EventKind::Modify(_) => Change::Modified,
                    _ => continue,
                };
                event.paths.iter().map(|p| (p.clone(), change)).collect()
            }
        };

        for (path, change) in changes {
            let relevant = if directory {
                path.parent() == Some(target.as_path())
            } else {
                path == target
            };
            if !relevant {
                continue;
            }

            let now = Instant::now();
            if let Some(last) = last_fired.get(&path) {
                if now.duration_since(*last) < debounce {
                    continue;
                }
            }
            last_fired.insert(path.clone(), now);

            let cbs = match callbacks.lock() {
                Ok(cbs) => cbs,
                Err(_) => return,
            };
            let cb = match change {
                Change::Created => cbs.created.as_ref(),
                Change::Modified => cbs.modified.as_ref(),
                Change::Removed => cbs.removed.as_ref(),
            };
            if let Some(cb) = cb {
                cb(&path);
            }
        }
    }
}
