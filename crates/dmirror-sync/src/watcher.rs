//! File watching and debounced change queue
//!
//! Provides a [`FileWatcher`] that wraps the `notify` crate to monitor the
//! sync root recursively, converting raw OS events into [`ChangeEvent`]
//! values. The [`DebouncedChangeQueue`] coalesces rapid-fire events per path
//! so a burst of writes to one file only settles once, after a quiet window.
//!
//! ## Architecture
//!
//! ```text
//! inotify / fanotify
//!       │
//!       ▼
//!  FileWatcher  ──→  mpsc::channel  ──→  DebouncedChangeQueue  ──→  SyncScheduler
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A filesystem change event detected by the watcher, decoupled from the
/// `notify` crate's raw event types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A new file or directory was created at the given path.
    Created(PathBuf),
    /// An existing file was modified (content or metadata changed).
    Modified(PathBuf),
    /// A file or directory was deleted from the given path.
    Deleted(PathBuf),
    /// A file or directory was renamed/moved.
    Renamed {
        /// The original path before the rename.
        old: PathBuf,
        /// The new path after the rename.
        new: PathBuf,
    },
}

impl ChangeEvent {
    /// Returns the primary path associated with this event. For rename
    /// events, this returns the new (destination) path.
    pub fn path(&self) -> &Path {
        match self {
            ChangeEvent::Created(p) => p,
            ChangeEvent::Modified(p) => p,
            ChangeEvent::Deleted(p) => p,
            ChangeEvent::Renamed { new, .. } => new,
        }
    }
}

/// Watches filesystem directories for changes using the OS-native mechanism
/// (inotify on Linux). Converts raw events into [`ChangeEvent`]s and sends
/// them through an mpsc channel.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_tx: mpsc::Sender<ChangeEvent>,
}

impl FileWatcher {
    /// Creates a new `FileWatcher`. Returns the watcher and a receiver
    /// channel yielding raw (non-debounced) [`ChangeEvent`]s.
    ///
    /// # Errors
    /// Returns an error if the underlying OS watcher cannot be created.
    pub fn new() -> Result<(Self, mpsc::Receiver<ChangeEvent>)> {
        let (event_tx, event_rx) = mpsc::channel::<ChangeEvent>(1024);
        let tx = event_tx.clone();

        info!("initializing file watcher");

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = map_notify_event(&event) {
                        if let Err(e) = tx.blocking_send(change) {
                            warn!(error = %e, "failed to send change event (receiver dropped)");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "file watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("failed to create file watcher")?;

        Ok((Self { watcher, event_tx }, event_rx))
    }

    /// Starts watching a directory recursively for filesystem changes.
    ///
    /// # Errors
    /// Returns an error if the path cannot be watched (does not exist,
    /// insufficient permissions, or the inotify watch limit is reached).
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "starting recursive watch");
        self.watcher
            .watch(path, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch path: {}", path.display()))?;
        Ok(())
    }

    /// Stops watching a directory.
    ///
    /// # Errors
    /// Returns an error if the path was not being watched.
    pub fn unwatch(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "stopping watch");
        self.watcher
            .unwatch(path)
            .with_context(|| format!("failed to unwatch path: {}", path.display()))?;
        Ok(())
    }

    /// Clones the sender half, for feeding synthetic events (tests, the
    /// scheduler's own re-queue path) into the same channel as OS events.
    pub fn sender(&self) -> mpsc::Sender<ChangeEvent> {
        self.event_tx.clone()
    }
}

/// Converts a `notify::Event` into our internal `ChangeEvent`. Returns
/// `None` for events with no associated paths or that should be ignored
/// (e.g. access events).
fn map_notify_event(event: &notify::Event) -> Option<ChangeEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => {
            let path = paths.first()?;
            debug!(path = %path.display(), "mapped create event");
            Some(ChangeEvent::Created(path.clone()))
        }

        EventKind::Modify(ModifyKind::Data(_)) => {
            let path = paths.first()?;
            debug!(path = %path.display(), "mapped modify(data) event");
            Some(ChangeEvent::Modified(path.clone()))
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                let old = paths[0].clone();
                let new = paths[1].clone();
                debug!(old = %old.display(), new = %new.display(), "mapped rename event");
                Some(ChangeEvent::Renamed { old, new })
            } else {
                let path = paths.first()?;
                debug!(path = %path.display(), "rename with single path, treating as modified");
                Some(ChangeEvent::Modified(path.clone()))
            }
        }

        EventKind::Remove(_) => {
            let path = paths.first()?;
            debug!(path = %path.display(), "mapped remove event");
            Some(ChangeEvent::Deleted(path.clone()))
        }

        EventKind::Modify(_) => {
            let path = paths.first()?;
            debug!(path = %path.display(), kind = ?event.kind, "mapped other modify event");
            Some(ChangeEvent::Modified(path.clone()))
        }

        _ => {
            debug!(kind = ?event.kind, "ignoring event kind");
            None
        }
    }
}

/// Queue that coalesces rapid filesystem changes into debounced events.
///
/// When multiple events arrive for the same path in quick succession, only
/// the latest event type is kept and its timestamp is reset. Events are
/// only emitted (via [`poll`](Self::poll)) once they have been quiet for
/// longer than the configured debounce delay (2000 ms single-shot, per
/// path).
pub struct DebouncedChangeQueue {
    pending: HashMap<PathBuf, (ChangeEvent, Instant)>,
    debounce_delay: Duration,
}

impl DebouncedChangeQueue {
    /// Creates a new `DebouncedChangeQueue` with the given debounce delay.
    pub fn new(debounce_delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            debounce_delay,
        }
    }

    /// Inserts or updates a change event for the given path, resetting its
    /// debounce timer.
    pub fn push(&mut self, event: ChangeEvent) {
        let path = event.path().to_path_buf();
        debug!(path = %path.display(), event = ?event, "enqueuing change event");
        self.pending.insert(path, (event, Instant::now()));
    }

    /// Returns (and removes) all changes whose quiet period has exceeded
    /// the debounce delay.
    pub fn poll(&mut self) -> Vec<ChangeEvent> {
        let now = Instant::now();
        let mut settled = Vec::new();
        let mut settled_paths = Vec::new();

        for (path, (event, timestamp)) in &self.pending {
            if now.duration_since(*timestamp) >= self.debounce_delay {
                settled.push(event.clone());
                settled_paths.push(path.clone());
            }
        }

        for path in &settled_paths {
            self.pending.remove(path);
        }

        if !settled.is_empty() {
            debug!(count = settled.len(), "polled settled change events");
        }
        settled
    }

    /// Number of pending (unsettled) events.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// `true` if there are no pending events.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
