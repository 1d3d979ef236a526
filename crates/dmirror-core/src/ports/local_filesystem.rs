//! Local filesystem port (driven/secondary port), consumed by the
//! reconciler and the filesystem watcher.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - Content hashing is deliberately absent: change detection is by
//!   mtime/size only (content hashing for equality is a non-goal).
//! - `watch` returns a `WatchHandle`; dropping it stops watching.

use chrono::{DateTime, Utc};

use crate::domain::LocalAbsPath;

/// Snapshot of a file's state on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSystemState {
    /// Whether the path exists on disk.
    pub exists: bool,
    /// Whether this is a regular file (false for directories).
    pub is_file: bool,
    /// Size in bytes (0 for directories or non-existent paths).
    pub size: u64,
    /// Last modification time, if available.
    pub modified: Option<DateTime<Utc>>,
}

impl FileSystemState {
    /// A state representing a non-existent path.
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            size: 0,
            modified: None,
        }
    }

    /// `true` if the path exists and is a regular file.
    #[must_use]
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }
}

/// One entry returned by [`ILocalFileSystem::list_dir`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Entry name (no path components).
    pub name: String,
    /// Absolute path of the entry.
    pub path: LocalAbsPath,
    /// `true` if the entry is a directory (not followed through a symlink).
    pub is_dir: bool,
    /// `true` if the entry is itself a symlink.
    pub is_symlink: bool,
}

/// RAII handle for an active filesystem watch. Dropping it stops watching.
pub struct WatchHandle {
    stop_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchHandle {
    /// Creates a handle that invokes `stop_fn` exactly once, on drop or on
    /// explicit [`stop`](Self::stop).
    pub fn new(stop_fn: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop_fn: Some(Box::new(stop_fn)),
        }
    }

    /// Explicitly stops the watch, consuming the handle.
    pub fn stop(mut self) {
        if let Some(stop_fn) = self.stop_fn.take() {
            stop_fn();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(stop_fn) = self.stop_fn.take() {
            stop_fn();
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.stop_fn.is_some())
            .finish()
    }
}

/// Port trait for local filesystem operations consumed by the reconciler.
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Reads the entire contents of a file.
    async fn read_file(&self, path: &LocalAbsPath) -> anyhow::Result<Vec<u8>>;

    /// Writes `data` to `path`, creating it if necessary. Implementations
    /// write to a temp file and rename into place, bounding the damage of a
    /// crash mid-write.
    async fn write_file(&self, path: &LocalAbsPath, data: &[u8]) -> anyhow::Result<()>;

    /// Gets the current state of a file or directory. Returns
    /// `FileSystemState::not_found()` for a missing path rather than an
    /// error.
    async fn get_state(&self, path: &LocalAbsPath) -> anyhow::Result<FileSystemState>;

    /// Creates a directory and all parent directories as needed
    /// (`mkdir -p`).
    async fn create_directory(&self, path: &LocalAbsPath) -> anyhow::Result<()>;

    /// Lists the immediate children of a directory. Symlinks are reported
    /// but never traversed by the reconciler.
    async fn list_dir(&self, path: &LocalAbsPath) -> anyhow::Result<Vec<DirEntry>>;

    /// Starts watching a directory (recursively) for filesystem changes.
    async fn watch(&self, path: &LocalAbsPath) -> anyhow::Result<WatchHandle>;
}
