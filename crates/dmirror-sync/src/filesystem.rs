//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs` for async file operations.
//!
//! ## Design decisions
//!
//! - **Atomic writes**: write-to-temp + rename, so a crash mid-write never
//!   leaves a partially-written target file in place.
//! - **No content hashing**: change detection is by mtime/size only; that is
//!   the reconciler's job, not this adapter's.
//! - Symlinks are reported by `list_dir` but never traversed.

use std::io::ErrorKind;

use chrono::{DateTime, Utc};
use dmirror_core::domain::LocalAbsPath;
use dmirror_core::ports::{DirEntry, FileSystemState, ILocalFileSystem, WatchHandle};
use tracing::{debug, instrument};

use crate::watcher::FileWatcher;

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    /// Creates a new `LocalFileSystemAdapter`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path))]
    async fn read_file(&self, path: &LocalAbsPath) -> anyhow::Result<Vec<u8>> {
        debug!("reading file");
        let data = tokio::fs::read(path.as_path()).await?;
        debug!(bytes = data.len(), "file read complete");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(path = %path, bytes = data.len()))]
    async fn write_file(&self, path: &LocalAbsPath, data: &[u8]) -> anyhow::Result<()> {
        let target = path.as_path();

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = {
            let mut p = target.as_os_str().to_owned();
            p.push(".tmp");
            std::path::PathBuf::from(p)
        };

        debug!(?tmp_path, "writing to temporary file");
        tokio::fs::write(&tmp_path, data).await?;

        debug!("renaming temporary file to target");
        tokio::fs::rename(&tmp_path, target).await?;

        debug!("write complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn get_state(&self, path: &LocalAbsPath) -> anyhow::Result<FileSystemState> {
        let p = path.as_path();

        let metadata = match tokio::fs::metadata(p).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("path not found");
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        let is_file = metadata.is_file();
        let size = metadata.len();

        let modified = metadata.modified().ok().and_then(|st| {
            st.duration_since(std::time::UNIX_EPOCH)
                .ok()
                .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
        });

        debug!(exists = true, is_file, size, "state retrieved");

        Ok(FileSystemState {
            exists: true,
            is_file,
            size,
            modified,
        })
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn create_directory(&self, path: &LocalAbsPath) -> anyhow::Result<()> {
        debug!("creating directory");
        tokio::fs::create_dir_all(path.as_path()).await?;
        debug!("directory created");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn list_dir(&self, path: &LocalAbsPath) -> anyhow::Result<Vec<DirEntry>> {
        let mut entries = tokio::fs::read_dir(path.as_path()).await?;
        let mut out = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = path.join(&name)?;
            let file_type = entry.file_type().await?;

            out.push(DirEntry {
                name,
                path: child,
                is_dir: file_type.is_dir(),
                is_symlink: file_type.is_symlink(),
            });
        }

        debug!(count = out.len(), "directory listed");
        Ok(out)
    }

    #[instrument(skip(self, path), fields(path = %path))]
    async fn watch(&self, path: &LocalAbsPath) -> anyhow::Result<WatchHandle> {
        debug!("starting recursive watch");
        let (mut watcher, _rx) = FileWatcher::new()?;
        watcher.watch(path.as_path())?;
        Ok(WatchHandle::new(move || drop(watcher)))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn local_path(dir: &TempDir, name: &str) -> LocalAbsPath {
        LocalAbsPath::new(dir.path().join(name)).expect("temp dir paths are absolute")
    }

    #[tokio::test]
    async fn read_write_roundtrip() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = local_path(&dir, "hello.txt");

        let content = b"hello dmirror";
        fs.write_file(&path, content).await.unwrap();

        let read_back = fs.read_file(&path).await.unwrap();
        assert_eq!(read_back, content);
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = local_path(&dir, "a/b/c/nested.txt");

        fs.write_file(&path, b"nested").await.unwrap();

        let read_back = fs.read_file(&path).await.unwrap();
        assert_eq!(read_back, b"nested");
    }

    #[tokio::test]
    async fn write_overwrites_existing() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = local_path(&dir, "overwrite.txt");

        fs.write_file(&path, b"first").await.unwrap();
        fs.write_file(&path, b"second").await.unwrap();

        let read_back = fs.read_file(&path).await.unwrap();
        assert_eq!(read_back, b"second");
    }

    #[tokio::test]
    async fn get_state_not_found() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = local_path(&dir, "nonexistent.txt");

        let state = fs.get_state(&path).await.unwrap();
        assert!(!state.exists);
        assert_eq!(state.size, 0);
    }

    #[tokio::test]
    async fn get_state_existing_file() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = local_path(&dir, "state.txt");

        fs.write_file(&path, b"twelve bytes").await.unwrap();

        let state = fs.get_state(&path).await.unwrap();
        assert!(state.exists);
        assert!(state.is_file);
        assert_eq!(state.size, 12);
        assert!(state.modified.is_some());
    }

    #[tokio::test]
    async fn list_dir_reports_entries() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let root = LocalAbsPath::new(dir.path()).unwrap();

        fs.write_file(&local_path(&dir, "a.txt"), b"a").await.unwrap();
        fs.create_directory(&local_path(&dir, "sub")).await.unwrap();

        let entries = fs.list_dir(&root).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.name == "a.txt" && !e.is_dir));
        assert!(entries.iter().any(|e| e.name == "sub" && e.is_dir));
    }

    #[tokio::test]
    async fn delete_via_remove_and_recreate() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystemAdapter::new();
        let path = local_path(&dir, "to_delete.txt");

        fs.write_file(&path, b"bye").await.unwrap();
        tokio::fs::remove_file(path.as_path()).await.unwrap();

        let state = fs.get_state(&path).await.unwrap();
        assert!(!state.exists);
    }
}
