//! JSON-file-backed `SelectionStore` / `SettingsStore`.
//!
//! Both stores load-or-default on read and write atomically via a `.tmp`
//! file plus rename, matching `LocalFileSystemAdapter::write_file`'s
//! pattern in `dmirror-sync`.

use std::path::{Path, PathBuf};

use dmirror_core::config::Settings;
use dmirror_core::domain::{CloudPath, Selection};
use dmirror_core::ports::{SelectionStore, SettingsStore};
use tokio::sync::Mutex;
use tracing::debug;

async fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = {
        let mut p = path.as_os_str().to_owned();
        p.push(".tmp");
        PathBuf::from(p)
    };
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// JSON mirror of the selected cloud paths, at a fixed path
/// (default `~/.config/dmirror/selection.json`).
pub struct JsonSelectionStore {
    path: PathBuf,
    // Serializes concurrent writes; reads never race a write we issued
    // ourselves since the daemon's scheduler is single-writer in practice,
    // but the port doesn't promise that to callers.
    lock: Mutex<()>,
}

impl JsonSelectionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl SelectionStore for JsonSelectionStore {
    async fn load(&self) -> anyhow::Result<Selection> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let paths: Vec<String> = serde_json::from_str(&content)?;
                Ok(Selection::from_raw_paths(paths)?)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Selection::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, selection: &Selection) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let paths: Vec<&str> = selection.iter().map(CloudPath::as_str).collect();
        let json = serde_json::to_string_pretty(&paths)?;
        write_atomic(&self.path, &json).await?;
        debug!(path = %self.path.display(), count = paths.len(), "selection saved");
        Ok(())
    }
}

/// JSON mirror of `Settings`, written alongside `config.yaml` (the daemon's
/// authoritative source remains the YAML file; this is the read-through
/// surface the engine talks to).
pub struct JsonSettingsStore {
    config_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonSettingsStore {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load(&self) -> anyhow::Result<Settings> {
        let _guard = self.lock.lock().await;
        Ok(Settings::load_or_default(&self.config_path))
    }

    async fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let yaml = serde_yaml::to_string(settings)?;
        write_atomic(&self.config_path, &yaml).await?;
        debug!(path = %self.config_path.display(), "settings saved");
        Ok(())
    }
}
