//! Settings store port.
//!
//! Mirrors [`SelectionStore`](super::SelectionStore)'s shape: the engine
//! reads settings through this port, and any write made through it is
//! expected to be mirrored to the externally-owned JSON file by the caller.

use crate::config::Settings;

/// Port trait for the externally-owned settings store.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    /// Reads the current settings.
    async fn load(&self) -> anyhow::Result<Settings>;

    /// Persists `settings`, replacing whatever was previously stored.
    async fn save(&self, settings: &Settings) -> anyhow::Result<()>;
}
