//! Selection store port.
//!
//! Thin read/write over the external selection store. Every write is
//! expected to be followed by the caller rewriting a JSON mirror — the
//! engine itself never opens that file.

use crate::domain::Selection;

/// Port trait for the externally-owned selection store.
#[async_trait::async_trait]
pub trait SelectionStore: Send + Sync {
    /// Reads the current selection.
    async fn load(&self) -> anyhow::Result<Selection>;

    /// Persists `selection`, replacing whatever was previously stored.
    async fn save(&self, selection: &Selection) -> anyhow::Result<()>;
}
