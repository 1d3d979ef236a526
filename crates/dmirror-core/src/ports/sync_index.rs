//! Sync index port.
//!
//! Durable key-value store keyed by `(sync_root, relative_path)`, with
//! transactional batch updates and prefix delete.

use crate::domain::{IndexEntry, IndexState, IndexStatus, LocalRelPath};

/// Port trait for the durable per-file sync index.
///
/// ## Transactions
///
/// `begin`/`commit`/`rollback` bound a logical batch. The reconciler opens
/// one per pass and commits periodically (every N writes) to keep the
/// crash window bounded; a transaction is never held across a suspension
/// point that could block longer than one batch.
#[async_trait::async_trait]
pub trait ISyncIndex: Send + Sync {
    /// Opens a transactional boundary. Calls made between `begin` and the
    /// matching `commit`/`rollback` are batched.
    async fn begin(&self) -> anyhow::Result<()>;

    /// Makes all writes since the last `begin` durable.
    async fn commit(&self) -> anyhow::Result<()>;

    /// Discards all writes since the last `begin`.
    async fn rollback(&self) -> anyhow::Result<()>;

    /// Looks up the entry for `(root, rel)`.
    async fn get(&self, root: &str, rel: &LocalRelPath) -> anyhow::Result<Option<IndexEntry>>;

    /// Full upsert. `status` defaults to `Synced` and `retries` to 0 when
    /// not given.
    #[allow(clippy::too_many_arguments)]
    async fn set(
        &self,
        root: &str,
        rel: &LocalRelPath,
        mtime_sec: i64,
        size: u64,
        status: Option<IndexStatus>,
        retries: Option<u32>,
    ) -> anyhow::Result<()>;

    /// Partial update preserving mtime/size; `retries_delta` is added to the
    /// existing `retries` count (which may be negative to reset it).
    async fn set_status(
        &self,
        root: &str,
        rel: &LocalRelPath,
        status: IndexStatus,
        retries_delta: i64,
    ) -> anyhow::Result<()>;

    /// Shorthand for `set(..., New, 0)`, used by the local watcher for newly
    /// discovered files.
    async fn upsert_new(
        &self,
        root: &str,
        rel: &LocalRelPath,
        mtime_sec: i64,
        size: u64,
    ) -> anyhow::Result<()>;

    /// Removes the entry at `(root, rel)`.
    async fn remove(&self, root: &str, rel: &LocalRelPath) -> anyhow::Result<()>;

    /// Deletes the entry at `rel_prefix` and every entry whose path starts
    /// with `rel_prefix + "/"`.
    async fn remove_prefix(&self, root: &str, rel_prefix: &LocalRelPath) -> anyhow::Result<()>;

    /// Distinct first path component under `root`; used to rediscover
    /// previously-synced subtrees when the selection is reloaded fresh.
    async fn top_level_relative_paths(&self, root: &str) -> anyhow::Result<Vec<String>>;

    /// Read-only summary for UI / `load_index_state`.
    async fn summary(&self) -> anyhow::Result<IndexState>;
}
