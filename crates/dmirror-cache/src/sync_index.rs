//! SQLite implementation of `ISyncIndex`.
//!
//! ## Type mapping
//!
//! | Domain field     | SQL column       | Notes                           |
//! |-------------------|------------------|----------------------------------|
//! | root              | `root` TEXT       | first element of the primary key |
//! | rel (`LocalRelPath`) | `rel_path` TEXT | second element of the primary key |
//! | mtime_sec         | `mtime_sec` INTEGER |                                |
//! | size              | `size` INTEGER     |                                |
//! | status            | `status` TEXT      | `IndexStatus::name()` / `parse()` |
//! | retries           | `retries` INTEGER  |                                |
//! | updated_at_sec    | `updated_at_sec` INTEGER | set to "now" on every write |
//!
//! ## Transactions
//!
//! A single open transaction is held in `self.tx`, guarded by a
//! [`tokio::sync::Mutex`]. Every other method checks whether a transaction
//! is open and, if so, runs its query against it instead of the pool
//! directly.

use std::collections::BTreeMap;
use std::collections::HashSet;

use chrono::Utc;
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::Row;
use tokio::sync::Mutex;

use dmirror_core::domain::{IndexEntry, IndexState, IndexStatus, LocalRelPath};
use dmirror_core::ports::ISyncIndex;

use crate::CacheError;

/// SQLite-backed implementation of the sync index port.
pub struct SqliteSyncIndex {
    pool: SqlitePool,
    tx: Mutex<Option<sqlx::Transaction<'static, Sqlite>>>,
}

impl SqliteSyncIndex {
    /// Wraps an already-initialized pool (schema migrated by
    /// [`crate::DatabasePool`]).
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            tx: Mutex::new(None),
        }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<IndexEntry, CacheError> {
        let status_raw: String = row.try_get("status")?;
        let status = IndexStatus::parse(&status_raw).ok_or_else(|| {
            CacheError::SerializationError(format!("unknown status '{status_raw}'"))
        })?;
        Ok(IndexEntry {
            mtime_sec: row.try_get("mtime_sec")?,
            size: {
                let raw: i64 = row.try_get("size")?;
                raw as u64
            },
            status,
            retries: {
                let raw: i64 = row.try_get("retries")?;
                raw as u32
            },
            updated_at_sec: row.try_get("updated_at_sec")?,
        })
    }
}

#[async_trait::async_trait]
impl ISyncIndex for SqliteSyncIndex {
    async fn begin(&self) -> anyhow::Result<()> {
        let mut guard = self.tx.lock().await;
        if guard.is_some() {
            return Err(CacheError::TransactionAlreadyOpen.into());
        }
        let tx = self.pool.begin().await.map_err(CacheError::from)?;
        *guard = Some(tx);
        Ok(())
    }

    async fn commit(&self) -> anyhow::Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.take().ok_or(CacheError::NoTransaction)?;
        tx.commit().await.map_err(CacheError::from)?;
        Ok(())
    }

    async fn rollback(&self) -> anyhow::Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.take().ok_or(CacheError::NoTransaction)?;
        tx.rollback().await.map_err(CacheError::from)?;
        Ok(())
    }

    async fn get(&self, root: &str, rel: &LocalRelPath) -> anyhow::Result<Option<IndexEntry>> {
        let query = sqlx::query(
            "SELECT mtime_sec, size, status, retries, updated_at_sec \
             FROM sync_index WHERE root = ?1 AND rel_path = ?2",
        )
        .bind(root)
        .bind(rel.as_str());

        let mut guard = self.tx.lock().await;
        let row = match guard.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await,
            None => query.fetch_optional(&self.pool).await,
        }
        .map_err(CacheError::from)?;

        row.map(|r| Self::row_to_entry(&r)).transpose().map_err(Into::into)
    }

    async fn set(
        &self,
        root: &str,
        rel: &LocalRelPath,
        mtime_sec: i64,
        size: u64,
        status: Option<IndexStatus>,
        retries: Option<u32>,
    ) -> anyhow::Result<()> {
        let status = status.unwrap_or(IndexStatus::Synced);
        let retries = retries.unwrap_or(0);
        let now = Utc::now().timestamp();

        let query = sqlx::query(
            "INSERT INTO sync_index (root, rel_path, mtime_sec, size, status, retries, updated_at_sec) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(root, rel_path) DO UPDATE SET \
               mtime_sec = excluded.mtime_sec, \
               size = excluded.size, \
               status = excluded.status, \
               retries = excluded.retries, \
               updated_at_sec = excluded.updated_at_sec",
        )
        .bind(root)
        .bind(rel.as_str())
        .bind(mtime_sec)
        .bind(size as i64)
        .bind(status.name())
        .bind(retries as i64)
        .bind(now);

        let mut guard = self.tx.lock().await;
        match guard.as_mut() {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        }
        .map_err(CacheError::from)?;
        Ok(())
    }

    async fn set_status(
        &self,
        root: &str,
        rel: &LocalRelPath,
        status: IndexStatus,
        retries_delta: i64,
    ) -> anyhow::Result<()> {
        if let Some(current) = self.get(root, rel).await? {
            current.status.validate_transition(status)?;
        }

        let now = Utc::now().timestamp();
        let query = sqlx::query(
            "UPDATE sync_index SET status = ?1, retries = MAX(0, retries + ?2), updated_at_sec = ?3 \
             WHERE root = ?4 AND rel_path = ?5",
        )
        .bind(status.name())
        .bind(retries_delta)
        .bind(now)
        .bind(root)
        .bind(rel.as_str());

        let mut guard = self.tx.lock().await;
        match guard.as_mut() {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        }
        .map_err(CacheError::from)?;
        Ok(())
    }

    async fn upsert_new(
        &self,
        root: &str,
        rel: &LocalRelPath,
        mtime_sec: i64,
        size: u64,
    ) -> anyhow::Result<()> {
        self.set(root, rel, mtime_sec, size, Some(IndexStatus::New), Some(0))
            .await
    }

    async fn remove(&self, root: &str, rel: &LocalRelPath) -> anyhow::Result<()> {
        let query = sqlx::query("DELETE FROM sync_index WHERE root = ?1 AND rel_path = ?2")
            .bind(root)
            .bind(rel.as_str());

        let mut guard = self.tx.lock().await;
        match guard.as_mut() {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        }
        .map_err(CacheError::from)?;
        Ok(())
    }

    async fn remove_prefix(&self, root: &str, rel_prefix: &LocalRelPath) -> anyhow::Result<()> {
        let prefix = rel_prefix.as_str();
        let like_pattern = format!("{prefix}/%");
        let query = sqlx::query(
            "DELETE FROM sync_index WHERE root = ?1 AND (rel_path = ?2 OR rel_path LIKE ?3)",
        )
        .bind(root)
        .bind(prefix)
        .bind(like_pattern);

        let mut guard = self.tx.lock().await;
        match guard.as_mut() {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        }
        .map_err(CacheError::from)?;
        Ok(())
    }

    async fn top_level_relative_paths(&self, root: &str) -> anyhow::Result<Vec<String>> {
        let query =
            sqlx::query("SELECT DISTINCT rel_path FROM sync_index WHERE root = ?1").bind(root);

        let mut guard = self.tx.lock().await;
        let rows = match guard.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await,
            None => query.fetch_all(&self.pool).await,
        }
        .map_err(CacheError::from)?;
        drop(guard);

        let mut seen = HashSet::new();
        for row in rows {
            let rel_path: String = row.try_get("rel_path").map_err(CacheError::from)?;
            let top = rel_path.split('/').next().unwrap_or(&rel_path).to_string();
            seen.insert(top);
        }
        Ok(seen.into_iter().collect())
    }

    async fn summary(&self) -> anyhow::Result<IndexState> {
        let query = sqlx::query("SELECT root, COUNT(*) AS n FROM sync_index GROUP BY root");

        let mut guard = self.tx.lock().await;
        let rows = match guard.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await,
            None => query.fetch_all(&self.pool).await,
        }
        .map_err(CacheError::from)?;
        drop(guard);

        let mut per_root_counts = BTreeMap::new();
        let mut total_entries = 0u64;
        for row in rows {
            let root: String = row.try_get("root").map_err(CacheError::from)?;
            let n: i64 = row.try_get("n").map_err(CacheError::from)?;
            total_entries += n as u64;
            per_root_counts.insert(root, n as u64);
        }

        Ok(IndexState {
            total_entries,
            per_root_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use dmirror_core::domain::LocalRelPath;

    use super::*;
    use crate::DatabasePool;

    async fn setup() -> SqliteSyncIndex {
        let pool = DatabasePool::in_memory().await.expect("in-memory pool");
        SqliteSyncIndex::new(pool.pool().clone())
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let index = setup().await;
        let rel = LocalRelPath::new("docs/report.pdf").unwrap();
        index
            .set("main", &rel, 1_700_000_000, 4096, Some(IndexStatus::Synced), Some(0))
            .await
            .unwrap();

        let entry = index.get("main", &rel).await.unwrap().unwrap();
        assert_eq!(entry.mtime_sec, 1_700_000_000);
        assert_eq!(entry.size, 4096);
        assert_eq!(entry.status, IndexStatus::Synced);
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let index = setup().await;
        let rel = LocalRelPath::new("missing.txt").unwrap();
        assert!(index.get("main", &rel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_status_preserves_mtime_and_size() {
        let index = setup().await;
        let rel = LocalRelPath::new("a.txt").unwrap();
        index
            .set("main", &rel, 123, 10, Some(IndexStatus::Uploading), Some(0))
            .await
            .unwrap();
        index
            .set_status("main", &rel, IndexStatus::Failed, 1)
            .await
            .unwrap();

        let entry = index.get("main", &rel).await.unwrap().unwrap();
        assert_eq!(entry.mtime_sec, 123);
        assert_eq!(entry.size, 10);
        assert_eq!(entry.status, IndexStatus::Failed);
        assert_eq!(entry.retries, 1);
    }

    #[tokio::test]
    async fn set_status_rejects_illegal_transition() {
        let index = setup().await;
        let rel = LocalRelPath::new("a.txt").unwrap();
        index
            .set("main", &rel, 1, 1, Some(IndexStatus::Uploading), Some(0))
            .await
            .unwrap();

        let err = index
            .set_status("main", &rel, IndexStatus::Downloading, 0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("UPLOADING"));

        let entry = index.get("main", &rel).await.unwrap().unwrap();
        assert_eq!(entry.status, IndexStatus::Uploading);
    }

    #[tokio::test]
    async fn retries_delta_does_not_go_negative() {
        let index = setup().await;
        let rel = LocalRelPath::new("a.txt").unwrap();
        index
            .set("main", &rel, 1, 1, Some(IndexStatus::Failed), Some(0))
            .await
            .unwrap();
        index
            .set_status("main", &rel, IndexStatus::New, -5)
            .await
            .unwrap();

        let entry = index.get("main", &rel).await.unwrap().unwrap();
        assert_eq!(entry.retries, 0);
    }

    #[tokio::test]
    async fn remove_prefix_deletes_subtree_only() {
        let index = setup().await;
        for rel in ["dir/a.txt", "dir/b.txt", "dir_other/c.txt", "dir"] {
            let rel = LocalRelPath::new(rel).unwrap();
            index.set("main", &rel, 1, 1, None, None).await.unwrap();
        }

        let prefix = LocalRelPath::new("dir").unwrap();
        index.remove_prefix("main", &prefix).await.unwrap();

        assert!(index
            .get("main", &LocalRelPath::new("dir/a.txt").unwrap())
            .await
            .unwrap()
            .is_none());
        assert!(index
            .get("main", &LocalRelPath::new("dir").unwrap())
            .await
            .unwrap()
            .is_none());
        assert!(index
            .get("main", &LocalRelPath::new("dir_other/c.txt").unwrap())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn transaction_rollback_discards_writes() {
        let index = setup().await;
        let rel = LocalRelPath::new("a.txt").unwrap();

        index.begin().await.unwrap();
        index.set("main", &rel, 1, 1, None, None).await.unwrap();
        index.rollback().await.unwrap();

        assert!(index.get("main", &rel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transaction_commit_persists_writes() {
        let index = setup().await;
        let rel = LocalRelPath::new("a.txt").unwrap();

        index.begin().await.unwrap();
        index.set("main", &rel, 1, 1, None, None).await.unwrap();
        index.commit().await.unwrap();

        assert!(index.get("main", &rel).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn summary_counts_per_root() {
        let index = setup().await;
        index
            .set("a", &LocalRelPath::new("x.txt").unwrap(), 1, 1, None, None)
            .await
            .unwrap();
        index
            .set("b", &LocalRelPath::new("y.txt").unwrap(), 1, 1, None, None)
            .await
            .unwrap();
        index
            .set("b", &LocalRelPath::new("z.txt").unwrap(), 1, 1, None, None)
            .await
            .unwrap();

        let summary = index.summary().await.unwrap();
        assert_eq!(summary.total_entries, 3);
        assert_eq!(summary.per_root_counts.get("a"), Some(&1));
        assert_eq!(summary.per_root_counts.get("b"), Some(&2));
    }

    #[tokio::test]
    async fn top_level_relative_paths_are_distinct_first_components() {
        let index = setup().await;
        for rel in ["docs/a.txt", "docs/b.txt", "photos/c.jpg"] {
            index
                .set("main", &LocalRelPath::new(rel).unwrap(), 1, 1, None, None)
                .await
                .unwrap();
        }

        let mut tops = index.top_level_relative_paths("main").await.unwrap();
        tops.sort();
        assert_eq!(tops, vec!["docs".to_string(), "photos".to_string()]);
    }
}
