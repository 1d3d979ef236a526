//! Sync service: the single-worker gate that turns a
//! `start_sync`/`start_sync_local_to_cloud` call into a spawned reconciler
//! pass, tracks `status`, and chains a successful push into a pull.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dmirror_core::domain::{CloudPath, LocalAbsPath};
use dmirror_core::ports::{EventSink, ISyncIndex, SyncEvent, SyncStatus, TokenProvider};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::reconciler::{PassResult, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    Pull,
    Push,
}

struct RunState {
    root_key: String,
    local_root: LocalAbsPath,
    selection: Vec<CloudPath>,
    max_retries: u32,
    index_path: String,
}

/// The single worker that runs reconciler passes on demand, gated by
/// `status`.
pub struct SyncService {
    reconciler: Arc<Reconciler>,
    token: Arc<dyn TokenProvider>,
    events: Arc<dyn EventSink>,
    index: Arc<dyn ISyncIndex>,
    status: Arc<Mutex<SyncStatus>>,
    stop: Arc<AtomicBool>,
    last_run: Mutex<Option<RunState>>,
}

impl SyncService {
    /// Builds a sync service over an already-wired [`Reconciler`] and ports.
    pub fn new(
        reconciler: Arc<Reconciler>,
        token: Arc<dyn TokenProvider>,
        events: Arc<dyn EventSink>,
        index: Arc<dyn ISyncIndex>,
    ) -> Self {
        Self {
            reconciler,
            token,
            events,
            index,
            status: Arc::new(Mutex::new(SyncStatus::Idle)),
            stop: Arc::new(AtomicBool::new(false)),
            last_run: Mutex::new(None),
        }
    }

    /// Current status, without side effects.
    pub async fn status(&self) -> SyncStatus {
        *self.status.lock().await
    }

    /// Cloud → local pass. No-op (silently dropped) if a pass is already
    /// running — `status == Syncing` is the only admissible serialization
    /// point.
    #[instrument(skip(self, selection), fields(root = %sync_path, selected = selection.len()))]
    pub async fn start_sync(
        &self,
        selection: Vec<CloudPath>,
        sync_path: LocalAbsPath,
        index_path: String,
        max_retries: u32,
    ) {
        self.start(PassKind::Pull, selection, sync_path, index_path, max_retries)
            .await;
    }

    /// Local → cloud pass, chaining into a pull on success unless the push
    /// auto-created top-level cloud folders.
    #[instrument(skip(self, selection), fields(root = %sync_path, selected = selection.len()))]
    pub async fn start_sync_local_to_cloud(
        &self,
        selection: Vec<CloudPath>,
        sync_path: LocalAbsPath,
        index_path: String,
        max_retries: u32,
    ) {
        self.start(PassKind::Push, selection, sync_path, index_path, max_retries)
            .await;
    }

    async fn start(
        &self,
        kind: PassKind,
        selection: Vec<CloudPath>,
        sync_path: LocalAbsPath,
        index_path: String,
        max_retries: u32,
    ) {
        {
            let mut status = self.status.lock().await;
            if *status == SyncStatus::Syncing {
                info!(?kind, "sync already running, dropping request");
                return;
            }
            *status = SyncStatus::Syncing;
        }
        self.events
            .emit(SyncEvent::StatusChanged(SyncStatus::Syncing))
            .await;
        self.stop.store(false, Ordering::Relaxed);

        if let Err(e) = self.token.access_token().await {
            *self.status.lock().await = SyncStatus::Error;
            self.events
                .emit(SyncEvent::SyncError(format!("token unavailable: {e}")))
                .await;
            self.events
                .emit(SyncEvent::StatusChanged(SyncStatus::Error))
                .await;
            return;
        }

        let root_key = sync_path.to_string();
        *self.last_run.lock().await = Some(RunState {
            root_key: root_key.clone(),
            local_root: sync_path.clone(),
            selection: selection.clone(),
            max_retries,
            index_path,
        });

        let reconciler = self.reconciler.clone();
        let events = self.events.clone();
        let status = self.status.clone();
        let stop = self.stop.clone();

        tokio::spawn(async move {
            Self::run_pass(
                kind,
                reconciler,
                events,
                status,
                stop,
                root_key,
                sync_path,
                selection,
                max_retries,
            )
            .await;
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pass(
        kind: PassKind,
        reconciler: Arc<Reconciler>,
        events: Arc<dyn EventSink>,
        status: Arc<Mutex<SyncStatus>>,
        stop: Arc<AtomicBool>,
        root_key: String,
        local_root: LocalAbsPath,
        selection: Vec<CloudPath>,
        max_retries: u32,
    ) {
        let result = match kind {
            PassKind::Pull => {
                reconciler
                    .pull(&root_key, &local_root, &selection, max_retries, &stop)
                    .await
            }
            PassKind::Push => {
                reconciler
                    .push(&root_key, &local_root, &selection, max_retries, &stop)
                    .await
            }
        };

        let pass: PassResult = match result {
            Ok(pass) => pass,
            Err(_) => {
                // The reconciler has already emitted `SyncError` (and
                // `TokenExpired`, if applicable) for this failure.
                *status.lock().await = SyncStatus::Error;
                events
                    .emit(SyncEvent::StatusChanged(SyncStatus::Error))
                    .await;
                return;
            }
        };

        let should_chain_pull = kind == PassKind::Push && pass.created_top_levels.is_empty();
        if should_chain_pull {
            info!("push finished cleanly, chaining into a pull pass");
            let pull_result = reconciler
                .pull(&root_key, &local_root, &selection, max_retries, &stop)
                .await;
            if pull_result.is_err() {
                *status.lock().await = SyncStatus::Error;
                events
                    .emit(SyncEvent::StatusChanged(SyncStatus::Error))
                    .await;
                return;
            }
        }

        *status.lock().await = SyncStatus::Idle;
        events
            .emit(SyncEvent::StatusChanged(SyncStatus::Idle))
            .await;
    }

    /// Sets the stop flag observed by the worker at the next file or folder
    /// boundary. In-flight HTTP requests are allowed to complete.
    pub fn stop_sync(&self) {
        info!("stop requested");
        self.stop.store(true, Ordering::Relaxed);
    }

    /// One-shot read of the index summary, emitted as `IndexStateLoaded`.
    pub async fn load_index_state(&self) {
        match self.index.summary().await {
            Ok(summary) => {
                self.events
                    .emit(SyncEvent::IndexStateLoaded(summary))
                    .await;
            }
            Err(e) => {
                self.events
                    .emit(SyncEvent::SyncError(format!("failed to read index: {e}")))
                    .await;
            }
        }
    }

    /// The `(root_key, local_root, selection, max_retries, index_path)`
    /// snapshot from the most recent `start_sync`/`start_sync_local_to_cloud`
    /// call, or `None` if neither has run yet. Exposed for the scheduler's
    /// periodic triggers, which re-run the last-known configuration rather
    /// than taking a fresh one.
    pub async fn last_run(&self) -> Option<(String, LocalAbsPath, Vec<CloudPath>, u32, String)> {
        self.last_run.lock().await.as_ref().map(|r| {
            (
                r.root_key.clone(),
                r.local_root.clone(),
                r.selection.clone(),
                r.max_retries,
                r.index_path.clone(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use dmirror_core::domain::{IndexEntry, IndexState, LocalRelPath, Node, Quota};
    use dmirror_core::ports::{ApiError, CreateOutcome, ICloudAdapter, ILocalFileSystem};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use super::*;

    struct NoopCloud;

    #[async_trait::async_trait]
    impl ICloudAdapter for NoopCloud {
        async fn list_children(&self, _path: &CloudPath) -> Result<Vec<Node>, ApiError> {
            Ok(vec![])
        }
        async fn create_folder(&self, _path: &CloudPath) -> Result<CreateOutcome, ApiError> {
            Ok(CreateOutcome::AlreadyExists)
        }
        async fn download(&self, _path: &CloudPath) -> Result<Vec<u8>, ApiError> {
            Ok(vec![])
        }
        async fn upload(&self, _path: &CloudPath, _bytes: Vec<u8>) -> Result<(), ApiError> {
            Ok(())
        }
        async fn delete(&self, _path: &CloudPath) -> Result<(), ApiError> {
            Ok(())
        }
        async fn quota(&self) -> Result<Quota, ApiError> {
            Ok(Quota { used: 0, total: 0 })
        }
    }

    #[derive(Default)]
    struct InMemoryIndex {
        rows: StdMutex<HashMap<(String, String), IndexEntry>>,
    }

    #[async_trait::async_trait]
    impl ISyncIndex for InMemoryIndex {
        async fn begin(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn commit(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn rollback(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get(&self, root: &str, rel: &LocalRelPath) -> anyhow::Result<Option<IndexEntry>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&(root.to_string(), rel.as_str().to_string()))
                .copied())
        }
        async fn set(
            &self,
            _root: &str,
            _rel: &LocalRelPath,
            _mtime_sec: i64,
            _size: u64,
            _status: Option<dmirror_core::domain::IndexStatus>,
            _retries: Option<u32>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn set_status(
            &self,
            _root: &str,
            _rel: &LocalRelPath,
            _status: dmirror_core::domain::IndexStatus,
            _retries_delta: i64,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn upsert_new(
            &self,
            _root: &str,
            _rel: &LocalRelPath,
            _mtime_sec: i64,
            _size: u64,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn remove(&self, _root: &str, _rel: &LocalRelPath) -> anyhow::Result<()> {
            Ok(())
        }
        async fn remove_prefix(&self, _root: &str, _rel_prefix: &LocalRelPath) -> anyhow::Result<()> {
            Ok(())
        }
        async fn top_level_relative_paths(&self, _root: &str) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
        async fn summary(&self) -> anyhow::Result<IndexState> {
            Ok(IndexState {
                total_entries: self.rows.lock().unwrap().len() as u64,
                per_root_counts: Default::default(),
            })
        }
    }

    struct RecordingEvents {
        tx: mpsc::UnboundedSender<SyncEvent>,
    }

    #[async_trait::async_trait]
    impl EventSink for RecordingEvents {
        async fn emit(&self, event: SyncEvent) {
            let _ = self.tx.send(event);
        }
    }

    struct FixedToken;

    #[async_trait::async_trait]
    impl TokenProvider for FixedToken {
        async fn access_token(&self) -> anyhow::Result<String> {
            Ok("tok".to_string())
        }
        async fn refresh(&self) -> anyhow::Result<String> {
            Ok("tok2".to_string())
        }
    }

    struct NoFs;

    #[async_trait::async_trait]
    impl ILocalFileSystem for NoFs {
        async fn read_file(&self, _path: &LocalAbsPath) -> anyhow::Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn write_file(&self, _path: &LocalAbsPath, _data: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_state(
            &self,
            _path: &LocalAbsPath,
        ) -> anyhow::Result<dmirror_core::ports::FileSystemState> {
            Ok(dmirror_core::ports::FileSystemState::not_found())
        }
        async fn create_directory(&self, _path: &LocalAbsPath) -> anyhow::Result<()> {
            Ok(())
        }
        async fn list_dir(
            &self,
            _path: &LocalAbsPath,
        ) -> anyhow::Result<Vec<dmirror_core::ports::DirEntry>> {
            Ok(vec![])
        }
        async fn watch(
            &self,
            _path: &LocalAbsPath,
        ) -> anyhow::Result<dmirror_core::ports::WatchHandle> {
            Ok(dmirror_core::ports::WatchHandle::new(|| {}))
        }
    }

    fn build_service() -> (SyncService, mpsc::UnboundedReceiver<SyncEvent>) {
        let index = Arc::new(InMemoryIndex::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let events = Arc::new(RecordingEvents { tx });
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(NoopCloud),
            index.clone(),
            Arc::new(NoFs),
            events.clone(),
        ));
        let service = SyncService::new(reconciler, Arc::new(FixedToken), events, index);
        (service, rx)
    }

    #[tokio::test]
    async fn start_sync_reaches_idle() {
        let (service, mut rx) = build_service();
        let dir = TempDir::new().unwrap();
        let root = LocalAbsPath::new(dir.path()).unwrap();

        service
            .start_sync(vec![], root, "index.db".to_string(), 3)
            .await;

        let mut saw_idle = false;
        for _ in 0..20 {
            if let Some(SyncEvent::StatusChanged(SyncStatus::Idle)) = rx.recv().await {
                saw_idle = true;
                break;
            }
        }
        assert!(saw_idle);
        assert_eq!(service.status().await, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn second_start_is_dropped_while_syncing() {
        let (service, _rx) = build_service();
        let dir = TempDir::new().unwrap();
        let root = LocalAbsPath::new(dir.path()).unwrap();

        *service.status.lock().await = SyncStatus::Syncing;
        service
            .start_sync(vec![], root, "index.db".to_string(), 3)
            .await;
        assert_eq!(service.status().await, SyncStatus::Syncing);
    }
}
