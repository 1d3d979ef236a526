//! Sync scheduler - orchestrates debounced filesystem events and periodic
//! timers into sync triggers.
//!
//! The [`SyncScheduler`] sits between the [`FileWatcher`](super::watcher::FileWatcher)
//! and the [`SyncService`](super::service::SyncService). It receives raw
//! change events, feeds them through a
//! [`DebouncedChangeQueue`](super::watcher::DebouncedChangeQueue), and drives
//! four concurrent triggers via a single `tokio::select!`:
//!
//! ```text
//! FileWatcher ──→ mpsc::Receiver ──┐
//! periodic pull timer ─────────────┼──→ tokio::select! ──→ SyncService
//! debounce / local-reconcile sleep ┤
//! connectivity probe timer ────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dmirror_core::domain::{to_relative, CloudPath, LocalAbsPath};
use dmirror_core::ports::{ILocalFileSystem, ISyncIndex};
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use crate::service::SyncService;
use crate::watcher::{ChangeEvent, DebouncedChangeQueue};

const DEBOUNCE_DELAY: Duration = Duration::from_millis(2000);
const FIRST_RECONCILE_TICK_DELAY: Duration = Duration::from_millis(1500);
const CONNECTIVITY_PROBE_INTERVAL: Duration = Duration::from_secs(30);
const CONNECTIVITY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives the four periodic/event-driven triggers (filesystem changes,
/// periodic pull, periodic local reconcile, connectivity probe) over a
/// fixed `(sync_root, selection)` pair, calling into a [`SyncService`] to
/// actually run pull/push passes.
pub struct SyncScheduler {
    change_rx: mpsc::Receiver<ChangeEvent>,
    queue: DebouncedChangeQueue,
    service: Arc<SyncService>,
    index: Arc<dyn ISyncIndex>,
    fs: Arc<dyn ILocalFileSystem>,
    sync_root: LocalAbsPath,
    root_key: String,
    selection: Vec<CloudPath>,
    max_retries: u32,
    refresh_interval: Duration,
    cloud_check_interval: Duration,
    probe_url: String,
    http: reqwest::Client,
    online: Arc<AtomicBool>,
}

impl SyncScheduler {
    /// Builds a scheduler. `refresh_interval_sec` and
    /// `cloud_check_interval_sec` are clamped to `5..=3600`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        change_rx: mpsc::Receiver<ChangeEvent>,
        service: Arc<SyncService>,
        index: Arc<dyn ISyncIndex>,
        fs: Arc<dyn ILocalFileSystem>,
        sync_root: LocalAbsPath,
        selection: Vec<CloudPath>,
        max_retries: u32,
        refresh_interval_sec: u64,
        cloud_check_interval_sec: u64,
        probe_url: String,
    ) -> Self {
        let refresh_interval = Duration::from_secs(refresh_interval_sec.clamp(5, 3600));
        let cloud_check_interval = Duration::from_secs(cloud_check_interval_sec.clamp(5, 3600));

        info!(
            ?refresh_interval,
            ?cloud_check_interval,
            "creating sync scheduler"
        );

        let root_key = sync_root.to_string();

        Self {
            change_rx,
            queue: DebouncedChangeQueue::new(DEBOUNCE_DELAY),
            service,
            index,
            fs,
            sync_root,
            root_key,
            selection,
            max_retries,
            refresh_interval,
            cloud_check_interval,
            probe_url,
            http: reqwest::Client::builder()
                .timeout(CONNECTIVITY_PROBE_TIMEOUT)
                .build()
                .expect("http client builds"),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// `true` if the last connectivity probe succeeded (or none has run
    /// yet).
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Replaces the tracked selection, e.g. after a `PathsCreatedInCloud`
    /// event unions new top-level paths in.
    pub fn set_selection(&mut self, selection: Vec<CloudPath>) {
        self.selection = selection;
    }

    /// Main event loop. Runs until the change channel closes (the
    /// `FileWatcher` was dropped).
    pub async fn run(&mut self) {
        info!("sync scheduler starting");

        let mut refresh_timer = time::interval(self.refresh_interval);
        refresh_timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let mut probe_timer = time::interval(CONNECTIVITY_PROBE_INTERVAL);
        probe_timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let mut next_reconcile = Instant::now() + FIRST_RECONCILE_TICK_DELAY;
        let mut debounce_deadline: Option<Instant> = None;
        let settle = time::sleep_until(next_reconcile);
        tokio::pin!(settle);

        loop {
            tokio::select! {
                event = self.change_rx.recv() => {
                    match event {
                        Some(change) => {
                            debug!(?change, "scheduler received change event");
                            self.note_new_file(&change).await;
                            self.queue.push(change);

                            let deadline = Instant::now() + DEBOUNCE_DELAY;
                            debounce_deadline = Some(deadline);
                            if deadline < settle.deadline() {
                                settle.as_mut().reset(deadline);
                            }
                        }
                        None => {
                            info!("change channel closed, scheduler shutting down");
                            let settled = self.queue.poll();
                            if !settled.is_empty() && self.is_online() {
                                self.trigger_push().await;
                            }
                            break;
                        }
                    }
                }

                _ = refresh_timer.tick() => {
                    if self.is_online() {
                        debug!("periodic pull tick");
                        self.trigger_pull().await;
                    }
                }

                () = &mut settle => {
                    let now = Instant::now();
                    let debounce_fired = debounce_deadline.is_some_and(|d| now >= d);
                    let reconcile_fired = now >= next_reconcile;

                    if debounce_fired {
                        debounce_deadline = None;
                        let settled = self.queue.poll();
                        if !settled.is_empty() {
                            info!(count = settled.len(), "settled changes ready for push");
                            if self.is_online() {
                                self.trigger_push().await;
                            }
                        }
                    }

                    if reconcile_fired {
                        debug!("periodic local-reconcile tick");
                        next_reconcile = now + self.cloud_check_interval;
                        if self.is_online() {
                            self.trigger_push().await;
                        }
                    }

                    let next_deadline = match debounce_deadline {
                        Some(d) => d.min(next_reconcile),
                        None => next_reconcile,
                    };
                    settle.as_mut().reset(next_deadline);
                }

                _ = probe_timer.tick() => {
                    self.probe_connectivity().await;
                }
            }
        }

        info!("sync scheduler stopped");
    }

    async fn note_new_file(&self, change: &ChangeEvent) {
        let path = match change {
            ChangeEvent::Created(p) | ChangeEvent::Modified(p) => p,
            ChangeEvent::Renamed { new, .. } => new,
            ChangeEvent::Deleted(_) => return,
        };

        let Ok(abs) = LocalAbsPath::new(path.clone()) else {
            return;
        };
        let Some(rel) = to_relative(&abs, &self.sync_root) else {
            return;
        };

        match self.index.get(&self.root_key, &rel).await {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "failed to read index while noting new file");
                return;
            }
        }

        let state = match self.fs.get_state(&abs).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to stat changed path");
                return;
            }
        };
        if !state.is_regular_file() {
            return;
        }
        let mtime_sec = state.modified.map(|m| m.timestamp()).unwrap_or(0);

        if let Err(e) = self
            .index
            .upsert_new(&self.root_key, &rel, mtime_sec, state.size)
            .await
        {
            warn!(error = %e, "failed to record newly discovered file");
        }
    }

    async fn trigger_pull(&self) {
        self.service
            .start_sync(
                self.selection.clone(),
                self.sync_root.clone(),
                self.root_key.clone(),
                self.max_retries,
            )
            .await;
    }

    async fn trigger_push(&self) {
        self.service
            .start_sync_local_to_cloud(
                self.selection.clone(),
                self.sync_root.clone(),
                self.root_key.clone(),
                self.max_retries,
            )
            .await;
    }

    async fn probe_connectivity(&self) {
        let was_online = self.is_online();
        let reachable = self.http.get(self.probe_url.as_str()).send().await.is_ok();
        self.online.store(reachable, Ordering::Release);

        if !was_online && reachable {
            info!("connectivity restored, retriggering push");
            self.trigger_push().await;
        } else if was_online && !reachable {
            warn!("connectivity lost, stopping any running sync");
            self.service.stop_sync();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use dmirror_core::domain::{IndexEntry, IndexState, LocalRelPath, Node, Quota};
    use dmirror_core::ports::{
        ApiError, CreateOutcome, DirEntry, EventSink, FileSystemState, ICloudAdapter, SyncEvent,
        TokenProvider, WatchHandle,
    };
    use tempfile::TempDir;

    use super::*;
    use crate::reconciler::Reconciler;

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
            root: &str,
            rel: &LocalRelPath,
            mtime_sec: i64,
            size: u64,
        ) -> anyhow::Result<()> {
            self.rows.lock().unwrap().insert(
                (root.to_string(), rel.as_str().to_string()),
                IndexEntry::new(mtime_sec, size, dmirror_core::domain::IndexStatus::New, mtime_sec),
            );
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

    struct NullEvents;

    #[async_trait::async_trait]
    impl EventSink for NullEvents {
        async fn emit(&self, _event: SyncEvent) {}
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

    struct RealFs;

    #[async_trait::async_trait]
    impl ILocalFileSystem for RealFs {
        async fn read_file(&self, path: &LocalAbsPath) -> anyhow::Result<Vec<u8>> {
            Ok(tokio::fs::read(path.as_path()).await?)
        }
        async fn write_file(&self, path: &LocalAbsPath, data: &[u8]) -> anyhow::Result<()> {
            tokio::fs::write(path.as_path(), data).await?;
            Ok(())
        }
        async fn get_state(&self, path: &LocalAbsPath) -> anyhow::Result<FileSystemState> {
            match tokio::fs::metadata(path.as_path()).await {
                Ok(m) => Ok(FileSystemState {
                    exists: true,
                    is_file: m.is_file(),
                    size: m.len(),
                    modified: m.modified().ok().map(chrono::DateTime::<chrono::Utc>::from),
                }),
                Err(_) => Ok(FileSystemState::not_found()),
            }
        }
        async fn create_directory(&self, path: &LocalAbsPath) -> anyhow::Result<()> {
            tokio::fs::create_dir_all(path.as_path()).await?;
            Ok(())
        }
        async fn list_dir(&self, _path: &LocalAbsPath) -> anyhow::Result<Vec<DirEntry>> {
            Ok(vec![])
        }
        async fn watch(&self, _path: &LocalAbsPath) -> anyhow::Result<WatchHandle> {
            Ok(WatchHandle::new(|| {}))
        }
    }

    fn build_scheduler(
        change_rx: mpsc::Receiver<ChangeEvent>,
        sync_root: LocalAbsPath,
    ) -> (SyncScheduler, Arc<InMemoryIndex>) {
        let index = Arc::new(InMemoryIndex::default());
        let fs = Arc::new(RealFs);
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(NoopCloud),
            index.clone(),
            fs.clone(),
            Arc::new(NullEvents),
        ));
        let service = Arc::new(SyncService::new(
            reconciler,
            Arc::new(FixedToken),
            Arc::new(NullEvents),
            index.clone(),
        ));
        let scheduler = SyncScheduler::new(
            change_rx,
            service,
            index.clone(),
            fs,
            sync_root,
            vec![],
            3,
            60,
            30,
            "http://127.0.0.1:1".to_string(),
        );
        (scheduler, index)
    }

    #[tokio::test]
    async fn note_new_file_records_untracked_path() {
        let dir = TempDir::new().unwrap();
        let root = LocalAbsPath::new(dir.path()).unwrap();
        let (_tx, rx) = mpsc::channel(16);
        let (scheduler, index) = build_scheduler(rx, root.clone());

        let file_path = dir.path().join("a.txt");
        tokio::fs::write(&file_path, b"hello").await.unwrap();

        scheduler
            .note_new_file(&ChangeEvent::Created(file_path))
            .await;

        let rel = LocalRelPath::new("a.txt").unwrap();
        let entry = index.get(&scheduler.root_key, &rel).await.unwrap();
        assert!(entry.is_some());
        assert_eq!(entry.unwrap().status, dmirror_core::domain::IndexStatus::New);
    }

    #[tokio::test]
    async fn note_new_file_skips_deleted_events() {
        let dir = TempDir::new().unwrap();
        let root = LocalAbsPath::new(dir.path()).unwrap();
        let (_tx, rx) = mpsc::channel(16);
        let (scheduler, index) = build_scheduler(rx, root);

        scheduler
            .note_new_file(&ChangeEvent::Deleted(dir.path().join("gone.txt")))
            .await;

        assert_eq!(index.summary().await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn run_exits_on_channel_close() {
        let dir = TempDir::new().unwrap();
        let root = LocalAbsPath::new(dir.path()).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let (mut scheduler, _index) = build_scheduler(rx, root);

        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), scheduler.run())
            .await
            .expect("scheduler should exit when channel closes");
    }
}
