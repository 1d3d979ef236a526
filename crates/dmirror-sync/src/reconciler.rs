//! Reconciler: the two DFS passes that keep a local
//! directory tree and a cloud object tree in agreement.
//!
//! [`Reconciler::pull`] walks the cloud tree and downloads what the local
//! tree is missing or behind on; [`Reconciler::push`] walks the local tree,
//! auto-creates newly-discovered top-level cloud folders, uploads what the
//! cloud tree is missing or behind on, and deletes cloud files that were
//! removed locally. Both share one retry/status state machine stored in the
//! sync index (`NEW`/`SYNCED`/`UPLOADING`/`DOWNLOADING`/`FAILED`) rather than
//! looping in memory — each file is attempted once per pass.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dmirror_core::domain::{
    parse_cloud_modified, to_relative, CloudPath, IndexStatus, LocalAbsPath, Node,
};
use dmirror_core::ports::{
    ApiError, CreateOutcome, EventSink, FileSystemState, ICloudAdapter, ILocalFileSystem,
    ISyncIndex, SyncEvent,
};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Outcome of one completed pass.
#[derive(Debug, Clone, Default)]
pub struct PassResult {
    /// Files downloaded or uploaded during the pass.
    pub files_transferred: u64,
    /// Bytes transferred during the pass.
    pub bytes_transferred: u64,
    /// Top-level cloud folders auto-created during a push. Empty
    /// for pull, and for a push that created nothing new.
    pub created_top_levels: Vec<CloudPath>,
}

/// Errors that abort a pass. Per-file failures never surface here;
/// they're logged and folded into the index's `retries` column instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The adapter returned `Unauthorized` on the pass's first network
    /// call. The caller should treat this like `TokenExpired`.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Any other fatal condition: local directory creation failure, or a
    /// remote delete failure during cleanup.
    #[error("{0}")]
    Fatal(String),
}

fn fatal(e: impl std::fmt::Display) -> ReconcileError {
    ReconcileError::Fatal(e.to_string())
}

/// Every `N` index writes within a pass, commit and reopen the transaction,
/// bounding how much would be lost to a crash mid-pass.
const COMMIT_BATCH_SIZE: u32 = 25;

/// Runs the cloud/local reconciliation passes.
pub struct Reconciler {
    cloud: Arc<dyn ICloudAdapter>,
    index: Arc<dyn ISyncIndex>,
    fs: Arc<dyn ILocalFileSystem>,
    events: Arc<dyn EventSink>,
}

impl Reconciler {
    /// Builds a reconciler over the given ports.
    pub fn new(
        cloud: Arc<dyn ICloudAdapter>,
        index: Arc<dyn ISyncIndex>,
        fs: Arc<dyn ILocalFileSystem>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            cloud,
            index,
            fs,
            events,
        }
    }

    async fn checkpoint(&self, write_count: &mut u32) -> Result<(), ReconcileError> {
        *write_count += 1;
        if *write_count % COMMIT_BATCH_SIZE == 0 {
            self.index.commit().await.map_err(fatal)?;
            self.index.begin().await.map_err(fatal)?;
        }
        Ok(())
    }

    async fn emit_throughput(&self, bytes_so_far: u64, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis().max(1) as u64;
        let rate = bytes_so_far.saturating_mul(1000) / elapsed_ms;
        self.events.emit(SyncEvent::SyncThroughput(rate)).await;
    }

    // ------------------------------------------------------------------
    // Pull
    // ------------------------------------------------------------------

    /// Cloud → local pass. Walks `selected` via the adapter and downloads
    /// whatever the local tree is missing or behind on.
    #[instrument(skip(self, selected, stop), fields(root = root_key, selected = selected.len()))]
    pub async fn pull(
        &self,
        root_key: &str,
        local_root: &LocalAbsPath,
        selected: &[CloudPath],
        max_retries: u32,
        stop: &AtomicBool,
    ) -> Result<PassResult, ReconcileError> {
        let started = Instant::now();
        let mut result = PassResult::default();
        let mut first_call = true;
        let mut write_count = 0u32;

        self.index.begin().await.map_err(fatal)?;

        for cloud_path in selected {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let local_dir = self.cloud_to_local(cloud_path, local_root)?;
            let outcome = self
                .pull_dir(
                    cloud_path,
                    &local_dir,
                    local_root,
                    root_key,
                    max_retries,
                    &mut result,
                    &mut first_call,
                    &mut write_count,
                    stop,
                    started,
                )
                .await;

            if let Err(e) = outcome {
                self.index.rollback().await.ok();
                self.events.emit(SyncEvent::SyncError(e.to_string())).await;
                if matches!(e, ReconcileError::Unauthorized(_)) {
                    self.events.emit(SyncEvent::TokenExpired).await;
                }
                return Err(e);
            }
        }

        self.index.commit().await.map_err(fatal)?;
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn pull_dir<'a>(
        &'a self,
        cloud_dir: &'a CloudPath,
        local_dir: &'a LocalAbsPath,
        local_root: &'a LocalAbsPath,
        root_key: &'a str,
        max_retries: u32,
        result: &'a mut PassResult,
        first_call: &'a mut bool,
        write_count: &'a mut u32,
        stop: &'a AtomicBool,
        started: Instant,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ReconcileError>> + Send + 'a>>
    {
        Box::pin(async move {
            let was_first = *first_call;
            *first_call = false;
            let children = match self.cloud.list_children(cloud_dir).await {
                Ok(children) => children,
                Err(ApiError::Unauthorized { .. }) if was_first => {
                    return Err(ReconcileError::Unauthorized(format!(
                        "unauthorized listing {cloud_dir}"
                    )));
                }
                Err(e) => {
                    warn!(path = %cloud_dir, error = %e, "list_children failed, skipping subtree");
                    return Ok(());
                }
            };

            self.fs
                .create_directory(local_dir)
                .await
                .map_err(|e| fatal(format!("creating local directory {local_dir}: {e}")))?;

            for child in &children {
                if stop.load(Ordering::Relaxed) {
                    return Ok(());
                }
                match child {
                    Node::Dir { name, .. } => {
                        match self.cloud.create_folder(child.path()).await {
                            Ok(_) => {}
                            Err(e) => {
                                warn!(path = %child.path(), error = %e, "create_folder failed during pull, skipping subtree");
                                continue;
                            }
                        }
                        let child_local = match local_dir.join(name) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(name, error = %e, "invalid child name, skipping");
                                continue;
                            }
                        };
                        self.pull_dir(
                            child.path(),
                            &child_local,
                            local_root,
                            root_key,
                            max_retries,
                            result,
                            first_call,
                            write_count,
                            stop,
                            started,
                        )
                        .await?;
                    }
                    Node::File {
                        name,
                        size,
                        modified,
                        ..
                    } => {
                        self.pull_file(
                            child.path(),
                            name,
                            *size,
                            *modified,
                            local_dir,
                            local_root,
                            root_key,
                            max_retries,
                            result,
                            write_count,
                            started,
                        )
                        .await;
                    }
                }
            }
            Ok(())
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn pull_file(
        &self,
        cloud_path: &CloudPath,
        name: &str,
        cloud_size: u64,
        cloud_modified: chrono::DateTime<chrono::Utc>,
        local_dir: &LocalAbsPath,
        local_root: &LocalAbsPath,
        root_key: &str,
        max_retries: u32,
        result: &mut PassResult,
        write_count: &mut u32,
        started: Instant,
    ) {
        let local_file = match local_dir.join(name) {
            Ok(p) => p,
            Err(e) => {
                warn!(name, error = %e, "invalid file name, skipping");
                return;
            }
        };
        let rel = match to_relative(&local_file, local_root) {
            Some(r) => r,
            None => return,
        };

        let fs_state = match self.fs.get_state(&local_file).await {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %local_file, error = %e, "get_state failed, skipping");
                return;
            }
        };
        let index_entry = self.index.get(root_key, &rel).await.ok().flatten();

        let mtime_newer = match fs_state.modified {
            Some(local_mtime) => cloud_modified > local_mtime,
            None => true,
        };
        let mut need_download = !fs_state.exists || fs_state.size == 0 || mtime_newer;

        if let Some(entry) = &index_entry {
            if entry.status == IndexStatus::Downloading {
                need_download = true;
            } else if entry.status == IndexStatus::Synced
                && fs_state.size == cloud_size
                && entry.size == cloud_size
            {
                need_download = false;
            }
        }

        if need_download {
            let prior_retries = index_entry.map(|e| e.retries).unwrap_or(0);
            let local_mtime_sec = fs_state.modified.map(|m| m.timestamp()).unwrap_or(0);
            if self
                .index
                .set(
                    root_key,
                    &rel,
                    local_mtime_sec,
                    fs_state.size,
                    Some(IndexStatus::Downloading),
                    Some(prior_retries),
                )
                .await
                .is_err()
            {
                warn!(path = %local_file, "failed to mark entry downloading, continuing anyway");
            }
            if self.index.commit().await.is_ok() {
                let _ = self.index.begin().await;
            }

            debug!(path = %cloud_path, "downloading file");
            match self.cloud.download(cloud_path).await {
                Ok(bytes) => match self.fs.write_file(&local_file, &bytes).await {
                    Ok(()) => {
                        let post_state = self
                            .fs
                            .get_state(&local_file)
                            .await
                            .unwrap_or(FileSystemState {
                                exists: true,
                                is_file: true,
                                size: bytes.len() as u64,
                                modified: None,
                            });
                        let _ = self
                            .index
                            .set(
                                root_key,
                                &rel,
                                post_state.modified.map(|m| m.timestamp()).unwrap_or(0),
                                post_state.size,
                                Some(IndexStatus::Synced),
                                Some(0),
                            )
                            .await;
                        result.files_transferred += 1;
                        result.bytes_transferred += bytes.len() as u64;
                        self.events
                            .emit(SyncEvent::SyncProgressMessage(format!(
                                "downloaded {cloud_path}"
                            )))
                            .await;
                        self.emit_throughput(result.bytes_transferred, started).await;
                    }
                    Err(e) => {
                        self.escalate_failure(root_key, &rel, prior_retries, max_retries, &e)
                            .await;
                    }
                },
                Err(e) => {
                    self.escalate_failure(root_key, &rel, prior_retries, max_retries, &e)
                        .await;
                }
            }
            let _ = self.checkpoint(write_count).await;
        } else if fs_state.exists {
            let local_mtime_sec = fs_state.modified.map(|m| m.timestamp()).unwrap_or(0);
            let _ = self
                .index
                .set(
                    root_key,
                    &rel,
                    local_mtime_sec,
                    fs_state.size,
                    Some(IndexStatus::Synced),
                    Some(0),
                )
                .await;
        }
    }

    async fn escalate_failure(
        &self,
        root_key: &str,
        rel: &dmirror_core::domain::LocalRelPath,
        prior_retries: u32,
        max_retries: u32,
        err: &impl std::fmt::Display,
    ) {
        let new_retries = prior_retries + 1;
        let status = if new_retries >= max_retries {
            IndexStatus::Failed
        } else {
            IndexStatus::Downloading
        };
        let _ = self.index.set_status(root_key, rel, status, 1).await;
        warn!(rel = %rel, error = %err, retries = new_retries, "transfer failed");
        self.events
            .emit(SyncEvent::SyncProgressMessage(format!(
                "error syncing {rel}: {err}"
            )))
            .await;
    }

    fn cloud_to_local(
        &self,
        cloud_path: &CloudPath,
        local_root: &LocalAbsPath,
    ) -> Result<LocalAbsPath, ReconcileError> {
        if cloud_path.as_str() == "/" {
            return Ok(local_root.clone());
        }
        let rel = cloud_path.as_str().trim_start_matches('/');
        local_root.join(rel).map_err(fatal)
    }

    // ------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------

    /// Local → cloud pass. Auto-creates newly-discovered top-level cloud
    /// folders, then walks `discovered` and uploads/deletes to match the
    /// local tree.
    #[instrument(skip(self, selected, stop), fields(root = root_key, selected = selected.len()))]
    pub async fn push(
        &self,
        root_key: &str,
        local_root: &LocalAbsPath,
        selected: &[CloudPath],
        max_retries: u32,
        stop: &AtomicBool,
    ) -> Result<PassResult, ReconcileError> {
        let started = Instant::now();
        let mut result = PassResult::default();

        let selected_set: HashSet<CloudPath> = selected.iter().cloned().collect();
        let selected_tops: HashSet<String> = selected
            .iter()
            .filter_map(|p| p.top_level().map(|s| s.to_string()))
            .collect();

        self.index.begin().await.map_err(fatal)?;

        let mut discovered: Vec<CloudPath> = selected.to_vec();
        let known_tops = self
            .index
            .top_level_relative_paths(root_key)
            .await
            .map_err(fatal)?;
        for top in known_tops {
            if let Ok(p) = CloudPath::normalize(&format!("/{top}")) {
                if !discovered.contains(&p) {
                    discovered.push(p);
                }
            }
        }
        let root_path = CloudPath::root();
        if !discovered.contains(&root_path) {
            discovered.push(root_path);
        }

        let mut first_call = true;
        let mut created_top_levels: Vec<CloudPath> = Vec::new();

        for p in &discovered {
            if selected_set.contains(p) {
                continue;
            }
            let Some(top) = p.top_level() else { continue };
            let Ok(local_dir) = local_root.join(top) else {
                continue;
            };
            let state = match self.fs.get_state(&local_dir).await {
                Ok(s) => s,
                Err(_) => continue,
            };
            if !state.exists || state.is_file {
                continue;
            }

            let was_first = first_call;
            first_call = false;
            match self.cloud.create_folder(p).await {
                Ok(CreateOutcome::Created) => {
                    if !selected_tops.contains(top) {
                        created_top_levels.push(p.clone());
                    }
                }
                Ok(CreateOutcome::AlreadyExists) => {}
                Err(ApiError::Unauthorized { .. }) if was_first => {
                    self.index.rollback().await.ok();
                    self.events
                        .emit(SyncEvent::SyncError("unauthorized creating top-level folder".into()))
                        .await;
                    self.events.emit(SyncEvent::TokenExpired).await;
                    return Err(ReconcileError::Unauthorized(
                        "unauthorized on initial probe".into(),
                    ));
                }
                Err(e) => {
                    warn!(path = %p, error = %e, "top-level auto-create failed, skipping");
                }
            }
        }

        if !created_top_levels.is_empty() {
            self.index.commit().await.map_err(fatal)?;
            self.events
                .emit(SyncEvent::PathsCreatedInCloud(created_top_levels.clone()))
                .await;
            result.created_top_levels = created_top_levels;
            return Ok(result);
        }

        let mut write_count = 0u32;
        for p in &discovered {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let local_dir = if p.as_str() == "/" {
                local_root.clone()
            } else {
                let Some(top) = p.top_level() else { continue };
                match local_root.join(top) {
                    Ok(d) => d,
                    Err(_) => continue,
                }
            };
            let state = match self.fs.get_state(&local_dir).await {
                Ok(s) => s,
                Err(_) => continue,
            };
            if !state.exists || state.is_file {
                continue;
            }

            let outcome = self
                .push_dir(
                    p,
                    &local_dir,
                    local_root,
                    root_key,
                    &selected_tops,
                    max_retries,
                    &mut result,
                    &mut first_call,
                    &mut write_count,
                    &mut created_top_levels,
                    stop,
                    started,
                )
                .await;

            if let Err(e) = outcome {
                self.index.rollback().await.ok();
                self.events.emit(SyncEvent::SyncError(e.to_string())).await;
                if matches!(e, ReconcileError::Unauthorized(_)) {
                    self.events.emit(SyncEvent::TokenExpired).await;
                }
                return Err(e);
            }
        }

        if !created_top_levels.is_empty() {
            self.events
                .emit(SyncEvent::PathsCreatedInCloud(created_top_levels.clone()))
                .await;
            result.created_top_levels = created_top_levels;
        }

        self.index.commit().await.map_err(fatal)?;
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn push_dir<'a>(
        &'a self,
        cloud_dir: &'a CloudPath,
        local_dir: &'a LocalAbsPath,
        local_root: &'a LocalAbsPath,
        root_key: &'a str,
        selected_tops: &'a HashSet<String>,
        max_retries: u32,
        result: &'a mut PassResult,
        first_call: &'a mut bool,
        write_count: &'a mut u32,
        created_top_levels: &'a mut Vec<CloudPath>,
        stop: &'a AtomicBool,
        started: Instant,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ReconcileError>> + Send + 'a>>
    {
        Box::pin(async move {
            if cloud_dir.as_str() != "/" {
                let was_first = *first_call;
                *first_call = false;
                match self.cloud.create_folder(cloud_dir).await {
                    Ok(CreateOutcome::Created) => {
                        if let Some(top) = cloud_dir.top_level() {
                            if !selected_tops.contains(top) {
                                if let Ok(top_path) = CloudPath::normalize(&format!("/{top}")) {
                                    if !created_top_levels.contains(&top_path) {
                                        created_top_levels.push(top_path);
                                    }
                                }
                            }
                        }
                    }
                    Ok(CreateOutcome::AlreadyExists) => {}
                    Err(ApiError::Unauthorized { .. }) if was_first => {
                        return Err(ReconcileError::Unauthorized(format!(
                            "unauthorized creating {cloud_dir}"
                        )));
                    }
                    Err(e) => {
                        warn!(path = %cloud_dir, error = %e, "create_folder failed, skipping subtree");
                        return Ok(());
                    }
                }
            }

            let entries = self
                .fs
                .list_dir(local_dir)
                .await
                .map_err(|e| fatal(format!("listing {local_dir}: {e}")))?;
            let entries: Vec<_> = entries.into_iter().filter(|e| !e.is_symlink).collect();
            let local_file_count = entries.iter().filter(|e| !e.is_dir).count();
            let local_names: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();

            let was_first = *first_call;
            *first_call = false;
            let cloud_children: HashMap<String, Node> = match self.cloud.list_children(cloud_dir).await {
                Ok(nodes) => nodes.into_iter().map(|n| (n.name().to_string(), n)).collect(),
                Err(ApiError::Unauthorized { .. }) if was_first => {
                    return Err(ReconcileError::Unauthorized(format!(
                        "unauthorized listing {cloud_dir}"
                    )));
                }
                Err(e) => {
                    warn!(path = %cloud_dir, error = %e, "list_children failed, skipping subtree");
                    return Ok(());
                }
            };

            for entry in &entries {
                if stop.load(Ordering::Relaxed) {
                    return Ok(());
                }
                let child_cloud = match CloudPath::join(cloud_dir, &entry.name) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(name = %entry.name, error = %e, "invalid child name, skipping");
                        continue;
                    }
                };

                if entry.is_dir {
                    self.push_dir(
                        &child_cloud,
                        &entry.path,
                        local_root,
                        root_key,
                        selected_tops,
                        max_retries,
                        result,
                        first_call,
                        write_count,
                        created_top_levels,
                        stop,
                        started,
                    )
                    .await?;
                    continue;
                }

                self.push_file(
                    &child_cloud,
                    entry,
                    local_root,
                    root_key,
                    max_retries,
                    cloud_children.get(&entry.name),
                    result,
                    write_count,
                    started,
                )
                .await;
            }

            if local_file_count > 0 {
                for (name, node) in &cloud_children {
                    if local_names.contains(name.as_str()) {
                        continue;
                    }
                    match self.cloud.delete(node.path()).await {
                        Ok(()) => {
                            if let Some(rel_child) =
                                local_dir.join(name).ok().and_then(|p| to_relative(&p, local_root))
                            {
                                let _ = match node {
                                    Node::Dir { .. } => self.index.remove_prefix(root_key, &rel_child).await,
                                    Node::File { .. } => self.index.remove(root_key, &rel_child).await,
                                };
                            }
                        }
                        Err(e) => {
                            return Err(fatal(format!(
                                "deleting remote {}: {e}",
                                node.path()
                            )));
                        }
                    }
                }
            }

            let _ = self.checkpoint(write_count).await;
            Ok(())
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn push_file(
        &self,
        cloud_path: &CloudPath,
        entry: &dmirror_core::ports::DirEntry,
        local_root: &LocalAbsPath,
        root_key: &str,
        max_retries: u32,
        cloud_node: Option<&Node>,
        result: &mut PassResult,
        write_count: &mut u32,
        started: Instant,
    ) {
        let rel = match to_relative(&entry.path, local_root) {
            Some(r) => r,
            None => return,
        };
        let fs_state = match self.fs.get_state(&entry.path).await {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %entry.path, error = %e, "get_state failed, skipping");
                return;
            }
        };
        let local_mtime_sec = fs_state.modified.map(|m| m.timestamp()).unwrap_or(0);
        let index_entry = self.index.get(root_key, &rel).await.ok().flatten();

        let mut need_upload = match &index_entry {
            None => true,
            Some(e) => {
                e.mtime_sec != local_mtime_sec
                    || e.size != fs_state.size
                    || matches!(e.status, IndexStatus::New | IndexStatus::Uploading)
            }
        };

        if need_upload {
            if let Some(Node::File {
                modified: cloud_mtime,
                ..
            }) = cloud_node
            {
                let local_newer = fs_state.modified.is_some_and(|lm| lm > *cloud_mtime);
                if !local_newer {
                    need_upload = false;
                }
            }
        }

        if !need_upload {
            let is_failed = index_entry
                .as_ref()
                .is_some_and(|e| e.status == IndexStatus::Failed);
            if !is_failed {
                let _ = self
                    .index
                    .set(
                        root_key,
                        &rel,
                        local_mtime_sec,
                        fs_state.size,
                        Some(IndexStatus::Synced),
                        Some(0),
                    )
                    .await;
            }
            let _ = self.checkpoint(write_count).await;
            return;
        }

        let prior_retries = index_entry.map(|e| e.retries).unwrap_or(0);
        if index_entry.is_some_and(|e| e.status == IndexStatus::New) {
            let _ = self
                .index
                .set_status(root_key, &rel, IndexStatus::Uploading, 0)
                .await;
        } else if index_entry.is_none() {
            let _ = self
                .index
                .set(
                    root_key,
                    &rel,
                    local_mtime_sec,
                    fs_state.size,
                    Some(IndexStatus::Uploading),
                    Some(0),
                )
                .await;
        }

        match self.fs.read_file(&entry.path).await {
            Ok(bytes) => {
                let len = bytes.len() as u64;
                match self.cloud.upload(cloud_path, bytes).await {
                    Ok(()) => {
                        let _ = self
                            .index
                            .set(
                                root_key,
                                &rel,
                                local_mtime_sec,
                                fs_state.size,
                                Some(IndexStatus::Synced),
                                Some(0),
                            )
                            .await;
                        result.files_transferred += 1;
                        result.bytes_transferred += len;
                        self.events
                            .emit(SyncEvent::SyncProgressMessage(format!(
                                "uploaded {cloud_path}"
                            )))
                            .await;
                        self.emit_throughput(result.bytes_transferred, started).await;
                    }
                    Err(e) => {
                        self.escalate_failure(root_key, &rel, prior_retries, max_retries, &e)
                            .await;
                    }
                }
            }
            Err(e) => {
                self.escalate_failure(root_key, &rel, prior_retries, max_retries, &e)
                    .await;
            }
        }
        let _ = self.checkpoint(write_count).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::TimeZone;
    use dmirror_core::domain::{IndexEntry, IndexState, LocalRelPath, Quota};
    use dmirror_core::ports::{DirEntry, WatchHandle};
    use tempfile::TempDir;

    use super::*;

    #[derive(Default)]
    struct FakeCloud {
        children: Mutex<HashMap<String, Vec<Node>>>,
        files: Mutex<HashMap<String, Vec<u8>>>,
        created: Mutex<Vec<String>>,
        fail_uploads: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl ICloudAdapter for FakeCloud {
        async fn list_children(&self, path: &CloudPath) -> Result<Vec<Node>, ApiError> {
            Ok(self
                .children
                .lock()
                .unwrap()
                .get(path.as_str())
                .cloned()
                .unwrap_or_default())
        }

        async fn create_folder(&self, path: &CloudPath) -> Result<CreateOutcome, ApiError> {
            let mut created = self.created.lock().unwrap();
            if created.contains(&path.as_str().to_string()) {
                return Ok(CreateOutcome::AlreadyExists);
            }
            created.push(path.as_str().to_string());
            Ok(CreateOutcome::Created)
        }

        async fn download(&self, path: &CloudPath) -> Result<Vec<u8>, ApiError> {
            self.files
                .lock()
                .unwrap()
                .get(path.as_str())
                .cloned()
                .ok_or_else(|| ApiError::NotFound {
                    status: 404,
                    message: path.as_str().to_string(),
                })
        }

        async fn upload(&self, path: &CloudPath, bytes: Vec<u8>) -> Result<(), ApiError> {
            if *self.fail_uploads.lock().unwrap() {
                return Err(ApiError::Transport {
                    message: "forced failure".into(),
                });
            }
            self.files
                .lock()
                .unwrap()
                .insert(path.as_str().to_string(), bytes);
            Ok(())
        }

        async fn delete(&self, path: &CloudPath) -> Result<(), ApiError> {
            self.files.lock().unwrap().remove(path.as_str());
            Ok(())
        }

        async fn quota(&self) -> Result<Quota, ApiError> {
            Ok(Quota { used: 0, total: 0 })
        }
    }

    #[derive(Default)]
    struct FakeIndex {
        rows: Mutex<HashMap<(String, String), IndexEntry>>,
    }

    #[async_trait::async_trait]
    impl ISyncIndex for FakeIndex {
        async fn begin(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn commit(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn rollback(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get(
            &self,
            root: &str,
            rel: &LocalRelPath,
        ) -> anyhow::Result<Option<IndexEntry>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&(root.to_string(), rel.as_str().to_string()))
                .copied())
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
            let mut rows = self.rows.lock().unwrap();
            let entry = IndexEntry {
                mtime_sec,
                size,
                status: status.unwrap_or(IndexStatus::Synced),
                retries: retries.unwrap_or(0),
                updated_at_sec: 0,
            };
            rows.insert((root.to_string(), rel.as_str().to_string()), entry);
            Ok(())
        }
        async fn set_status(
            &self,
            root: &str,
            rel: &LocalRelPath,
            status: IndexStatus,
            retries_delta: i64,
        ) -> anyhow::Result<()> {
            let mut rows = self.rows.lock().unwrap();
            let key = (root.to_string(), rel.as_str().to_string());
            let entry = rows.entry(key).or_insert(IndexEntry {
                mtime_sec: 0,
                size: 0,
                status,
                retries: 0,
                updated_at_sec: 0,
            });
            entry.status = status;
            entry.retries = (entry.retries as i64 + retries_delta).max(0) as u32;
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
            self.rows
                .lock()
                .unwrap()
                .remove(&(root.to_string(), rel.as_str().to_string()));
            Ok(())
        }
        async fn remove_prefix(&self, root: &str, rel_prefix: &LocalRelPath) -> anyhow::Result<()> {
            let prefix = format!("{}/", rel_prefix.as_str());
            self.rows.lock().unwrap().retain(|(r, rel), _| {
                !(r == root && (rel == rel_prefix.as_str() || rel.starts_with(&prefix)))
            });
            Ok(())
        }
        async fn top_level_relative_paths(&self, root: &str) -> anyhow::Result<Vec<String>> {
            let rows = self.rows.lock().unwrap();
            let mut tops: Vec<String> = rows
                .keys()
                .filter(|(r, _)| r == root)
                .map(|(_, rel)| rel.split('/').next().unwrap_or(rel).to_string())
                .collect();
            tops.sort();
            tops.dedup();
            Ok(tops)
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

    struct FakeFs;

    #[async_trait::async_trait]
    impl ILocalFileSystem for FakeFs {
        async fn read_file(&self, path: &LocalAbsPath) -> anyhow::Result<Vec<u8>> {
            Ok(tokio::fs::read(path.as_path()).await?)
        }
        async fn write_file(&self, path: &LocalAbsPath, data: &[u8]) -> anyhow::Result<()> {
            if let Some(parent) = path.as_path().parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
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
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Ok(FileSystemState::not_found())
                }
                Err(e) => Err(e.into()),
            }
        }
        async fn create_directory(&self, path: &LocalAbsPath) -> anyhow::Result<()> {
            tokio::fs::create_dir_all(path.as_path()).await?;
            Ok(())
        }
        async fn list_dir(&self, path: &LocalAbsPath) -> anyhow::Result<Vec<DirEntry>> {
            let mut out = Vec::new();
            let mut rd = tokio::fs::read_dir(path.as_path()).await?;
            while let Some(e) = rd.next_entry().await? {
                let name = e.file_name().to_string_lossy().into_owned();
                let ft = e.file_type().await?;
                out.push(DirEntry {
                    path: path.join(&name)?,
                    name,
                    is_dir: ft.is_dir(),
                    is_symlink: ft.is_symlink(),
                });
            }
            Ok(out)
        }
        async fn watch(&self, _path: &LocalAbsPath) -> anyhow::Result<WatchHandle> {
            Ok(WatchHandle::new(|| {}))
        }
    }

    fn harness() -> (Reconciler, Arc<FakeCloud>, TempDir) {
        let cloud = Arc::new(FakeCloud::default());
        let index = Arc::new(FakeIndex::default());
        let fs = Arc::new(FakeFs);
        let events = Arc::new(NullEvents);
        let dir = TempDir::new().unwrap();
        (
            Reconciler::new(cloud.clone(), index, fs, events),
            cloud,
            dir,
        )
    }

    #[tokio::test]
    async fn fresh_pull_downloads_tree() {
        let (reconciler, cloud, dir) = harness();
        let local_root = LocalAbsPath::new(dir.path()).unwrap();
        let mtime = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        cloud.children.lock().unwrap().insert(
            "/Photos".into(),
            vec![
                Node::File {
                    path: CloudPath::normalize("/Photos/a.jpg").unwrap(),
                    name: "a.jpg".into(),
                    size: 10,
                    modified: mtime,
                },
                Node::Dir {
                    path: CloudPath::normalize("/Photos/sub").unwrap(),
                    name: "sub".into(),
                },
            ],
        );
        cloud.children.lock().unwrap().insert(
            "/Photos/sub".into(),
            vec![Node::File {
                path: CloudPath::normalize("/Photos/sub/b.txt").unwrap(),
                name: "b.txt".into(),
                size: 3,
                modified: mtime,
            }],
        );
        cloud
            .files
            .lock()
            .unwrap()
            .insert("/Photos/a.jpg".into(), vec![1u8; 10]);
        cloud
            .files
            .lock()
            .unwrap()
            .insert("/Photos/sub/b.txt".into(), vec![2u8; 3]);

        let selected = vec![CloudPath::normalize("/Photos").unwrap()];
        let stop = AtomicBool::new(false);
        let result = reconciler
            .pull("root", &local_root, &selected, 3, &stop)
            .await
            .unwrap();

        assert_eq!(result.files_transferred, 2);
        assert!(dir.path().join("Photos/a.jpg").exists());
        assert!(dir.path().join("Photos/sub/b.txt").exists());
    }

    #[tokio::test]
    async fn cleanup_rule_respects_empty_local_folder() {
        let (reconciler, cloud, dir) = harness();
        let local_root = LocalAbsPath::new(dir.path()).unwrap();
        tokio::fs::create_dir_all(dir.path().join("Docs")).await.unwrap();

        cloud
            .files
            .lock()
            .unwrap()
            .insert("/Docs/gone.txt".into(), b"x".to_vec());
        cloud.children.lock().unwrap().insert(
            "/Docs".into(),
            vec![Node::File {
                path: CloudPath::normalize("/Docs/gone.txt").unwrap(),
                name: "gone.txt".into(),
                size: 1,
                modified: chrono::Utc::now(),
            }],
        );

        let selected = vec![CloudPath::normalize("/Docs").unwrap()];
        let stop = AtomicBool::new(false);
        reconciler
            .push("root", &local_root, &selected, 3, &stop)
            .await
            .unwrap();

        assert!(cloud.files.lock().unwrap().contains_key("/Docs/gone.txt"));
    }

    #[tokio::test]
    async fn top_level_auto_create_stops_the_pass() {
        let (reconciler, cloud, dir) = harness();
        let local_root = LocalAbsPath::new(dir.path()).unwrap();
        tokio::fs::create_dir_all(dir.path().join("B")).await.unwrap();
        tokio::fs::write(dir.path().join("B/file.txt"), b"hi").await.unwrap();

        let selected = vec![CloudPath::normalize("/A").unwrap()];
        let stop = AtomicBool::new(false);
        let result = reconciler
            .push("root", &local_root, &selected, 3, &stop)
            .await
            .unwrap();

        assert_eq!(
            result.created_top_levels,
            vec![CloudPath::normalize("/B").unwrap()]
        );
        assert_eq!(result.files_transferred, 0);
        assert!(!cloud.files.lock().unwrap().contains_key("/B/file.txt"));
    }

    #[tokio::test]
    async fn retry_escalation_marks_failed_after_max_retries() {
        let (reconciler, cloud, dir) = harness();
        let local_root = LocalAbsPath::new(dir.path()).unwrap();
        tokio::fs::create_dir_all(dir.path().join("Docs")).await.unwrap();
        tokio::fs::write(dir.path().join("Docs/a.txt"), b"hello").await.unwrap();
        *cloud.fail_uploads.lock().unwrap() = true;

        let selected = vec![CloudPath::normalize("/Docs").unwrap()];
        for _ in 0..3 {
            let stop = AtomicBool::new(false);
            reconciler
                .push("root", &local_root, &selected, 3, &stop)
                .await
                .unwrap();
        }

        let rel = LocalRelPath::new("Docs/a.txt").unwrap();
        let entry = reconciler
            .index
            .get("root", &rel)
            .await
            .unwrap()
            .expect("entry exists");
        assert_eq!(entry.status, IndexStatus::Failed);
        assert_eq!(entry.retries, 3);
    }

    #[test]
    fn parse_cloud_modified_is_grounded_in_domain_helper() {
        assert!(parse_cloud_modified("2024-01-01T00:00:00Z").is_ok());
    }
}
