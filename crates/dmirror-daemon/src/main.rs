//! dmirror daemon - background synchronization service
//!
//! Wires the concrete adapters (SQLite index, REST cloud adapter, local
//! filesystem, OS keyring, JSON selection/settings mirrors) to the
//! `Reconciler` / `SyncService` / `SyncScheduler` triad in `dmirror-sync`,
//! then runs the scheduler's event loop until interrupted.

mod events;
mod stores;
mod token;

use std::sync::Arc;

use anyhow::Context;
use dmirror_cache::{DatabasePool, SqliteSyncIndex};
use dmirror_cloud::{DiskApiClient, RestCloudAdapter};
use dmirror_core::config::Settings;
use dmirror_core::domain::{normalize_root, CloudPath};
use dmirror_core::ports::{
    EventSink, ICloudAdapter, ILocalFileSystem, ISyncIndex, SelectionStore, SettingsStore,
    TokenProvider,
};
use dmirror_sync::{FileWatcher, LocalFileSystemAdapter, Reconciler, SyncScheduler, SyncService};
use tracing_subscriber::EnvFilter;

use crate::events::TracingEventSink;
use crate::stores::{JsonSelectionStore, JsonSettingsStore};
use crate::token::KeyringTokenProvider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = Settings::default_path();
    let settings_store: Arc<dyn SettingsStore> =
        Arc::new(JsonSettingsStore::new(config_path.clone()));
    let settings = settings_store
        .load()
        .await
        .context("failed to load settings")?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    for error in settings.validate() {
        tracing::warn!(%error, "configuration problem (continuing with current values)");
    }

    tracing::info!(config_path = %config_path.display(), "starting dmirror daemon");

    let sync_root = normalize_root(settings.sync_root.as_path())
        .with_context(|| format!("invalid sync root: {}", settings.sync_root.display()))?;

    let pool = DatabasePool::new(&settings.index_db_path)
        .await
        .context("failed to open sync index database")?;
    let index: Arc<dyn ISyncIndex> = Arc::new(SqliteSyncIndex::new(pool.pool().clone()));

    let account = std::env::var("DMIRROR_ACCOUNT").unwrap_or_else(|_| "default".to_string());
    let token: Arc<dyn TokenProvider> = Arc::new(KeyringTokenProvider::new(account));

    let initial_token = token
        .access_token()
        .await
        .context("no access token available; run the login flow before starting the daemon")?;
    let cloud_client = DiskApiClient::new(settings.base_url.clone(), initial_token);
    let cloud: Arc<dyn ICloudAdapter> = Arc::new(RestCloudAdapter::new(cloud_client));

    let fs: Arc<dyn ILocalFileSystem> = Arc::new(LocalFileSystemAdapter::new());
    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink::new());

    let selection_path = config_path
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join("selection.json");
    let selection_store: Arc<dyn SelectionStore> =
        Arc::new(JsonSelectionStore::new(selection_path));
    let selection: Vec<CloudPath> = selection_store
        .load()
        .await
        .context("failed to load selection")?
        .into_iter()
        .collect();

    let reconciler = Arc::new(Reconciler::new(
        cloud.clone(),
        index.clone(),
        fs.clone(),
        events.clone(),
    ));
    let service = Arc::new(SyncService::new(
        reconciler,
        token.clone(),
        events.clone(),
        index.clone(),
    ));

    let (mut watcher, change_rx) =
        FileWatcher::new().context("failed to initialize filesystem watcher")?;
    watcher
        .watch(sync_root.as_path())
        .with_context(|| format!("failed to watch sync root: {sync_root}"))?;

    let mut scheduler = SyncScheduler::new(
        change_rx,
        service,
        index,
        fs,
        sync_root,
        selection,
        settings.max_retries,
        settings.refresh_interval_sec,
        settings.cloud_check_interval_sec,
        settings.base_url.clone(),
    );

    tokio::select! {
        () = scheduler.run() => {
            tracing::warn!("scheduler exited (file watcher channel closed)");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
