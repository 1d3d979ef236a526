//! Sync command - run a one-shot pull or push pass
//!
//! Provides the `dmirror sync` CLI command which wires up the same adapters
//! the daemon uses (SQLite index, REST cloud adapter, local filesystem, OS
//! keyring), runs a single reconciler pass to completion, and prints the
//! resulting transfer counts. Unlike the daemon, this awaits the pass
//! directly rather than dispatching it through `SyncService`.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use dmirror_cache::{DatabasePool, SqliteSyncIndex};
use dmirror_cloud::{DiskApiClient, RestCloudAdapter};
use dmirror_core::config::Settings;
use dmirror_core::domain::normalize_root;
use dmirror_core::ports::{EventSink, ICloudAdapter, ILocalFileSystem, ISyncIndex};
use dmirror_sync::{LocalFileSystemAdapter, PassResult, ReconcileError, Reconciler};
use tracing::info;

use crate::output::{get_formatter, OutputFormat};

/// Direction of a one-shot sync pass.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Direction {
    /// Cloud -> local.
    Pull,
    /// Local -> cloud.
    Push,
}

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Which pass to run
    #[arg(value_enum, default_value = "pull")]
    pub direction: Direction,

    /// Cloud path to sync (defaults to the whole root)
    #[arg(long, default_value = "/")]
    pub path: String,
}

impl SyncCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        use crate::commands::auth::read_access_token;

        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let config_path = Settings::default_path();
        let settings = Settings::load_or_default(&config_path);

        let sync_root = normalize_root(settings.sync_root.as_path())
            .with_context(|| format!("invalid sync root: {}", settings.sync_root.display()))?;
        let root_key = sync_root.to_string();

        let access_token = match read_access_token().await {
            Ok(token) => token,
            Err(e) => {
                formatter.error(&format!("No usable access token: {}", e));
                formatter.info("Run the login flow out-of-process, then retry.");
                return Ok(());
            }
        };

        let pool = DatabasePool::new(&settings.index_db_path)
            .await
            .context("Failed to open sync index database")?;
        let index: Arc<dyn ISyncIndex> = Arc::new(SqliteSyncIndex::new(pool.pool().clone()));

        let cloud_client = DiskApiClient::new(settings.base_url.clone(), access_token);
        let cloud: Arc<dyn ICloudAdapter> = Arc::new(RestCloudAdapter::new(cloud_client));
        let fs: Arc<dyn ILocalFileSystem> = Arc::new(LocalFileSystemAdapter::new());
        let events: Arc<dyn EventSink> = Arc::new(NullEventSink);

        let reconciler = Reconciler::new(cloud, index, fs, events);

        let target = dmirror_core::domain::CloudPath::normalize(&self.path)
            .context("Invalid cloud path")?;
        let selected = [target];
        let stop = AtomicBool::new(false);

        info!(direction = ?self.direction_name(), path = %self.path, "running one-shot sync pass");
        formatter.info(&format!("Running {} pass...", self.direction_name()));

        let outcome = match self.direction {
            Direction::Pull => {
                reconciler
                    .pull(&root_key, &sync_root, &selected, settings.max_retries, &stop)
                    .await
            }
            Direction::Push => {
                reconciler
                    .push(&root_key, &sync_root, &selected, settings.max_retries, &stop)
                    .await
            }
        };

        match outcome {
            Ok(result) => self.print_result(&result, format, &*formatter),
            Err(ReconcileError::Unauthorized(msg)) => {
                formatter.error(&format!("Access token rejected: {}", msg));
            }
            Err(ReconcileError::Fatal(msg)) => {
                formatter.error(&format!("Sync pass aborted: {}", msg));
            }
        }

        Ok(())
    }

    fn direction_name(&self) -> &'static str {
        match self.direction {
            Direction::Pull => "pull",
            Direction::Push => "push",
        }
    }

    fn print_result(
        &self,
        result: &PassResult,
        format: OutputFormat,
        formatter: &dyn crate::output::OutputFormatter,
    ) {
        if matches!(format, OutputFormat::Json) {
            let json = serde_json::json!({
                "direction": self.direction_name(),
                "files_transferred": result.files_transferred,
                "bytes_transferred": result.bytes_transferred,
                "created_top_levels": result.created_top_levels.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            });
            formatter.print_json(&json);
            return;
        }

        if result.files_transferred == 0 {
            formatter.success("Already up to date");
        } else {
            formatter.success(&format!(
                "{} completed: {} file{} transferred",
                self.direction_name(),
                result.files_transferred,
                if result.files_transferred == 1 { "" } else { "s" }
            ));
        }
        formatter.info(&format!("Bytes transferred: {}", result.bytes_transferred));

        if !result.created_top_levels.is_empty() {
            formatter.info("Created top-level cloud folders:");
            for path in &result.created_top_levels {
                formatter.info(&format!("  {}", path.as_str()));
            }
        }
    }
}

/// Drops every event; `sync` prints the pass outcome itself rather than
/// streaming progress through the event sink.
struct NullEventSink;

#[async_trait::async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event: dmirror_core::ports::SyncEvent) {}
}
