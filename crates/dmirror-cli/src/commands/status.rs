//! Status command - display synchronization status
//!
//! Provides the `dmirror status` CLI command which:
//! 1. Shows global sync index counts (total entries, per-root breakdown)
//! 2. Shows the index entry for a specific local path, when one is given

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use chrono::{TimeZone, Utc};
use dmirror_cache::{DatabasePool, SqliteSyncIndex};
use dmirror_core::config::Settings;
use dmirror_core::domain::{normalize_root, to_relative, LocalAbsPath};
use dmirror_core::ports::ISyncIndex;

use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Optional local path to show the index entry for
    pub path: Option<String>,
}

impl StatusCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let settings = Settings::load_or_default(&Settings::default_path());

        if !settings.index_db_path.exists() {
            formatter.error("No sync index found. Run 'dmirror sync' first.");
            return Ok(());
        }

        let pool = DatabasePool::new(&settings.index_db_path)
            .await
            .context("Failed to open sync index database")?;
        let index: Arc<dyn ISyncIndex> = Arc::new(SqliteSyncIndex::new(pool.pool().clone()));

        let sync_root = normalize_root(settings.sync_root.as_path())
            .with_context(|| format!("invalid sync root: {}", settings.sync_root.display()))?;

        match &self.path {
            Some(path_str) => {
                self.show_path_status(&*index, &sync_root, path_str, format, &*formatter)
                    .await
            }
            None => self.show_global_status(&*index, &sync_root, format, &*formatter).await,
        }
    }

    async fn show_global_status(
        &self,
        index: &dyn ISyncIndex,
        sync_root: &LocalAbsPath,
        format: OutputFormat,
        formatter: &dyn crate::output::OutputFormatter,
    ) -> Result<()> {
        let state = index.summary().await.context("Failed to read index summary")?;

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "sync_root": sync_root.to_string(),
                "total_entries": state.total_entries,
                "per_root_counts": state.per_root_counts,
            }));
            return Ok(());
        }

        formatter.success(&format!("dmirror status - {}", sync_root));
        formatter.info("");
        formatter.info(&format!("Total indexed entries: {}", state.total_entries));

        if !state.per_root_counts.is_empty() {
            formatter.info("");
            formatter.info("Per-root counts:");
            for (root, count) in &state.per_root_counts {
                formatter.info(&format!("  {:<40} {}", root, count));
            }
        }

        Ok(())
    }

    async fn show_path_status(
        &self,
        index: &dyn ISyncIndex,
        sync_root: &LocalAbsPath,
        path_str: &str,
        format: OutputFormat,
        formatter: &dyn crate::output::OutputFormatter,
    ) -> Result<()> {
        let abs_path = if PathBuf::from(path_str).is_absolute() {
            PathBuf::from(path_str)
        } else {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(path_str)
        };
        let abs_path = LocalAbsPath::new(abs_path).context("Invalid path")?;

        let rel = match to_relative(&abs_path, sync_root) {
            Some(rel) => rel,
            None => {
                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&serde_json::json!({
                        "path": abs_path.to_string(),
                        "tracked": false,
                        "reason": "outside sync root",
                    }));
                } else {
                    formatter.info(&format!("'{}' is outside the sync root.", abs_path));
                }
                return Ok(());
            }
        };

        let root_key = sync_root.to_string();
        let entry = index
            .get(&root_key, &rel)
            .await
            .context("Failed to query index entry")?;

        match entry {
            Some(entry) => {
                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&serde_json::json!({
                        "path": rel.as_str(),
                        "tracked": true,
                        "status": entry.status.name(),
                        "size": entry.size,
                        "retries": entry.retries,
                        "mtime": format_timestamp(entry.mtime_sec),
                        "updated_at": format_timestamp(entry.updated_at_sec),
                    }));
                } else {
                    formatter.success(&format!("File status: {}", rel.as_str()));
                    formatter.info("");
                    formatter.info(&format!("Status:     {}", entry.status));
                    formatter.info(&format!("Size:       {} bytes", entry.size));
                    formatter.info(&format!("Retries:    {}", entry.retries));
                    formatter.info(&format!("Modified:   {}", format_timestamp(entry.mtime_sec)));
                    formatter.info(&format!("Updated at: {}", format_timestamp(entry.updated_at_sec)));
                }
            }
            None => {
                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&serde_json::json!({
                        "path": rel.as_str(),
                        "tracked": false,
                    }));
                } else {
                    formatter.info(&format!("'{}' is not tracked by the sync index.", rel.as_str()));
                }
            }
        }

        Ok(())
    }
}

fn format_timestamp(epoch_sec: i64) -> String {
    Utc.timestamp_opt(epoch_sec, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "(invalid timestamp)".to_string())
}
