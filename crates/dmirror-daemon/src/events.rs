//! Tracing-backed event sink.

use dmirror_core::ports::{EventSink, SyncEvent};
use tracing::{error, info, warn};

/// Logs every [`SyncEvent`] through `tracing`; this is the daemon's only
/// consumer of the sink when no UI client is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl TracingEventSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: SyncEvent) {
        match event {
            SyncEvent::StatusChanged(status) => info!(%status, "sync status changed"),
            SyncEvent::TokenExpired => warn!("access token expired"),
            SyncEvent::SyncError(msg) => error!(error = %msg, "sync pass aborted"),
            SyncEvent::SyncProgressMessage(msg) => info!("{msg}"),
            SyncEvent::SyncThroughput(bytes_per_sec) => {
                info!(bytes_per_sec, "sync throughput");
            }
            SyncEvent::IndexStateLoaded(state) => {
                info!(total_entries = state.total_entries, "index state loaded");
            }
            SyncEvent::PathsCreatedInCloud(paths) => {
                info!(count = paths.len(), "top-level cloud folders auto-created");
            }
        }
    }
}
