//! Event sink port (driven/secondary port).
//!
//! The worker thread emits [`SyncEvent`] values; implementations hand them
//! off to whatever runs on the foreground thread (UI, logger, test probe).
//! Delivery crosses the worker/foreground boundary via a thread-safe queue;
//! subscribers must assume events arrive on the foreground thread.

use serde::{Deserialize, Serialize};

use crate::domain::{CloudPath, IndexState};

/// `status ∈ {Idle, Syncing, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// No pass in flight.
    Idle,
    /// A pull or push pass is running.
    Syncing,
    /// The last pass aborted fatally.
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Events emitted by the sync service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    /// The service's status changed.
    StatusChanged(SyncStatus),
    /// An adapter call returned `Unauthorized` on the initial probe.
    TokenExpired,
    /// A fatal error aborted the current pass.
    SyncError(String),
    /// A human-readable progress line, one per folder or file.
    SyncProgressMessage(String),
    /// Bytes-per-second throughput signal, emitted after each file transfer.
    SyncThroughput(u64),
    /// The index summary requested via `load_index_state`.
    IndexStateLoaded(IndexState),
    /// Top-level cloud folders auto-created during a push; the
    /// caller is expected to union these into the selection and retrigger
    /// a pull/push cycle.
    PathsCreatedInCloud(Vec<CloudPath>),
}

/// Port trait for delivering [`SyncEvent`]s to the foreground.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one event. Implementations must not block significantly;
    /// the worker thread is the caller.
    async fn emit(&self, event: SyncEvent);
}
