//! Sync index entry and its status state
//! machine.
//!
//! ```text
//! (absent) ─upsert_new──▶ NEW ──upload──▶ UPLOADING ──┬─success──▶ SYNCED
//!                                                      └─give up──▶ FAILED
//!
//! (absent) ─mark for pull──▶ DOWNLOADING ──┬─success──▶ SYNCED
//!                                           └─give up──▶ FAILED
//!
//! SYNCED ──local file changes (watcher)──▶ NEW
//! FAILED ──local file changes──▶ NEW   (terminal otherwise)
//! ```

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Status of one `(sync_root, relative_path)` index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStatus {
    /// Discovered locally, not yet uploaded.
    New,
    /// Local file and cloud file agree; no pending operation.
    Synced,
    /// A push is currently transferring (or was interrupted and will resume).
    Uploading,
    /// A pull is currently transferring (or was interrupted and will resume).
    Downloading,
    /// Terminal until the local file changes (→ `New`) or the row is removed.
    Failed,
}

impl IndexStatus {
    /// Short uppercase name, matching the storage encoding used by the
    /// index (`NEW`, `SYNCED`, `UPLOADING`, `DOWNLOADING`, `FAILED`).
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            IndexStatus::New => "NEW",
            IndexStatus::Synced => "SYNCED",
            IndexStatus::Uploading => "UPLOADING",
            IndexStatus::Downloading => "DOWNLOADING",
            IndexStatus::Failed => "FAILED",
        }
    }

    /// Parses the storage encoding back into a status.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(IndexStatus::New),
            "SYNCED" => Some(IndexStatus::Synced),
            "UPLOADING" => Some(IndexStatus::Uploading),
            "DOWNLOADING" => Some(IndexStatus::Downloading),
            "FAILED" => Some(IndexStatus::Failed),
            _ => None,
        }
    }

    /// `true` for entries currently targeted by the running pass, or
    /// interrupted mid-transfer during one.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, IndexStatus::Uploading | IndexStatus::Downloading)
    }

    /// Whether moving from `self` to `target` is a legal edge in the
    /// diagram above. A status is always allowed to transition to itself
    /// (a retry that doesn't change which operation is in flight).
    /// `Failed` may move to anything, mirroring how any local file change
    /// restarts a failed entry from scratch.
    #[must_use]
    pub fn can_transition_to(&self, target: IndexStatus) -> bool {
        if *self == target {
            return true;
        }
        match self {
            IndexStatus::New => matches!(
                target,
                IndexStatus::Uploading | IndexStatus::Downloading | IndexStatus::Synced
            ),
            IndexStatus::Synced => matches!(
                target,
                IndexStatus::New | IndexStatus::Uploading | IndexStatus::Downloading
            ),
            IndexStatus::Uploading => matches!(target, IndexStatus::Synced | IndexStatus::Failed),
            IndexStatus::Downloading => {
                matches!(target, IndexStatus::Synced | IndexStatus::Failed)
            }
            IndexStatus::Failed => true,
        }
    }

    /// Validates a transition, returning `InvalidStatusTransition` when
    /// `target` is not reachable from `self`.
    pub fn validate_transition(&self, target: IndexStatus) -> Result<(), DomainError> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(DomainError::InvalidStatusTransition {
                from: self.name().to_string(),
                to: target.name().to_string(),
            })
        }
    }
}

impl Display for IndexStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The durable per-file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Seconds since epoch of the local file's mtime as observed when
    /// written.
    pub mtime_sec: i64,
    /// Byte length.
    pub size: u64,
    /// Current status.
    pub status: IndexStatus,
    /// Non-negative counter of consecutive failed attempts for the current
    /// operation.
    pub retries: u32,
    /// Wall-clock at last update, seconds since epoch.
    pub updated_at_sec: i64,
}

impl IndexEntry {
    /// Builds a fresh entry with the given status and zero retries, stamped
    /// with `now`.
    #[must_use]
    pub fn new(mtime_sec: i64, size: u64, status: IndexStatus, now: i64) -> Self {
        Self {
            mtime_sec,
            size,
            status,
            retries: 0,
            updated_at_sec: now,
        }
    }

    /// `true` unless the entry claims to be synced while still carrying a
    /// nonzero retry count (`status == SYNCED ⇒ retries == 0`).
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !matches!(self.status, IndexStatus::Synced) || self.retries == 0
    }
}

/// Read-only summary of the index, for UI / `load_index_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexState {
    /// Total number of rows in the index.
    pub total_entries: u64,
    /// Row counts per `sync_root`, keyed by root path string.
    pub per_root_counts: std::collections::BTreeMap<String, u64>,
}
