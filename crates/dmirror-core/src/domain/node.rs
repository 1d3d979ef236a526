//! Cloud listing types: `Node` and `Quota`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::paths::CloudPath;

/// One entry returned by a cloud `list_children` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// A directory.
    Dir {
        /// Full cloud path of the directory.
        path: CloudPath,
        /// Directory name (last path segment).
        name: String,
    },
    /// A file.
    File {
        /// Full cloud path of the file.
        path: CloudPath,
        /// File name (last path segment).
        name: String,
        /// Size in bytes.
        size: u64,
        /// Last-modified timestamp, ISO-8601, `Z` assumed when absent.
        modified: DateTime<Utc>,
    },
}

impl Node {
    /// The node's cloud path, regardless of variant.
    #[must_use]
    pub fn path(&self) -> &CloudPath {
        match self {
            Node::Dir { path, .. } | Node::File { path, .. } => path,
        }
    }

    /// The node's name, regardless of variant.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Node::Dir { name, .. } | Node::File { name, .. } => name,
        }
    }

    /// `true` for the `Dir` variant.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir { .. })
    }
}

/// Parses a cloud-reported modification timestamp, appending `Z` (UTC) when
/// the input carries no explicit zone.
///
/// # Errors
/// Returns a message describing the parse failure.
pub fn parse_cloud_modified(raw: &str) -> Result<DateTime<Utc>, String> {
    let with_zone = if raw.ends_with('Z') || raw.contains('+') {
        raw.to_string()
    } else {
        format!("{raw}Z")
    };
    DateTime::parse_from_rfc3339(&with_zone)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid cloud timestamp {raw:?}: {e}"))
}

/// Storage quota: used/total bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Bytes used.
    pub used: u64,
    /// Total bytes available (0 if unknown).
    pub total: u64,
}

impl Quota {
    /// `free = max(0, total - used)` when `total > 0`, else zero.
    #[must_use]
    pub fn free(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.total.saturating_sub(self.used)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_free_saturates_and_zeroes_with_no_total() {
        let q = Quota { used: 10, total: 0 };
        assert_eq!(q.free(), 0);

        let q = Quota {
            used: 100,
            total: 50,
        };
        assert_eq!(q.free(), 0);

        let q = Quota {
            used: 30,
            total: 100,
        };
        assert_eq!(q.free(), 70);
    }

    #[test]
    fn parse_cloud_modified_assumes_utc_when_zone_absent() {
        let a = parse_cloud_modified("2024-01-01T00:00:00").unwrap();
        let b = parse_cloud_modified("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn node_accessors() {
        let path = CloudPath::normalize("/Photos/a.jpg").unwrap();
        let node = Node::File {
            path: path.clone(),
            name: "a.jpg".to_string(),
            size: 10,
            modified: Utc::now(),
        };
        assert_eq!(node.path(), &path);
        assert_eq!(node.name(), "a.jpg");
        assert!(!node.is_dir());
    }
}
