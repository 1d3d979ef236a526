//! Core domain types for dmirror:
//! - The path normalizer (`CloudPath`, `LocalAbsPath`, `LocalRelPath`)
//! - Cloud listing types (`Node`, `Quota`)
//! - The sync index record and its status state machine (`IndexEntry`, `IndexStatus`)
//! - The selection set (`Selection`)
//! - Domain-specific error types

pub mod errors;
pub mod index_entry;
pub mod node;
pub mod paths;
pub mod selection;

pub use errors::DomainError;
pub use index_entry::{IndexEntry, IndexState, IndexStatus};
pub use node::{parse_cloud_modified, Node, Quota};
pub use paths::{
    is_valid_cloud, join_cloud, normalize_cloud, normalize_root, to_relative, CloudPath,
    LocalAbsPath, LocalRelPath,
};
pub use selection::Selection;
