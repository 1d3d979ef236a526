//! dmirror-cache - Durable sync index persistence
//!
//! SQLite-based storage for the per-file sync index: status,
//! mtime/size, and retry counters keyed by `(sync_root, relative_path)`.

mod errors;
mod pool;
mod sync_index;

pub use errors::CacheError;
pub use pool::DatabasePool;
pub use sync_index::SqliteSyncIndex;
