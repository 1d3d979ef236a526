//! dmirror sync - reconciler, sync service, and scheduler
//!
//! Provides:
//! - The reconciler
//! - The sync service, a single-worker gate over reconciler passes
//! - The file watcher and trigger scheduler
//! - The local filesystem adapter implementing `ILocalFileSystem`

pub mod filesystem;
pub mod reconciler;
pub mod scheduler;
pub mod service;
pub mod watcher;

pub use filesystem::LocalFileSystemAdapter;
pub use reconciler::{PassResult, ReconcileError, Reconciler};
pub use scheduler::SyncScheduler;
pub use service::SyncService;
pub use watcher::{ChangeEvent, DebouncedChangeQueue, FileWatcher};
