//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ICloudAdapter`] - Cloud storage REST operations
//! - [`ISyncIndex`] - Persistent sync index storage
//! - [`ILocalFileSystem`] - Local filesystem operations and file watching
//! - [`EventSink`] - Delivery of sync events to the foreground
//! - [`TokenProvider`] - Read access to externally-managed bearer tokens
//! - [`SelectionStore`] / [`SettingsStore`] - Externally-owned JSON mirrors

pub mod cloud_adapter;
pub mod event_sink;
pub mod local_filesystem;
pub mod selection_store;
pub mod settings_store;
pub mod sync_index;
pub mod token_provider;

pub use cloud_adapter::{ApiError, CreateOutcome, ICloudAdapter};
pub use event_sink::{EventSink, SyncEvent, SyncStatus};
pub use local_filesystem::{DirEntry, FileSystemState, ILocalFileSystem, WatchHandle};
pub use selection_store::SelectionStore;
pub use settings_store::SettingsStore;
pub use sync_index::ISyncIndex;
pub use token_provider::TokenProvider;
