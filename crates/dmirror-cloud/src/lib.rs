//! dmirror-cloud - Cloud REST resource adapter
//!
//! Implements the stateless cloud operations consumed by the reconciler:
//! list children, create folder, download, upload, delete, quota.
//!
//! ## Modules
//!
//! - [`client`] - thin HTTP client (base URL, bearer-style auth header)
//! - [`adapter`] - `RestCloudAdapter`, the `ICloudAdapter` implementation

pub mod adapter;
pub mod client;

pub use adapter::RestCloudAdapter;
pub use client::DiskApiClient;
