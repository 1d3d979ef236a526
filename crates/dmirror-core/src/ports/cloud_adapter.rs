//! Cloud resource adapter port.
//!
//! Stateless operations against the remote REST object store. Implementations
//! hold (or are handed) a bearer token and translate HTTP status codes into
//! [`ApiError`] variants; the reconciler never sees raw HTTP.

use thiserror::Error;

use crate::domain::{CloudPath, Node, Quota};

/// Outcome of [`ICloudAdapter::create_folder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The folder did not exist and was created by this call (HTTP 2xx).
    Created,
    /// The folder already existed (HTTP 409); not an error.
    AlreadyExists,
}

/// Errors surfaced by the cloud adapter. Every variant carries the observed
/// HTTP status (0 for transport-level failures) and a message.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// HTTP 401. Triggers the token-refresh path in the sync service.
    #[error("unauthorized (HTTP {status}): {message}")]
    Unauthorized {
        /// Observed HTTP status.
        status: u16,
        /// Message from the response or client.
        message: String,
    },
    /// HTTP 404.
    #[error("not found (HTTP {status}): {message}")]
    NotFound {
        /// Observed HTTP status.
        status: u16,
        /// Message from the response or client.
        message: String,
    },
    /// HTTP 409 from `create_folder`.
    #[error("conflict (HTTP {status}): {message}")]
    Conflict {
        /// Observed HTTP status.
        status: u16,
        /// Message from the response or client.
        message: String,
    },
    /// Network / timeout / DNS failure. Status is always 0.
    #[error("transport error: {message}")]
    Transport {
        /// Message from the client (e.g. the underlying `reqwest` error).
        message: String,
    },
    /// HTTP 5xx.
    #[error("server error (HTTP {status}): {message}")]
    Server {
        /// Observed HTTP status.
        status: u16,
        /// Message from the response or client.
        message: String,
    },
    /// Malformed JSON, or a JSON descriptor missing its `href`.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the malformed response.
        message: String,
    },
}

impl ApiError {
    /// The observed HTTP status, or 0 for transport/protocol failures that
    /// never reached a status line.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Unauthorized { status, .. }
            | ApiError::NotFound { status, .. }
            | ApiError::Conflict { status, .. }
            | ApiError::Server { status, .. } => *status,
            ApiError::Transport { .. } | ApiError::Protocol { .. } => 0,
        }
    }

    /// `true` for errors the reconciler treats as transient:
    /// `Transport` and `Server`.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transport { .. } | ApiError::Server { .. })
    }
}

/// Port trait for the remote REST object store.
///
/// Implementations perform exactly one HTTP attempt per call; retry policy
/// lives in the reconciler, which consults the sync index's `retries`
/// column rather than looping here.
#[async_trait::async_trait]
pub trait ICloudAdapter: Send + Sync {
    /// Lists the immediate children of `path` (`limit=1000`; the caller
    /// treats the result as complete, see DESIGN.md open question 1).
    async fn list_children(&self, path: &CloudPath) -> Result<Vec<Node>, ApiError>;

    /// Creates a folder at `path`. A 409 response is reported as
    /// `AlreadyExists`, not as an error.
    async fn create_folder(&self, path: &CloudPath) -> Result<CreateOutcome, ApiError>;

    /// Downloads the bytes at `path` via the two-step descriptor-then-href
    /// protocol.
    async fn download(&self, path: &CloudPath) -> Result<Vec<u8>, ApiError>;

    /// Uploads `bytes` to `path`, overwriting any existing file, via the
    /// two-step descriptor-then-href protocol.
    async fn upload(&self, path: &CloudPath, bytes: Vec<u8>) -> Result<(), ApiError>;

    /// Deletes the resource at `path`. HTTP 2xx and 202 both count as
    /// success.
    async fn delete(&self, path: &CloudPath) -> Result<(), ApiError>;

    /// Reads account storage quota.
    async fn quota(&self) -> Result<Quota, ApiError>;
}
