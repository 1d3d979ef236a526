//! Cloud REST API client
//!
//! Thin HTTP client for the cloud resource API: base URL and bearer-token
//! header construction. Endpoint-specific logic lives in [`crate::adapter`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dmirror_cloud::client::DiskApiClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = DiskApiClient::new("https://cloud-api.example.com/v1/disk", "access-token-here");
//! # Ok(())
//! # }
//! ```

use reqwest::{Client, Method, RequestBuilder};
use tracing::debug;

/// HTTP client for the cloud resource API.
///
/// Wraps `reqwest::Client` with authentication headers and base URL
/// construction. The wire contract uses an `Authorization: OAuth <token>`
/// header rather than the standard `Bearer` scheme.
pub struct DiskApiClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl DiskApiClient {
    /// Creates a new client with the given base URL and access token.
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            access_token: access_token.into(),
        }
    }

    /// Updates the access token (e.g. after a caller-driven refresh).
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
        debug!("updated cloud adapter access token");
    }

    /// Returns the current access token.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the base URL in effect for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request builder for the given method and
    /// path, relative to the configured base URL.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .header("Authorization", format!("OAuth {}", self.access_token))
    }

    /// Issues a request against an absolute URL (for `href` descriptors
    /// returned by the two-step download/upload protocol), still carrying
    /// the bearer header.
    pub fn request_absolute(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("OAuth {}", self.access_token))
    }

    /// Returns a reference to the underlying `reqwest` client.
    pub fn http_client(&self) -> &Client {
        &self.client
    }
}
