//! Token provider port.
//!
//! The OAuth interactive login flow is out of scope; the engine only reads
//! and, on request, refreshes whatever token material that (external) flow
//! already produced. The engine never refreshes tokens on its own
//! initiative — only in response to a caller-driven `refresh()` after a
//! `TokenExpired` event.

/// Port trait for obtaining a bearer token for the cloud adapter.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the current access token, without attempting a refresh.
    async fn access_token(&self) -> anyhow::Result<String>;

    /// Forces a refresh and returns the new access token.
    async fn refresh(&self) -> anyhow::Result<String>;
}
