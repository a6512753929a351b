//! Boundary between the SDK and the FeatureGuards authority.
use std::time::SystemTime;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{toggle::Toggle, Result};

/// Tokens issued by the authority.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    /// Short-lived JWT sent with every fetch and listen call. Its `exp` claim bounds a listen
    /// stream.
    pub access_token: String,
    /// Exchanged for a new pair of tokens once the access token expires.
    #[serde(default)]
    pub refresh_token: String,
}

/// A batch of toggle definitions at a given version.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TogglesPayload {
    /// Toggles changed since the requested version. Toggles with `deleted_at` set are removals.
    #[serde(default)]
    pub feature_toggles: Vec<Toggle>,
    /// Version of the payload. Sent back on subsequent fetch and listen calls.
    #[serde(default)]
    pub version: i64,
}

/// Stream of payloads pushed by the authority. Ends when the server closes the connection.
pub type ToggleStream = BoxStream<'static, Result<TogglesPayload>>;

/// Transport to the FeatureGuards authority.
///
/// [`HttpTransport`](crate::HttpTransport) is used by default. Implement this trait to route
/// requests differently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Exchange the API key for a fresh pair of tokens.
    async fn authenticate(&self) -> Result<AuthTokens>;

    /// Exchange a refresh token for a fresh pair of tokens.
    ///
    /// Must fail with [`Error::PermissionDenied`](crate::Error::PermissionDenied) when the refresh
    /// token is no longer valid, so that the caller falls back to [`Transport::authenticate`].
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens>;

    /// Fetch all toggles changed since `version`.
    async fn fetch(&self, version: i64, access_token: &str) -> Result<TogglesPayload>;

    /// Open an update stream starting after `version`. The stream must not outlive `deadline`.
    async fn listen(
        &self,
        version: i64,
        access_token: &str,
        deadline: SystemTime,
    ) -> Result<ToggleStream>;

    /// Release resources held by the transport. Called once the sync thread stops.
    async fn close(&self) {}
}

/// Refresh `tokens`, falling back to full authentication when there is no refresh token or the
/// authority rejects it.
pub(crate) async fn refresh_and_auth(
    transport: &dyn Transport,
    tokens: Option<&AuthTokens>,
) -> Result<AuthTokens> {
    let Some(tokens) = tokens.filter(|tokens| !tokens.refresh_token.is_empty()) else {
        return transport.authenticate().await;
    };

    match transport.refresh(&tokens.refresh_token).await {
        Err(err) if err.is_permission_denied() => {
            log::debug!(target: "featureguards", "refresh token rejected, re-authenticating");
            transport.authenticate().await
        }
        result => result,
    }
}
