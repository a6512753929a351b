use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{header::ACCEPT, Response, StatusCode, Url};
use serde::Serialize;

use crate::{
    toggle::Platform,
    transport::{AuthTokens, ToggleStream, TogglesPayload, Transport},
    Error, Result,
};

const AUTHENTICATE_ENDPOINT: &str = "/v1/auth/authenticate";
const REFRESH_ENDPOINT: &str = "/v1/auth/refresh";
const FETCH_ENDPOINT: &str = "/v1/toggles/fetch";
const LISTEN_ENDPOINT: &str = "/v1/toggles/listen";

const API_KEY_HEADER: &str = "x-api-key";
const VERSION_HEADER: &str = "x-version";
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

const AUTHENTICATE_TIMEOUT: Duration = Duration::from_secs(5);
const REFRESH_TIMEOUT: Duration = Duration::from_secs(1);
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// [`Transport`] talking JSON over HTTP to the FeatureGuards authority. Updates are received as
/// server-sent events, one [`TogglesPayload`] per event.
pub struct HttpTransport {
    client: reqwest::Client,
    api_key: String,
    platform: Platform,
    authenticate_url: Url,
    refresh_url: Url,
    fetch_url: Url,
    listen_url: Url,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchRequest {
    version: i64,
    platform: Platform,
}

impl HttpTransport {
    /// Create a transport for the authority at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] if `base_url` does not form valid endpoint URLs.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        platform: Platform,
    ) -> Result<HttpTransport> {
        let base_url = base_url.trim_end_matches('/');
        let endpoint = |path: &str| Url::parse(&format!("{base_url}{path}")).map_err(Error::InvalidBaseUrl);

        Ok(HttpTransport {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            platform,
            authenticate_url: endpoint(AUTHENTICATE_ENDPOINT)?,
            refresh_url: endpoint(REFRESH_ENDPOINT)?,
            fetch_url: endpoint(FETCH_ENDPOINT)?,
            listen_url: endpoint(LISTEN_ENDPOINT)?,
        })
    }

    fn listen_url(&self, version: i64) -> Url {
        let mut url = self.listen_url.clone();
        url.query_pairs_mut()
            .append_pair("version", &version.to_string())
            .append_pair("platform", platform_name(self.platform));
        url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn authenticate(&self) -> Result<AuthTokens> {
        log::debug!(target: "featureguards", "authenticating");
        let response = self
            .client
            .post(self.authenticate_url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .header(VERSION_HEADER, SDK_VERSION)
            .timeout(AUTHENTICATE_TIMEOUT)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens> {
        log::debug!(target: "featureguards", "refreshing access token");
        let response = self
            .client
            .post(self.refresh_url.clone())
            .header(VERSION_HEADER, SDK_VERSION)
            .json(&RefreshRequest { refresh_token })
            .timeout(REFRESH_TIMEOUT)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn fetch(&self, version: i64, access_token: &str) -> Result<TogglesPayload> {
        log::debug!(target: "featureguards", version; "fetching feature toggles");
        let response = self
            .client
            .post(self.fetch_url.clone())
            .header(VERSION_HEADER, SDK_VERSION)
            .bearer_auth(access_token)
            .json(&FetchRequest {
                version,
                platform: self.platform,
            })
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn listen(
        &self,
        version: i64,
        access_token: &str,
        deadline: SystemTime,
    ) -> Result<ToggleStream> {
        let timeout = deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        if timeout.is_zero() {
            return Err(Error::PermissionDenied("access token expired".to_owned()));
        }

        log::debug!(target: "featureguards", version, timeout_secs = timeout.as_secs(); "opening update stream");
        let response = self
            .client
            .get(self.listen_url(version))
            .header(VERSION_HEADER, SDK_VERSION)
            .header(ACCEPT, "text/event-stream")
            .bearer_auth(access_token)
            .timeout(timeout)
            .send()
            .await?;
        let response = check_status(response).await?;

        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    // Keep-alive events carry no data.
                    Ok(event) if event.data.trim().is_empty() => None,
                    Ok(event) => Some(
                        serde_json::from_str::<TogglesPayload>(&event.data)
                            .map_err(|err| Error::Stream(format!("invalid payload: {err}"))),
                    ),
                    Err(err) => Some(Err(Error::Stream(err.to_string()))),
                }
            });
        Ok(stream.boxed())
    }
}

/// Map non-2xx responses to errors. 401 and 403 mean the token must be refreshed.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::PermissionDenied(message)),
        _ => Err(Error::Server {
            status: status.as_u16(),
            message,
        }),
    }
}

fn platform_name(platform: Platform) -> &'static str {
    match platform {
        Platform::Default => "DEFAULT",
        Platform::Web => "WEB",
        Platform::Ios => "IOS",
        Platform::Android => "ANDROID",
    }
}
