use std::collections::HashMap;

use crate::{backoff::BackoffConfig, toggle::Platform, Client, Result};

/// Configuration for [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) platform: Platform,
    pub(crate) defaults: HashMap<String, bool>,
    pub(crate) listen: bool,
    pub(crate) backoff: BackoffConfig,
}

impl ClientConfig {
    /// Create a default FeatureGuards configuration using the specified API key.
    ///
    /// ```
    /// # use featureguards::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            platform: Platform::default(),
            defaults: HashMap::new(),
            listen: true,
            backoff: BackoffConfig::default(),
        }
    }

    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.featureguards.com";

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(&mut self, base_url: impl Into<String>) -> &mut Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the platform toggles are served for.
    pub fn platform(&mut self, platform: Platform) -> &mut Self {
        self.platform = platform;
        self
    }

    /// Set the values [`Client::is_on`] returns for toggles that are missing or fail to evaluate.
    /// Toggles not listed default to `false`.
    ///
    /// ```
    /// # use featureguards::ClientConfig;
    /// let config = ClientConfig::from_api_key("api-key")
    ///     .defaults([("NEW_CHECKOUT", true)])
    ///     .clone();
    /// ```
    pub fn defaults<K: Into<String>>(
        &mut self,
        defaults: impl IntoIterator<Item = (K, bool)>,
    ) -> &mut Self {
        self.defaults = defaults
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .collect();
        self
    }

    /// Whether to keep listening for updates after the initial fetch. Enabled by default.
    pub fn listen(&mut self, listen: bool) -> &mut Self {
        self.listen = listen;
        self
    }

    /// Override backoff between failed attempts to reach the authority.
    pub fn backoff(&mut self, backoff: BackoffConfig) -> &mut Self {
        self.backoff = backoff;
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use featureguards::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_api_key("api-key").to_client().unwrap();
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`](crate::Error::InvalidBaseUrl) if the base URL is invalid.
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ClientConfig;
    use crate::{backoff::BackoffConfig, toggle::Platform, Error};

    #[test]
    fn builder_sets_fields() {
        let mut config = ClientConfig::from_api_key("key");
        config
            .base_url("http://localhost:8080")
            .platform(Platform::Web)
            .defaults([("FOO", true)])
            .listen(false)
            .backoff(BackoffConfig::default().max(Duration::from_secs(1)));

        assert_eq!(config.api_key, "key");
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.platform, Platform::Web);
        assert_eq!(config.defaults.get("FOO"), Some(&true));
        assert!(!config.listen);
        assert_eq!(config.backoff.max, Duration::from_secs(1));
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::from_api_key("key");
        assert_eq!(config.base_url, ClientConfig::DEFAULT_BASE_URL);
        assert_eq!(config.platform, Platform::Default);
        assert!(config.listen);
        assert_eq!(config.backoff, BackoffConfig::default());
    }

    #[test]
    fn invalid_base_url() {
        let mut config = ClientConfig::from_api_key("key");
        config.base_url("::not a url::");
        assert!(matches!(config.to_client(), Err(Error::InvalidBaseUrl(_))));
    }
}
