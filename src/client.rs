use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    http_transport::HttpTransport,
    sync_thread::{SyncThread, SyncThreadConfig},
    toggle::Toggle,
    toggle_store::ToggleStore,
    transport::{AuthTokens, Transport},
    Attributes, ClientConfig, Error, Result,
};

/// A client for FeatureGuards.
///
/// The client keeps a local copy of feature toggles that a background thread keeps in sync with
/// the FeatureGuards authority, so checking a toggle never makes a network request.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```
/// # use featureguards::{Client, ClientConfig};
/// let client = Client::new(ClientConfig::from_api_key("api-key")).unwrap();
/// assert!(!client.is_on("NEW_CHECKOUT", None));
/// ```
pub struct Client {
    store: Arc<ToggleStore>,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    sync_thread: Mutex<Option<SyncThread>>,
}

impl Client {
    /// Create a new `Client` talking to the authority over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] if the configured base URL is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.base_url, config.api_key.clone(), config.platform)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a new `Client` using a custom [`Transport`].
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Client {
            store: Arc::new(ToggleStore::new()),
            transport,
            config,
            sync_thread: Mutex::new(None),
        }
    }

    /// Start synchronizing toggles and block until the first attempt to fetch them has finished.
    ///
    /// On failure the error is returned while the background thread keeps retrying with backoff.
    /// Calling `start` on a started client waits for the running thread instead of starting
    /// another one.
    ///
    /// # Errors
    ///
    /// - IO error if the sync thread failed to spawn.
    /// - Any error of the first authentication or fetch attempt.
    pub fn start(&self) -> Result<()> {
        let start_result = {
            let mut slot = self
                .sync_thread
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match &*slot {
                Some(thread) => thread.start_result(),
                None => {
                    log::debug!(target: "featureguards", "starting sync thread");
                    let thread = SyncThread::start(SyncThreadConfig {
                        store: Arc::clone(&self.store),
                        transport: Arc::clone(&self.transport),
                        backoff: self.config.backoff,
                        listen: self.config.listen,
                    })?;
                    let start_result = thread.start_result();
                    *slot = Some(thread);
                    start_result
                }
            }
        };

        // Waiting happens without the lock so `stop` and `is_listening` stay responsive.
        start_result.wait()
    }

    /// Check whether the toggle `name` is on for the given attributes.
    ///
    /// Never fails: if the toggle is missing or cannot be evaluated, the error is logged and the
    /// configured default for `name` is returned (`false` when there is none). Use
    /// [`Client::try_is_on`] to get the error instead.
    pub fn is_on(&self, name: &str, attributes: Option<&Attributes>) -> bool {
        match self.try_is_on(name, attributes) {
            Ok(on) => on,
            Err(err) => {
                let default = self.config.defaults.get(name).copied().unwrap_or(false);
                log::warn!(target: "featureguards",
                    toggle = name,
                    attributes:serde = attributes,
                    default;
                    "error occurred while evaluating a feature toggle: {err}");
                default
            }
        }
    }

    /// Check whether the toggle `name` is on for the given attributes.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the toggle is not in the local copy.
    /// - [`Error::Validation`] if the toggle definition or the attributes are malformed.
    pub fn try_is_on(&self, name: &str, attributes: Option<&Attributes>) -> Result<bool> {
        let Some(toggle) = self.store.get(name) else {
            return Err(Error::NotFound {
                toggle: name.to_owned(),
            });
        };

        let on = toggle.eval(attributes)?;
        log::trace!(target: "featureguards",
            toggle = name,
            attributes:serde = attributes,
            on;
            "evaluated a feature toggle");
        Ok(on)
    }

    /// Return the local copy of the toggle `name`.
    pub fn toggle(&self, name: &str) -> Option<Arc<Toggle>> {
        self.store.get(name)
    }

    /// Highest toggle version received from the authority.
    pub fn client_version(&self) -> i64 {
        self.store.version()
    }

    /// Return `true` while the sync thread has an update stream open.
    pub fn is_listening(&self) -> bool {
        self.sync_thread
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(SyncThread::is_listening))
            .unwrap_or(false)
    }

    /// Authenticate with the configured API key and return the tokens, e.g. to hand them to a web
    /// frontend.
    pub async fn authenticate_for_web(&self) -> Result<AuthTokens> {
        self.transport.authenticate().await
    }

    /// Stop the sync thread. The local copy of toggles stays available.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        if let Ok(slot) = self.sync_thread.lock() {
            if let Some(thread) = &*slot {
                thread.stop();
            }
        }
    }

    /// Stop the sync thread and block waiting for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SyncThreadPanicked`] if the thread panicked.
    pub fn shutdown(self) -> Result<()> {
        let thread = self
            .sync_thread
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        match thread {
            Some(thread) => thread.shutdown(),
            None => Ok(()),
        }
    }
}
