//! A background thread that authenticates, fetches the initial toggles and then keeps the toggle
//! store fresh by listening to the authority's update stream.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, PoisonError,
    },
    time::{Duration, SystemTime},
};

use futures::StreamExt;
use tokio::sync::watch;

use crate::{
    backoff::BackoffConfig,
    token,
    toggle_store::ToggleStore,
    transport::{refresh_and_auth, AuthTokens, TogglesPayload, Transport},
    Error, Result,
};

pub(crate) struct SyncThreadConfig {
    pub store: Arc<ToggleStore>,
    pub transport: Arc<dyn Transport>,
    pub backoff: BackoffConfig,
    pub listen: bool,
}

/// A toggle synchronization thread.
///
/// Use [`Client::start`](crate::Client::start) to get one running.
pub struct SyncThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Flipped to `true` to ask the thread to stop. Dropping the sender stops the thread as well.
    stop_sender: watch::Sender<bool>,

    result: Arc<StartResult>,

    listening: Arc<AtomicBool>,
    store: Arc<ToggleStore>,
}

impl SyncThread {
    pub(crate) fn start(config: SyncThreadConfig) -> std::io::Result<SyncThread> {
        let (stop_sender, stop_receiver) = watch::channel(false);
        let result = Arc::new(StartResult::default());
        let listening = Arc::new(AtomicBool::new(false));
        let store = Arc::clone(&config.store);

        let join_handle = {
            // Cloning Arc for move into thread
            let result = Arc::clone(&result);
            let update_result = move |value: Result<()>| result.set(value);

            let worker = Worker {
                store: config.store,
                transport: config.transport,
                backoff: config.backoff,
                listen: config.listen,
                listening: Arc::clone(&listening),
                stop: stop_receiver,
                tokens: None,
            };

            std::thread::Builder::new()
                .name("featureguards-sync".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        let runtime = match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(runtime) => runtime,
                            Err(err) => {
                                update_result(Err(Error::from(err)));
                                return;
                            }
                        };
                        runtime.block_on(worker.run(&update_result));
                    }));

                    if result.is_err() {
                        log::error!(target: "featureguards", "sync thread panicked");
                        update_result(Err(Error::SyncThreadPanicked));
                    }
                })?
        };

        Ok(SyncThread {
            join_handle,
            stop_sender,
            result,
            listening,
            store,
        })
    }

    /// Block until the first attempt to authenticate and fetch toggles has finished.
    ///
    /// Returns the outcome of that attempt. The thread keeps retrying in the background after a
    /// failure.
    pub fn wait_for_configuration(&self) -> Result<()> {
        self.result.wait()
    }

    /// Handle to wait on the first start attempt without borrowing the thread.
    pub(crate) fn start_result(&self) -> Arc<StartResult> {
        Arc::clone(&self.result)
    }

    /// Return `true` while an update stream is open.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Highest toggle version applied so far.
    pub fn client_version(&self) -> i64 {
        self.store.version()
    }

    /// Stop the sync thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        self.stop_sender.send_replace(true);
    }

    /// Stop the sync thread and block waiting for it to exit.
    ///
    /// If you don't need to wait for the thread to exit, use [`SyncThread::stop`] instead.
    pub fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .join()
            .map_err(|_| Error::SyncThreadPanicked)?;
        Ok(())
    }
}

/// Outcome of the first start attempt, shared between the sync thread and whoever waits for it.
#[derive(Default)]
pub(crate) struct StartResult {
    /// Holds `None` until the first start attempt finishes.
    slot: Mutex<Option<Result<()>>>,
    condvar: Condvar,
}

impl StartResult {
    fn set(&self, value: Result<()>) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the first attempt is reported.
        if slot.is_none() {
            *slot = Some(value);
            self.condvar.notify_all();
        }
    }

    /// Block until the first start attempt has finished and return its outcome.
    pub(crate) fn wait(&self) -> Result<()> {
        let mut slot = self.slot.lock().map_err(|_| Error::SyncThreadPanicked)?;
        loop {
            match &*slot {
                Some(result) => return result.clone(),
                None => {
                    slot = self
                        .condvar
                        .wait(slot)
                        .map_err(|_| Error::SyncThreadPanicked)?;
                }
            }
        }
    }
}

/// Why a listen attempt ended without an error.
#[derive(Debug, PartialEq)]
enum ListenEnd {
    /// Server closed the stream.
    Ended,
    /// Access token expired.
    Deadline,
    Stopped,
}

struct Worker {
    store: Arc<ToggleStore>,
    transport: Arc<dyn Transport>,
    backoff: BackoffConfig,
    listen: bool,
    listening: Arc<AtomicBool>,
    stop: watch::Receiver<bool>,
    tokens: Option<AuthTokens>,
}

impl Worker {
    async fn run(mut self, update_result: &impl Fn(Result<()>)) {
        if self.start_with_retry(update_result).await && self.listen {
            self.listen_loop().await;
        }
        self.listening.store(false, Ordering::Release);
        self.transport.close().await;
        log::debug!(target: "featureguards", "sync thread stopped");
    }

    /// Authenticate and fetch toggles until it succeeds. Returns `false` if stopped first.
    async fn start_with_retry(&mut self, update_result: &impl Fn(Result<()>)) -> bool {
        let mut retry = 0u32;
        loop {
            if self.is_stopped() {
                return false;
            }

            let result = self.start().await;
            update_result(result.clone());
            match result {
                Ok(()) => return true,
                Err(err) => {
                    log::warn!(target: "featureguards", retry; "failed to fetch feature toggles: {err}");
                }
            }

            if !self.sleep(self.backoff.wait(retry)).await {
                return false;
            }
            retry = retry.saturating_add(1);
        }
    }

    async fn start(&mut self) -> Result<()> {
        let tokens = self.transport.authenticate().await?;
        let payload = self
            .transport
            .fetch(self.store.version(), &tokens.access_token)
            .await;
        self.tokens = Some(tokens);
        self.apply(payload?);
        Ok(())
    }

    async fn listen_loop(&mut self) {
        let mut retry = 0u32;
        loop {
            if self.is_stopped() {
                return;
            }

            let err = match self.listen_once().await {
                Ok(ListenEnd::Stopped) => return,
                Ok(ListenEnd::Ended) => {
                    log::debug!(target: "featureguards", "update stream ended, reconnecting");
                    retry = 0;
                    continue;
                }
                Ok(ListenEnd::Deadline) => {
                    log::debug!(target: "featureguards", "access token expired, refreshing");
                    match self.refresh_and_auth().await {
                        Ok(()) => {
                            retry = 0;
                            continue;
                        }
                        Err(err) => err,
                    }
                }
                Err(err) if err.is_permission_denied() => {
                    log::debug!(target: "featureguards", "update stream denied, refreshing tokens: {err}");
                    match self.refresh_and_auth().await {
                        Ok(()) => err,
                        Err(err) => err,
                    }
                }
                Err(err) => err,
            };

            let wait = self.backoff.wait(retry);
            log::warn!(target: "featureguards",
                retry,
                wait_ms = wait.as_millis() as u64;
                "failed to listen for feature toggle updates: {err}");
            if !self.sleep(wait).await {
                return;
            }
            retry = retry.saturating_add(1);
        }
    }

    /// Open one update stream and apply payloads until it ends.
    async fn listen_once(&mut self) -> Result<ListenEnd> {
        let tokens = match &self.tokens {
            Some(tokens) => tokens.clone(),
            None => {
                let tokens = refresh_and_auth(&*self.transport, None).await?;
                self.tokens = Some(tokens.clone());
                tokens
            }
        };

        let deadline = token::expiration(&tokens.access_token)?;
        let remaining = deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return Err(Error::PermissionDenied("access token expired".to_owned()));
        }

        let mut stream = self
            .transport
            .listen(self.store.version(), &tokens.access_token, deadline)
            .await?;
        self.listening.store(true, Ordering::Release);
        log::debug!(target: "featureguards", version = self.store.version(); "listening for feature toggle updates");

        let expired = tokio::time::sleep(remaining);
        tokio::pin!(expired);

        let end = loop {
            tokio::select! {
                _ = &mut expired => break Ok(ListenEnd::Deadline),
                _ = stopped(&mut self.stop) => break Ok(ListenEnd::Stopped),
                item = stream.next() => match item {
                    None => break Ok(ListenEnd::Ended),
                    Some(Ok(payload)) => self.apply(payload),
                    Some(Err(err)) => break Err(err),
                },
            }
        };
        self.listening.store(false, Ordering::Release);
        end
    }

    async fn refresh_and_auth(&mut self) -> Result<()> {
        let tokens = refresh_and_auth(&*self.transport, self.tokens.as_ref()).await?;
        self.tokens = Some(tokens);
        Ok(())
    }

    fn apply(&self, payload: TogglesPayload) {
        let count = payload.feature_toggles.len();
        let version = payload.version;
        self.store.apply(payload.feature_toggles, version);
        log::debug!(target: "featureguards",
            count,
            version,
            cached = self.store.len();
            "applied feature toggles");
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow() || self.stop.has_changed().is_err()
    }

    /// Sleep for `duration`. Returns `false` if asked to stop in the meantime.
    async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = stopped(&mut self.stop) => false,
        }
    }
}

/// Resolve once a stop is requested or the sending half is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    // The returned `Ref` must not outlive this future, or it would keep `stop` borrowed.
    let _ = stop.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    use super::{SyncThread, SyncThreadConfig};
    use crate::{
        backoff::BackoffConfig,
        token::tests::token,
        toggle::{Toggle, ToggleType},
        toggle_store::ToggleStore,
        transport::{
            fake::{valid_tokens, Call, FakeTransport, Listen},
            AuthTokens, TogglesPayload,
        },
        Error,
    };

    fn toggle(name: &str, enabled: bool) -> Toggle {
        Toggle {
            name: name.to_owned(),
            id: String::new(),
            project_id: String::new(),
            description: String::new(),
            version: 1,
            enabled,
            toggle_type: ToggleType::OnOff,
            platforms: vec![],
            deleted_at: None,
            feature_definition: None,
        }
    }

    fn payload(toggles: Vec<Toggle>, version: i64) -> TogglesPayload {
        TogglesPayload {
            feature_toggles: toggles,
            version,
        }
    }

    fn start(transport: &Arc<FakeTransport>, listen: bool) -> (SyncThread, Arc<ToggleStore>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(ToggleStore::new());
        let thread = SyncThread::start(SyncThreadConfig {
            store: store.clone(),
            transport: transport.clone(),
            backoff: BackoffConfig::default()
                .base(Duration::from_millis(1))
                .max(Duration::from_millis(10)),
            listen,
        })
        .unwrap();
        (thread, store)
    }

    /// Poll `condition` for up to five seconds.
    fn eventually(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn fetches_then_listens() {
        let transport = Arc::new(
            FakeTransport::new()
                .on_fetch(Ok(payload(vec![toggle("FOO", true)], 1)))
                .on_listen(Listen::Open(vec![Ok(payload(vec![toggle("FOO", false)], 2))])),
        );
        let (thread, store) = start(&transport, true);

        assert!(thread.wait_for_configuration().is_ok());
        eventually(|| thread.client_version() == 2 && thread.is_listening());
        assert!(!store.get("FOO").unwrap().enabled);
        assert_eq!(
            transport.calls(),
            vec![Call::Authenticate, Call::Fetch(0), Call::Listen(1)]
        );

        thread.shutdown().unwrap();
        assert_eq!(transport.calls().last(), Some(&Call::Close));
    }

    #[test]
    fn refreshes_before_listening_again_when_denied() {
        let transport = Arc::new(
            FakeTransport::new()
                .on_authenticate(Ok(valid_tokens("first")))
                .on_fetch(Ok(payload(vec![toggle("FOO", true)], 1)))
                .on_listen(Listen::Fail(Error::PermissionDenied("expired".to_owned()))),
        );
        let (thread, _store) = start(&transport, true);

        thread.wait_for_configuration().unwrap();
        eventually(|| thread.is_listening());
        assert_eq!(
            transport.calls(),
            vec![
                Call::Authenticate,
                Call::Fetch(0),
                Call::Listen(1),
                Call::Refresh("refresh-first".to_owned()),
                Call::Listen(1),
            ]
        );
        thread.shutdown().unwrap();
    }

    #[test]
    fn reauthenticates_when_refresh_is_denied() {
        let transport = Arc::new(
            FakeTransport::new()
                .on_listen(Listen::Fail(Error::PermissionDenied("expired".to_owned())))
                .on_refresh(Err(Error::PermissionDenied("revoked".to_owned()))),
        );
        let (thread, _store) = start(&transport, true);

        thread.wait_for_configuration().unwrap();
        eventually(|| thread.is_listening());
        assert_eq!(
            transport.calls(),
            vec![
                Call::Authenticate,
                Call::Fetch(0),
                Call::Listen(0),
                Call::Refresh("refresh-authenticated".to_owned()),
                Call::Authenticate,
                Call::Listen(0),
            ]
        );
        thread.shutdown().unwrap();
    }

    #[test]
    fn reconnects_after_stream_ends() {
        let transport = Arc::new(
            FakeTransport::new()
                .on_listen(Listen::Ended(vec![Ok(payload(vec![toggle("FOO", true)], 3))])),
        );
        let (thread, store) = start(&transport, true);

        thread.wait_for_configuration().unwrap();
        eventually(|| thread.is_listening() && transport.calls().len() == 4);
        assert!(store.get("FOO").is_some());
        assert_eq!(
            transport.calls(),
            vec![
                Call::Authenticate,
                Call::Fetch(0),
                Call::Listen(0),
                Call::Listen(3),
            ]
        );
        thread.shutdown().unwrap();
    }

    #[test]
    fn stream_errors_back_off_and_reconnect() {
        let transport = Arc::new(
            FakeTransport::new()
                .on_listen(Listen::Open(vec![Err(Error::Stream("reset".to_owned()))]))
                .on_listen(Listen::Fail(Error::Server {
                    status: 502,
                    message: String::new(),
                })),
        );
        let (thread, _store) = start(&transport, true);

        thread.wait_for_configuration().unwrap();
        eventually(|| thread.is_listening() && transport.calls().len() == 5);
        assert_eq!(
            transport.calls(),
            vec![
                Call::Authenticate,
                Call::Fetch(0),
                Call::Listen(0),
                Call::Listen(0),
                Call::Listen(0),
            ]
        );
        thread.shutdown().unwrap();
    }

    #[test]
    fn reports_first_failure_and_keeps_retrying() {
        let transport = Arc::new(
            FakeTransport::new()
                .on_authenticate(Err(Error::Server {
                    status: 500,
                    message: "unavailable".to_owned(),
                }))
                .on_fetch(Ok(payload(vec![toggle("FOO", true)], 1))),
        );
        let (thread, store) = start(&transport, false);

        assert!(matches!(
            thread.wait_for_configuration(),
            Err(Error::Server { status: 500, .. })
        ));
        eventually(|| store.get("FOO").is_some());
        // The first outcome sticks.
        assert!(thread.wait_for_configuration().is_err());
        thread.shutdown().unwrap();
    }

    #[test]
    fn does_not_listen_when_disabled() {
        let transport = Arc::new(FakeTransport::new());
        let (thread, _store) = start(&transport, false);

        thread.wait_for_configuration().unwrap();
        thread.shutdown().unwrap();
        assert_eq!(
            transport.calls(),
            vec![Call::Authenticate, Call::Fetch(0), Call::Close]
        );
    }

    #[test]
    fn token_without_expiration_is_never_listened_with() {
        let transport = Arc::new(FakeTransport::new().on_authenticate(Ok(AuthTokens {
            access_token: token(r#"{"sub":"me"}"#),
            refresh_token: "refresh".to_owned(),
        })));
        let (thread, _store) = start(&transport, true);

        thread.wait_for_configuration().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(!thread.is_listening());
        assert!(!transport
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Listen(_))));
        thread.shutdown().unwrap();
    }

    #[test]
    fn stop_ends_open_stream() {
        let transport = Arc::new(FakeTransport::new());
        let (thread, _store) = start(&transport, true);

        thread.wait_for_configuration().unwrap();
        eventually(|| thread.is_listening());
        thread.stop();
        eventually(|| transport.calls().last() == Some(&Call::Close));
        assert!(!thread.is_listening());
        thread.shutdown().unwrap();
    }
}
