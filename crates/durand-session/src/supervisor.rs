//! Connection supervisor: retry/backoff state machine and listen loop.

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use durand_core::{
    ConnectOptions, EventHandler, FailureClass, LoginCredentials, ProviderError, Session,
    SessionProvider, traits::EventStream,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{CredentialStore, CredentialsError, ShutdownLatch};

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Supervisor error surfaced to the process boundary.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Connection failed after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("Manual action required: {0}")]
    NeedsHuman(String),
    #[error("Shutdown requested")]
    ShuttingDown,
}

/// Why a single connect attempt failed.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),
    #[error(
        "Credential bundle was quarantined; re-authenticate manually and provide a fresh {}",
        .0.display()
    )]
    ReauthRequired(PathBuf),
}

impl AttemptError {
    fn class(&self) -> FailureClass {
        match self {
            Self::Credentials(CredentialsError::Io(_)) | Self::Timeout(_) => {
                FailureClass::Recoverable
            }
            // Re-reading the same file cannot fix these.
            Self::Credentials(_) | Self::ReauthRequired(_) => FailureClass::NeedsHuman,
            Self::Provider(e) => e.classify(),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Connecting,
    Listening,
    Reconnecting,
    FailedTerminal,
    ShuttingDown,
}

/// Snapshot published for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub retry_count: u32,
    pub connected: bool,
}

/// How credentials are obtained for each connect attempt.
#[derive(Clone, Default)]
pub enum LoginMethod {
    /// Load and normalize the persisted bundle.
    #[default]
    AppState,
    /// Log in with explicit secrets.
    Credentials { email: String, password: String },
}

impl fmt::Debug for LoginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppState => f.write_str("AppState"),
            Self::Credentials { email, .. } => f
                .debug_struct("Credentials")
                .field("email", email)
                .finish_non_exhaustive(),
        }
    }
}

/// Delay policy between failed connect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Always wait `retry_delay`.
    #[default]
    Fixed,
    /// Double `retry_delay` after every failure, up to `max`.
    Exponential { max: Duration },
}

impl Backoff {
    /// Delay after the `attempt`-th consecutive failure (1-based).
    #[must_use]
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        match self {
            Self::Fixed => base,
            Self::Exponential { max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(*max)
            }
        }
    }
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Connect attempts before giving up.
    pub max_retries: u32,
    /// Base delay between failed attempts.
    pub retry_delay: Duration,
    /// Delay before a full reconnect after the subscription dropped.
    pub reconnect_delay: Duration,
    /// Upper bound on one provider connect call.
    pub connect_timeout: Duration,
    /// Delay policy.
    pub backoff: Backoff,
    /// Keep retrying errors that need a person (checkpoint, approval, bad password).
    pub retry_human_required: bool,
    /// Credential source.
    pub login: LoginMethod,
    /// Options forwarded to the provider.
    pub options: ConnectOptions,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(60),
            backoff: Backoff::Fixed,
            retry_human_required: false,
            login: LoginMethod::AppState,
            options: ConnectOptions::default(),
        }
    }
}

enum ListenOutcome {
    Shutdown,
    ConnectionLost(String),
}

/// Turns a credential store plus a session provider into a live, monitored
/// session.
///
/// Owns the retry state, the credential bundle during connect attempts and
/// the live session handle. Status snapshots are published on a `watch`
/// channel for readers on other tasks.
pub struct ConnectionSupervisor<P>
where
    P: SessionProvider,
{
    provider: P,
    store: CredentialStore,
    config: SupervisorConfig,
    shutdown: ShutdownLatch,
    attempt_count: u32,
    quarantined: bool,
    state: SupervisorState,
    session: Option<Arc<dyn Session>>,
    status_tx: watch::Sender<SupervisorStatus>,
}

impl<P> ConnectionSupervisor<P>
where
    P: SessionProvider,
{
    /// Create a new supervisor.
    #[must_use]
    pub fn new(
        provider: P,
        store: CredentialStore,
        config: SupervisorConfig,
        shutdown: ShutdownLatch,
    ) -> Self {
        let (status_tx, _) = watch::channel(SupervisorStatus {
            state: SupervisorState::Idle,
            retry_count: 0,
            connected: false,
        });
        Self {
            provider,
            store,
            config,
            shutdown,
            attempt_count: 0,
            quarantined: false,
            state: SupervisorState::Idle,
            session: None,
            status_tx,
        }
    }

    /// Subscribe to status snapshots.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status_tx.subscribe()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SupervisorState {
        self.state
    }

    /// Consecutive failed attempts since the last successful connect.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Live session, if connected.
    #[must_use]
    pub fn session(&self) -> Option<Arc<dyn Session>> {
        self.session.clone()
    }

    fn set_state(&mut self, state: SupervisorState) {
        self.state = state;
        let snapshot = SupervisorStatus {
            state,
            retry_count: self.attempt_count,
            connected: state == SupervisorState::Listening,
        };
        self.status_tx.send_replace(snapshot);
    }

    /// Connect with bounded retries.
    ///
    /// On success the state is `Listening` and the attempt counter is reset.
    ///
    /// # Errors
    /// `RetriesExhausted` after `max_retries` failures, `NeedsHuman` when a
    /// failure needs manual action (unless configured to keep retrying),
    /// `ShuttingDown` if shutdown was requested.
    pub async fn start(&mut self) -> Result<Arc<dyn Session>, SupervisorError> {
        let mut last_error = String::from("no attempt made");

        while self.attempt_count < self.config.max_retries && !self.shutdown.is_triggered() {
            self.set_state(SupervisorState::Connecting);
            tracing::info!(
                attempt = self.attempt_count + 1,
                max = self.config.max_retries,
                "Connecting"
            );

            match self.connect_once().await {
                Ok(session) => {
                    tracing::info!(user = %session.current_user_id(), "Connected");
                    self.attempt_count = 0;
                    self.session = Some(Arc::clone(&session));
                    self.set_state(SupervisorState::Listening);
                    return Ok(session);
                }
                Err(e) => {
                    self.attempt_count += 1;
                    tracing::error!(attempt = self.attempt_count, "Connection attempt failed: {e}");
                    last_error = e.to_string();

                    if e.class() == FailureClass::NeedsHuman && !self.config.retry_human_required
                    {
                        self.set_state(SupervisorState::FailedTerminal);
                        return Err(SupervisorError::NeedsHuman(last_error));
                    }

                    if self.attempt_count < self.config.max_retries {
                        self.set_state(SupervisorState::Reconnecting);
                        let delay = self
                            .config
                            .backoff
                            .delay(self.config.retry_delay, self.attempt_count);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        if self.shutdown.is_triggered() {
            return Err(SupervisorError::ShuttingDown);
        }

        self.set_state(SupervisorState::FailedTerminal);
        Err(SupervisorError::RetriesExhausted {
            attempts: self.attempt_count,
            last: last_error,
        })
    }

    async fn connect_once(&mut self) -> Result<Arc<dyn Session>, AttemptError> {
        let (credentials, normalized) = match &self.config.login {
            LoginMethod::Credentials { email, password } => (
                LoginCredentials::Password {
                    email: email.clone(),
                    password: password.clone(),
                },
                None,
            ),
            LoginMethod::AppState => {
                let loaded = match self.store.load().await {
                    Err(CredentialsError::Missing(path)) if self.quarantined => {
                        return Err(AttemptError::ReauthRequired(path));
                    }
                    other => other?,
                };
                let normalized = self.store.normalize(loaded.clone());
                let changed = (normalized != loaded).then(|| normalized.clone());
                (LoginCredentials::AppState(normalized), changed)
            }
        };

        let connect = self.provider.connect(credentials, &self.config.options);
        let outcome = tokio::time::timeout(self.config.connect_timeout, connect).await;
        let session = match outcome {
            Err(_) => return Err(AttemptError::Timeout(self.config.connect_timeout)),
            Ok(Err(e)) => {
                if e.classify() == FailureClass::CookieDomain {
                    self.quarantine_once().await;
                }
                return Err(e.into());
            }
            Ok(Ok(session)) => session,
        };

        if let Some(updated) = session.app_state() {
            self.store.save(&self.store.normalize(updated)).await;
        } else if let Some(normalized) = normalized {
            self.store.save(&normalized).await;
        }

        Ok(session)
    }

    async fn quarantine_once(&mut self) {
        if self.quarantined || !matches!(self.config.login, LoginMethod::AppState) {
            return;
        }
        self.quarantined = true;
        self.store.quarantine().await;
    }

    /// Run the full lifecycle: connect, listen, reconnect on drops, and log
    /// out once shutdown is requested.
    ///
    /// Returns `Ok(())` after a graceful shutdown.
    ///
    /// # Errors
    /// Returns the terminal connect error when retries are exhausted or a
    /// failure needs manual action.
    pub async fn run<H>(&mut self, handler: &H) -> Result<(), SupervisorError>
    where
        H: EventHandler + ?Sized,
    {
        loop {
            let session = match self.start().await {
                Ok(session) => session,
                Err(SupervisorError::ShuttingDown) => {
                    self.finish_shutdown().await;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            match self.listen(&session, handler).await {
                ListenOutcome::Shutdown => {
                    self.finish_shutdown().await;
                    return Ok(());
                }
                ListenOutcome::ConnectionLost(reason) => {
                    tracing::warn!(
                        delay = ?self.config.reconnect_delay,
                        "Connection lost ({reason}); reconnecting"
                    );
                    self.session = None;
                    self.set_state(SupervisorState::Reconnecting);
                    tokio::time::sleep(self.config.reconnect_delay).await;
                    if self.shutdown.is_triggered() {
                        self.finish_shutdown().await;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn listen<H>(&self, session: &Arc<dyn Session>, handler: &H) -> ListenOutcome
    where
        H: EventHandler + ?Sized,
    {
        let mut events: EventStream = match session.listen().await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Failed to start listening: {e}");
                return ListenOutcome::ConnectionLost(e.to_string());
            }
        };
        tracing::info!("Listening for events");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.triggered() => return ListenOutcome::Shutdown,
                next = events.next() => match next {
                    Some(Ok(event)) => handler.on_event(session, event).await,
                    Some(Err(e)) if e.is_connection_closed() => {
                        return ListenOutcome::ConnectionLost(e.to_string());
                    }
                    Some(Err(e)) => tracing::warn!("Listen error: {e}"),
                    None => return ListenOutcome::ConnectionLost("event stream ended".into()),
                },
            }
        }
    }

    async fn finish_shutdown(&mut self) {
        self.set_state(SupervisorState::ShuttingDown);
        if let Some(session) = self.session.take() {
            match tokio::time::timeout(LOGOUT_TIMEOUT, session.logout()).await {
                Ok(Ok(())) => tracing::info!("Logged out"),
                Ok(Err(e)) => tracing::warn!("Logout failed: {e}"),
                Err(_) => tracing::warn!("Logout timed out"),
            }
        }
    }
}
