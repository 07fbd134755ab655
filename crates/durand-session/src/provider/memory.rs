//! In-memory session provider.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use durand_core::{
    ConnectOptions, CredentialBundle, InboundEvent, LoginCredentials, ProviderError, Session,
    SessionProvider,
    traits::{EventStream, MessageReceipt, UserProfile},
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// A message delivered through a `MemorySession`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Assigned message identifier.
    pub message_id: String,
    /// Target thread.
    pub thread_id: String,
    /// Message text.
    pub text: String,
}

type Feed = Result<InboundEvent, ProviderError>;

/// In-memory session.
///
/// Events are fed by the test (or the embedding app) through
/// `push_event`/`push_error`; everything the bot sends is recorded.
/// Useful for development and tests. Data is lost on drop.
pub struct MemorySession {
    user_id: String,
    feed_tx: mpsc::UnboundedSender<Feed>,
    feed_rx: Mutex<Option<mpsc::UnboundedReceiver<Feed>>>,
    sent: RwLock<Vec<SentMessage>>,
    unsent: RwLock<Vec<String>>,
    read_threads: RwLock<Vec<String>>,
    users: RwLock<HashMap<String, UserProfile>>,
    app_state: RwLock<Option<CredentialBundle>>,
    listening: AtomicBool,
    logged_out: AtomicBool,
    fail_sends: AtomicBool,
}

impl MemorySession {
    /// Create a session logged in as `user_id`.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Arc<Self> {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            user_id: user_id.into(),
            feed_tx,
            feed_rx: Mutex::new(Some(feed_rx)),
            sent: RwLock::new(Vec::new()),
            unsent: RwLock::new(Vec::new()),
            read_threads: RwLock::new(Vec::new()),
            users: RwLock::new(HashMap::new()),
            app_state: RwLock::new(None),
            listening: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        })
    }

    /// Queue an inbound event.
    pub fn push_event(&self, event: InboundEvent) {
        let _ = self.feed_tx.send(Ok(event));
    }

    /// Queue a listen error.
    pub fn push_error(&self, error: ProviderError) {
        let _ = self.feed_tx.send(Err(error));
    }

    /// Queue a connection-closed error.
    pub fn close(&self) {
        self.push_error(ProviderError::ConnectionClosed("Connection closed".into()));
    }

    /// Register a user profile for `fetch_user`.
    pub fn add_user(&self, id: impl Into<String>, name: impl Into<String>) {
        let id = id.into();
        if let Ok(mut users) = self.users.write() {
            users.insert(
                id.clone(),
                UserProfile {
                    id,
                    name: Some(name.into()),
                },
            );
        }
    }

    /// Bundle returned by `app_state`.
    pub fn set_app_state(&self, bundle: CredentialBundle) {
        if let Ok(mut state) = self.app_state.write() {
            *state = Some(bundle);
        }
    }

    /// Make every subsequent send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Everything sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Texts sent to one thread.
    #[must_use]
    pub fn sent_to(&self, thread_id: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|m| m.thread_id == thread_id)
            .map(|m| m.text)
            .collect()
    }

    /// Message ids passed to `unsend`.
    #[must_use]
    pub fn unsent(&self) -> Vec<String> {
        self.unsent.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Threads passed to `mark_read`.
    #[must_use]
    pub fn read_threads(&self) -> Vec<String> {
        self.read_threads.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Whether `listen` has been called.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Whether `logout` has been called.
    #[must_use]
    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for MemorySession {
    fn current_user_id(&self) -> String {
        self.user_id.clone()
    }

    async fn send(&self, text: &str, thread_id: &str) -> Result<MessageReceipt, ProviderError> {
        if self.is_logged_out() {
            return Err(ProviderError::NotLoggedIn);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ProviderError::Network("send rejected".into()));
        }

        let message = SentMessage {
            message_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            text: text.to_string(),
        };
        let receipt = MessageReceipt {
            message_id: message.message_id.clone(),
            thread_id: message.thread_id.clone(),
        };
        self.sent
            .write()
            .map_err(|e| ProviderError::Other(e.to_string()))?
            .push(message);
        Ok(receipt)
    }

    async fn unsend(&self, message_id: &str) -> Result<(), ProviderError> {
        self.unsent
            .write()
            .map_err(|e| ProviderError::Other(e.to_string()))?
            .push(message_id.to_string());
        Ok(())
    }

    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, ProviderError> {
        Ok(self
            .users
            .read()
            .map_err(|e| ProviderError::Other(e.to_string()))?
            .get(user_id)
            .cloned())
    }

    async fn mark_read(&self, thread_id: &str) -> Result<(), ProviderError> {
        self.read_threads
            .write()
            .map_err(|e| ProviderError::Other(e.to_string()))?
            .push(thread_id.to_string());
        Ok(())
    }

    async fn listen(&self) -> Result<EventStream, ProviderError> {
        let rx = self
            .feed_rx
            .lock()
            .map_err(|e| ProviderError::Other(e.to_string()))?
            .take()
            .ok_or_else(|| ProviderError::Other("already listening".into()))?;
        self.listening.store(true, Ordering::SeqCst);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn app_state(&self) -> Option<CredentialBundle> {
        self.app_state.read().ok().and_then(|s| s.clone())
    }
}

/// Scripted connect outcome.
enum Outcome {
    Session(Arc<MemorySession>),
    Error(ProviderError),
}

/// In-memory provider with scripted connect outcomes.
///
/// Each `connect` pops the next scripted outcome; once the script is
/// exhausted it fails with the configured fallback error, or hands out a
/// fresh session.
pub struct MemoryProvider {
    user_id: String,
    script: Mutex<VecDeque<Outcome>>,
    fallback_error: Mutex<Option<ProviderError>>,
    attempts: AtomicUsize,
    last_credentials: Mutex<Option<LoginCredentials>>,
    sessions: Mutex<Vec<Arc<MemorySession>>>,
}

impl MemoryProvider {
    /// Create a provider whose sessions log in as `user_id`.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            script: Mutex::new(VecDeque::new()),
            fallback_error: Mutex::new(None),
            attempts: AtomicUsize::new(0),
            last_credentials: Mutex::new(None),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Script a successful connect returning `session`.
    pub fn push_session(&self, session: Arc<MemorySession>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Outcome::Session(session));
        }
    }

    /// Script a failed connect.
    pub fn push_error(&self, error: ProviderError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Outcome::Error(error));
        }
    }

    /// Fail every unscripted connect with `error`.
    pub fn fail_with(&self, error: ProviderError) {
        if let Ok(mut fallback) = self.fallback_error.lock() {
            *fallback = Some(error);
        }
    }

    /// Number of connect calls so far.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Credentials passed to the latest connect call.
    #[must_use]
    pub fn last_credentials(&self) -> Option<LoginCredentials> {
        self.last_credentials.lock().ok().and_then(|c| c.clone())
    }

    /// Sessions handed out so far.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<MemorySession>> {
        self.sessions.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SessionProvider for MemoryProvider {
    async fn connect(
        &self,
        credentials: LoginCredentials,
        _options: &ConnectOptions,
    ) -> Result<Arc<dyn Session>, ProviderError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_credentials.lock() {
            *last = Some(credentials);
        }

        let scripted = self
            .script
            .lock()
            .map_err(|e| ProviderError::Other(e.to_string()))?
            .pop_front();
        let session = match scripted {
            Some(Outcome::Session(session)) => session,
            Some(Outcome::Error(error)) => return Err(error),
            None => {
                let fallback = self
                    .fallback_error
                    .lock()
                    .map_err(|e| ProviderError::Other(e.to_string()))?
                    .clone();
                if let Some(error) = fallback {
                    return Err(error);
                }
                MemorySession::new(self.user_id.clone())
            }
        };

        self.sessions
            .lock()
            .map_err(|e| ProviderError::Other(e.to_string()))?
            .push(Arc::clone(&session));
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let provider = MemoryProvider::new("bot");
        provider.push_error(ProviderError::Network("reset".into()));
        let scripted = MemorySession::new("bot");
        provider.push_session(Arc::clone(&scripted));
        provider.fail_with(ProviderError::Timeout("slow".into()));

        let creds = LoginCredentials::AppState(CredentialBundle::default());
        let opts = ConnectOptions::default();
        assert!(provider.connect(creds.clone(), &opts).await.is_err());
        let session = provider.connect(creds.clone(), &opts).await.unwrap();
        assert_eq!(session.current_user_id(), "bot");
        assert_eq!(
            provider.connect(creds, &opts).await.err(),
            Some(ProviderError::Timeout("slow".into()))
        );
        assert_eq!(provider.connect_attempts(), 3);
        assert_eq!(provider.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_session_records_and_streams() {
        let session = MemorySession::new("bot");
        session.push_event(InboundEvent::message("u1", "t1", "/ping"));
        session.close();

        let mut stream = session.listen().await.unwrap();
        assert!(session.listen().await.is_err());
        assert!(matches!(stream.next().await, Some(Ok(_))));
        assert!(matches!(
            stream.next().await,
            Some(Err(ProviderError::ConnectionClosed(_)))
        ));

        session.send("hello", "t1").await.unwrap();
        session.fail_sends(true);
        assert!(session.send("again", "t1").await.is_err());
        assert_eq!(session.sent_to("t1"), vec!["hello".to_string()]);

        session.logout().await.unwrap();
        assert!(session.is_logged_out());
        assert_eq!(
            session.send("late", "t1").await.err(),
            Some(ProviderError::NotLoggedIn)
        );
    }
}
