//! Core traits for the platform session and event consumers.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CredentialBundle, InboundEvent};

/// Stream of events produced by a live subscription.
pub type EventStream = BoxStream<'static, Result<InboundEvent, ProviderError>>;

/// How a provider failure should be treated by the connection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Transient: retry after the backoff delay.
    Recoverable,
    /// A person has to act (checkpoint, approval, wrong password).
    NeedsHuman,
    /// The stored bundle carries cookies the platform refuses for its domain.
    CookieDomain,
}

/// Provider error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Security checkpoint: {0}")]
    Checkpoint(String),
    #[error("Login approval required: {0}")]
    LoginApproval(String),
    #[error("Bad credentials: {0}")]
    BadCredentials(String),
    #[error("Cookie domain rejected: {0}")]
    CookieDomain(String),
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Classify an error reported by an opaque client as free text.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let has = |needle: &str| lower.contains(needle);

        if has("connection closed") {
            Self::ConnectionClosed(message)
        } else if has("checkpoint") {
            Self::Checkpoint(message)
        } else if has("login approval") || has("approvals") || has("two-factor") {
            Self::LoginApproval(message)
        } else if has("wrong username")
            || has("wrong password")
            || has("incorrect password")
            || has("invalid credentials")
        {
            Self::BadCredentials(message)
        } else if has("cookie") && has("domain") {
            Self::CookieDomain(message)
        } else if has("timeout") || has("timed out") || has("etimedout") {
            Self::Timeout(message)
        } else if has("econnreset") || has("socket hang up") || has("enotfound") || has("network")
        {
            Self::Network(message)
        } else {
            Self::Other(message)
        }
    }

    /// Failure class used by the retry loop.
    #[must_use]
    pub const fn classify(&self) -> FailureClass {
        match self {
            Self::Checkpoint(_) | Self::LoginApproval(_) | Self::BadCredentials(_) => {
                FailureClass::NeedsHuman
            }
            Self::CookieDomain(_) => FailureClass::CookieDomain,
            Self::ConnectionClosed(_)
            | Self::Network(_)
            | Self::Timeout(_)
            | Self::MalformedEvent(_)
            | Self::NotLoggedIn
            | Self::Other(_) => FailureClass::Recoverable,
        }
    }

    /// Whether the listen subscription is gone and a full reconnect is needed.
    #[must_use]
    pub const fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_) | Self::NotLoggedIn)
    }
}

/// Credentials handed to the provider's connect operation.
#[derive(Clone)]
pub enum LoginCredentials {
    /// Resume from a persisted bundle.
    AppState(CredentialBundle),
    /// Interactive login with explicit secrets.
    Password { email: String, password: String },
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppState(bundle) => f
                .debug_struct("AppState")
                .field("records", &bundle.len())
                .finish(),
            Self::Password { email, .. } => f
                .debug_struct("Password")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Connection options passed to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Deliver non-message events too.
    pub listen_events: bool,
    /// Deliver the bot's own messages.
    pub self_listen: bool,
    /// Advertise presence.
    pub update_presence: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            listen_events: true,
            self_listen: false,
            update_presence: false,
        }
    }
}

/// Receipt for a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    /// Platform message identifier.
    pub message_id: String,
    /// Thread the message was delivered to.
    pub thread_id: String,
}

/// Public profile of a platform user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User identifier.
    pub id: String,
    /// Display name.
    pub name: Option<String>,
}

/// A live, authenticated session.
///
/// Owned by the connection supervisor; the dispatcher and command handlers
/// only borrow it for the duration of one invocation.
#[async_trait]
pub trait Session: Send + Sync {
    /// Identity the session is logged in as.
    fn current_user_id(&self) -> String;

    /// Send a text message to a thread.
    async fn send(&self, text: &str, thread_id: &str) -> Result<MessageReceipt, ProviderError>;

    /// Retract a previously sent message.
    async fn unsend(&self, message_id: &str) -> Result<(), ProviderError>;

    /// Look up a user's public profile.
    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, ProviderError>;

    /// Mark a thread as read.
    async fn mark_read(&self, thread_id: &str) -> Result<(), ProviderError>;

    /// Register the long-lived event subscription.
    async fn listen(&self) -> Result<EventStream, ProviderError>;

    /// End the session.
    async fn logout(&self) -> Result<(), ProviderError>;

    /// Updated continuation bundle, when the platform issued one.
    fn app_state(&self) -> Option<CredentialBundle> {
        None
    }
}

/// Trait for platform clients.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Open a session.
    async fn connect(
        &self,
        credentials: LoginCredentials,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Session>, ProviderError>;
}

#[async_trait]
impl<T: SessionProvider + ?Sized> SessionProvider for Arc<T> {
    async fn connect(
        &self,
        credentials: LoginCredentials,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Session>, ProviderError> {
        (**self).connect(credentials, options).await
    }
}

/// Consumer of the listen loop.
///
/// Implementations must not fail: whatever goes wrong while handling one
/// event is dealt with inside `on_event`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one inbound event.
    async fn on_event(&self, session: &Arc<dyn Session>, event: InboundEvent);
}
