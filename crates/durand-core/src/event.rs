//! Inbound platform events.

use serde::{Deserialize, Serialize};

/// Kind of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A chat message.
    Message,
    /// Anything else the platform reports (typing, presence, read receipts...).
    Other(String),
}

/// A single event delivered by the session's listen loop.
///
/// Transient: consumed once by the dispatcher, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Platform identifier of the sender.
    pub sender_id: String,
    /// Conversation the event belongs to.
    pub thread_id: String,
    /// Raw message text, if any.
    #[serde(default)]
    pub body: Option<String>,
    /// Whether the thread is a group conversation.
    #[serde(default)]
    pub is_group: bool,
    /// Platform message identifier, if any.
    #[serde(default)]
    pub message_id: Option<String>,
}

impl InboundEvent {
    /// Create a message event.
    #[must_use]
    pub fn message(
        sender_id: impl Into<String>,
        thread_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::Message,
            sender_id: sender_id.into(),
            thread_id: thread_id.into(),
            body: Some(body.into()),
            is_group: false,
            message_id: None,
        }
    }

    /// Create a non-message event.
    #[must_use]
    pub fn other(
        kind: impl Into<String>,
        sender_id: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::Other(kind.into()),
            sender_id: sender_id.into(),
            thread_id: thread_id.into(),
            body: None,
            is_group: false,
            message_id: None,
        }
    }

    /// Mark the event as coming from a group thread.
    #[must_use]
    pub const fn in_group(mut self) -> Self {
        self.is_group = true;
        self
    }

    /// Whether this is a chat message.
    #[must_use]
    pub const fn is_message(&self) -> bool {
        matches!(self.kind, EventKind::Message)
    }

    /// The body, when present and not blank.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.body.as_deref().filter(|b| !b.trim().is_empty())
    }
}
