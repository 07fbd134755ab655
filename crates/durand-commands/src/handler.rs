//! Command handler contract.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use durand_core::{BotContext, InboundEvent, ProviderError, Session, traits::MessageReceipt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Handler error.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Send failed: {0}")]
    Send(#[from] ProviderError),
    #[error("Command timed out after {}", format_deadline(.0))]
    TimedOut(Duration),
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Text of the single error reply sent to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::TimedOut(deadline) => format!(
                "⏱️ La commande a dépassé le délai de {} et a été annulée.",
                format_deadline(deadline)
            ),
            other => format!("❌ Erreur: {other}"),
        }
    }
}

/// `30s` for whole seconds, `250ms` otherwise.
fn format_deadline(deadline: &Duration) -> String {
    if deadline.subsec_nanos() == 0 {
        format!("{}s", deadline.as_secs())
    } else {
        format!("{}ms", deadline.as_millis())
    }
}

/// Optional descriptive metadata of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub usage: Option<String>,
    pub category: Option<String>,
    pub examples: Vec<String>,
}

/// One registered command.
#[derive(Clone)]
pub struct CommandDescriptor {
    /// Lowercase command name, derived from the manifest file stem.
    pub name: String,
    /// Invocable entry point.
    pub handler: Arc<dyn CommandHandler>,
    /// Metadata from the manifest's `[info]` table.
    pub info: Option<CommandInfo>,
    /// Manifest the command was loaded from.
    pub source: PathBuf,
}

impl CommandDescriptor {
    /// Description, with a placeholder when none is declared.
    #[must_use]
    pub fn description(&self) -> &str {
        self.info
            .as_ref()
            .and_then(|i| i.description.as_deref())
            .unwrap_or("Aucune description")
    }

    /// Usage line, defaulting to `<prefix><name>`.
    #[must_use]
    pub fn usage(&self, prefix: &str) -> String {
        self.info
            .as_ref()
            .and_then(|i| i.usage.clone())
            .unwrap_or_else(|| format!("{prefix}{}", self.name))
    }

    /// Declared category, if any.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.info.as_ref().and_then(|i| i.category.as_deref())
    }
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("info", &self.info)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Immutable name → descriptor mapping, ordered by name.
pub type CommandTable = BTreeMap<String, CommandDescriptor>;

/// Everything a handler gets for one invocation.
#[derive(Clone)]
pub struct Invocation {
    /// Lowercase command name.
    pub name: String,
    /// Whitespace-split arguments after the command name.
    pub args: Vec<String>,
    /// Triggering event.
    pub event: InboundEvent,
    /// Session for replies. Closed once the invocation times out.
    pub session: Arc<dyn Session>,
    /// Bot-wide context.
    pub context: Arc<BotContext>,
    /// Registry snapshot taken when the command was looked up.
    pub commands: Arc<CommandTable>,
}

impl Invocation {
    /// Reply in the triggering thread.
    ///
    /// # Errors
    /// Returns error if the send fails or the invocation already timed out.
    pub async fn reply(&self, text: &str) -> Result<MessageReceipt, HandlerError> {
        Ok(self.session.send(text, &self.event.thread_id).await?)
    }

    /// Arguments joined back with single spaces.
    #[must_use]
    pub fn rest(&self) -> String {
        self.args.join(" ")
    }
}

/// Invocable entry point of a command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command.
    async fn invoke(&self, invocation: Invocation) -> Result<(), HandlerError>;
}
