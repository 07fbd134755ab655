//! Command manifests.
//!
//! Each `<name>.toml` file in the commands directory describes one command:
//!
//! ```toml
//! entry = "ping"            # bind to a compiled handler, or
//! reply = "Salut {sender}"  # a declarative reply
//!
//! [info]
//! description = "Teste la réactivité du bot"
//! usage = "/ping"
//! category = "Utilitaires"
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::handler::{CommandHandler, CommandInfo, HandlerError, Invocation};

/// Manifest error.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Manifest declares neither `entry` nor `reply`")]
    MissingEntry,
    #[error("Manifest declares both `entry` and `reply`")]
    ConflictingEntry,
    #[error("Unknown built-in handler: {0}")]
    UnknownBuiltin(String),
    #[error("Empty reply template")]
    EmptyReply,
}

/// What a manifest binds the command to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    /// A handler from the compiled registration table.
    Builtin(String),
    /// A reply template.
    Reply(String),
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    entry: Option<String>,
    reply: Option<String>,
    info: Option<CommandInfo>,
}

/// Parsed manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandManifest {
    pub entry: ManifestEntry,
    pub info: Option<CommandInfo>,
}

impl CommandManifest {
    /// Parse manifest text.
    ///
    /// # Errors
    /// Returns error on invalid TOML or when the manifest does not declare
    /// exactly one entry point.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = toml::from_str(text)?;
        let entry = match (raw.entry, raw.reply) {
            (Some(_), Some(_)) => return Err(ManifestError::ConflictingEntry),
            (None, None) => return Err(ManifestError::MissingEntry),
            (Some(entry), None) => ManifestEntry::Builtin(entry.trim().to_lowercase()),
            (None, Some(reply)) if reply.trim().is_empty() => {
                return Err(ManifestError::EmptyReply);
            }
            (None, Some(reply)) => ManifestEntry::Reply(reply),
        };
        Ok(Self {
            entry,
            info: raw.info,
        })
    }
}

/// Declarative command that answers with a fixed template.
///
/// Placeholders: `{args}`, `{sender}`, `{thread}`, `{prefix}`.
#[derive(Debug, Clone)]
pub struct ReplyHandler {
    template: String,
}

impl ReplyHandler {
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Fill the placeholders for one invocation.
    #[must_use]
    pub fn render(&self, invocation: &Invocation) -> String {
        self.template
            .replace("{args}", &invocation.rest())
            .replace("{sender}", &invocation.event.sender_id)
            .replace("{thread}", &invocation.event.thread_id)
            .replace("{prefix}", &invocation.context.prefix)
    }
}

#[async_trait]
impl CommandHandler for ReplyHandler {
    async fn invoke(&self, invocation: Invocation) -> Result<(), HandlerError> {
        invocation.reply(&self.render(&invocation)).await?;
        Ok(())
    }
}
