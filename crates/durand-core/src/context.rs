//! Runtime facts shared with command handlers.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bot-wide context handed to every command invocation.
///
/// Fixed fields cover what the dispatcher itself needs; anything
/// app-specific (environment name, configured integrations) goes into
/// `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotContext {
    /// Command prefix, e.g. `/`.
    pub prefix: String,

    /// Name of the help command mentioned in "not found" replies.
    pub help_command: String,

    /// Directory the command registry is loaded from.
    pub commands_dir: PathBuf,

    /// Process start time.
    pub started_at: DateTime<Utc>,

    /// Arbitrary metadata for app-specific needs.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl BotContext {
    /// Create a context started now.
    #[must_use]
    pub fn new(prefix: impl Into<String>, commands_dir: PathBuf) -> Self {
        Self {
            prefix: prefix.into(),
            help_command: "help".to_string(),
            commands_dir,
            started_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Override the help command name.
    #[must_use]
    pub fn with_help_command(mut self, help_command: impl Into<String>) -> Self {
        self.help_command = help_command.into();
        self
    }

    /// Replace the metadata map.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Get a metadata value by key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Set a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Metadata value as a boolean flag (absent means false).
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.get_metadata(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Metadata value as a string.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get_metadata(key).and_then(Value::as_str)
    }

    /// Time elapsed since start.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }

    /// The invocation string for the help command, e.g. `/help`.
    #[must_use]
    pub fn help_invocation(&self) -> String {
        format!("{}{}", self.prefix, self.help_command)
    }
}
