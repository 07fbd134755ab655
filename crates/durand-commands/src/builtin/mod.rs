//! Compiled registration table.
//!
//! Manifests bind to these handlers by name through `entry = "<name>"`.

mod gpt;
mod help;
mod info;
mod ping;

use std::{collections::HashMap, sync::Arc};

pub use gpt::{GptCommand, GptConfig};
pub use help::HelpCommand;
pub use info::InfoCommand;
pub use ping::PingCommand;

use crate::handler::{CommandHandler, CommandInfo};

#[derive(Clone)]
struct Builtin {
    handler: Arc<dyn CommandHandler>,
    info: CommandInfo,
}

/// Handlers available to manifests, keyed by lowercase name.
#[derive(Clone, Default)]
pub struct Builtins {
    entries: HashMap<String, Builtin>,
}

impl Builtins {
    /// Table with `ping`, `help`, `info` and `gpt`.
    #[must_use]
    pub fn standard(gpt: GptConfig) -> Self {
        Self::default()
            .register("ping", Arc::new(PingCommand), ping::info())
            .register("help", Arc::new(HelpCommand), help::info())
            .register("info", Arc::new(InfoCommand), info::info())
            .register("gpt", Arc::new(GptCommand::new(gpt)), gpt::info())
    }

    /// Add or replace a handler.
    #[must_use]
    pub fn register(
        mut self,
        name: &str,
        handler: Arc<dyn CommandHandler>,
        info: CommandInfo,
    ) -> Self {
        self.entries
            .insert(name.to_lowercase(), Builtin { handler, info });
        self
    }

    /// Handler and its default metadata.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<(Arc<dyn CommandHandler>, CommandInfo)> {
        self.entries
            .get(&name.to_lowercase())
            .map(|b| (Arc::clone(&b.handler), b.info.clone()))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn describe(name: &str, description: &str, usage: &str, category: &str) -> CommandInfo {
    CommandInfo {
        name: Some(name.to_string()),
        description: Some(description.to_string()),
        usage: Some(usage.to_string()),
        category: Some(category.to_string()),
        examples: Vec::new(),
    }
}
