//! Commands for the durand bot.
//!
//! Provides:
//! - `CommandHandler` - Invocable entry point of a command
//! - `CommandRegistry` - Hot-reloadable mapping loaded from TOML manifests
//! - `Dispatcher` - Routes prefixed messages to commands under a deadline
//! - Built-in commands (`ping`, `help`, `info`, `gpt`)

pub mod builtin;
pub mod dispatcher;
pub mod handler;
pub mod manifest;
pub mod registry;
pub mod reply;

pub use builtin::{Builtins, GptConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherConfig};
pub use handler::{
    CommandDescriptor, CommandHandler, CommandInfo, CommandTable, HandlerError, Invocation,
};
pub use manifest::{CommandManifest, ManifestEntry, ManifestError, ReplyHandler};
pub use registry::{CommandRegistry, RegistryError, ReloadOutcome};
