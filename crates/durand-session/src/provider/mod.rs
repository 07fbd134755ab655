//! Session provider implementations.
//!
//! The real platform client is an external collaborator; these are the
//! providers shipped with the crate.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "console")]
pub mod console;

#[cfg(feature = "memory")]
pub use memory::{MemoryProvider, MemorySession, SentMessage};

#[cfg(feature = "console")]
pub use console::ConsoleProvider;
