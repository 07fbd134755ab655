//! Core abstractions for the durand messaging bot.
//!
//! This crate provides the fundamental building blocks:
//! - `InboundEvent` - A single event delivered by the platform
//! - `CredentialBundle` - Serialized session-continuation records
//! - `SessionProvider` / `Session` - The narrow platform client contract
//! - `EventHandler` - Consumer of the listen loop
//! - `BotContext` - Runtime facts shared with command handlers
//! - `AuditLog` - Append-only critical event log

pub mod audit;
pub mod context;
pub mod credentials;
pub mod event;
pub mod traits;

pub use audit::AuditLog;
pub use context::BotContext;
pub use credentials::{CredentialBundle, CredentialRecord};
pub use event::{EventKind, InboundEvent};
pub use traits::{
    ConnectOptions, EventHandler, FailureClass, LoginCredentials, ProviderError, Session,
    SessionProvider,
};
