//! Credential store and connection supervision.
//!
//! Provides:
//! - `CredentialStore` - Load, validate, normalize, persist and quarantine
//!   the credential bundle
//! - `ConnectionSupervisor` - Retry/backoff state machine around a
//!   `SessionProvider`, plus the listen loop
//! - Provider implementations (memory, console)

pub mod credentials;
pub mod provider;
pub mod shutdown;
pub mod supervisor;

pub use credentials::{CredentialPolicy, CredentialStore, CredentialsError};
pub use shutdown::ShutdownLatch;
pub use supervisor::{
    Backoff, ConnectionSupervisor, LoginMethod, SupervisorConfig, SupervisorError,
    SupervisorState, SupervisorStatus,
};
