//! Status endpoint for the durand bot.
//!
//! Provides:
//! - Status report wire type (JSON, camelCase)
//! - HTTP status router and server (feature: http)

pub mod protocol;

#[cfg(feature = "http")]
pub mod status;

pub use protocol::StatusReport;

#[cfg(feature = "http")]
pub use status::{StatusServerError, StatusSource, serve, status_router};
