//! Status report wire type.

use chrono::{DateTime, SecondsFormat, Utc};
use durand_session::{SupervisorState, SupervisorStatus};
use serde::{Deserialize, Serialize};

/// Body of the status endpoint response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Human-readable liveness line.
    pub status: String,
    /// ISO-8601 time the report was built.
    pub timestamp: String,
    /// Seconds since process start.
    pub uptime: f64,
    /// Registered commands.
    pub command_count: usize,
    /// Consecutive failed connect attempts.
    pub retry_count: u32,
    /// Whether the supervisor is listening.
    pub connected: bool,
    /// Supervisor state.
    pub state: SupervisorState,
}

impl StatusReport {
    /// Build a report for `now`.
    #[must_use]
    pub fn new(
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
        command_count: usize,
        supervisor: SupervisorStatus,
    ) -> Self {
        let status = if supervisor.connected {
            "Bot actif"
        } else {
            "Bot déconnecté"
        };
        let uptime = (now - started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        Self {
            status: status.to_string(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            uptime,
            command_count,
            retry_count: supervisor.retry_count,
            connected: supervisor.connected,
            state: supervisor.state,
        }
    }
}
