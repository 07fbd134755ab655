//! Append-only audit log.

use std::{path::Path, sync::Arc};

use chrono::{SecondsFormat, Utc};
use tokio::{
    fs::OpenOptions,
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
    sync::Mutex,
};

/// Writer for the critical event log.
///
/// One line per entry, prefixed with an ISO-8601 timestamp. Clones share
/// the same underlying writer, so lines from different holders never
/// interleave.
#[derive(Clone)]
pub struct AuditLog {
    writer: Arc<Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>>,
}

impl AuditLog {
    /// Create an audit log over any writer.
    #[must_use]
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(BufWriter::new(Box::new(writer)))),
        }
    }

    /// Open (or create) an audit log file in append mode.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened.
    pub async fn open(path: &Path) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(file))
    }

    /// Append a raw line.
    ///
    /// # Errors
    /// Returns error if write fails.
    pub async fn log_raw(&self, raw: &str) -> Result<(), std::io::Error> {
        let mut guard = self.writer.lock().await;
        guard.write_all(raw.as_bytes()).await?;
        guard.write_all(b"\n").await?;
        guard.flush().await?;
        Ok(())
    }

    /// Append a timestamped entry.
    ///
    /// # Errors
    /// Returns error if write fails.
    pub async fn record(&self, level: &str, message: &str) -> Result<(), std::io::Error> {
        let line = format!(
            "[{}] [{}] {message}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level.to_uppercase()
        );
        self.log_raw(&line).await
    }

    /// Append an executed-command entry.
    ///
    /// # Errors
    /// Returns error if write fails.
    pub async fn command(
        &self,
        sender_id: &str,
        thread_id: &str,
        command: &str,
        args: &[String],
    ) -> Result<(), std::io::Error> {
        let args = serde_json::to_string(args).unwrap_or_else(|_| "[]".to_string());
        self.record(
            "command",
            &format!("sender={sender_id} thread={thread_id} command={command} args={args}"),
        )
        .await
    }
}
