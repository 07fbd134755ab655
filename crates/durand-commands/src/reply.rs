//! Reply helpers: gated session, pagination and bounded sends.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use durand_core::{
    CredentialBundle, ProviderError, Session,
    traits::{EventStream, MessageReceipt, UserProfile},
};
use tokio::sync::Mutex;

use crate::handler::HandlerError;

/// Platform message size above which long replies are split.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Delay between the parts of a paginated reply.
pub const PART_DELAY: Duration = Duration::from_secs(1);

/// Session lent to one command invocation.
///
/// Sends go through a gate. Once `close` returns, every later send fails and
/// no send is still in flight, so a timed-out handler (or anything it spawned)
/// cannot deliver a message after the timeout reply.
///
/// Each send or unsend holds the gate for at most `send_timeout`.
pub struct GatedSession {
    inner: Arc<dyn Session>,
    open: Mutex<bool>,
    send_timeout: Duration,
}

impl GatedSession {
    /// Wrap `inner` with an open gate.
    #[must_use]
    pub fn new(inner: Arc<dyn Session>, send_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner,
            open: Mutex::new(true),
            send_timeout,
        })
    }

    /// Close the gate, waiting (at most `send_timeout`) for an in-flight send.
    pub async fn close(&self) {
        *self.open.lock().await = false;
    }

    /// Whether replies are still allowed.
    pub async fn is_open(&self) -> bool {
        *self.open.lock().await
    }
}

fn gate_closed() -> ProviderError {
    ProviderError::Other("reply gate closed".into())
}

fn send_timed_out(timeout: Duration) -> ProviderError {
    ProviderError::Timeout(format!("send did not complete within {timeout:?}"))
}

#[async_trait]
impl Session for GatedSession {
    fn current_user_id(&self) -> String {
        self.inner.current_user_id()
    }

    async fn send(&self, text: &str, thread_id: &str) -> Result<MessageReceipt, ProviderError> {
        let open = self.open.lock().await;
        if !*open {
            return Err(gate_closed());
        }
        tokio::time::timeout(self.send_timeout, self.inner.send(text, thread_id))
            .await
            .map_err(|_| send_timed_out(self.send_timeout))?
    }

    async fn unsend(&self, message_id: &str) -> Result<(), ProviderError> {
        let open = self.open.lock().await;
        if !*open {
            return Err(gate_closed());
        }
        tokio::time::timeout(self.send_timeout, self.inner.unsend(message_id))
            .await
            .map_err(|_| send_timed_out(self.send_timeout))?
    }

    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, ProviderError> {
        self.inner.fetch_user(user_id).await
    }

    async fn mark_read(&self, thread_id: &str) -> Result<(), ProviderError> {
        self.inner.mark_read(thread_id).await
    }

    async fn listen(&self) -> Result<EventStream, ProviderError> {
        Err(ProviderError::Other("listen is not available to commands".into()))
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        Err(ProviderError::Other("logout is not available to commands".into()))
    }

    fn app_state(&self) -> Option<CredentialBundle> {
        None
    }
}

/// Send with a deadline. Failures are logged and swallowed.
pub async fn send_bounded(
    session: &dyn Session,
    text: &str,
    thread_id: &str,
    timeout: Duration,
) -> Option<MessageReceipt> {
    match tokio::time::timeout(timeout, session.send(text, thread_id)).await {
        Ok(Ok(receipt)) => Some(receipt),
        Ok(Err(e)) => {
            tracing::warn!(thread = thread_id, "Send failed: {e}");
            None
        }
        Err(_) => {
            tracing::warn!(thread = thread_id, "Send timed out after {timeout:?}");
            None
        }
    }
}

/// Split into parts of at most `max` chars, breaking after whole lines.
///
/// A single line longer than `max` is cut hard. Parts are trimmed; blank
/// parts are dropped.
#[must_use]
pub fn split_lines(text: &str, max: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        for piece in hard_chunks(line, max) {
            let len = piece.chars().count();
            if current_len + len > max {
                push_trimmed(&mut parts, &current);
                current.clear();
                current_len = 0;
            }
            current.push_str(piece);
            current_len += len;
        }
    }
    push_trimmed(&mut parts, &current);
    parts
}

/// Split into parts of at most `max` chars, breaking at whitespace.
///
/// A word longer than `max` is cut hard. Parts are trimmed; blank parts are
/// dropped.
#[must_use]
pub fn split_words(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + max).min(chars.len());
        let cut = if end == chars.len() {
            end
        } else {
            (start + 1..=end)
                .rev()
                .find(|&i| chars[i].is_whitespace())
                .unwrap_or(end)
        };
        push_trimmed(&mut parts, &chars[start..cut].iter().collect::<String>());
        start = cut;
    }
    parts
}

fn hard_chunks(line: &str, max: usize) -> Vec<&str> {
    if max == 0 || line.chars().count() <= max {
        return vec![line];
    }
    let mut chunks = Vec::new();
    let mut rest = line;
    while !rest.is_empty() {
        let split = rest
            .char_indices()
            .nth(max)
            .map_or(rest.len(), |(idx, _)| idx);
        let (head, tail) = rest.split_at(split);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

fn push_trimmed(parts: &mut Vec<String>, part: &str) {
    let trimmed = part.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
}

/// Send `parts` in order, pausing `delay` between consecutive parts.
///
/// # Errors
/// Stops at the first failed send.
pub async fn send_parts(
    session: &dyn Session,
    thread_id: &str,
    parts: &[String],
    delay: Duration,
) -> Result<(), HandlerError> {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(delay).await;
        }
        session.send(part, thread_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use durand_session::provider::MemorySession;

    use super::*;

    #[test]
    fn test_split_lines_keeps_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc\n";
        assert_eq!(split_lines(text, 10), vec!["aaaa\nbbbb", "cccc"]);
        assert_eq!(split_lines("short", 10), vec!["short"]);
        assert_eq!(split_lines("abcdefghij\n", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_split_words_breaks_at_whitespace() {
        let parts = split_words("one two three four", 9);
        assert_eq!(parts, vec!["one two", "three", "four"]);
        assert!(parts.iter().all(|p| p.chars().count() <= 9));
        assert_eq!(split_words("abcdefgh", 3), vec!["abc", "def", "gh"]);
    }

    #[tokio::test]
    async fn test_closed_gate_rejects_sends() {
        let memory = MemorySession::new("bot");
        let gated = GatedSession::new(memory.clone(), Duration::from_secs(10));

        gated.send("before", "t1").await.unwrap();
        gated.close().await;
        assert!(!gated.is_open().await);
        assert!(gated.send("after", "t1").await.is_err());
        assert!(gated.logout().await.is_err());
        assert_eq!(memory.sent_to("t1"), vec!["before".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_parts_in_order() {
        let memory = MemorySession::new("bot");
        let parts = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let started = tokio::time::Instant::now();

        send_parts(memory.as_ref(), "t1", &parts, PART_DELAY)
            .await
            .unwrap();

        assert_eq!(memory.sent_to("t1"), parts);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_send_bounded_swallows_failures() {
        let memory = MemorySession::new("bot");
        memory.fail_sends(true);
        let receipt = send_bounded(memory.as_ref(), "hi", "t1", Duration::from_secs(1)).await;
        assert!(receipt.is_none());
    }
}
