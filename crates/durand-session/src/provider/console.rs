//! Console session provider for local runs.
//!
//! Every stdin line becomes a message from a fixed console user in a fixed
//! thread; everything the bot sends is printed to stdout.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use durand_core::{
    ConnectOptions, InboundEvent, LoginCredentials, ProviderError, Session, SessionProvider,
    traits::{EventStream, MessageReceipt, UserProfile},
};
use futures::StreamExt;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::{Mutex as AsyncMutex, mpsc},
};

const BOT_ID: &str = "console-bot";
const USER_ID: &str = "console-user";
const THREAD_ID: &str = "console";

type Feed = Result<InboundEvent, ProviderError>;
type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;

/// Provider that talks to the local terminal.
///
/// A single input reader serves every session the provider opens. Lines typed
/// while the supervisor reconnects are queued for the next session.
#[derive(Clone)]
pub struct ConsoleProvider {
    input: Arc<ConsoleInput>,
}

impl ConsoleProvider {
    /// Read from stdin.
    #[must_use]
    pub fn new() -> Self {
        Self::with_input(BufReader::new(tokio::io::stdin()))
    }

    /// Read lines from `source` instead of stdin.
    #[must_use]
    pub fn with_input(source: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            input: Arc::new(ConsoleInput {
                tx,
                rx: Arc::new(AsyncMutex::new(rx)),
                source: Mutex::new(Some(Box::new(source))),
            }),
        }
    }
}

impl Default for ConsoleProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConsoleProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleProvider").finish_non_exhaustive()
    }
}

struct ConsoleInput {
    // Held so the feed stays open after the input reaches EOF.
    tx: mpsc::UnboundedSender<Feed>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Feed>>>,
    // Taken by the first `listen`.
    source: Mutex<Option<LineSource>>,
}

impl ConsoleInput {
    fn start_reader(&self) {
        let Some(source) = self.source.lock().ok().and_then(|mut s| s.take()) else {
            return;
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut lines = source.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let event = InboundEvent::message(USER_ID, THREAD_ID, line);
                        if tx.send(Ok(event)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Console input closed");
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::MalformedEvent(e.to_string())));
                        break;
                    }
                }
            }
        });
    }

    fn subscribe(&self) -> EventStream {
        let rx = Arc::clone(&self.rx);
        futures::stream::unfold(rx, |rx| async move {
            let next = rx.lock().await.recv().await;
            next.map(|item| (item, rx))
        })
        .boxed()
    }
}

#[async_trait]
impl SessionProvider for ConsoleProvider {
    async fn connect(
        &self,
        credentials: LoginCredentials,
        _options: &ConnectOptions,
    ) -> Result<Arc<dyn Session>, ProviderError> {
        tracing::info!(?credentials, "Console session opened");
        Ok(Arc::new(ConsoleSession {
            next_id: Mutex::new(0),
            input: Arc::clone(&self.input),
        }))
    }
}

struct ConsoleSession {
    next_id: Mutex<u64>,
    input: Arc<ConsoleInput>,
}

#[async_trait]
impl Session for ConsoleSession {
    fn current_user_id(&self) -> String {
        BOT_ID.to_string()
    }

    async fn send(&self, text: &str, thread_id: &str) -> Result<MessageReceipt, ProviderError> {
        let message_id = {
            let mut next = self
                .next_id
                .lock()
                .map_err(|e| ProviderError::Other(e.to_string()))?;
            *next += 1;
            format!("console-{next}")
        };

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("[{thread_id}] {text}\n").as_bytes())
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(MessageReceipt {
            message_id,
            thread_id: thread_id.to_string(),
        })
    }

    async fn unsend(&self, _message_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, ProviderError> {
        Ok((user_id == USER_ID).then(|| UserProfile {
            id: USER_ID.to_string(),
            name: Some("Console".to_string()),
        }))
    }

    async fn mark_read(&self, _thread_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn listen(&self) -> Result<EventStream, ProviderError> {
        self.input.start_reader();
        Ok(self.input.subscribe())
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
