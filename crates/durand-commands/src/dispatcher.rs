//! Message dispatcher.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use durand_core::{AuditLog, BotContext, EventHandler, InboundEvent, Session};
use futures::FutureExt;

use crate::{
    handler::{HandlerError, Invocation},
    registry::CommandRegistry,
    reply::{GatedSession, send_bounded},
};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on one handler invocation.
    pub handler_timeout: Duration,
    /// Upper bound on each send made by the dispatcher itself.
    pub send_timeout: Duration,
    /// Mark the thread read before dispatching.
    pub mark_read: bool,
    /// Rescan the commands directory before each lookup (mtime gated).
    pub rescan: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
            mark_read: true,
            rescan: true,
        }
    }
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a command for us.
    Ignored,
    /// No such command; the "not found" reply was sent.
    NotFound(String),
    /// Handler completed.
    Completed(String),
    /// Handler failed; the error reply was sent.
    Failed(String),
    /// Handler exceeded its deadline; the timeout reply was sent.
    TimedOut(String),
}

/// Routes message events to registered commands.
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    context: Arc<BotContext>,
    config: DispatcherConfig,
    audit: Option<AuditLog>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<CommandRegistry>,
        context: Arc<BotContext>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            context,
            config,
            audit: None,
        }
    }

    /// Append one line per executed command to `audit`.
    #[must_use]
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Split a prefixed body into `(name, args)`.
    ///
    /// Returns `None` when the body is not a command.
    #[must_use]
    pub fn parse(&self, body: &str) -> Option<(String, Vec<String>)> {
        let rest = body.trim().strip_prefix(self.context.prefix.as_str())?;
        let mut words = rest.split_whitespace();
        let name = words.next()?.to_string();
        Some((name, words.map(ToString::to_string).collect()))
    }

    /// Handle one event. Never fails: every error ends in at most one reply.
    pub async fn handle(&self, session: &Arc<dyn Session>, event: InboundEvent) -> DispatchOutcome {
        if !event.is_message() || event.sender_id == session.current_user_id() {
            return DispatchOutcome::Ignored;
        }
        let Some((typed, args)) = event.text().and_then(|body| self.parse(body)) else {
            return DispatchOutcome::Ignored;
        };
        let name = typed.to_lowercase();
        let thread = event.thread_id.clone();

        if self.config.mark_read {
            if let Err(e) = session.mark_read(&thread).await {
                tracing::debug!(thread = %thread, "Failed to mark thread read: {e}");
            }
        }

        if self.config.rescan {
            if let Err(e) = self.registry.reload(false).await {
                tracing::warn!("Command rescan failed, keeping current registry: {e}");
            }
        }

        let commands = self.registry.snapshot();
        let Some(descriptor) = commands.get(&name).cloned() else {
            tracing::info!(command = %typed, sender = %event.sender_id, "Unknown command");
            let text = format!(
                "❌ Commande \"{typed}\" introuvable. Tapez {} pour la liste des commandes.",
                self.context.help_invocation()
            );
            send_bounded(session.as_ref(), &text, &thread, self.config.send_timeout).await;
            return DispatchOutcome::NotFound(name);
        };

        tracing::info!(
            command = %name,
            sender = %event.sender_id,
            thread = %thread,
            "Executing command"
        );
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.command(&event.sender_id, &thread, &name, &args).await {
                tracing::warn!("Failed to write audit log: {e}");
            }
        }

        let gated = GatedSession::new(Arc::clone(session), self.config.send_timeout);
        let invocation = Invocation {
            name: name.clone(),
            args,
            event,
            session: gated.clone(),
            context: Arc::clone(&self.context),
            commands,
        };

        let run = AssertUnwindSafe(descriptor.handler.invoke(invocation)).catch_unwind();
        let result = tokio::time::timeout(self.config.handler_timeout, run).await;
        gated.close().await;

        let error = match result {
            Ok(Ok(Ok(()))) => return DispatchOutcome::Completed(name),
            Ok(Ok(Err(e))) => e,
            Ok(Err(_panic)) => HandlerError::Failed("la commande a planté".into()),
            Err(_) => HandlerError::TimedOut(self.config.handler_timeout),
        };

        tracing::error!(command = %name, thread = %thread, "Command failed: {error}");
        send_bounded(
            session.as_ref(),
            &error.user_message(),
            &thread,
            self.config.send_timeout,
        )
        .await;

        match error {
            HandlerError::TimedOut(_) => DispatchOutcome::TimedOut(name),
            _ => DispatchOutcome::Failed(name),
        }
    }
}

#[async_trait]
impl EventHandler for Dispatcher {
    async fn on_event(&self, session: &Arc<dyn Session>, event: InboundEvent) {
        let outcome = self.handle(session, event).await;
        tracing::trace!(?outcome, "Event dispatched");
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use durand_core::{
        ProviderError,
        traits::{EventStream, MessageReceipt, UserProfile},
    };
    use durand_session::provider::MemorySession;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        builtin::{Builtins, GptConfig},
        handler::{CommandHandler, CommandInfo},
    };

    /// Sleeps past the deadline after spawning a task that replies late.
    struct Sluggish;

    #[async_trait]
    impl CommandHandler for Sluggish {
        async fn invoke(&self, invocation: Invocation) -> Result<(), HandlerError> {
            let late = invocation.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(45)).await;
                let _ = late.reply("late from task").await;
            });
            tokio::time::sleep(Duration::from_secs(60)).await;
            invocation.reply("late from handler").await?;
            Ok(())
        }
    }

    /// Spawns a reply that the platform never acknowledges, then overruns.
    struct Stuck;

    #[async_trait]
    impl CommandHandler for Stuck {
        async fn invoke(&self, invocation: Invocation) -> Result<(), HandlerError> {
            let stalled = invocation.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(25)).await;
                let _ = stalled.reply("stuck").await;
            });
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    /// Memory session whose send of `"stuck"` never completes.
    struct Stalling(Arc<MemorySession>);

    #[async_trait]
    impl Session for Stalling {
        fn current_user_id(&self) -> String {
            self.0.current_user_id()
        }

        async fn send(&self, text: &str, thread_id: &str) -> Result<MessageReceipt, ProviderError> {
            if text == "stuck" {
                std::future::pending::<()>().await;
            }
            self.0.send(text, thread_id).await
        }

        async fn unsend(&self, message_id: &str) -> Result<(), ProviderError> {
            self.0.unsend(message_id).await
        }

        async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, ProviderError> {
            self.0.fetch_user(user_id).await
        }

        async fn mark_read(&self, thread_id: &str) -> Result<(), ProviderError> {
            self.0.mark_read(thread_id).await
        }

        async fn listen(&self) -> Result<EventStream, ProviderError> {
            self.0.listen().await
        }

        async fn logout(&self) -> Result<(), ProviderError> {
            self.0.logout().await
        }
    }

    struct Failing;

    #[async_trait]
    impl CommandHandler for Failing {
        async fn invoke(&self, _invocation: Invocation) -> Result<(), HandlerError> {
            Err(HandlerError::Failed("boom".into()))
        }
    }

    async fn setup(dir: &Path, builtins: Builtins) -> (Dispatcher, Arc<CommandRegistry>) {
        for name in ["ping", "help", "slow", "stuck", "fail"] {
            tokio::fs::write(dir.join(format!("{name}.toml")), format!("entry = \"{name}\""))
                .await
                .unwrap();
        }
        let registry = Arc::new(CommandRegistry::new(dir, builtins));
        registry.reload(true).await.unwrap();
        let context = Arc::new(BotContext::new("/", PathBuf::from(dir)));
        let dispatcher = Dispatcher::new(Arc::clone(&registry), context, DispatcherConfig::default());
        (dispatcher, registry)
    }

    fn builtins() -> Builtins {
        Builtins::standard(GptConfig::default())
            .register("slow", Arc::new(Sluggish), CommandInfo::default())
            .register("stuck", Arc::new(Stuck), CommandInfo::default())
            .register("fail", Arc::new(Failing), CommandInfo::default())
    }

    fn as_session(memory: &Arc<MemorySession>) -> Arc<dyn Session> {
        memory.clone()
    }

    #[tokio::test]
    async fn test_ping_end_to_end() {
        let dir = tempdir().unwrap();
        let (dispatcher, _) = setup(dir.path(), builtins()).await;
        let memory = MemorySession::new("bot");

        let outcome = dispatcher
            .handle(&as_session(&memory), InboundEvent::message("u1", "t1", "/ping"))
            .await;

        assert_eq!(outcome, DispatchOutcome::Completed("ping".into()));
        let sent = memory.sent_to("t1");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], "🏓 Pong!");
        assert!(sent[1].starts_with("⚡ Temps de réponse: "));
        assert!(sent[1].ends_with("ms"));
        assert_eq!(memory.read_threads(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_command_replies_once() {
        let dir = tempdir().unwrap();
        let (dispatcher, registry) = setup(dir.path(), builtins()).await;
        let before: Vec<String> = registry.snapshot().keys().cloned().collect();
        let memory = MemorySession::new("bot");

        let outcome = dispatcher
            .handle(&as_session(&memory), InboundEvent::message("u1", "t1", "/Unknown arg"))
            .await;

        assert_eq!(outcome, DispatchOutcome::NotFound("unknown".into()));
        assert_eq!(
            memory.sent_to("t1"),
            vec![
                "❌ Commande \"Unknown\" introuvable. Tapez /help pour la liste des commandes."
                    .to_string()
            ]
        );
        let after: Vec<String> = registry.snapshot().keys().cloned().collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_non_commands_are_ignored() {
        let dir = tempdir().unwrap();
        let (dispatcher, _) = setup(dir.path(), builtins()).await;
        let memory = MemorySession::new("bot");
        let session = as_session(&memory);

        for event in [
            InboundEvent::message("u1", "t1", "ping"),
            InboundEvent::message("u1", "t1", "hello /ping"),
            InboundEvent::message("u1", "t1", "/"),
            InboundEvent::message("u1", "t1", "   "),
            InboundEvent::message("bot", "t1", "/ping"),
            InboundEvent::other("typ", "u1", "t1"),
        ] {
            assert_eq!(dispatcher.handle(&session, event).await, DispatchOutcome::Ignored);
        }
        assert!(memory.sent().is_empty());
        assert!(memory.read_threads().is_empty());
    }

    #[tokio::test]
    async fn test_parse_splits_on_whitespace() {
        let dir = tempdir().unwrap();
        let (dispatcher, _) = setup(dir.path(), builtins()).await;

        assert_eq!(
            dispatcher.parse("  /gpt  Qui   es-tu ? "),
            Some((
                "gpt".to_string(),
                vec!["Qui".to_string(), "es-tu".to_string(), "?".to_string()]
            ))
        );
        assert_eq!(dispatcher.parse("/ "), None);
        assert_eq!(dispatcher.parse("!ping"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_sends_single_reply_and_no_late_reply() {
        let dir = tempdir().unwrap();
        let (dispatcher, _) = setup(dir.path(), builtins()).await;
        let memory = MemorySession::new("bot");

        let outcome = dispatcher
            .handle(&as_session(&memory), InboundEvent::message("u1", "t1", "/slow"))
            .await;
        assert_eq!(outcome, DispatchOutcome::TimedOut("slow".into()));

        tokio::time::sleep(Duration::from_secs(120)).await;

        let sent = memory.sent_to("t1");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("30s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_cannot_block_timeout_reply() {
        let dir = tempdir().unwrap();
        let (_, registry) = setup(dir.path(), builtins()).await;
        let config = DispatcherConfig {
            rescan: false,
            ..DispatcherConfig::default()
        };
        let context = Arc::new(BotContext::new("/", dir.path().to_path_buf()));
        let dispatcher = Dispatcher::new(registry, context, config);
        let memory = MemorySession::new("bot");
        let session: Arc<dyn Session> = Arc::new(Stalling(memory.clone()));
        let started = tokio::time::Instant::now();

        let outcome = tokio::time::timeout(
            Duration::from_secs(600),
            dispatcher.handle(&session, InboundEvent::message("u1", "t1", "/stuck")),
        )
        .await
        .expect("dispatch must return after the handler deadline");

        assert_eq!(outcome, DispatchOutcome::TimedOut("stuck".into()));
        assert!(started.elapsed() < Duration::from_secs(60));
        let sent = memory.sent_to("t1");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("30s"));
    }

    #[tokio::test]
    async fn test_handler_failure_sends_error_reply() {
        let dir = tempdir().unwrap();
        let (dispatcher, _) = setup(dir.path(), builtins()).await;
        let memory = MemorySession::new("bot");

        let outcome = dispatcher
            .handle(&as_session(&memory), InboundEvent::message("u1", "t1", "/FAIL now"))
            .await;

        assert_eq!(outcome, DispatchOutcome::Failed("fail".into()));
        assert_eq!(memory.sent_to("t1"), vec!["❌ Erreur: boom".to_string()]);
    }

    #[tokio::test]
    async fn test_send_failures_are_swallowed() {
        let dir = tempdir().unwrap();
        let (dispatcher, _) = setup(dir.path(), builtins()).await;
        let memory = MemorySession::new("bot");
        memory.fail_sends(true);

        let outcome = dispatcher
            .handle(&as_session(&memory), InboundEvent::message("u1", "t1", "/nope"))
            .await;
        assert_eq!(outcome, DispatchOutcome::NotFound("nope".into()));

        let outcome = dispatcher
            .handle(&as_session(&memory), InboundEvent::message("u1", "t1", "/ping"))
            .await;
        assert_eq!(outcome, DispatchOutcome::Failed("ping".into()));
        assert!(memory.sent().is_empty());
    }

    #[tokio::test]
    async fn test_new_manifest_is_picked_up_without_restart() {
        let dir = tempdir().unwrap();
        let (dispatcher, _) = setup(dir.path(), builtins()).await;
        let memory = MemorySession::new("bot");

        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::fs::write(dir.path().join("salut.toml"), "reply = \"Salut {sender}!\"")
            .await
            .unwrap();

        let outcome = dispatcher
            .handle(&as_session(&memory), InboundEvent::message("u7", "t1", "/salut"))
            .await;
        assert_eq!(outcome, DispatchOutcome::Completed("salut".into()));
        assert_eq!(memory.sent_to("t1"), vec!["Salut u7!".to_string()]);
    }

    #[tokio::test]
    async fn test_commands_are_audited() {
        let dir = tempdir().unwrap();
        let (dispatcher, _) = setup(dir.path(), builtins()).await;
        let log_path = dir.path().join("logs.txt");
        let dispatcher = dispatcher.with_audit_log(AuditLog::open(&log_path).await.unwrap());
        let memory = MemorySession::new("bot");

        dispatcher
            .handle(&as_session(&memory), InboundEvent::message("u1", "t1", "/ping fast"))
            .await;

        let log = tokio::fs::read_to_string(&log_path).await.unwrap();
        assert!(log.contains("sender=u1 thread=t1 command=ping args=[\"fast\"]"));
    }
}
