use async_trait::async_trait;
use tokio::time::Instant;

use crate::handler::{CommandHandler, CommandInfo, HandlerError, Invocation};

/// Replies `Pong!` and reports the round-trip of that reply.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingCommand;

pub(super) fn info() -> CommandInfo {
    super::describe("ping", "Teste la réactivité du bot", "/ping", "Utilitaires")
}

#[async_trait]
impl CommandHandler for PingCommand {
    async fn invoke(&self, invocation: Invocation) -> Result<(), HandlerError> {
        let started = Instant::now();
        invocation.reply("🏓 Pong!").await?;
        let elapsed = started.elapsed().as_millis();
        invocation
            .reply(&format!("⚡ Temps de réponse: {elapsed}ms"))
            .await?;
        Ok(())
    }
}
