use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sysinfo::System;
use tokio::time::Instant;

use crate::handler::{CommandHandler, CommandInfo, HandlerError, Invocation};

const TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S UTC";

/// Reports uptime, configuration and the requesting user.
///
/// Reads `environment`, `openai_configured` and `version` from the bot
/// context metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct InfoCommand;

pub(super) fn info() -> CommandInfo {
    super::describe(
        "info",
        "Affiche les informations et statistiques du bot",
        "/info",
        "Utilitaires",
    )
}

/// Resident memory of this process in whole megabytes.
fn process_memory_mb() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return None;
    }
    system.process(pid).map(|p| p.memory() / (1024 * 1024))
}

fn format_memory(megabytes: Option<u64>) -> String {
    megabytes.map_or_else(|| "inconnue".to_string(), |mb| format!("{mb} MB"))
}

/// `Xj Xh Xm Xs`.
fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!(
        "{}j {}h {}m {}s",
        secs / 86_400,
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60
    )
}

#[async_trait]
impl CommandHandler for InfoCommand {
    async fn invoke(&self, invocation: Invocation) -> Result<(), HandlerError> {
        let started = Instant::now();
        let context = &invocation.context;
        let sender = &invocation.event.sender_id;

        let user_name = match invocation.session.fetch_user(sender).await {
            Ok(profile) => profile.and_then(|p| p.name),
            Err(e) => {
                tracing::warn!(sender = %sender, "Failed to fetch user profile: {e}");
                None
            }
        }
        .unwrap_or_else(|| "Utilisateur inconnu".to_string());

        let memory = tokio::task::spawn_blocking(process_memory_mb)
            .await
            .ok()
            .flatten();

        let openai = if context.flag("openai_configured") {
            "✅ Configuré"
        } else {
            "❌ Non configuré"
        };

        let text = format!(
            "🤖 **INFORMATIONS DU BOT**\n\n\
             📊 **Statistiques:**\n\
             • Uptime: {uptime}\n\
             • Commandes: {count}\n\
             • Mémoire: {memory}\n\n\
             👤 **Utilisateur:**\n\
             • Nom: {user_name}\n\
             • ID: {sender}\n\n\
             🔧 **Configuration:**\n\
             • Préfixe: {prefix}\n\
             • Environnement: {environment}\n\
             • OpenAI: {openai}\n\n\
             📅 **Temps:**\n\
             • Démarrage: {start}\n\
             • Actuel: {now}\n\n\
             🏷️ **Version:**\n\
             • Bot: v{version}\n\n\
             💡 **Utilisation:**\n\
             Tapez `{help}` pour voir toutes les commandes disponibles.",
            uptime = format_uptime(context.uptime()),
            count = invocation.commands.len(),
            memory = format_memory(memory),
            prefix = context.prefix,
            environment = context.text("environment").unwrap_or("development"),
            start = context.started_at.format(TIME_FORMAT),
            now = Utc::now().format(TIME_FORMAT),
            version = context.text("version").unwrap_or(env!("CARGO_PKG_VERSION")),
            help = context.help_invocation(),
        );

        let elapsed = started.elapsed().as_millis();
        invocation.reply(&text).await?;
        invocation
            .reply(&format!("⚡ Temps de traitement: {elapsed}ms"))
            .await?;
        Ok(())
    }
}
