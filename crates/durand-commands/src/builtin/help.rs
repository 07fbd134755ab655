use std::{collections::BTreeMap, fmt::Write as _};

use async_trait::async_trait;

use crate::{
    handler::{CommandDescriptor, CommandHandler, CommandInfo, HandlerError, Invocation},
    reply::{MAX_MESSAGE_CHARS, PART_DELAY, send_parts, split_lines},
};

const HELP_PART_CHARS: usize = 1800;

/// Lists the registered commands, or details one of them.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelpCommand;

pub(super) fn info() -> CommandInfo {
    CommandInfo {
        examples: vec!["/help".into(), "/help gpt".into(), "/help ping".into()],
        ..super::describe(
            "help",
            "Affiche la liste des commandes disponibles",
            "/help [commande]",
            "Utilitaires",
        )
    }
}

fn details(descriptor: &CommandDescriptor, info: &CommandInfo, prefix: &str) -> String {
    let title = info.name.as_deref().unwrap_or(&descriptor.name).to_uppercase();
    let mut text = format!("📋 **{title}**\n\n");
    let _ = writeln!(text, "📝 **Description:** {}", descriptor.description());
    let _ = writeln!(text, "💡 **Usage:** {}", descriptor.usage(prefix));
    if let Some(category) = &info.category {
        let _ = writeln!(text, "📂 **Catégorie:** {category}");
    }
    if !info.examples.is_empty() {
        text.push_str("\n🌟 **Exemples:**\n");
        for example in &info.examples {
            let _ = writeln!(text, "• {example}");
        }
    }
    text
}

fn overview(invocation: &Invocation) -> String {
    let prefix = &invocation.context.prefix;
    let mut categories: BTreeMap<&str, Vec<&CommandDescriptor>> = BTreeMap::new();
    let mut uncategorised = Vec::new();
    for descriptor in invocation.commands.values() {
        match descriptor.category() {
            Some(category) => categories.entry(category).or_default().push(descriptor),
            None => uncategorised.push(descriptor),
        }
    }

    let mut text = String::from("🤖 **COMMANDES DISPONIBLES**\n\n");
    let sections = categories
        .into_iter()
        .map(|(name, cmds)| (format!("📂 **{}**", name.to_uppercase()), cmds))
        .chain(
            (!uncategorised.is_empty())
                .then(|| ("📋 **AUTRES COMMANDES**".to_string(), uncategorised)),
        );
    for (heading, commands) in sections {
        let _ = writeln!(text, "{heading}");
        for descriptor in commands {
            let _ = writeln!(text, "• {}", descriptor.usage(prefix));
            let _ = writeln!(text, "  └ {}", descriptor.description());
        }
        text.push('\n');
    }

    let _ = writeln!(
        text,
        "💡 **Astuce:** Tapez `{} [commande]` pour plus de détails sur une commande spécifique.",
        invocation.context.help_invocation()
    );
    let _ = writeln!(text, "🔧 **Préfixe:** {prefix}");
    let _ = write!(
        text,
        "📊 **Total:** {} commande(s) disponible(s)",
        invocation.commands.len()
    );
    text
}

#[async_trait]
impl CommandHandler for HelpCommand {
    async fn invoke(&self, invocation: Invocation) -> Result<(), HandlerError> {
        if let Some(requested) = invocation.args.first() {
            let requested = requested.to_lowercase();
            let text = match invocation.commands.get(&requested) {
                Some(descriptor) => match &descriptor.info {
                    Some(info) => details(descriptor, info, &invocation.context.prefix),
                    None => format!(
                        "ℹ️ Commande \"{requested}\" trouvée mais aucune information détaillée disponible."
                    ),
                },
                None => format!("❌ Commande \"{requested}\" introuvable."),
            };
            invocation.reply(&text).await?;
            return Ok(());
        }

        if invocation.commands.is_empty() {
            invocation.reply("❌ Aucune commande disponible.").await?;
            return Ok(());
        }

        let text = overview(&invocation);
        if text.chars().count() > MAX_MESSAGE_CHARS {
            let parts = split_lines(&text, HELP_PART_CHARS);
            send_parts(
                invocation.session.as_ref(),
                &invocation.event.thread_id,
                &parts,
                PART_DELAY,
            )
            .await
        } else {
            invocation.reply(&text).await?;
            Ok(())
        }
    }
}
