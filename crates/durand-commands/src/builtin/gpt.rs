use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    handler::{CommandHandler, CommandInfo, HandlerError, Invocation},
    reply::{MAX_MESSAGE_CHARS, PART_DELAY, send_parts, split_words},
};

const GPT_PART_CHARS: usize = 1500;
const FIRST_HEADER: &str = "🤖 GPT répond:\n\n";
const NEXT_HEADER: &str = "📄 Suite:\n\n";

/// Settings of the OpenAI-compatible chat-completions backend.
#[derive(Debug, Clone)]
pub struct GptConfig {
    pub api_key: Option<String>,
    /// Base URL up to and including the version segment.
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for GptConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            system_prompt: "Tu es un assistant intelligent et utile. Réponds de manière concise et claire en français.".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
enum GptError {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("response carried no answer")]
    EmptyAnswer,
}

impl GptError {
    fn user_message(&self) -> &'static str {
        match self {
            Self::Status(401) => "🔑 Clé API OpenAI invalide.",
            Self::Status(429) => "⏰ Limite de taux atteinte. Réessayez dans quelques minutes.",
            Self::Status(400) => "📝 Requête invalide. Vérifiez votre question.",
            Self::Timeout => {
                "⏱️ Délai d'attente dépassé. Réessayez avec une question plus courte."
            }
            _ => "❌ Erreur lors de la communication avec GPT.",
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AnswerMessage,
}

#[derive(Deserialize)]
struct AnswerMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Asks a chat-completions endpoint and relays the answer.
pub struct GptCommand {
    config: GptConfig,
    client: reqwest::Client,
}

impl GptCommand {
    #[must_use]
    pub fn new(config: GptConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn ask(&self, api_key: &str, question: &str) -> Result<String, GptError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: question,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { GptError::Timeout } else { e.into() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GptError::Status(status.as_u16()));
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(GptError::EmptyAnswer)
    }
}

/// Answer as a list of messages with their headers.
fn answer_parts(answer: &str) -> Vec<String> {
    if answer.chars().count() <= MAX_MESSAGE_CHARS {
        return vec![format!("{FIRST_HEADER}{answer}")];
    }
    split_words(answer, GPT_PART_CHARS)
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            let header = if i == 0 { FIRST_HEADER } else { NEXT_HEADER };
            format!("{header}{part}")
        })
        .collect()
}

pub(super) fn info() -> CommandInfo {
    CommandInfo {
        examples: vec![
            "/gpt Qui est Albert Einstein ?".into(),
            "/gpt Écris-moi un poème sur la nature".into(),
            "/gpt Comment fonctionne la photosynthèse ?".into(),
        ],
        ..super::describe(
            "gpt",
            "Pose une question à GPT (OpenAI)",
            "/gpt [votre question]",
            "IA",
        )
    }
}

#[async_trait]
impl CommandHandler for GptCommand {
    async fn invoke(&self, invocation: Invocation) -> Result<(), HandlerError> {
        if invocation.args.is_empty() {
            invocation
                .reply(&format!(
                    "❓ Veuillez poser une question.\n💡 Usage: {}{} Votre question ici",
                    invocation.context.prefix, invocation.name
                ))
                .await?;
            return Ok(());
        }

        let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            invocation
                .reply("❌ Clé API OpenAI manquante. Configurez OPENAI_API_KEY dans le fichier .env")
                .await?;
            return Ok(());
        };

        let loading = invocation.reply("🤔 GPT réfléchit...").await?;
        let question = invocation.rest();

        match self.ask(api_key, &question).await {
            Ok(answer) => {
                send_parts(
                    invocation.session.as_ref(),
                    &invocation.event.thread_id,
                    &answer_parts(&answer),
                    PART_DELAY,
                )
                .await?;
            }
            Err(e) => {
                tracing::error!(sender = %invocation.event.sender_id, "GPT request failed: {e}");
                invocation.reply(e.user_message()).await?;
            }
        }

        if let Err(e) = invocation.session.unsend(&loading.message_id).await {
            tracing::debug!("Failed to retract loading message: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc};

    use durand_core::{BotContext, InboundEvent};
    use durand_session::provider::MemorySession;
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn invocation(session: &Arc<MemorySession>, question: &str) -> Invocation {
        Invocation {
            name: "gpt".into(),
            args: question.split_whitespace().map(ToString::to_string).collect(),
            event: InboundEvent::message("u1", "t1", format!("/gpt {question}")),
            session: session.clone(),
            context: Arc::new(BotContext::new("/", PathBuf::from("cmds"))),
            commands: Arc::default(),
        }
    }

    fn command(server: &MockServer) -> GptCommand {
        GptCommand::new(GptConfig {
            api_key: Some("test-key".into()),
            base_url: format!("{}/v1", server.base_url()),
            ..GptConfig::default()
        })
    }

    #[tokio::test]
    async fn test_answer_is_relayed_and_loading_retracted() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer test-key")
                .json_body_includes(
                    json!({
                        "model": "gpt-3.5-turbo",
                        "messages": [{"role": "system"}, {"role": "user", "content": "Qui es-tu ?"}]
                    })
                    .to_string(),
                );
            then.status(200).json_body(json!({
                "choices": [{"message": {"content": "  Un assistant.  "}}]
            }));
        });

        let session = MemorySession::new("bot");
        command(&server)
            .invoke(invocation(&session, "Qui es-tu ?"))
            .await
            .unwrap();

        mock.assert();
        let sent = session.sent();
        assert_eq!(sent[0].text, "🤔 GPT réfléchit...");
        assert_eq!(sent[1].text, "🤖 GPT répond:\n\nUn assistant.");
        assert_eq!(session.unsent(), vec![sent[0].message_id.clone()]);
    }

    #[tokio::test]
    async fn test_http_errors_map_to_user_messages() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).json_body(json!({"error": {"message": "slow down"}}));
        });

        let session = MemorySession::new("bot");
        command(&server)
            .invoke(invocation(&session, "bonjour"))
            .await
            .unwrap();

        let sent = session.sent_to("t1");
        assert_eq!(
            sent[1],
            "⏰ Limite de taux atteinte. Réessayez dans quelques minutes."
        );
    }

    #[tokio::test]
    async fn test_usage_and_missing_key() {
        let session = MemorySession::new("bot");
        GptCommand::new(GptConfig::default())
            .invoke(invocation(&session, ""))
            .await
            .unwrap();
        GptCommand::new(GptConfig::default())
            .invoke(invocation(&session, "bonjour"))
            .await
            .unwrap();

        let sent = session.sent_to("t1");
        assert!(sent[0].starts_with("❓ Veuillez poser une question."));
        assert!(sent[0].contains("Usage: /gpt"));
        assert!(sent[1].starts_with("❌ Clé API OpenAI manquante"));
    }

    #[test]
    fn test_long_answer_parts() {
        let answer = "mot ".repeat(700);
        let parts = answer_parts(answer.trim());
        assert!(parts.len() > 1);
        assert!(parts[0].starts_with(FIRST_HEADER));
        assert!(parts[1..].iter().all(|p| p.starts_with(NEXT_HEADER)));
        assert_eq!(GptError::Status(401).user_message(), "🔑 Clé API OpenAI invalide.");
        assert_eq!(answer_parts("court"), vec!["🤖 GPT répond:\n\ncourt".to_string()]);
    }
}
