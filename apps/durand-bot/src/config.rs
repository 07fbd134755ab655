//! Command-line and environment configuration.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use clap::{ArgAction, Parser, ValueEnum};
use durand_commands::{DispatcherConfig, GptConfig};
use durand_core::BotContext;
use durand_session::{Backoff, CredentialPolicy, LoginMethod, SupervisorConfig};
use serde_json::Value;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required when LOGIN_METHOD=credentials")]
    MissingSecret(&'static str),
    #[error("COMMAND_PREFIX must be non-empty and contain no whitespace")]
    InvalidPrefix,
    #[error("{name} {reason}")]
    InvalidValue {
        name: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LoginKind {
    Appstate,
    Credentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Messenger command bot.
#[derive(Parser, Debug, Clone)]
#[command(name = "durand-bot", version, about = "Messenger command bot with hot-reloadable commands")]
pub struct Args {
    /// Prefix that marks a message as a command
    #[arg(long, env = "COMMAND_PREFIX", default_value = "/")]
    pub prefix: String,

    /// Directory holding one `<name>.toml` manifest per command
    #[arg(long, env = "COMMANDS_DIR", default_value = "Commandes")]
    pub commands_dir: PathBuf,

    /// Persisted credential bundle
    #[arg(long, env = "APPSTATE_FILE", default_value = "appstate.json")]
    pub appstate_file: PathBuf,

    /// Audit log (warnings, errors, executed commands)
    #[arg(long, env = "LOGS_FILE", default_value = "logs.txt")]
    pub logs_file: PathBuf,

    /// Status endpoint bind address
    #[arg(long, env = "HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Status endpoint port
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 5000)]
    pub retry_delay_ms: u64,

    #[arg(long, env = "RECONNECT_DELAY_MS", default_value_t = 5000)]
    pub reconnect_delay_ms: u64,

    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 60)]
    pub connect_timeout_secs: u64,

    #[arg(long, env = "HANDLER_TIMEOUT_SECS", default_value_t = 30)]
    pub handler_timeout_secs: u64,

    /// Delay policy between failed connect attempts
    #[arg(long, env = "BACKOFF", value_enum, default_value_t = BackoffKind::Fixed)]
    pub backoff: BackoffKind,

    /// Upper bound for the exponential policy
    #[arg(long, env = "BACKOFF_MAX_MS", default_value_t = 60_000)]
    pub backoff_max_ms: u64,

    /// Keep retrying checkpoint / approval / bad-password failures
    #[arg(long, env = "RETRY_HUMAN_REQUIRED", default_value_t = false, action = ArgAction::Set)]
    pub retry_human_required: bool,

    /// Require 3 of c_user, xs, datr, fr, sb instead of 2 of c_user, xs, datr, fr
    #[arg(long, env = "STRICT_CREDENTIALS", default_value_t = false, action = ArgAction::Set)]
    pub strict_credentials: bool,

    /// Mark threads read before dispatching a command
    #[arg(long, env = "MARK_READ", default_value_t = true, action = ArgAction::Set)]
    pub mark_read: bool,

    /// Command named in "not found" replies
    #[arg(long, env = "HELP_COMMAND", default_value = "help")]
    pub help_command: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOGIN_METHOD", value_enum, default_value_t = LoginKind::Appstate)]
    pub login_method: LoginKind,

    #[arg(long, env = "FB_EMAIL")]
    pub fb_email: Option<String>,

    #[arg(long, env = "FB_PASSWORD", hide_env_values = true)]
    pub fb_password: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-3.5-turbo")]
    pub openai_model: String,

    /// Environment name shown by the info command
    #[arg(long, env = "BOT_ENV", default_value = "development")]
    pub environment: String,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.trim().is_empty())
}

impl Args {
    /// Validate configuration.
    ///
    /// # Errors
    /// Returns error on a missing secret or an unusable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() || self.prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidPrefix);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_RETRIES",
                reason: "must be at least 1",
            });
        }
        if self.handler_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "HANDLER_TIMEOUT_SECS",
                reason: "must be at least 1",
            });
        }
        if self.login_method == LoginKind::Credentials {
            if present(self.fb_email.as_ref()).is_none() {
                return Err(ConfigError::MissingSecret("FB_EMAIL"));
            }
            if present(self.fb_password.as_ref()).is_none() {
                return Err(ConfigError::MissingSecret("FB_PASSWORD"));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn openai_configured(&self) -> bool {
        present(self.openai_api_key.as_ref()).is_some()
    }

    #[must_use]
    pub const fn status_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    #[must_use]
    pub fn supervisor_config(&self) -> SupervisorConfig {
        let login = match self.login_method {
            LoginKind::Appstate => LoginMethod::AppState,
            LoginKind::Credentials => LoginMethod::Credentials {
                email: self.fb_email.clone().unwrap_or_default(),
                password: self.fb_password.clone().unwrap_or_default(),
            },
        };
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                max: Duration::from_millis(self.backoff_max_ms),
            },
        };
        SupervisorConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            backoff,
            retry_human_required: self.retry_human_required,
            login,
            ..SupervisorConfig::default()
        }
    }

    #[must_use]
    pub fn credential_policy(&self) -> CredentialPolicy {
        if self.strict_credentials {
            CredentialPolicy::strict()
        } else {
            CredentialPolicy::default()
        }
    }

    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            handler_timeout: Duration::from_secs(self.handler_timeout_secs),
            mark_read: self.mark_read,
            ..DispatcherConfig::default()
        }
    }

    #[must_use]
    pub fn gpt_config(&self) -> GptConfig {
        GptConfig {
            api_key: present(self.openai_api_key.as_ref()).map(ToString::to_string),
            base_url: self.openai_base_url.clone(),
            model: self.openai_model.clone(),
            ..GptConfig::default()
        }
    }

    /// Context handed to every command invocation.
    #[must_use]
    pub fn bot_context(&self) -> BotContext {
        let mut context = BotContext::new(self.prefix.clone(), self.commands_dir.clone())
            .with_help_command(self.help_command.clone());
        context.set_metadata("environment", Value::String(self.environment.clone()));
        context.set_metadata("openai_configured", Value::Bool(self.openai_configured()));
        context.set_metadata(
            "version",
            Value::String(env!("CARGO_PKG_VERSION").to_string()),
        );
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["durand-bot"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_credentials_login_requires_secrets() {
        let args = parse(&[
            "--login-method",
            "credentials",
            "--fb-email",
            "",
            "--fb-password",
            "",
        ]);
        assert!(matches!(
            args.validate(),
            Err(ConfigError::MissingSecret("FB_EMAIL"))
        ));

        let args = parse(&[
            "--login-method",
            "credentials",
            "--fb-email",
            "bot@example.com",
            "--fb-password",
            "secret",
        ]);
        assert!(args.validate().is_ok());
        assert!(matches!(
            args.supervisor_config().login,
            LoginMethod::Credentials { .. }
        ));
    }

    #[test]
    fn test_rejects_unusable_values() {
        assert!(matches!(
            parse(&["--prefix", "! "]).validate(),
            Err(ConfigError::InvalidPrefix)
        ));
        assert!(matches!(
            parse(&["--max-retries", "0"]).validate(),
            Err(ConfigError::InvalidValue { name: "MAX_RETRIES", .. })
        ));
    }

    #[test]
    fn test_derived_configs() {
        let args = parse(&[
            "--prefix",
            "!",
            "--backoff",
            "exponential",
            "--retry-delay-ms",
            "100",
            "--mark-read",
            "false",
            "--strict-credentials",
            "true",
            "--openai-api-key",
            "sk-test",
            "--environment",
            "production",
        ]);

        let supervisor = args.supervisor_config();
        assert_eq!(supervisor.retry_delay, Duration::from_millis(100));
        assert!(matches!(supervisor.backoff, Backoff::Exponential { .. }));
        assert!(!args.dispatcher_config().mark_read);
        assert_eq!(args.credential_policy(), CredentialPolicy::strict());
        assert_eq!(args.gpt_config().api_key.as_deref(), Some("sk-test"));

        let context = args.bot_context();
        assert_eq!(context.prefix, "!");
        assert!(context.flag("openai_configured"));
        assert_eq!(context.text("environment"), Some("production"));
    }
}
