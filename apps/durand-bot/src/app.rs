//! Process wiring: registry, dispatcher, supervisor and status endpoint.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use durand_commands::{Builtins, CommandRegistry, Dispatcher};
use durand_core::AuditLog;
use durand_session::{
    ConnectionSupervisor, CredentialStore, ShutdownLatch, SupervisorStatus,
    provider::ConsoleProvider,
};
use durand_transport::{StatusReport, StatusSource, serve, status_router};
use tokio::sync::watch;

use crate::config::Args;

const SERVER_DRAIN: Duration = Duration::from_secs(5);

/// Live status assembled from published snapshots.
pub struct BotStatus {
    started_at: DateTime<Utc>,
    registry: Arc<CommandRegistry>,
    supervisor: watch::Receiver<SupervisorStatus>,
}

impl BotStatus {
    #[must_use]
    pub const fn new(
        started_at: DateTime<Utc>,
        registry: Arc<CommandRegistry>,
        supervisor: watch::Receiver<SupervisorStatus>,
    ) -> Self {
        Self {
            started_at,
            registry,
            supervisor,
        }
    }
}

impl StatusSource for BotStatus {
    fn report(&self) -> StatusReport {
        let snapshot = *self.supervisor.borrow();
        StatusReport::new(self.started_at, Utc::now(), self.registry.len(), snapshot)
    }
}

pub struct Application {
    args: Args,
    shutdown: ShutdownLatch,
}

impl Application {
    #[must_use]
    pub fn new(args: Args) -> Self {
        Self {
            args,
            shutdown: ShutdownLatch::new(),
        }
    }

    /// Run until shutdown or a terminal connect failure.
    ///
    /// Returns the process exit code.
    pub async fn run(self) -> i32 {
        let Self { args, shutdown } = self;
        let context = Arc::new(args.bot_context());

        let registry = Arc::new(CommandRegistry::new(
            args.commands_dir.clone(),
            Builtins::standard(args.gpt_config()),
        ));
        match registry.reload(true).await {
            Ok(outcome) => tracing::info!(?outcome, "Commands loaded"),
            Err(e) => tracing::warn!("Initial command scan failed: {e}"),
        }

        let mut dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&context),
            args.dispatcher_config(),
        );
        match AuditLog::open(&args.logs_file).await {
            Ok(audit) => dispatcher = dispatcher.with_audit_log(audit),
            Err(e) => tracing::warn!(path = %args.logs_file.display(), "Audit log unavailable: {e}"),
        }

        let store = CredentialStore::new(args.appstate_file.clone())
            .with_policy(args.credential_policy());
        let mut supervisor = ConnectionSupervisor::new(
            ConsoleProvider::new(),
            store,
            args.supervisor_config(),
            shutdown.clone(),
        );

        let source = Arc::new(BotStatus::new(
            context.started_at,
            Arc::clone(&registry),
            supervisor.status(),
        ));
        let server = {
            let latch = shutdown.clone();
            let addr = args.status_addr();
            tokio::spawn(async move {
                let stop = {
                    let latch = latch.clone();
                    async move { latch.triggered().await }
                };
                if let Err(e) = serve(addr, status_router(source), stop).await {
                    tracing::error!("{e}");
                }
            })
        };

        let signals = {
            let latch = shutdown.clone();
            tokio::spawn(async move {
                wait_for_signal().await;
                tracing::info!("Shutdown requested");
                latch.trigger();
            })
        };

        let dispatcher = Arc::new(dispatcher);
        let worker = tokio::spawn(async move { supervisor.run(dispatcher.as_ref()).await });

        let code = match worker.await {
            Ok(Ok(())) => {
                tracing::info!("Bot stopped");
                0
            }
            Ok(Err(e)) => {
                tracing::error!("Bot stopped: {e}");
                1
            }
            Err(e) if e.is_panic() => {
                tracing::error!("Supervisor task panicked");
                1
            }
            Err(e) => {
                tracing::error!("Supervisor task failed: {e}");
                1
            }
        };

        shutdown.trigger();
        signals.abort();
        if tokio::time::timeout(SERVER_DRAIN, server).await.is_err() {
            tracing::warn!("Status endpoint did not stop in time");
        }
        code
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use durand_session::SupervisorState;

    use super::*;

    #[tokio::test]
    async fn test_status_reflects_registry_and_supervisor() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(CommandRegistry::new(
            dir.path().to_path_buf(),
            Builtins::standard(durand_commands::GptConfig::default()),
        ));
        tokio::fs::write(dir.path().join("ping.toml"), "entry = \"ping\"\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("help.toml"), "entry = \"help\"\n")
            .await
            .unwrap();
        tokio_test::assert_ok!(registry.reload(true).await);

        let (tx, rx) = watch::channel(SupervisorStatus {
            state: SupervisorState::Connecting,
            retry_count: 1,
            connected: false,
        });
        let status = BotStatus::new(Utc::now(), Arc::clone(&registry), rx);

        let report = status.report();
        assert_eq!(report.command_count, 2);
        assert_eq!(report.retry_count, 1);
        assert_eq!(report.status, "Bot déconnecté");

        tx.send_replace(SupervisorStatus {
            state: SupervisorState::Listening,
            retry_count: 0,
            connected: true,
        });
        let report = status.report();
        assert!(report.connected);
        assert_eq!(report.state, SupervisorState::Listening);
        assert_eq!(report.status, "Bot actif");
    }
}
