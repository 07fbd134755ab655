//! durand-bot: Messenger command bot with a status endpoint.

mod app;
mod config;
mod logging;

use clap::Parser;

use crate::{app::Application, config::Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    logging::init(&args.log_level, &args.logs_file)?;

    if let Err(e) = args.validate() {
        tracing::error!("Configuration error: {e}");
        std::process::exit(1);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        prefix = %args.prefix,
        commands_dir = %args.commands_dir.display(),
        login = ?args.login_method,
        "Starting durand-bot"
    );

    let code = Application::new(args).run().await;
    // The console reader may still hold stdin; exit without waiting on it.
    std::process::exit(code);
}
