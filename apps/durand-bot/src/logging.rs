use std::{fs::OpenOptions, path::Path, sync::Arc};

use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Install the global subscriber.
///
/// Everything passing the filter goes to the console; warnings and errors are
/// also appended to `logs_file` without colors.
///
/// # Errors
/// Returns error if the filter is invalid or the log file cannot be opened.
pub fn init(log_level: &str, logs_file: &Path) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_file)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .with_filter(LevelFilter::WARN),
        )
        .try_init()?;

    Ok(())
}
