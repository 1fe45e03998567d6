//! Tracing setup: console output plus a per-process log file.
//!
//! The log file lands in the logging directory, which the log-volume load
//! signal watches. Traffic therefore shows up as load.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use modelgate_core::config::LoggingConfig;

const DEFAULT_DIRECTIVES: &str = "info,modelgated=debug,modelgate=debug";

fn env_filter() -> anyhow::Result<EnvFilter> {
    Ok(match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => DEFAULT_DIRECTIVES.parse()?,
    })
}

/// Console-only logging for one-shot commands.
pub fn init_console() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

/// Console plus file logging for long-running modes.
///
/// Returns the path of the log file.
pub fn init(config: &LoggingConfig) -> anyhow::Result<PathBuf> {
    let (file, path) = open_log_file(&config.dir)?;

    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(config.json.then(|| fmt::layer().json()))
        .with((!config.json).then(|| fmt::layer()))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()?;
    Ok(path)
}

fn open_log_file(dir: &Path) -> anyhow::Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = dir.join(format!("modelgated-{secs}.log"));
    let file = File::options().create(true).append(true).open(&path)?;
    Ok((file, path))
}
