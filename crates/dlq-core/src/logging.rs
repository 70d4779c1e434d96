//! Logging init: `dlq.log` under the XDG state dir, or stderr when that fails.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,dlq=debug";
const LOG_FILE: &str = "dlq.log";

/// `RUST_LOG` if set and valid, otherwise [`DEFAULT_FILTER`].
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Directory holding `dlq.log` and the control socket (`~/.local/state/dlq`),
/// created if missing.
pub fn state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlq")?;
    xdg_dirs
        .create_state_directory("")
        .with_context(|| format!("creating state dir {}", xdg_dirs.get_state_home().display()))
}

/// Structured logging appended to `dlq.log` in [`state_dir`].
/// Errors if the state dir is unwritable; callers then use [`init_logging_stderr`].
pub fn init_logging() -> Result<()> {
    let path = state_dir()?.join(LOG_FILE);
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();

    tracing::info!(path = %path.display(), "dlq logging initialized");
    Ok(())
}

/// Logging to stderr only.
pub fn init_logging_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
