//! Logging setup.
//!
//! The viewer owns the terminal, so events go to a per-launch file under
//! `logs/` only. Filtering follows `RUST_LOG`, defaulting to `info`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Local;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

pub const LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "census-multinom";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to prepare log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the global subscriber. Subsequent calls are no-ops.
pub fn init(dir: &Path) -> Result<PathBuf, LoggingError> {
    let file_name = log_file_name();
    let log_path = dir.join(&file_name);
    if LOG_GUARD.get().is_some() {
        return Ok(log_path);
    }
    fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::never(dir, &file_name));
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
    let subscriber = Registry::default().with(env_filter).with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = LOG_GUARD.set(guard);

    tracing::info!("Logging initialized; log file at {}", log_path.display());
    Ok(log_path)
}

fn log_file_name() -> String {
    format!("{}-{}.log", LOG_FILE_PREFIX, Local::now().format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_timestamped() {
        let name = log_file_name();
        assert!(name.starts_with("census-multinom-"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.trim_end_matches(".log").split('-').count(), 4);
    }
}
