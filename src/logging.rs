use std::path::PathBuf;

use anyhow::{Result, anyhow};
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming};

use crate::config::LoggingConfig;

const ROTATE_SIZE: u64 = 1_000_000;
const ROTATE_KEEP: usize = 3;

pub fn default_log_path() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .ok_or_else(|| anyhow!("Could not determine data directory"))?;
    Ok(data_dir.join("opsready-chat").join("logs").join("opsready-chat.log"))
}

/// Log to a rotating file. The terminal belongs to the TUI.
///
/// Keep the returned handle alive for the life of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggerHandle> {
    let log_path = match &config.path {
        Some(path) => path.clone(),
        None => default_log_path()?,
    };
    let directory = log_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let basename = log_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("opsready-chat")
        .to_string();

    let handle = Logger::try_with_env_or_str(&config.level)?
        .log_to_file(FileSpec::default().directory(directory).basename(basename))
        .rotate(
            Criterion::Size(ROTATE_SIZE),
            Naming::Numbers,
            Cleanup::KeepLogFiles(ROTATE_KEEP),
        )
        .start()?;
    Ok(handle)
}
