//! Configuration and log file locations

use std::io;
use std::path::PathBuf;

/// Name used for the per-user directories
const APP_NAME: &str = "nesdbg";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/nesdbg/`
/// - macOS: `~/Library/Application Support/nesdbg/`
/// - Windows: `%APPDATA%\nesdbg\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().join("logs"))
}

/// Get the path to the log file written by `--log-file`
pub fn log_path() -> Option<PathBuf> {
    log_dir().map(|dir| dir.join("nesdbg.log"))
}

/// Ensure the log directory exists
pub fn ensure_log_dir() -> io::Result<Option<PathBuf>> {
    if let Some(dir) = log_dir() {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Some(dir))
    } else {
        Ok(None)
    }
}
