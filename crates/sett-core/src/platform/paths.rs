//! Platform-specific path utilities.

use crate::config::RegistryConfig;
use crate::error::{Result, SettError};
use std::path::PathBuf;

/// Get the sett global configuration directory.
///
/// This is the well-known location for cross-process shared state
/// like the instance registry database.
///
/// # Platform Behavior
/// - **Linux**: `~/.config/sett` (XDG_CONFIG_HOME)
/// - **Windows**: `%APPDATA%\sett`
/// - **macOS**: `~/Library/Application Support/sett`
pub fn sett_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| SettError::Config {
        message: "Could not determine platform config directory".to_string(),
    })?;
    Ok(config_dir.join(RegistryConfig::APP_CONFIG_DIR_NAME))
}

/// Get the path to the global instance registry database.
///
/// Returns `{sett_config_dir}/registry.db`.
pub fn registry_db_path() -> Result<PathBuf> {
    Ok(sett_config_dir()?.join(RegistryConfig::DB_FILENAME))
}
