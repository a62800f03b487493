//! Path utilities for livecfg
//!
//! Handles XDG Base Directory specification compliance for the config
//! file, its backups and the log directory.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "livecfg";

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "LIVECFG_CONFIG_DIR";

/// File name of the persisted configuration document
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Directory name (sibling of the config file) holding backups
pub const BACKUP_DIR_NAME: &str = "backups";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory
///
/// Location: `$LIVECFG_CONFIG_DIR`, else `$XDG_CONFIG_HOME/livecfg` or `~/.config/livecfg`
pub fn config_dir() -> PathBuf {
    config_dir_from(std::env::var_os(CONFIG_DIR_ENV))
}

fn config_dir_from(override_dir: Option<OsString>) -> PathBuf {
    match override_dir {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => project_dirs()
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(fallback_config_dir),
    }
}

/// Get the main configuration file path
///
/// Location: `<config_dir>/config.json`
pub fn config_file() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Get the backup directory that sits next to a given config file
pub fn backup_dir_for(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .map(|p| p.join(BACKUP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(BACKUP_DIR_NAME))
}

/// Get the default backup directory
///
/// Location: `<config_dir>/backups`
pub fn backup_dir() -> PathBuf {
    backup_dir_for(&config_file())
}

/// Get the state directory
///
/// Location: `$XDG_STATE_HOME/livecfg` or `~/.local/state/livecfg`
pub fn state_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(fallback_state_dir)
}

/// Get the log directory
///
/// Location: `$XDG_STATE_HOME/livecfg/log`
pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

// Fallback implementations when ProjectDirs is unavailable

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn fallback_config_dir() -> PathBuf {
    home_dir().join(".config").join(APP_NAME)
}

fn fallback_state_dir() -> PathBuf {
    home_dir().join(".local").join("state").join(APP_NAME)
}
