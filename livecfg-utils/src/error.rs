//! Error types for livecfg
//!
//! Provides a unified error type used across all livecfg crates.

use std::path::PathBuf;

/// Main error type for livecfg operations
#[derive(Debug, thiserror::Error)]
pub enum LivecfgError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Document Errors ===

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid key path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    #[error("Failed to load {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    #[error("Failed to save {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    #[error("Failed to import {path}: {message}")]
    ImportFailed { path: PathBuf, message: String },

    #[error("Unsupported export version: {0}")]
    UnsupportedVersion(String),

    // === Service Errors ===

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service already registered: {0}")]
    ServiceExists(String),

    #[error("Service has no factory: {0}")]
    NoFactory(String),

    #[error("Service '{name}' is not a {expected}")]
    ServiceTypeMismatch { name: String, expected: &'static str },

    #[error("Service '{0}' is reloadable but missing from the reload order")]
    ReloadOrder(String),

    #[error("Reload failed in service '{service}': {message}")]
    ReloadFailed { service: String, message: String },

    // === Event Errors ===

    #[error("Listener error: {0}")]
    Listener(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LivecfgError {
    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a save error
    pub fn save(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::SaveFailed {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a reload error
    pub fn reload(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ReloadFailed {
            service: service.into(),
            message: msg.into(),
        }
    }

    /// Create a listener error
    pub fn listener(msg: impl Into<String>) -> Self {
        Self::Listener(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Registry lookups on unknown names
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ServiceNotFound(_))
    }

    /// Errors the core handles locally by falling back to a safe default
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LoadFailed { .. }
            | Self::Listener(_)
            | Self::FileRead { .. }
            | Self::Json(_)
        )
    }
}

/// Result type alias using LivecfgError
pub type Result<T> = std::result::Result<T, LivecfgError>;
