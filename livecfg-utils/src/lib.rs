//! livecfg-utils: Common utilities shared across livecfg crates
//!
//! This crate provides:
//! - Unified error types ([`LivecfgError`], [`Result`])
//! - Logging infrastructure ([`init_logging`], [`LogConfig`])
//! - XDG-compliant path utilities ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

// Re-export main types at crate root for convenience
pub use error::{LivecfgError, Result};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogOutput};

// Re-export commonly used path functions
pub use paths::{backup_dir, backup_dir_for, config_dir, config_file, ensure_dir, log_dir};
