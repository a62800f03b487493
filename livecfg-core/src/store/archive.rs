//! Backups and versioned export/import
//!
//! Backups live in `backups/config_backup_<YYYYMMDD_HHMMSS>.json`, with a
//! `_<N>` suffix for further backups taken within the same second; exports
//! are wrapped in `{"version", "exported_at", "config"}`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use livecfg_utils::{LivecfgError, Result};

use super::persist::write_atomic;
use crate::document::ConfigDocument;

/// Envelope version written by [`export_to`]
pub const EXPORT_VERSION: &str = "1.0";

const BACKUP_PREFIX: &str = "config_backup_";
const BACKUP_SUFFIX: &str = ".json";
const BACKUP_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Length of a formatted `BACKUP_TIME_FORMAT` stamp
const BACKUP_STAMP_LEN: usize = 15;

/// Versioned export wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub version: String,
    pub exported_at: String,
    pub config: ConfigDocument,
}

impl ExportEnvelope {
    pub fn new(config: ConfigDocument) -> Self {
        Self {
            version: EXPORT_VERSION.to_string(),
            exported_at: Utc::now().to_rfc3339(),
            config,
        }
    }
}

/// A backup file on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    /// Timestamp encoded in the file name
    pub created_at: NaiveDateTime,
    /// Orders backups sharing a timestamp; 0 for the first
    pub sequence: u32,
    pub size: u64,
}

/// File name for a backup taken at `at`
pub fn backup_file_name(at: DateTime<Local>) -> String {
    format!("{}{}{}", BACKUP_PREFIX, at.format(BACKUP_TIME_FORMAT), BACKUP_SUFFIX)
}

/// First free backup path for `at`; never overwrites an existing backup
fn next_backup_path(backup_dir: &Path, at: DateTime<Local>) -> PathBuf {
    let mut path = backup_dir.join(backup_file_name(at));
    let stamp = at.format(BACKUP_TIME_FORMAT);
    let mut sequence = 1u32;
    while path.exists() {
        path = backup_dir.join(format!("{}{}_{}{}", BACKUP_PREFIX, stamp, sequence, BACKUP_SUFFIX));
        sequence += 1;
    }
    path
}

fn parse_backup_name(name: &str) -> Option<(NaiveDateTime, u32)> {
    let stamp = name.strip_prefix(BACKUP_PREFIX)?.strip_suffix(BACKUP_SUFFIX)?;
    let (time, sequence) = match stamp.get(BACKUP_STAMP_LEN..)? {
        "" => (stamp, 0),
        rest => (&stamp[..BACKUP_STAMP_LEN], rest.strip_prefix('_')?.parse().ok()?),
    };
    let created_at = NaiveDateTime::parse_from_str(time, BACKUP_TIME_FORMAT).ok()?;
    Some((created_at, sequence))
}

fn serialize(doc: &ConfigDocument, pretty: bool) -> Result<Vec<u8>> {
    let text = doc.to_json_string(pretty)?;
    Ok(text.into_bytes())
}

/// Write a timestamped backup of `doc` and prune old ones
///
/// `max_backups == 0` keeps every backup.
pub fn create_backup(doc: &ConfigDocument, backup_dir: &Path, max_backups: usize) -> Result<PathBuf> {
    let path = next_backup_path(backup_dir, Local::now());
    write_atomic(&path, &serialize(doc, true)?)?;
    info!("Created config backup at {}", path.display());

    if max_backups > 0 {
        prune_backups(backup_dir, max_backups)?;
    }
    Ok(path)
}

/// Backups in `backup_dir`, newest first
pub fn list_backups(backup_dir: &Path) -> Result<Vec<BackupInfo>> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in fs::read_dir(backup_dir).map_err(|e| LivecfgError::FileRead {
        path: backup_dir.to_path_buf(),
        source: e,
    })? {
        let entry = entry?;
        let name = entry.file_name();
        let Some((created_at, sequence)) = parse_backup_name(&name.to_string_lossy()) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        backups.push(BackupInfo {
            path: entry.path(),
            created_at,
            sequence,
            size,
        });
    }

    backups.sort_by(|a, b| (b.created_at, b.sequence).cmp(&(a.created_at, a.sequence)));
    Ok(backups)
}

/// Delete all but the newest `keep` backups
pub fn prune_backups(backup_dir: &Path, keep: usize) -> Result<usize> {
    let backups = list_backups(backup_dir)?;
    let mut removed = 0;
    for old in backups.iter().skip(keep) {
        match fs::remove_file(&old.path) {
            Ok(()) => {
                debug!("Removed old backup {}", old.path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove old backup {}: {}", old.path.display(), e),
        }
    }
    Ok(removed)
}

/// Read a backup file (a bare document)
pub fn read_backup(path: &Path) -> Result<ConfigDocument> {
    let content = fs::read_to_string(path).map_err(|e| LivecfgError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| LivecfgError::ImportFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    ConfigDocument::from_value(value).ok_or_else(|| LivecfgError::ImportFailed {
        path: path.to_path_buf(),
        message: "backup root is not an object".into(),
    })
}

/// Write `doc` to `path` inside a versioned envelope
pub fn export_to(doc: &ConfigDocument, path: &Path) -> Result<()> {
    let envelope = ExportEnvelope::new(doc.clone());
    let text = serde_json::to_string_pretty(&envelope)?;
    write_atomic(path, text.as_bytes())?;
    info!("Exported configuration to {}", path.display());
    Ok(())
}

/// Read a document from an export envelope, or from a bare legacy object
///
/// The document is returned exactly as stored.
pub fn import_from(path: &Path) -> Result<ConfigDocument> {
    let content = fs::read_to_string(path).map_err(|e| LivecfgError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let import_err = |message: String| LivecfgError::ImportFailed {
        path: path.to_path_buf(),
        message,
    };

    let value: Value = serde_json::from_str(&content).map_err(|e| import_err(e.to_string()))?;
    let Value::Object(mut root) = value else {
        return Err(import_err("root is not an object".into()));
    };

    let is_envelope = root.contains_key("version") && root.contains_key("config");
    if !is_envelope {
        debug!("Importing bare configuration object from {}", path.display());
        return Ok(ConfigDocument::from(root));
    }

    let version = root
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if version.split('.').next() != Some("1") {
        return Err(LivecfgError::UnsupportedVersion(version));
    }

    match root.remove("config") {
        Some(Value::Object(config)) => Ok(ConfigDocument::from(config)),
        _ => Err(import_err("'config' is not an object".into())),
    }
}
