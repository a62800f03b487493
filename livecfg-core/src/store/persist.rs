//! Crash-safe file replacement
//!
//! Content goes to a temporary file in the destination's directory, is
//! fsynced, and is then renamed over the destination. Readers see either the
//! old file or the new one.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use livecfg_utils::{LivecfgError, Result};

/// Atomically replace `path` with `bytes`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic_with(path, bytes, |temp, dest| {
        temp.persist(dest).map(|_| ()).map_err(|e| e.error)
    })
}

/// Like [`write_atomic`] with a caller-supplied commit step
///
/// `commit` receives the fully written and synced temp file. If it fails, the
/// temp file is dropped (and thereby deleted) and the destination is left
/// as it was.
pub fn write_atomic_with<F>(path: &Path, bytes: &[u8], commit: F) -> Result<()>
where
    F: FnOnce(NamedTempFile, &Path) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| LivecfgError::FileWrite {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let prefix = format!(
        ".{}.",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "livecfg".to_string())
    );

    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| LivecfgError::save(path, format!("failed to create temp file: {}", e)))?;

    temp.write_all(bytes)
        .map_err(|e| LivecfgError::save(path, format!("failed to write temp file: {}", e)))?;
    temp.flush()
        .map_err(|e| LivecfgError::save(path, format!("failed to flush temp file: {}", e)))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| LivecfgError::save(path, format!("failed to sync temp file: {}", e)))?;

    commit(temp, path)
        .map_err(|e| LivecfgError::save(path, format!("failed to rename temp file: {}", e)))?;

    sync_dir(dir);
    debug!("Atomically wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Directory sync skipped for {}: {}", dir.display(), e);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
