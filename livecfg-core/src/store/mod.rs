//! Durable configuration store
//!
//! Holds the live [`ConfigDocument`] behind a single mutex and persists it
//! with temp-file-and-rename writes. Loading never fails: an unreadable or
//! corrupt file degrades to the built-in defaults.

pub mod archive;
pub mod defaults;
pub mod migration;
pub mod persist;
pub mod validation;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use livecfg_utils::{paths, LivecfgError, Result};

use crate::debounce::Debouncer;
use crate::document::ConfigDocument;

pub use archive::{BackupInfo, ExportEnvelope, EXPORT_VERSION};
pub use defaults::default_document;
pub use migration::migrate;
pub use validation::{validate_and_repair, RepairReport, ValidationWarning};

/// Default number of backups kept in the backup directory
pub const DEFAULT_MAX_BACKUPS: usize = 10;

/// Store location and persistence settings
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Path of the persisted document
    pub path: PathBuf,
    /// Directory receiving timestamped backups
    pub backup_dir: PathBuf,
    /// Backups to keep (0 keeps all)
    pub max_backups: usize,
    /// Pretty-print the persisted JSON
    pub pretty: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::at(paths::config_file())
    }
}

impl StoreOptions {
    /// Options for a config file at `path`, backups in the sibling `backups/`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            backup_dir: paths::backup_dir_for(&path),
            path,
            max_backups: DEFAULT_MAX_BACKUPS,
            pretty: true,
        }
    }
}

/// Where the loaded document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadSource {
    Defaults,
    File,
}

/// Outcome of [`ConfigStore::load`]
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub source: LoadSource,
    /// The file existed but could not be used
    pub degraded: bool,
    pub error: Option<String>,
    pub migrated: Vec<&'static str>,
    pub repair: RepairReport,
}

/// Merge onto defaults, migrate, then validate and repair
pub fn normalize(doc: &ConfigDocument) -> (ConfigDocument, Vec<&'static str>, RepairReport) {
    let merged = default_document().merged_with(doc);
    let (migrated, applied) = migrate(merged);
    let (repaired, report) = validate_and_repair(migrated);
    (repaired, applied, report)
}

fn read_document(path: &Path) -> Result<Option<ConfigDocument>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| LivecfgError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| LivecfgError::LoadFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    ConfigDocument::from_value(value)
        .map(Some)
        .ok_or_else(|| LivecfgError::LoadFailed {
            path: path.to_path_buf(),
            message: "root is not an object".into(),
        })
}

struct StoreInner {
    options: StoreOptions,
    document: Mutex<ConfigDocument>,
    /// Serialises snapshot+write so a later snapshot is never overwritten by an earlier one
    save_lock: Mutex<()>,
    debouncer: Debouncer,
    save_count: AtomicU64,
    last_saved_at: Mutex<Option<DateTime<Utc>>>,
}

/// Thread-safe handle to the live configuration document
///
/// Cloning is cheap; clones share the same document.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.inner.options.path)
            .field("save_count", &self.save_count())
            .finish()
    }
}

impl ConfigStore {
    /// Load the document from disk
    ///
    /// Missing file: defaults. Unreadable or corrupt file: defaults, reported
    /// as degraded. The result is always migrated and repaired.
    pub fn load(options: StoreOptions) -> (Self, LoadReport) {
        let (loaded, source, load_error) = match read_document(&options.path) {
            Ok(Some(doc)) => (doc, LoadSource::File, None),
            Ok(None) => {
                info!("No config at {}, using defaults", options.path.display());
                (ConfigDocument::new(), LoadSource::Defaults, None)
            }
            Err(e) => {
                warn!("Config load failed, falling back to defaults: {}", e);
                (ConfigDocument::new(), LoadSource::Defaults, Some(e.to_string()))
            }
        };

        let (document, migrated, repair) = normalize(&loaded);
        if repair.is_repaired() {
            info!(keys = ?repair.repaired, "Repaired config values from defaults");
        }

        let report = LoadReport {
            source,
            degraded: load_error.is_some(),
            error: load_error,
            migrated,
            repair,
        };
        (Self::with_document(options, document), report)
    }

    /// Wrap an already prepared document without touching disk
    pub fn with_document(options: StoreOptions, document: ConfigDocument) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                options,
                document: Mutex::new(document),
                save_lock: Mutex::new(()),
                debouncer: Debouncer::new(),
                save_count: AtomicU64::new(0),
                last_saved_at: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    pub fn path(&self) -> &Path {
        &self.inner.options.path
    }

    // ==================== Reads ====================

    /// Value at `key`, or `default` if any segment is missing
    pub fn get(&self, key: &str, default: Value) -> Value {
        self.inner.document.lock().get_or(key, default)
    }

    /// Value at `key` deserialized into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.inner.document.lock().get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.document.lock().contains(key)
    }

    /// Copy of the current in-memory document
    pub fn document(&self) -> ConfigDocument {
        self.inner.document.lock().clone()
    }

    // ==================== Writes ====================

    /// Set a value in memory; does not persist
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        self.inner.document.lock().set(key, value)?;
        Ok(())
    }

    /// Remove a value in memory; does not persist
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.document.lock().remove(key)
    }

    /// Swap the whole document; returns the previous one
    pub fn replace_document(&self, document: ConfigDocument) -> ConfigDocument {
        std::mem::replace(&mut *self.inner.document.lock(), document)
    }

    // ==================== Persistence ====================

    /// Persist the current document
    ///
    /// Cancels any pending debounced save. Returns the snapshot that was
    /// written. On failure the file on disk is unchanged.
    pub fn save(&self) -> Result<Arc<ConfigDocument>> {
        if self.inner.debouncer.cancel() {
            debug!("Explicit save cancelled pending debounced save");
        }

        let _guard = self.inner.save_lock.lock();
        let snapshot = Arc::new(self.document());
        let text = snapshot.to_json_string(self.inner.options.pretty)?;

        persist::write_atomic(self.path(), text.as_bytes())?;

        self.inner.save_count.fetch_add(1, Ordering::SeqCst);
        *self.inner.last_saved_at.lock() = Some(Utc::now());
        debug!("Saved config to {}", self.path().display());
        Ok(snapshot)
    }

    /// Save once `window` passes without further scheduling
    pub fn schedule_save(&self, window: Duration) {
        let store = self.clone();
        self.schedule_with(window, move || {
            if let Err(e) = store.save() {
                error!("Debounced config save failed: {}", e);
            }
        });
    }

    /// Debounce an arbitrary flush task on this store's timer
    ///
    /// Shares the single pending slot with [`schedule_save`](Self::schedule_save),
    /// so either supersedes the other and an explicit save cancels both.
    pub fn schedule_with<F>(&self, window: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.debouncer.schedule(window, task);
    }

    pub fn cancel_pending_save(&self) -> bool {
        self.inner.debouncer.cancel()
    }

    pub fn has_pending_save(&self) -> bool {
        self.inner.debouncer.is_pending()
    }

    /// Number of completed saves since this store was created
    pub fn save_count(&self) -> u64 {
        self.inner.save_count.load(Ordering::SeqCst)
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_saved_at.lock()
    }

    // ==================== Backup / Export / Import ====================

    /// Write a timestamped backup of the current document
    pub fn backup(&self) -> Result<PathBuf> {
        archive::create_backup(
            &self.document(),
            &self.inner.options.backup_dir,
            self.inner.options.max_backups,
        )
    }

    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        archive::list_backups(&self.inner.options.backup_dir)
    }

    pub fn read_backup(&self, path: &Path) -> Result<ConfigDocument> {
        archive::read_backup(path)
    }

    /// Export the current document inside a versioned envelope
    pub fn export(&self, path: &Path) -> Result<()> {
        archive::export_to(&self.document(), path)
    }

    /// Read a document from an export (or bare JSON object) without applying it
    pub fn import(&self, path: &Path) -> Result<ConfigDocument> {
        archive::import_from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, ConfigStore, LoadReport) {
        let temp_dir = TempDir::new().unwrap();
        let options = StoreOptions::at(temp_dir.path().join("config.json"));
        let (store, report) = ConfigStore::load(options);
        (temp_dir, store, report)
    }

    fn on_disk(store: &ConfigStore) -> Value {
        serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap()
    }

    // ==================== Load Tests ====================

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let (_temp_dir, store, report) = create_test_store();
        assert_eq!(report.source, LoadSource::Defaults);
        assert!(!report.degraded);
        assert_eq!(store.document(), default_document());
    }

    #[test]
    fn test_load_merges_onto_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"audio": {"channels": 2}, "custom": {"x": 1}}"#).unwrap();

        let (store, report) = ConfigStore::load(StoreOptions::at(&path));
        assert_eq!(report.source, LoadSource::File);
        assert_eq!(store.get("audio.channels", Value::Null), json!(2));
        // Sibling defaults survive the per-key merge
        assert_eq!(store.get("audio.sample_rate", Value::Null), json!(16000));
        assert_eq!(store.get("custom.x", Value::Null), json!(1));
    }

    #[test]
    fn test_load_corrupt_file_degrades_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ this is not json").unwrap();

        let (store, report) = ConfigStore::load(StoreOptions::at(&path));
        assert!(report.degraded);
        assert!(report.error.is_some());
        assert_eq!(report.source, LoadSource::Defaults);
        assert_eq!(store.document(), default_document());
        // The corrupt file is left for inspection
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ this is not json");
    }

    #[test]
    fn test_load_non_object_root_degrades() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "[1, 2]").unwrap();

        let (_, report) = ConfigStore::load(StoreOptions::at(&path));
        assert!(report.degraded);
    }

    #[test]
    fn test_load_migrates_and_repairs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"audio": {"samplerate": 44100}, "ui": "broken", "input": {"method": "paste"}}"#,
        )
        .unwrap();

        let (store, report) = ConfigStore::load(StoreOptions::at(&path));
        assert!(report.migrated.contains(&"audio_samplerate_rename"));
        assert!(report.migrated.contains(&"input_method_remap"));
        assert!(report.repair.repaired.contains(&"ui".to_string()));
        assert_eq!(store.get("audio.sample_rate", Value::Null), json!(44100));
        assert_eq!(store.get("input.method", Value::Null), json!("clipboard"));
        assert!(store.get("ui", Value::Null).is_object());
    }

    // ==================== Get / Set Tests ====================

    #[test]
    fn test_get_missing_returns_default() {
        let (_temp_dir, store, _) = create_test_store();
        assert_eq!(store.get("nope.not.here", json!("fallback")), json!("fallback"));
    }

    #[test]
    fn test_get_as_typed() {
        let (_temp_dir, store, _) = create_test_store();
        assert_eq!(store.get_as::<u32>("audio.sample_rate"), Some(16000));
        assert_eq!(store.get_as::<String>("audio.sample_rate"), None);
    }

    #[test]
    fn test_set_does_not_persist() {
        let (_temp_dir, store, _) = create_test_store();
        store.set("audio.device_id", json!(4)).unwrap();
        assert_eq!(store.get("audio.device_id", Value::Null), json!(4));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let (_temp_dir, store, _) = create_test_store();
        let err = store.set("audio.sample_rate.hz", json!(1)).unwrap_err();
        assert!(matches!(err, LivecfgError::InvalidPath { .. }));
    }

    #[test]
    fn test_remove_and_replace_document() {
        let (_temp_dir, store, _) = create_test_store();
        assert_eq!(store.remove("ui.theme"), Some(json!("system")));
        assert!(!store.contains("ui.theme"));

        let previous = store.replace_document(default_document());
        assert!(!previous.contains("ui.theme"));
        assert!(store.contains("ui.theme"));
    }

    // ==================== Save Tests ====================

    #[test]
    fn test_save_writes_latest_state() {
        let (_temp_dir, store, _) = create_test_store();
        store.set("speech.model", json!("small")).unwrap();

        let snapshot = store.save().unwrap();
        assert_eq!(snapshot.get("speech.model"), Some(&json!("small")));
        assert_eq!(on_disk(&store)["speech"]["model"], json!("small"));
        assert_eq!(store.save_count(), 1);
        assert!(store.last_saved_at().is_some());
    }

    #[test]
    fn test_save_then_reload() {
        let (temp_dir, store, _) = create_test_store();
        store.set("ai.enabled", json!(true)).unwrap();
        store.save().unwrap();

        let (reloaded, report) = ConfigStore::load(StoreOptions::at(temp_dir.path().join("config.json")));
        assert_eq!(report.source, LoadSource::File);
        assert_eq!(reloaded.document(), store.document());
    }

    #[test]
    fn test_concurrent_sets_all_visible_to_save() {
        let (_temp_dir, store, _) = create_test_store();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.set(&format!("plugins.p{}", i), json!(i)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        store.save().unwrap();
        let disk = on_disk(&store);
        for i in 0..8 {
            assert_eq!(disk["plugins"][format!("p{}", i)], json!(i));
        }
    }

    // ==================== Debounce Tests ====================

    #[tokio::test]
    async fn test_schedule_save_coalesces() {
        let (_temp_dir, store, _) = create_test_store();

        for i in 0..20 {
            store.set("audio.chunk_size", json!(i)).unwrap();
            store.schedule_save(Duration::from_millis(50));
        }
        assert!(store.has_pending_save());
        assert_eq!(store.save_count(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.save_count(), 1);
        assert_eq!(on_disk(&store)["audio"]["chunk_size"], json!(19));
    }

    #[tokio::test]
    async fn test_explicit_save_cancels_pending() {
        let (_temp_dir, store, _) = create_test_store();

        store.set("ui.theme", json!("dark")).unwrap();
        store.schedule_save(Duration::from_millis(50));
        store.save().unwrap();
        assert!(!store.has_pending_save());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(store.save_count(), 1);
    }

    // ==================== Backup / Export Tests ====================

    #[test]
    fn test_backup_lands_in_sibling_dir() {
        let (temp_dir, store, _) = create_test_store();
        let path = store.backup().unwrap();
        assert!(path.starts_with(temp_dir.path().join("backups")));
        assert_eq!(store.list_backups().unwrap().len(), 1);
        assert_eq!(store.read_backup(&path).unwrap(), store.document());
    }

    #[test]
    fn test_export_import_round_trip() {
        let (temp_dir, store, _) = create_test_store();
        store.set("hotkeys.record", json!("f8")).unwrap();

        let export_path = temp_dir.path().join("export.json");
        store.export(&export_path).unwrap();
        assert_eq!(store.import(&export_path).unwrap(), store.document());
    }
}
