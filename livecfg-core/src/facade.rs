//! Configuration facade
//!
//! Wires the store, event bus, service registry and hot-reload coordinator
//! together. Every flush diffs the saved document against the previous
//! saved snapshot and publishes the change; the coordinator reacts to that
//! event by reloading affected services.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::ReentrantMutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use livecfg_utils::Result;

use crate::diff::ConfigDiff;
use crate::document::ConfigDocument;
use crate::events::{
    ConfigChange, EventBus, EventPriority, ListenerId, CONFIG_CHANGED, CONFIG_SAVED, RELOAD_FAILED,
    SAVE_FAILED, SETTING_CHANGED,
};
use crate::hot_reload::{HotReloadCoordinator, UnorderedPolicy, DEFAULT_RELOAD_ORDER};
use crate::registry::{Service, ServiceFactory, ServiceRegistry};
use crate::store::{self, BackupInfo, ConfigStore, LoadReport, StoreOptions};

/// Quiet period before a deferred write is flushed
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Priority of the coordinator's `config.changed` listener
pub const RELOAD_LISTENER_PRIORITY: i32 = 100;

/// Facade wiring options
#[derive(Debug, Clone)]
pub struct FacadeOptions {
    pub store: StoreOptions,
    pub debounce_window: Duration,
    pub reload_order: Vec<String>,
    pub unordered_policy: UnorderedPolicy,
}

impl Default for FacadeOptions {
    fn default() -> Self {
        Self::with_store(StoreOptions::default())
    }
}

impl FacadeOptions {
    pub fn with_store(store: StoreOptions) -> Self {
        Self {
            store,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            reload_order: DEFAULT_RELOAD_ORDER.iter().map(|s| s.to_string()).collect(),
            unordered_policy: UnorderedPolicy::default(),
        }
    }

    /// Options for a config file at `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self::with_store(StoreOptions::at(path))
    }
}

/// Application-facing configuration API
pub struct ConfigFacade {
    me: Weak<ConfigFacade>,
    store: ConfigStore,
    bus: Arc<EventBus>,
    coordinator: Arc<HotReloadCoordinator>,
    /// Document as of the last successful save; the diff baseline
    last_saved: ArcSwap<ConfigDocument>,
    /// Held from the store write through the publishes that follow it.
    /// Re-entrant so a listener may save again.
    save_lock: ReentrantMutex<()>,
    save_generation: AtomicU64,
    debounce_window: Duration,
    reload_listener: ListenerId,
}

impl std::fmt::Debug for ConfigFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigFacade")
            .field("store", &self.store)
            .field("debounce_window", &self.debounce_window)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl ConfigFacade {
    /// Load the configuration and wire a fresh bus, registry and coordinator
    pub fn open(options: FacadeOptions) -> (Arc<Self>, LoadReport) {
        let (store, report) = ConfigStore::load(options.store);
        let registry = Arc::new(ServiceRegistry::new());
        let coordinator = Arc::new(HotReloadCoordinator::new(
            registry,
            options.reload_order,
            options.unordered_policy,
        ));
        let facade = Self::with_components(
            store,
            Arc::new(EventBus::new()),
            coordinator,
            options.debounce_window,
        );
        (facade, report)
    }

    /// Wire caller-supplied components
    ///
    /// The store's current document becomes the diff baseline.
    pub fn with_components(
        store: ConfigStore,
        bus: Arc<EventBus>,
        coordinator: Arc<HotReloadCoordinator>,
        debounce_window: Duration,
    ) -> Arc<Self> {
        let reload_listener = Self::subscribe_coordinator(&bus, &coordinator);
        let baseline = Arc::new(store.document());
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            store,
            bus,
            coordinator,
            last_saved: ArcSwap::new(baseline),
            save_lock: ReentrantMutex::new(()),
            save_generation: AtomicU64::new(0),
            debounce_window,
            reload_listener,
        })
    }

    fn subscribe_coordinator(bus: &Arc<EventBus>, coordinator: &Arc<HotReloadCoordinator>) -> ListenerId {
        // Weak: the listener lives inside the bus it publishes to
        let weak_bus = Arc::downgrade(bus);
        let coordinator = Arc::clone(coordinator);
        let applied = AtomicU64::new(0);
        bus.subscribe(
            CONFIG_CHANGED,
            move |event| {
                let Some(change) = event.config_change() else {
                    return Ok(());
                };
                // A save made by a listener of an earlier save is delivered first
                let latest = applied.fetch_max(change.generation, Ordering::SeqCst);
                if latest >= change.generation {
                    debug!(generation = change.generation, latest, "Ignoring superseded config change");
                    return Ok(());
                }
                let report = coordinator.reload(&change.changed_keys, &change.new_config);
                if let (Some(service), Some(bus)) = (&report.failed, weak_bus.upgrade()) {
                    bus.publish(
                        RELOAD_FAILED,
                        json!({
                            "service": service,
                            "error": report.failure,
                            "invoked": report.invoked,
                            "changed_keys": change.changed_keys,
                        }),
                        EventPriority::High,
                    );
                }
                Ok(())
            },
            RELOAD_LISTENER_PRIORITY,
        )
    }

    // ==================== Accessors ====================

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        self.coordinator.registry()
    }

    pub fn coordinator(&self) -> &Arc<HotReloadCoordinator> {
        &self.coordinator
    }

    /// Snapshot taken at the last successful save
    pub fn last_saved(&self) -> Arc<ConfigDocument> {
        self.last_saved.load_full()
    }

    /// Current in-memory document, including unsaved writes
    pub fn document(&self) -> ConfigDocument {
        self.store.document()
    }

    // ==================== Settings ====================

    pub fn get_setting(&self, key: &str, default: Value) -> Value {
        self.store.get(key, default)
    }

    pub fn get_setting_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.store.get_as(key)
    }

    /// Write a value
    ///
    /// With `immediate` the document is saved before returning and the diff
    /// is returned; otherwise a debounced flush is scheduled and `None` is
    /// returned.
    pub fn set_setting(&self, key: &str, value: Value, immediate: bool) -> Result<Option<ConfigDiff>> {
        self.store.set(key, value.clone())?;
        self.bus.publish(
            SETTING_CHANGED,
            json!({ "key": key, "value": value }),
            EventPriority::Normal,
        );
        self.persist(immediate)
    }

    /// Remove a value; returns it along with the diff when `immediate`
    pub fn remove_setting(&self, key: &str, immediate: bool) -> Result<(Option<Value>, Option<ConfigDiff>)> {
        let removed = self.store.remove(key);
        if removed.is_none() {
            return Ok((None, None));
        }
        self.bus.publish(
            SETTING_CHANGED,
            json!({ "key": key, "value": Value::Null, "removed": true }),
            EventPriority::Normal,
        );
        Ok((removed, self.persist(immediate)?))
    }

    fn persist(&self, immediate: bool) -> Result<Option<ConfigDiff>> {
        if immediate {
            return self.save().map(Some);
        }
        self.schedule_flush();
        Ok(None)
    }

    fn schedule_flush(&self) {
        let me = self.me.clone();
        self.store.schedule_with(self.debounce_window, move || {
            let Some(facade) = me.upgrade() else {
                return;
            };
            if let Err(e) = facade.save() {
                error!("Deferred config save failed: {}", e);
            }
        });
    }

    // ==================== Persistence ====================

    /// Save now, then publish `config_saved` and `config.changed`
    ///
    /// Concurrent saves publish in the order they were written.
    pub fn save(&self) -> Result<ConfigDiff> {
        let _guard = self.save_lock.lock();
        let saved = self.store.save().map(|saved| {
            let previous = self.last_saved.swap(Arc::clone(&saved));
            let diff = ConfigDiff::between(&previous, &saved);
            let generation = self.save_generation.fetch_add(1, Ordering::SeqCst) + 1;
            (diff, previous, saved, generation)
        });

        let (diff, previous, saved, generation) = match saved {
            Ok(result) => result,
            Err(e) => {
                self.bus.publish(
                    SAVE_FAILED,
                    json!({ "path": self.store.path().display().to_string(), "error": e.to_string() }),
                    EventPriority::High,
                );
                return Err(e);
            }
        };

        debug!(changed = diff.len(), "Config saved");
        self.bus.publish(
            CONFIG_SAVED,
            json!({ "path": self.store.path().display().to_string(), "changed": diff.len() }),
            EventPriority::Normal,
        );
        self.bus.publish(
            CONFIG_CHANGED,
            ConfigChange {
                generation,
                changed_keys: diff.changed_keys(),
                old_config: previous,
                new_config: saved,
            },
            EventPriority::Normal,
        );
        Ok(diff)
    }

    /// Save now if a deferred flush is pending
    pub fn flush(&self) -> Result<Option<ConfigDiff>> {
        if self.store.cancel_pending_save() {
            return self.save().map(Some);
        }
        Ok(None)
    }

    pub fn has_pending_save(&self) -> bool {
        self.store.has_pending_save()
    }

    // ==================== Services ====================

    /// Register a service and index its dependency keys
    pub fn register_service(
        &self,
        name: &str,
        instance: Arc<dyn Service>,
        factory: Option<ServiceFactory>,
    ) -> Result<()> {
        self.coordinator.admit(name, instance.as_ref())?;
        self.registry().register(name, instance, factory)?;
        if let Err(e) = self.coordinator.track(name) {
            let _ = self.registry().unregister(name);
            return Err(e);
        }
        Ok(())
    }

    /// Hot-swap a service; its dependency keys are re-read
    ///
    /// An instance the reload policy refuses is never swapped in.
    pub fn replace_service(&self, name: &str, instance: Arc<dyn Service>) -> Result<Arc<dyn Service>> {
        self.coordinator.admit(name, instance.as_ref())?;
        self.swap_service(name, instance)
    }

    /// Rebuild a service from its factory using the current document
    pub fn rebuild_service(&self, name: &str) -> Result<Arc<dyn Service>> {
        let instance = self.registry().build(name, &self.store.document())?;
        self.coordinator.admit(name, instance.as_ref())?;
        self.swap_service(name, Arc::clone(&instance))?;
        Ok(instance)
    }

    fn swap_service(&self, name: &str, instance: Arc<dyn Service>) -> Result<Arc<dyn Service>> {
        let old = self.registry().replace(name, instance)?;
        if let Err(e) = self.coordinator.track(name) {
            warn!(service = name, "Restoring previous instance: {}", e);
            if self.registry().replace(name, Arc::clone(&old)).is_ok() {
                let _ = self.coordinator.track(name);
            }
            return Err(e);
        }
        Ok(old)
    }

    pub fn unregister_service(&self, name: &str) -> Result<Arc<dyn Service>> {
        self.coordinator.untrack(name);
        self.registry().unregister(name)
    }

    // ==================== Backup / Export / Import ====================

    pub fn export_settings(&self, path: &Path) -> Result<()> {
        self.store.export(path)
    }

    /// Replace the configuration with an exported one and save it
    ///
    /// The imported document is merged onto defaults, migrated and repaired
    /// first.
    pub fn import_settings(&self, path: &Path) -> Result<ConfigDiff> {
        let imported = self.store.import(path)?;
        self.apply_document(&imported, "import")
    }

    pub fn backup_settings(&self) -> Result<PathBuf> {
        self.store.backup()
    }

    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        self.store.list_backups()
    }

    /// Restore a backup; the current configuration is backed up first
    pub fn restore_backup(&self, path: &Path) -> Result<ConfigDiff> {
        let restored = self.store.read_backup(path)?;
        self.backup_before("restore");
        self.apply_document(&restored, "restore")
    }

    /// Replace the configuration with the defaults; the current one is backed up first
    pub fn reset_to_defaults(&self) -> Result<ConfigDiff> {
        self.backup_before("reset");
        self.store.cancel_pending_save();
        self.store.replace_document(store::default_document());
        info!("Configuration reset to defaults");
        self.save()
    }

    fn backup_before(&self, operation: &str) {
        if let Err(e) = self.store.backup() {
            warn!(operation, "Pre-{} backup failed: {}", operation, e);
        }
    }

    fn apply_document(&self, document: &ConfigDocument, operation: &str) -> Result<ConfigDiff> {
        let (normalized, migrated, repair) = store::normalize(document);
        info!(
            operation,
            migrated = ?migrated,
            repaired = repair.repaired.len(),
            "Applying configuration document"
        );
        self.store.cancel_pending_save();
        self.store.replace_document(normalized);
        self.save()
    }
}

impl Drop for ConfigFacade {
    fn drop(&mut self) {
        self.bus.unsubscribe(CONFIG_CHANGED, self.reload_listener);
        if self.store.cancel_pending_save() {
            debug!("Flushing pending config save on shutdown");
            if let Err(e) = self.store.save() {
                error!("Config save on shutdown failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use livecfg_utils::LivecfgError;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    use crate::events::Event;
    use crate::registry::Reloadable;

    type CallLog = Arc<Mutex<Vec<(String, BTreeSet<String>)>>>;

    struct Probe {
        name: &'static str,
        keys: Vec<&'static str>,
        accept: bool,
        log: CallLog,
    }

    impl Probe {
        fn new(name: &'static str, keys: &[&'static str], log: &CallLog) -> Arc<Self> {
            Arc::new(Self {
                name,
                keys: keys.to_vec(),
                accept: true,
                log: Arc::clone(log),
            })
        }

        fn declining(name: &'static str, keys: &[&'static str], log: &CallLog) -> Arc<Self> {
            Arc::new(Self {
                name,
                keys: keys.to_vec(),
                accept: false,
                log: Arc::clone(log),
            })
        }
    }

    impl Reloadable for Probe {
        fn dependency_keys(&self) -> Vec<String> {
            self.keys.iter().map(|k| k.to_string()).collect()
        }

        fn on_config_changed(&self, changed_keys: &BTreeSet<String>, _: &ConfigDocument) -> Result<bool> {
            self.log.lock().push((self.name.to_string(), changed_keys.clone()));
            Ok(self.accept)
        }
    }

    impl Service for Probe {
        fn as_reloadable(&self) -> Option<&dyn Reloadable> {
            Some(self)
        }
    }

    struct Inert;
    impl Service for Inert {}

    fn create_test_facade() -> (TempDir, Arc<ConfigFacade>) {
        let temp_dir = TempDir::new().unwrap();
        let mut options = FacadeOptions::at(temp_dir.path().join("config.json"));
        options.debounce_window = Duration::from_millis(50);
        let (facade, _) = ConfigFacade::open(options);
        (temp_dir, facade)
    }

    fn capture(bus: &EventBus, names: &[&str]) -> Arc<Mutex<Vec<Event>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        for name in names {
            let events = Arc::clone(&events);
            bus.subscribe(
                name,
                move |event| {
                    events.lock().push(event.clone());
                    Ok(())
                },
                0,
            );
        }
        events
    }

    fn names(events: &Mutex<Vec<Event>>) -> Vec<String> {
        events.lock().iter().map(|e| e.name.clone()).collect()
    }

    fn keys(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|k| k.to_string()).collect()
    }

    // ==================== Hot Reload Scenario Tests ====================

    #[test]
    fn test_immediate_set_reloads_dependents_in_order() {
        let (_temp_dir, facade) = create_test_facade();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        facade
            .register_service("speech", Probe::new("speech", &["audio.device_id"], &log), None)
            .unwrap();
        facade
            .register_service("audio", Probe::new("audio", &["audio.device_id"], &log), None)
            .unwrap();
        facade
            .register_service("ui", Probe::new("ui", &["ui.theme"], &log), None)
            .unwrap();

        let diff = facade.set_setting("audio.device_id", json!(2), true).unwrap().unwrap();
        assert_eq!(diff.changed_keys(), keys(&["audio.device_id"]));

        let calls = log.lock().clone();
        assert_eq!(
            calls,
            vec![
                ("audio".to_string(), keys(&["audio.device_id"])),
                ("speech".to_string(), keys(&["audio.device_id"])),
            ]
        );
    }

    #[test]
    fn test_event_sequence_for_immediate_set() {
        let (_temp_dir, facade) = create_test_facade();
        let events = capture(facade.bus(), &[SETTING_CHANGED, CONFIG_SAVED, CONFIG_CHANGED]);

        facade.set_setting("ui.theme", json!("dark"), true).unwrap();

        assert_eq!(names(&events), vec![SETTING_CHANGED, CONFIG_SAVED, CONFIG_CHANGED]);
        let events = events.lock();
        assert_eq!(events[0].json().unwrap(), &json!({"key": "ui.theme", "value": "dark"}));
        let change = events[2].config_change().unwrap();
        assert_eq!(change.changed_keys, keys(&["ui.theme"]));
        assert_eq!(change.old_config.get("ui.theme"), Some(&json!("system")));
        assert_eq!(change.new_config.get("ui.theme"), Some(&json!("dark")));
    }

    #[test]
    fn test_reload_failure_is_published() {
        let (_temp_dir, facade) = create_test_facade();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        facade
            .register_service("audio", Probe::declining("audio", &["audio"], &log), None)
            .unwrap();
        facade
            .register_service("speech", Probe::new("speech", &["audio"], &log), None)
            .unwrap();
        let failures = capture(facade.bus(), &[RELOAD_FAILED]);

        facade.set_setting("audio.channels", json!(2), true).unwrap();

        assert_eq!(log.lock().len(), 1);
        let failures = failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].json().unwrap()["service"], json!("audio"));
    }

    #[test]
    fn test_concurrent_saves_publish_in_write_order() {
        let (_temp_dir, facade) = create_test_facade();
        let first_save = Arc::new(AtomicBool::new(true));
        facade.bus().subscribe(
            CONFIG_SAVED,
            move |_| {
                if first_save.swap(false, Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(200));
                }
                Ok(())
            },
            0,
        );
        let themes = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&themes);
        facade.bus().subscribe(
            CONFIG_CHANGED,
            move |event| {
                if let Some(change) = event.config_change() {
                    seen.lock().push(change.new_config.get("ui.theme").cloned());
                }
                Ok(())
            },
            0,
        );

        let writer = |theme: &'static str| {
            let facade = Arc::clone(&facade);
            thread::spawn(move || {
                facade.set_setting("ui.theme", json!(theme), true).unwrap();
            })
        };
        let first = writer("first");
        thread::sleep(Duration::from_millis(50));
        let second = writer("second");
        first.join().unwrap();
        second.join().unwrap();

        assert_eq!(*themes.lock(), vec![Some(json!("first")), Some(json!("second"))]);
        assert_eq!(facade.last_saved().get("ui.theme"), Some(&json!("second")));
    }

    #[test]
    fn test_stale_config_change_not_reloaded() {
        let (_temp_dir, facade) = create_test_facade();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        facade
            .register_service("ui", Probe::new("ui", &["ui.theme"], &log), None)
            .unwrap();

        facade.set_setting("ui.theme", json!("dark"), true).unwrap();
        assert_eq!(log.lock().len(), 1);

        // Same generation as the save above, arriving late
        let stale = ConfigChange {
            generation: 1,
            changed_keys: keys(&["ui.theme"]),
            old_config: Arc::new(store::default_document()),
            new_config: Arc::new(store::default_document()),
        };
        facade.bus().publish(CONFIG_CHANGED, stale, EventPriority::Normal);
        assert_eq!(log.lock().len(), 1);

        facade.set_setting("ui.theme", json!("light"), true).unwrap();
        assert_eq!(log.lock().len(), 2);
    }

    // ==================== Diff Baseline Tests ====================

    #[test]
    fn test_diff_baseline_moves_only_on_save() {
        let (_temp_dir, facade) = create_test_facade();
        facade.store().set("ui.theme", json!("dark")).unwrap();

        // Visible immediately, but not yet part of the baseline
        assert_eq!(facade.get_setting("ui.theme", Value::Null), json!("dark"));
        assert_eq!(facade.last_saved().get("ui.theme"), Some(&json!("system")));

        let diff = facade.save().unwrap();
        assert_eq!(diff.changed_keys(), keys(&["ui.theme"]));
        assert_eq!(facade.last_saved().get("ui.theme"), Some(&json!("dark")));

        // Nothing changed since
        assert!(facade.save().unwrap().is_empty());
    }

    #[test]
    fn test_remove_setting_counts_as_change() {
        let (_temp_dir, facade) = create_test_facade();
        let (removed, diff) = facade.remove_setting("ai.api_key", true).unwrap();
        assert_eq!(removed, Some(json!("")));
        assert_eq!(diff.unwrap().removed, keys(&["ai.api_key"]));

        let (removed, diff) = facade.remove_setting("ai.api_key", true).unwrap();
        assert!(removed.is_none());
        assert!(diff.is_none());
    }

    #[test]
    fn test_set_invalid_path() {
        let (_temp_dir, facade) = create_test_facade();
        let err = facade.set_setting("audio.sample_rate.hz", json!(1), true).unwrap_err();
        assert!(matches!(err, LivecfgError::InvalidPath { .. }));
    }

    #[test]
    fn test_save_failure_is_published() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not_a_dir");
        fs::write(&blocker, "file").unwrap();
        let (facade, _) = ConfigFacade::open(FacadeOptions::at(blocker.join("config.json")));
        let failures = capture(facade.bus(), &[SAVE_FAILED]);
        let baseline = facade.last_saved();

        assert!(facade.set_setting("ui.theme", json!("dark"), true).is_err());
        assert_eq!(failures.lock().len(), 1);
        assert_eq!(facade.last_saved(), baseline);
    }

    // ==================== Debounce Tests ====================

    #[tokio::test]
    async fn test_deferred_sets_flush_once() {
        let (_temp_dir, facade) = create_test_facade();
        let events = capture(facade.bus(), &[CONFIG_CHANGED]);

        for i in 0..10 {
            assert!(facade.set_setting("audio.chunk_size", json!(i), false).unwrap().is_none());
        }
        facade.set_setting("ui.theme", json!("light"), false).unwrap();
        assert!(facade.has_pending_save());
        assert_eq!(facade.store().save_count(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(facade.store().save_count(), 1);
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].config_change().unwrap().changed_keys,
            keys(&["audio.chunk_size", "ui.theme"])
        );
        assert_eq!(facade.last_saved().get("audio.chunk_size"), Some(&json!(9)));
    }

    #[tokio::test]
    async fn test_flush_saves_pending_now() {
        let (_temp_dir, facade) = create_test_facade();
        facade.set_setting("ui.theme", json!("dark"), false).unwrap();

        let diff = facade.flush().unwrap().unwrap();
        assert_eq!(diff.changed_keys(), keys(&["ui.theme"]));
        assert!(facade.flush().unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(facade.store().save_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_flushes_pending_save() {
        let (temp_dir, facade) = create_test_facade();
        facade.set_setting("hotkeys.record", json!("f8"), false).unwrap();
        drop(facade);

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(temp_dir.path().join("config.json")).unwrap()).unwrap();
        assert_eq!(raw["hotkeys"]["record"], json!("f8"));
    }

    // ==================== Service Tests ====================

    #[test]
    fn test_register_unordered_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut options = FacadeOptions::at(temp_dir.path().join("config.json"));
        options.unordered_policy = UnorderedPolicy::Reject;
        let (facade, _) = ConfigFacade::open(options);
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));

        let err = facade
            .register_service("plugin", Probe::new("plugin", &["ui"], &log), None)
            .unwrap_err();
        assert!(matches!(err, LivecfgError::ReloadOrder(_)));
        assert!(!facade.registry().contains("plugin"));
    }

    #[test]
    fn test_refused_replacement_keeps_previous_instance() {
        let temp_dir = TempDir::new().unwrap();
        let mut options = FacadeOptions::at(temp_dir.path().join("config.json"));
        options.unordered_policy = UnorderedPolicy::Reject;
        let (facade, _) = ConfigFacade::open(options);
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let factory_log = Arc::clone(&log);
        let factory: ServiceFactory =
            Arc::new(move |_: &ConfigDocument| Ok(Probe::new("plugin", &["ui"], &factory_log) as Arc<dyn Service>));
        facade
            .register_service("plugin", Arc::new(Inert), Some(factory))
            .unwrap();

        let err = facade
            .replace_service("plugin", Probe::new("plugin", &["ui"], &log))
            .err()
            .unwrap();
        assert!(matches!(err, LivecfgError::ReloadOrder(_)));
        let err = facade.rebuild_service("plugin").err().unwrap();
        assert!(matches!(err, LivecfgError::ReloadOrder(_)));

        assert!(facade.registry().get_as::<Inert>("plugin").is_ok());
        assert_eq!(facade.registry().generation("plugin"), Some(0));
        assert!(facade.coordinator().tracked_services().is_empty());
    }

    #[test]
    fn test_replace_service_reindexes() {
        let (_temp_dir, facade) = create_test_facade();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        facade
            .register_service("ui", Probe::new("ui", &["ui.theme"], &log), None)
            .unwrap();
        facade
            .replace_service("ui", Probe::new("ui", &["ui.language"], &log))
            .unwrap();

        facade.set_setting("ui.theme", json!("dark"), true).unwrap();
        assert!(log.lock().is_empty());
        facade.set_setting("ui.language", json!("de"), true).unwrap();
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_rebuild_service_uses_current_document() {
        let (_temp_dir, facade) = create_test_facade();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let factory_log = Arc::clone(&log);
        let factory: ServiceFactory = Arc::new(move |config: &ConfigDocument| {
            let key: &'static str = if config.get("ui.theme") == Some(&json!("dark")) {
                "ui.language"
            } else {
                "ui.theme"
            };
            Ok(Probe::new("ui", &[key], &factory_log) as Arc<dyn Service>)
        });
        facade
            .register_service("ui", Probe::new("ui", &["ui.theme"], &log), Some(factory))
            .unwrap();

        facade.store().set("ui.theme", json!("dark")).unwrap();
        facade.rebuild_service("ui").unwrap();
        assert_eq!(facade.registry().generation("ui"), Some(1));
        assert_eq!(
            facade.coordinator().affected_services(&keys(&["ui.language"])),
            keys(&["ui"])
        );
    }

    // ==================== Backup / Import Tests ====================

    #[test]
    fn test_export_then_import_round_trip() {
        let (temp_dir, facade) = create_test_facade();
        facade.set_setting("speech.model", json!("small"), true).unwrap();
        let export_path = temp_dir.path().join("export.json");
        facade.export_settings(&export_path).unwrap();

        facade.set_setting("speech.model", json!("tiny"), true).unwrap();
        let diff = facade.import_settings(&export_path).unwrap();
        assert_eq!(diff.changed_keys(), keys(&["speech.model"]));
        assert_eq!(facade.get_setting("speech.model", Value::Null), json!("small"));
    }

    #[test]
    fn test_import_legacy_document_is_normalized() {
        let (temp_dir, facade) = create_test_facade();
        let legacy = temp_dir.path().join("legacy.json");
        fs::write(&legacy, r#"{"audio": {"samplerate": 44100}, "hotkey": "f9"}"#).unwrap();

        let diff = facade.import_settings(&legacy).unwrap();
        assert_eq!(diff.changed_keys(), keys(&["audio.sample_rate", "hotkeys.record"]));
        assert_eq!(facade.get_setting("audio.sample_rate", Value::Null), json!(44100));
        assert!(facade.get_setting("ui", Value::Null).is_object());
    }

    #[test]
    fn test_restore_backup() {
        let (_temp_dir, facade) = create_test_facade();
        facade.set_setting("ui.theme", json!("dark"), true).unwrap();
        let backup = facade.backup_settings().unwrap();

        facade.set_setting("ui.theme", json!("light"), true).unwrap();
        facade.restore_backup(&backup).unwrap();
        assert_eq!(facade.get_setting("ui.theme", Value::Null), json!("dark"));

        // The pre-restore backup lands beside the restored one, not over it
        assert_eq!(facade.list_backups().unwrap().len(), 2);
        let kept = facade.store().read_backup(&backup).unwrap();
        assert_eq!(kept.get("ui.theme"), Some(&json!("dark")));
    }

    #[test]
    fn test_reset_to_defaults() {
        let (_temp_dir, facade) = create_test_facade();
        facade.set_setting("plugins.extra", json!(true), true).unwrap();

        let diff = facade.reset_to_defaults().unwrap();
        assert_eq!(diff.removed, keys(&["plugins.extra"]));
        assert_eq!(facade.document(), store::default_document());
        assert!(!facade.list_backups().unwrap().is_empty());
    }
}
