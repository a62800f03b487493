//! Hot-reload coordination
//!
//! Maps changed configuration keys to the registered services that declared
//! them and invokes those services one at a time in a fixed order. The chain
//! stops at the first service that fails; nothing is rolled back.

use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use livecfg_utils::{LivecfgError, Result};

use crate::document::ConfigDocument;
use crate::events::bus::panic_message;
use crate::registry::{Service, ServiceRegistry};

/// Service invocation order used when none is configured
pub const DEFAULT_RELOAD_ORDER: &[&str] = &["audio", "speech", "ai", "input", "hotkeys", "ui"];

/// What to do with a reloadable service that has no place in the reload order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnorderedPolicy {
    /// Track it, never invoke it, and warn when a change affects it
    #[default]
    Skip,
    /// Refuse to track it
    Reject,
}

/// Outcome of one reload pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    /// Services called, in call order (including the one that failed)
    pub invoked: Vec<String>,
    pub failed: Option<String>,
    pub failure: Option<String>,
    /// Affected services absent from the reload order
    pub skipped_unordered: Vec<String>,
}

impl ReloadReport {
    pub fn succeeded(&self) -> bool {
        self.failed.is_none()
    }
}

/// True if declared dependency `declared` covers changed key `changed`
///
/// Either may be an ancestor of the other: `audio` covers `audio.device_id`,
/// and a change to the whole `audio` section covers `audio.device_id`.
pub fn keys_overlap(declared: &str, changed: &str) -> bool {
    fn is_ancestor(parent: &str, child: &str) -> bool {
        child.len() > parent.len() && child.starts_with(parent) && child.as_bytes()[parent.len()] == b'.'
    }
    declared == changed || is_ancestor(declared, changed) || is_ancestor(changed, declared)
}

#[derive(Debug, Default)]
struct DependencyIndex {
    /// Dependency key -> services declaring it
    by_key: HashMap<String, BTreeSet<String>>,
    /// Service -> declared keys
    by_service: HashMap<String, Vec<String>>,
}

impl DependencyIndex {
    fn insert(&mut self, service: &str, keys: Vec<String>) {
        self.remove(service);
        for key in &keys {
            self.by_key
                .entry(key.clone())
                .or_default()
                .insert(service.to_string());
        }
        self.by_service.insert(service.to_string(), keys);
    }

    fn remove(&mut self, service: &str) -> bool {
        let Some(keys) = self.by_service.remove(service) else {
            return false;
        };
        for key in keys {
            if let Some(services) = self.by_key.get_mut(&key) {
                services.remove(service);
                if services.is_empty() {
                    self.by_key.remove(&key);
                }
            }
        }
        true
    }

    fn affected(&self, changed_keys: &BTreeSet<String>) -> BTreeSet<String> {
        let mut affected = BTreeSet::new();
        for (declared, services) in &self.by_key {
            if changed_keys.iter().any(|changed| keys_overlap(declared, changed)) {
                affected.extend(services.iter().cloned());
            }
        }
        affected
    }
}

/// Drives in-place reconfiguration of registered services
pub struct HotReloadCoordinator {
    registry: Arc<ServiceRegistry>,
    reload_order: Vec<String>,
    policy: UnorderedPolicy,
    index: RwLock<DependencyIndex>,
}

impl std::fmt::Debug for HotReloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotReloadCoordinator")
            .field("reload_order", &self.reload_order)
            .field("policy", &self.policy)
            .field("tracked", &self.tracked_services())
            .finish()
    }
}

impl HotReloadCoordinator {
    pub fn new(registry: Arc<ServiceRegistry>, reload_order: Vec<String>, policy: UnorderedPolicy) -> Self {
        Self {
            registry,
            reload_order,
            policy,
            index: RwLock::new(DependencyIndex::default()),
        }
    }

    /// Coordinator with [`DEFAULT_RELOAD_ORDER`] and the `Skip` policy
    pub fn with_defaults(registry: Arc<ServiceRegistry>) -> Self {
        Self::new(
            registry,
            DEFAULT_RELOAD_ORDER.iter().map(|s| s.to_string()).collect(),
            UnorderedPolicy::default(),
        )
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn reload_order(&self) -> &[String] {
        &self.reload_order
    }

    pub fn policy(&self) -> UnorderedPolicy {
        self.policy
    }

    fn is_ordered(&self, name: &str) -> bool {
        self.reload_order.iter().any(|n| n == name)
    }

    // ==================== Dependency Index ====================

    /// Index the dependency keys of a registered service
    ///
    /// Services without the reload capability are ignored. Re-tracking a
    /// service refreshes its keys.
    pub fn track(&self, name: &str) -> Result<()> {
        let service = self.registry.get(name)?;
        self.admit(name, service.as_ref())?;
        let Some(reloadable) = service.as_reloadable() else {
            debug!(service = name, "Service is not reloadable; not tracked");
            self.untrack(name);
            return Ok(());
        };

        if !self.is_ordered(name) {
            warn!(service = name, "Reloadable service is not in the reload order and will not be reloaded");
        }

        let keys = reloadable.dependency_keys();
        debug!(service = name, keys = ?keys, "Tracking service dependencies");
        self.index.write().insert(name, keys);
        Ok(())
    }

    /// Check `instance` against the unordered policy without touching the index
    ///
    /// Lets a caller refuse an instance before it is registered or swapped in.
    pub fn admit(&self, name: &str, instance: &dyn Service) -> Result<()> {
        if self.policy == UnorderedPolicy::Reject && instance.as_reloadable().is_some() && !self.is_ordered(name) {
            return Err(LivecfgError::ReloadOrder(format!(
                "service '{}' is reloadable but not in the reload order",
                name
            )));
        }
        Ok(())
    }

    pub fn untrack(&self, name: &str) -> bool {
        self.index.write().remove(name)
    }

    pub fn tracked_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.index.read().by_service.keys().cloned().collect();
        names.sort();
        names
    }

    /// Services whose declared keys overlap any of `changed_keys`
    pub fn affected_services(&self, changed_keys: &BTreeSet<String>) -> BTreeSet<String> {
        self.index.read().affected(changed_keys)
    }

    // ==================== Reload ====================

    /// Reload the affected services in order, stopping at the first failure
    pub fn reload(&self, changed_keys: &BTreeSet<String>, new_config: &ConfigDocument) -> ReloadReport {
        let mut report = ReloadReport::default();
        let affected = self.affected_services(changed_keys);
        if affected.is_empty() {
            debug!(changed = changed_keys.len(), "No services affected by config change");
            return report;
        }

        report.skipped_unordered = affected
            .iter()
            .filter(|name| !self.is_ordered(name))
            .cloned()
            .collect();
        if !report.skipped_unordered.is_empty() {
            warn!(services = ?report.skipped_unordered, "Affected services outside the reload order were skipped");
        }

        for name in &self.reload_order {
            if !affected.contains(name) {
                continue;
            }
            let service = match self.registry.get(name) {
                Ok(service) => service,
                Err(_) => {
                    debug!(service = %name, "Affected service is no longer registered");
                    continue;
                }
            };
            let Some(reloadable) = service.as_reloadable() else {
                continue;
            };

            report.invoked.push(name.clone());
            let outcome = catch_unwind(AssertUnwindSafe(|| reloadable.on_config_changed(changed_keys, new_config)));
            let failure = match outcome {
                Ok(Ok(true)) => None,
                Ok(Ok(false)) => Some("service declined the new configuration".to_string()),
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(format!("panicked: {}", panic_message(&*panic))),
            };

            if let Some(message) = failure {
                error!(service = %name, "Hot reload failed: {}", message);
                report.failed = Some(name.clone());
                report.failure = Some(message);
                return report;
            }
        }

        info!(services = ?report.invoked, "Hot reload complete");
        report
    }

    /// Reload affected services; false if any of them failed
    pub fn notify_config_changed(&self, changed_keys: &BTreeSet<String>, new_config: &ConfigDocument) -> bool {
        self.reload(changed_keys, new_config).succeeded()
    }
}
