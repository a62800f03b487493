//! Service Registry
//!
//! Named service instances that can be swapped at runtime. A `get` racing a
//! `replace` sees either the whole old instance or the whole new one.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use livecfg_utils::{LivecfgError, Result};

use crate::document::ConfigDocument;

/// Upcast helper so registered services can be downcast to their concrete type
pub trait AsAny: Any + Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A registered service instance
pub trait Service: AsAny {
    /// The hot-reload capability, if this service has one
    fn as_reloadable(&self) -> Option<&dyn Reloadable> {
        None
    }
}

/// A service that reacts to configuration changes in place
pub trait Reloadable: Send + Sync {
    /// Dot-path keys this service depends on
    ///
    /// A key also covers everything beneath it: `"audio"` matches a change
    /// to `"audio.device_id"`.
    fn dependency_keys(&self) -> Vec<String>;

    /// Apply a saved configuration
    ///
    /// Return `Ok(false)` to report that the change could not be applied.
    fn on_config_changed(&self, changed_keys: &BTreeSet<String>, new_config: &ConfigDocument) -> Result<bool>;
}

/// Builds a fresh instance from the current configuration
pub type ServiceFactory = Arc<dyn Fn(&ConfigDocument) -> Result<Arc<dyn Service>> + Send + Sync>;

struct Registration {
    instance: Arc<dyn Service>,
    factory: Option<ServiceFactory>,
    /// Bumped on every replace
    generation: u64,
}

/// Name -> service map guarded by one reader-writer lock
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Registration>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Registration ====================

    pub fn register(&self, name: &str, instance: Arc<dyn Service>, factory: Option<ServiceFactory>) -> Result<()> {
        let mut services = self.services.write();
        if services.contains_key(name) {
            return Err(LivecfgError::ServiceExists(name.to_string()));
        }
        services.insert(
            name.to_string(),
            Registration {
                instance,
                factory,
                generation: 0,
            },
        );
        debug!(service = name, "Registered service");
        Ok(())
    }

    /// Remove a service, returning its current instance
    pub fn unregister(&self, name: &str) -> Result<Arc<dyn Service>> {
        self.services
            .write()
            .remove(name)
            .map(|r| {
                debug!(service = name, "Unregistered service");
                r.instance
            })
            .ok_or_else(|| LivecfgError::ServiceNotFound(name.to_string()))
    }

    // ==================== Lookup ====================

    pub fn get(&self, name: &str) -> Result<Arc<dyn Service>> {
        self.services
            .read()
            .get(name)
            .map(|r| Arc::clone(&r.instance))
            .ok_or_else(|| LivecfgError::ServiceNotFound(name.to_string()))
    }

    /// Fetch a service as its concrete type
    pub fn get_as<T: Service>(&self, name: &str) -> Result<Arc<T>> {
        self.get(name)?
            .into_any()
            .downcast::<T>()
            .map_err(|_| LivecfgError::ServiceTypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// How many times `name` has been replaced
    pub fn generation(&self, name: &str) -> Option<u64> {
        self.services.read().get(name).map(|r| r.generation)
    }

    // ==================== Hot Swap ====================

    /// Swap in a new instance, returning the old one
    pub fn replace(&self, name: &str, new_instance: Arc<dyn Service>) -> Result<Arc<dyn Service>> {
        let mut services = self.services.write();
        let registration = services
            .get_mut(name)
            .ok_or_else(|| LivecfgError::ServiceNotFound(name.to_string()))?;
        let old = std::mem::replace(&mut registration.instance, new_instance);
        registration.generation += 1;
        info!(service = name, generation = registration.generation, "Replaced service instance");
        Ok(old)
    }

    /// Build a new instance with the registered factory and swap it in
    ///
    /// The factory runs without the registry lock held. Returns the new
    /// instance.
    pub fn rebuild(&self, name: &str, config: &ConfigDocument) -> Result<Arc<dyn Service>> {
        let instance = self.build(name, config)?;
        self.replace(name, Arc::clone(&instance))?;
        Ok(instance)
    }

    /// Run the registered factory without swapping the result in
    pub fn build(&self, name: &str, config: &ConfigDocument) -> Result<Arc<dyn Service>> {
        let factory = {
            let services = self.services.read();
            let registration = services
                .get(name)
                .ok_or_else(|| LivecfgError::ServiceNotFound(name.to_string()))?;
            registration
                .factory
                .clone()
                .ok_or_else(|| LivecfgError::NoFactory(name.to_string()))?
        };

        factory(config)
    }
}
