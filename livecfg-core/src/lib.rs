//! livecfg-core: Live configuration for long-running processes
//!
//! This crate provides:
//! - A dot-path addressed configuration document ([`ConfigDocument`])
//! - Durable storage with migration, repair, backups and atomic saves ([`ConfigStore`])
//! - A priority-ordered in-process event bus ([`EventBus`])
//! - A hot-swappable service registry ([`ServiceRegistry`])
//! - Ordered, fail-fast hot reload of affected services ([`HotReloadCoordinator`])
//! - The application-facing API tying them together ([`ConfigFacade`])

pub mod debounce;
pub mod diff;
pub mod document;
pub mod events;
pub mod facade;
pub mod hot_reload;
pub mod registry;
pub mod store;

pub use diff::ConfigDiff;
pub use document::{ConfigDocument, PathError};
pub use events::{
    ConfigChange, Event, EventBus, EventPayload, EventPriority, EventStats, ListenerId, PublishOutcome,
};
pub use facade::{ConfigFacade, FacadeOptions, DEFAULT_DEBOUNCE_WINDOW};
pub use hot_reload::{HotReloadCoordinator, ReloadReport, UnorderedPolicy, DEFAULT_RELOAD_ORDER};
pub use registry::{Reloadable, Service, ServiceFactory, ServiceRegistry};
pub use store::{BackupInfo, ConfigStore, LoadReport, LoadSource, StoreOptions};
