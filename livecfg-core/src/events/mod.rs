//! In-process event bus
//!
//! Listeners subscribe per event name with an integer priority. Publishing
//! is synchronous: higher priorities run first, equal priorities in
//! subscription order, and one listener failing never stops the others.

pub mod bus;
pub mod event;
pub mod middleware;

pub use bus::{Callback, EventBus, EventStats, ListenerId, PublishOutcome, DEFAULT_LISTENER_PRIORITY};
pub use event::{
    ConfigChange, Event, EventPayload, EventPriority, CONFIG_CHANGED, CONFIG_SAVED, RELOAD_FAILED,
    SAVE_FAILED, SETTING_CHANGED,
};
pub use middleware::{filtered, timed};
