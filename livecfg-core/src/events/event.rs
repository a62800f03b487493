//! Event values passed to listeners

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::document::ConfigDocument;

/// Informational per-write event, payload `{"key", "value"}`
pub const SETTING_CHANGED: &str = "config_changed";
/// Published after every successful save
pub const CONFIG_SAVED: &str = "config_saved";
/// Published after a save with the full diff; drives hot reload
pub const CONFIG_CHANGED: &str = "config.changed";
/// Published when a save fails
pub const SAVE_FAILED: &str = "config.save_failed";
/// Published when the hot-reload chain stops early
pub const RELOAD_FAILED: &str = "config.reload_failed";

/// Urgency tag carried by an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventPriority::Low => "low",
            EventPriority::Normal => "normal",
            EventPriority::High => "high",
            EventPriority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Saved-document transition delivered on [`CONFIG_CHANGED`]
#[derive(Debug, Clone)]
pub struct ConfigChange {
    /// Monotonic per facade; a later save always carries a larger value
    pub generation: u64,
    pub changed_keys: BTreeSet<String>,
    pub old_config: Arc<ConfigDocument>,
    pub new_config: Arc<ConfigDocument>,
}

/// Event body
#[derive(Debug, Clone, Default)]
pub enum EventPayload {
    #[default]
    Empty,
    Json(Value),
    ConfigChange(Arc<ConfigChange>),
}

impl From<Value> for EventPayload {
    fn from(value: Value) -> Self {
        EventPayload::Json(value)
    }
}

impl From<ConfigChange> for EventPayload {
    fn from(change: ConfigChange) -> Self {
        EventPayload::ConfigChange(Arc::new(change))
    }
}

/// A published event
#[derive(Debug, Clone)]
pub struct Event {
    /// Correlates log lines for one publish
    pub id: Uuid,
    pub name: String,
    pub payload: EventPayload,
    pub priority: EventPriority,
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: impl Into<EventPayload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload: payload.into(),
            priority: EventPriority::Normal,
            timestamp: Utc::now(),
            source: None,
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.payload {
            EventPayload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn config_change(&self) -> Option<&ConfigChange> {
        match &self.payload {
            EventPayload::ConfigChange(change) => Some(change),
            _ => None,
        }
    }
}
