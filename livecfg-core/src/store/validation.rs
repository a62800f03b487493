//! Structural validation and in-place repair

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::defaults::{
    default_document, COMMON_SAMPLE_RATES, KNOWN_LOG_LEVELS, REQUIRED_SECTIONS,
};
use crate::document::ConfigDocument;

/// A structurally valid but semantically odd value; logged only
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationWarning {
    pub key: String,
    pub message: String,
}

impl ValidationWarning {
    fn new(key: &str, message: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// What `validate_and_repair` changed or flagged
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepairReport {
    /// Keys (sections or leaves) replaced with defaults
    pub repaired: Vec<String>,
    pub warnings: Vec<ValidationWarning>,
}

impl RepairReport {
    pub fn is_repaired(&self) -> bool {
        !self.repaired.is_empty()
    }
}

fn same_kind(expected: &Value, actual: &Value) -> bool {
    match expected {
        Value::Null => true,
        Value::Bool(_) => actual.is_boolean(),
        Value::Number(_) => actual.is_number(),
        Value::String(_) => actual.is_string(),
        Value::Array(_) => actual.is_array(),
        Value::Object(_) => actual.is_object(),
    }
}

/// Fill in missing or mistyped required structure from the defaults
pub fn validate_and_repair(mut doc: ConfigDocument) -> (ConfigDocument, RepairReport) {
    let defaults = default_document();
    let mut report = RepairReport::default();

    for section in REQUIRED_SECTIONS {
        let Some(default_section) = defaults.get(section).cloned() else {
            continue;
        };

        let section_ok = doc.get(section).map(Value::is_object).unwrap_or(false);
        if !section_ok {
            if doc.set(section, default_section).is_ok() {
                report.repaired.push(section.to_string());
            }
            continue;
        }

        let section_defaults = ConfigDocument::from_value(default_section).unwrap_or_default();
        for (leaf, default_value) in section_defaults.flatten() {
            let key = format!("{}.{}", section, leaf);
            let needs_repair = match doc.get(&key) {
                None => true,
                Some(actual) => !same_kind(&default_value, actual),
            };
            if needs_repair {
                match doc.set(&key, default_value) {
                    Ok(_) => report.repaired.push(key),
                    Err(e) => warn!(key = %key, error = %e, "Unable to repair config value"),
                }
            }
        }
    }

    report.warnings = semantic_warnings(&doc);
    for warning in &report.warnings {
        warn!(key = %warning.key, "Config validation warning: {}", warning.message);
    }

    (doc, report)
}

fn semantic_warnings(doc: &ConfigDocument) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if let Some(rate) = doc.get("audio.sample_rate").and_then(Value::as_u64) {
        if !COMMON_SAMPLE_RATES.contains(&rate) {
            warnings.push(ValidationWarning::new(
                "audio.sample_rate",
                format!("unusual sample rate {} Hz", rate),
            ));
        }
    }

    if let Some(channels) = doc.get("audio.channels").and_then(Value::as_u64) {
        if channels != 1 && channels != 2 {
            warnings.push(ValidationWarning::new(
                "audio.channels",
                format!("expected 1 or 2 channels, got {}", channels),
            ));
        }
    }

    if let Some(threshold) = doc.get("audio.silence_threshold").and_then(Value::as_f64) {
        if !(0.0..=1.0).contains(&threshold) {
            warnings.push(ValidationWarning::new(
                "audio.silence_threshold",
                format!("threshold {} outside 0..=1", threshold),
            ));
        }
    }

    if let Some(temperature) = doc.get("ai.temperature").and_then(Value::as_f64) {
        if !(0.0..=2.0).contains(&temperature) {
            warnings.push(ValidationWarning::new(
                "ai.temperature",
                format!("temperature {} outside 0..=2", temperature),
            ));
        }
    }

    if let Some(level) = doc.get("logging.level").and_then(Value::as_str) {
        if !KNOWN_LOG_LEVELS.contains(&level) {
            warnings.push(ValidationWarning::new(
                "logging.level",
                format!("unknown log level '{}'", level),
            ));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_valid() {
        let (doc, report) = validate_and_repair(default_document());
        assert!(!report.is_repaired());
        assert!(report.warnings.is_empty());
        assert_eq!(doc, default_document());
    }

    #[test]
    fn test_missing_section_restored() {
        let mut doc = default_document();
        doc.remove("hotkeys");

        let (repaired, report) = validate_and_repair(doc);
        assert_eq!(report.repaired, vec!["hotkeys".to_string()]);
        assert_eq!(repaired.get("hotkeys"), default_document().get("hotkeys"));
    }

    #[test]
    fn test_non_object_section_replaced() {
        let mut doc = default_document();
        doc.set("ui", json!("dark")).unwrap();

        let (repaired, report) = validate_and_repair(doc);
        assert!(report.repaired.contains(&"ui".to_string()));
        assert!(repaired.get("ui").unwrap().is_object());
    }

    #[test]
    fn test_mistyped_leaf_replaced_keeping_siblings() {
        let mut doc = default_document();
        doc.set("audio.sample_rate", json!("fast")).unwrap();
        doc.set("audio.channels", json!(2)).unwrap();

        let (repaired, report) = validate_and_repair(doc);
        assert_eq!(report.repaired, vec!["audio.sample_rate".to_string()]);
        assert_eq!(repaired.get("audio.sample_rate"), Some(&json!(16000)));
        assert_eq!(repaired.get("audio.channels"), Some(&json!(2)));
    }

    #[test]
    fn test_null_default_accepts_any_type() {
        let mut doc = default_document();
        doc.set("audio.device_id", json!("hw:1,0")).unwrap();

        let (repaired, report) = validate_and_repair(doc);
        assert!(!report.is_repaired());
        assert_eq!(repaired.get("audio.device_id"), Some(&json!("hw:1,0")));
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let mut doc = default_document();
        doc.set("plugins.spellcheck.enabled", json!(true)).unwrap();

        let (repaired, _) = validate_and_repair(doc);
        assert_eq!(repaired.get("plugins.spellcheck.enabled"), Some(&json!(true)));
    }

    #[test]
    fn test_semantic_warnings_do_not_repair() {
        let mut doc = default_document();
        doc.set("audio.sample_rate", json!(12345)).unwrap();
        doc.set("ai.temperature", json!(3.5)).unwrap();
        doc.set("logging.level", json!("loud")).unwrap();

        let (repaired, report) = validate_and_repair(doc);
        assert!(!report.is_repaired());
        let keys: Vec<&str> = report.warnings.iter().map(|w| w.key.as_str()).collect();
        assert_eq!(keys, vec!["audio.sample_rate", "ai.temperature", "logging.level"]);
        assert_eq!(repaired.get("audio.sample_rate"), Some(&json!(12345)));
    }
}
