//! Tagged-value configuration tree addressed by dot paths
//!
//! The document wraps a JSON object. Keys such as `"audio.sample_rate"` walk
//! nested objects one segment at a time.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use livecfg_utils::LivecfgError;

/// Errors raised while resolving a dot path for writing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("key path is empty")]
    Empty,

    #[error("key path '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("'{traversed}' is not an object while resolving '{path}'")]
    NotAnObject { path: String, traversed: String },
}

impl From<PathError> for LivecfgError {
    fn from(err: PathError) -> Self {
        let path = match &err {
            PathError::Empty => String::new(),
            PathError::EmptySegment(p) => p.clone(),
            PathError::NotAnObject { path, .. } => path.clone(),
        };
        LivecfgError::invalid_path(path, err.to_string())
    }
}

fn split_path(path: &str) -> Result<Vec<&str>, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(PathError::EmptySegment(path.to_string()));
    }
    Ok(segments)
}

/// Configuration document: a JSON object tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDocument {
    root: Map<String, Value>,
}

impl ConfigDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value; only objects are accepted
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(root) => Some(Self { root }),
            _ => None,
        }
    }

    /// The document as a JSON value
    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    /// Consume the document into a JSON value
    pub fn into_value(self) -> Value {
        Value::Object(self.root)
    }

    /// Top-level object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Look up a value by dot path
    ///
    /// A missing key at any depth, or an intermediate that is not an object,
    /// yields `None`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let segments = split_path(path).ok()?;
        let (last, parents) = segments.split_last()?;

        let mut current = &self.root;
        for segment in parents {
            current = current.get(*segment)?.as_object()?;
        }
        current.get(*last)
    }

    /// Look up a value, falling back to `default`
    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).cloned().unwrap_or(default)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Write a value, creating intermediate objects as needed
    ///
    /// Returns the previous value at `path`, if any.
    pub fn set(&mut self, path: &str, value: Value) -> Result<Option<Value>, PathError> {
        let segments = split_path(path)?;
        let (last, parents) = segments
            .split_last()
            .ok_or(PathError::Empty)?;

        let mut current = &mut self.root;
        for (depth, segment) in parents.iter().enumerate() {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match entry {
                Value::Object(map) => map,
                _ => {
                    return Err(PathError::NotAnObject {
                        path: path.to_string(),
                        traversed: segments[..=depth].join("."),
                    })
                }
            };
        }
        Ok(current.insert(last.to_string(), value))
    }

    /// Remove a value by dot path
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let segments = split_path(path).ok()?;
        let (last, parents) = segments.split_last()?;

        let mut current = &mut self.root;
        for segment in parents {
            current = current.get_mut(*segment)?.as_object_mut()?;
        }
        current.remove(*last)
    }

    /// Recursively merge `overlay` onto this document
    ///
    /// Objects merge key by key; any other overlay value replaces the
    /// existing one.
    pub fn merge(&mut self, overlay: &ConfigDocument) {
        merge_maps(&mut self.root, &overlay.root);
    }

    /// New document with `overlay` merged onto `self`
    pub fn merged_with(&self, overlay: &ConfigDocument) -> ConfigDocument {
        let mut merged = self.clone();
        merged.merge(overlay);
        merged
    }

    /// Flatten into dot path -> leaf value
    ///
    /// Non-empty objects are descended; empty objects, arrays and scalars are
    /// leaves.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        flatten_into(&self.root, None, &mut out);
        out
    }

    /// Render as JSON text
    pub fn to_json_string(&self, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(&self.root)
        } else {
            serde_json::to_string(&self.root)
        }
    }
}

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json_string(true) {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl From<Map<String, Value>> for ConfigDocument {
    fn from(root: Map<String, Value>) -> Self {
        Self { root }
    }
}

/// Recursive per-key merge of two JSON objects
pub fn merge_maps(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, overlay_value) in overlay {
        match (base.get_mut(key), overlay_value) {
            (Some(Value::Object(base_obj)), Value::Object(overlay_obj)) => {
                merge_maps(base_obj, overlay_obj);
            }
            _ => {
                base.insert(key.clone(), overlay_value.clone());
            }
        }
    }
}

fn flatten_into(map: &Map<String, Value>, prefix: Option<&str>, out: &mut BTreeMap<String, Value>) {
    for (key, value) in map {
        let path = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(inner, Some(&path), out),
            _ => {
                out.insert(path, value.clone());
            }
        }
    }
}
