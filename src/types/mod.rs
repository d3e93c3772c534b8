use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

mod event;

pub use event::{
    Event, ALIAS_EVENT, FEATURE_FLAG_CALLED_EVENT, GROUP_IDENTIFY_EVENT, IDENTIFY_EVENT,
};

/// Cached flag values keyed by flag key.
pub type FlagMap = HashMap<String, FlagValue>;

/// Cached flag payloads keyed by flag key, kept exactly as the server sent them.
pub type PayloadMap = HashMap<String, serde_json::Value>;

/// A server-evaluated flag value.
///
/// Boolean flags carry `Bool`, multivariate flags carry the variant name as
/// `String`. The remaining variants exist so any JSON the server sends
/// survives a round trip through the on-disk cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    String(String),
    Number(f64),
    Null,
    Json(serde_json::Value),
}

impl FlagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FlagValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            FlagValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FlagValue::Null)
    }

    /// Coerces the value for `is_feature_enabled`.
    ///
    /// `Bool` is taken as is. Any other present value (a variant name, a
    /// number, a JSON document, even `Null`) counts as enabled; only a missing
    /// key reads as disabled.
    pub fn is_enabled(&self) -> bool {
        match self {
            FlagValue::Bool(b) => *b,
            _ => true,
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::String(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        FlagValue::Number(value)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => FlagValue::Bool(b),
            serde_json::Value::String(s) => FlagValue::String(s),
            serde_json::Value::Number(n) => FlagValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::Null => FlagValue::Null,
            other => FlagValue::Json(other),
        }
    }
}

/// Keys that differ between two flag sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub changed: BTreeSet<String>,
}

impl FlagDiff {
    /// Compares `old` against `new` using structural equality of the values.
    pub fn between(old: &FlagMap, new: &FlagMap) -> Self {
        let mut diff = FlagDiff::default();

        for (key, value) in new {
            match old.get(key) {
                None => {
                    diff.added.insert(key.clone());
                }
                Some(previous) if previous != value => {
                    diff.changed.insert(key.clone());
                }
                Some(_) => {}
            }
        }

        for key in old.keys() {
            if !new.contains_key(key) {
                diff.removed.insert(key.clone());
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Every key that was added, removed or changed.
    pub fn changed_keys(&self) -> BTreeSet<String> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .chain(self.changed.iter())
            .cloned()
            .collect()
    }
}
