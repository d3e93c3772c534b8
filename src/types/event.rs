use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emitted by `identify`; changes the distinct id the server evaluates flags for.
pub const IDENTIFY_EVENT: &str = "$identify";

/// Emitted by `alias`; links another id to the current person.
pub const ALIAS_EVENT: &str = "$create_alias";

/// Emitted by `group`; the client reloads flags locally before it is sent.
pub const GROUP_IDENTIFY_EVENT: &str = "$groupidentify";

/// Emitted the first time a flag value is read after it changed.
pub const FEATURE_FLAG_CALLED_EVENT: &str = "$feature_flag_called";

/// A captured analytics event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name (e.g. "$identify", "purchase").
    pub event: String,

    pub distinct_id: String,

    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,

    pub timestamp: DateTime<Utc>,

    pub uuid: Uuid,
}

impl Event {
    /// Create a new event stamped with the current time and a fresh uuid.
    pub fn new(event: impl Into<String>, distinct_id: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            distinct_id: distinct_id.into(),
            properties: serde_json::Map::new(),
            timestamp: Utc::now(),
            uuid: Uuid::new_v4(),
        }
    }

    /// Replace all properties.
    pub fn properties(mut self, properties: serde_json::Map<String, serde_json::Value>) -> Self {
        self.properties = properties;
        self
    }

    /// Add a single property.
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether delivering this event changes the identity flags are evaluated for.
    pub fn is_identity_change(&self) -> bool {
        self.event == IDENTIFY_EVENT || self.event == ALIAS_EVENT
    }
}
