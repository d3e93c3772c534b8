use serde_json::Value;

use crate::storage::{Storage, StorageKey};
use crate::types::{FlagMap, FlagValue};

/// Whether session replay may record, as decided by the server.
///
/// The server sends `sessionRecording` either as a plain boolean or as an
/// object that may link recording to a feature flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReplayGate {
    active: bool,
    endpoint: Option<String>,
}

impl SessionReplayGate {
    /// Rebuild the gate from the persisted descriptor and cached flags.
    pub fn restore(storage: &Storage, flags: &FlagMap) -> Self {
        let mut gate = Self::default();
        if let Some(descriptor) = storage.get_json::<Value>(StorageKey::SessionReplay) {
            if descriptor.is_object() {
                gate.endpoint = endpoint_of(&descriptor);
                gate.active = is_recording_active(flags, &descriptor);
            }
        }
        gate
    }

    /// Apply a `sessionRecording` value from a remote config or decide response.
    pub fn apply(&mut self, session_recording: Option<&Value>, flags: &FlagMap, storage: &Storage) {
        match session_recording {
            Some(Value::Bool(enabled)) => {
                self.active = *enabled;
                if !enabled {
                    storage.remove(StorageKey::SessionReplay);
                }
            }
            Some(descriptor @ Value::Object(_)) => {
                if let Some(endpoint) = endpoint_of(descriptor) {
                    self.endpoint = Some(endpoint);
                }
                self.active = is_recording_active(flags, descriptor);
                storage.set_json(StorageKey::SessionReplay, descriptor);
            }
            _ => {}
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

/// Evaluate the `linkedFlag` of a recording descriptor against `flags`.
///
/// A string links to a flag by key: its boolean value decides, a variant
/// name means "any variant" and counts as active. An object `{flag, variant}`
/// requires that exact variant. A missing flag disables recording; no linked
/// flag at all leaves it active.
pub fn is_recording_active(flags: &FlagMap, session_recording: &Value) -> bool {
    match session_recording.get("linkedFlag") {
        Some(Value::String(flag)) => match flags.get(flag) {
            Some(FlagValue::Bool(enabled)) => *enabled,
            Some(FlagValue::String(_)) => true,
            _ => false,
        },
        Some(Value::Object(linked)) => {
            let flag = linked.get("flag").and_then(Value::as_str);
            let variant = linked.get("variant").and_then(Value::as_str);
            match (flag, variant) {
                (Some(flag), Some(variant)) => {
                    flags.get(flag).and_then(FlagValue::as_string) == Some(variant)
                }
                _ => false,
            }
        }
        _ => true,
    }
}

fn endpoint_of(descriptor: &Value) -> Option<String> {
    descriptor
        .get("endpoint")
        .and_then(Value::as_str)
        .map(str::to_string)
}
