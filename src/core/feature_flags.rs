//! Server-evaluated feature flags, cached in memory and on disk.
//!
//! Flags are fetched through the `decide` endpoint for the current identity.
//! A clean response replaces the cached set; a response computed with errors
//! only upserts the keys it carries, so flags the server failed to evaluate
//! keep their last known value until the next clean fetch.
//!
//! Every completed load publishes a [`FeatureFlagsLoaded`] notification with
//! the resulting flags and the keys that changed.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use super::identity::IdentitySource;
use super::remote_config::{RemoteConfigCache, RemoteConfigDescriptor};
use super::session_replay::SessionReplayGate;
use super::single_flight::SingleFlight;
use crate::error::{ErrorCode, Result, SignalKitError};
use crate::http::Transport;
use crate::storage::{Storage, StorageKey, WriteTicket};
use crate::types::{FlagDiff, FlagMap, FlagValue, PayloadMap};

const LOADED_CHANNEL_CAPACITY: usize = 16;
const QUOTA_LIMITED_RESOURCE: &str = "feature_flags";

/// Published after every flag load, successful or not.
///
/// `flags` is `None` when the load failed; `changes` is then empty.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFlagsLoaded {
    pub flags: Option<FlagMap>,
    pub changes: FlagDiff,
}

enum DecideResponse {
    QuotaLimited,
    Flags {
        flags: FlagMap,
        payloads: PayloadMap,
        partial: bool,
        session_recording: Option<Value>,
    },
}

impl DecideResponse {
    fn parse(value: Value) -> Result<Self> {
        let Value::Object(mut body) = value else {
            return Err(SignalKitError::new(
                ErrorCode::FlagsMalformedResponse,
                "Decide response is not a JSON object",
            ));
        };

        let quota_limited = body
            .get("quotaLimited")
            .and_then(Value::as_array)
            .is_some_and(|limited| {
                limited
                    .iter()
                    .any(|resource| resource.as_str() == Some(QUOTA_LIMITED_RESOURCE))
            });
        if quota_limited {
            return Ok(DecideResponse::QuotaLimited);
        }

        let (Some(Value::Object(flags)), Some(Value::Object(payloads))) =
            (body.remove("featureFlags"), body.remove("featureFlagPayloads"))
        else {
            return Err(SignalKitError::new(
                ErrorCode::FlagsMalformedResponse,
                "Decide response missing featureFlags or featureFlagPayloads",
            ));
        };

        Ok(DecideResponse::Flags {
            flags: flags
                .into_iter()
                .map(|(key, value)| (key, FlagValue::from(value)))
                .collect(),
            payloads: payloads.into_iter().collect(),
            partial: body
                .get("errorsWhileComputingFlags")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            session_recording: body.remove("sessionRecording"),
        })
    }
}

struct FlagState {
    /// `None` until flags were loaded from disk or fetched.
    flags: Option<FlagMap>,
    payloads: PayloadMap,
    /// Keys already reported through `$feature_flag_called` since they last changed.
    reported: HashSet<String>,
}

pub struct FeatureFlagStore {
    transport: Arc<dyn Transport>,
    storage: Arc<Storage>,
    remote: Arc<RemoteConfigCache>,
    identity: Arc<dyn IdentitySource>,
    preload: bool,
    state: RwLock<FlagState>,
    replay: Mutex<SessionReplayGate>,
    flight: SingleFlight<Option<FlagMap>>,
    loaded_tx: broadcast::Sender<FeatureFlagsLoaded>,
    runtime: Handle,
}

impl FeatureFlagStore {
    /// Load cached flags and hook into remote config updates.
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<Storage>,
        remote: Arc<RemoteConfigCache>,
        identity: Arc<dyn IdentitySource>,
        preload: bool,
    ) -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|_| SignalKitError::no_runtime())?;

        let flags = storage.get_json::<FlagMap>(StorageKey::EnabledFeatureFlags);
        let payloads = storage
            .get_json::<PayloadMap>(StorageKey::EnabledFeatureFlagPayloads)
            .unwrap_or_default();
        let replay = SessionReplayGate::restore(&storage, &flags.clone().unwrap_or_default());

        if let Some(flags) = &flags {
            tracing::info!("Restored {} cached feature flags", flags.len());
        }

        let (loaded_tx, _) = broadcast::channel(LOADED_CHANNEL_CAPACITY);
        let store = Arc::new(Self {
            transport,
            storage,
            remote: Arc::clone(&remote),
            identity,
            preload,
            state: RwLock::new(FlagState {
                flags,
                payloads,
                reported: HashSet::new(),
            }),
            replay: Mutex::new(replay),
            flight: SingleFlight::new(),
            loaded_tx,
            runtime,
        });

        let weak = Arc::downgrade(&store);
        remote.on_loaded(Arc::new(move |descriptor| {
            if let Some(store) = weak.upgrade() {
                store.on_remote_config_loaded(descriptor);
            }
        }));

        Ok(store)
    }

    fn on_remote_config_loaded(self: &Arc<Self>, descriptor: &RemoteConfigDescriptor) {
        let (cached, never_loaded) = {
            let state = self.state.read();
            (state.flags.clone().unwrap_or_default(), state.flags.is_none())
        };

        self.replay
            .lock()
            .apply(descriptor.session_recording.as_ref(), &cached, &self.storage);

        if descriptor.has_feature_flags == Some(true) && never_loaded && self.preload {
            tracing::debug!("Remote config reports feature flags, preloading them");
            self.reload_in_background();
        }
    }

    /// Fetch flags for an identity, joining a fetch that is already running.
    ///
    /// Returns `None` when the fetch failed or remote config says the project
    /// has no flags.
    pub async fn load_feature_flags(
        &self,
        distinct_id: &str,
        anonymous_id: &str,
        groups: &HashMap<String, String>,
    ) -> Option<FlagMap> {
        if self.remote.is_enabled() {
            if !self.remote.has_fetched() {
                self.remote.reload_remote_config().await;
            }
            if self.remote.flags_exist() == Some(false) {
                tracing::debug!("Project has no feature flags, skipping load");
                return None;
            }
        }

        self.flight
            .run(|| self.fetch(distinct_id, anonymous_id, groups))
            .await
    }

    /// Fetch flags for the current identity.
    pub async fn reload_feature_flags(&self) -> Option<FlagMap> {
        let distinct_id = self.identity.distinct_id();
        let anonymous_id = self.identity.anonymous_id();
        let groups = self.identity.groups();
        self.load_feature_flags(&distinct_id, &anonymous_id, &groups)
            .await
    }

    pub fn reload_in_background(self: &Arc<Self>) {
        let store = Arc::clone(self);
        self.runtime.spawn(async move {
            store.reload_feature_flags().await;
        });
    }

    async fn fetch(
        &self,
        distinct_id: &str,
        anonymous_id: &str,
        groups: &HashMap<String, String>,
    ) -> Option<FlagMap> {
        let response = self
            .transport
            .decide(distinct_id, anonymous_id, groups)
            .await
            .and_then(DecideResponse::parse);

        match response {
            Err(e) => {
                tracing::warn!("Failed to load feature flags: {}", e);
                self.notify(None, FlagDiff::default());
                None
            }
            Ok(DecideResponse::QuotaLimited) => {
                tracing::warn!(
                    "{}",
                    SignalKitError::new(
                        ErrorCode::FlagsQuotaLimited,
                        "Feature flags quota limit reached, clearing all feature flags and payloads",
                    )
                );
                let (flags, changes) = self.store_flags(FlagMap::new(), PayloadMap::new(), false);
                self.notify(Some(flags.clone()), changes);
                Some(flags)
            }
            Ok(DecideResponse::Flags {
                flags,
                payloads,
                partial,
                session_recording,
            }) => {
                let (flags, changes) = self.store_flags(flags, payloads, partial);
                self.replay
                    .lock()
                    .apply(session_recording.as_ref(), &flags, &self.storage);
                tracing::debug!(
                    "Loaded {} feature flags ({} changed)",
                    flags.len(),
                    changes.changed_keys().len()
                );
                self.notify(Some(flags.clone()), changes);
                Some(flags)
            }
        }
    }

    /// Replace (or upsert when `partial`) the cached flags and persist them.
    ///
    /// Write slots are taken under the state lock, so a [`reset`](Self::reset)
    /// that lands before the files are written wins on disk as well.
    fn store_flags(
        &self,
        flags: FlagMap,
        payloads: PayloadMap,
        partial: bool,
    ) -> (FlagMap, FlagDiff) {
        let (flags, payloads, changes, tickets) = {
            let mut state = self.state.write();
            let previous = state.flags.take().unwrap_or_default();

            let (flags, payloads) = if partial {
                let mut merged = previous.clone();
                merged.extend(flags);
                let mut merged_payloads = std::mem::take(&mut state.payloads);
                merged_payloads.extend(payloads);
                (merged, merged_payloads)
            } else {
                (flags, payloads)
            };

            let changes = FlagDiff::between(&previous, &flags);
            for key in changes.changed_keys() {
                state.reported.remove(&key);
            }

            state.flags = Some(flags.clone());
            state.payloads = payloads.clone();
            (flags, payloads, changes, self.write_tickets())
        };

        let [flags_ticket, payloads_ticket] = tickets;
        self.storage.write_json(flags_ticket, &flags);
        self.storage.write_json(payloads_ticket, &payloads);

        (flags, changes)
    }

    fn notify(&self, flags: Option<FlagMap>, changes: FlagDiff) {
        // No receivers is fine.
        let _ = self.loaded_tx.send(FeatureFlagsLoaded { flags, changes });
    }

    pub fn get_feature_flag(&self, key: &str) -> Option<FlagValue> {
        self.state.read().flags.as_ref()?.get(key).cloned()
    }

    pub fn is_feature_enabled(&self, key: &str) -> bool {
        self.get_feature_flag(key)
            .is_some_and(|value| value.is_enabled())
    }

    /// Payload for a flag. JSON encoded as a string is decoded; if it does
    /// not parse, the raw string is returned.
    pub fn get_feature_flag_payload(&self, key: &str) -> Option<Value> {
        let payload = self.state.read().payloads.get(key).cloned()?;
        match payload {
            Value::String(raw) => Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw))),
            other => Some(other),
        }
    }

    pub fn get_feature_flags(&self) -> Option<FlagMap> {
        self.state.read().flags.clone()
    }

    /// Record that `key` was read. True only the first time since it last changed.
    pub fn report_flag_call(&self, key: &str) -> bool {
        self.state.write().reported.insert(key.to_string())
    }

    /// Drop every cached flag and payload, in memory and on disk.
    pub fn reset(&self) {
        let [flags_ticket, payloads_ticket] = {
            let mut state = self.state.write();
            state.flags = None;
            state.payloads.clear();
            state.reported.clear();
            self.write_tickets()
        };
        self.storage.write_remove(flags_ticket);
        self.storage.write_remove(payloads_ticket);
    }

    fn write_tickets(&self) -> [WriteTicket; 2] {
        [
            self.storage.ticket(StorageKey::EnabledFeatureFlags),
            self.storage.ticket(StorageKey::EnabledFeatureFlagPayloads),
        ]
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeatureFlagsLoaded> {
        self.loaded_tx.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.flight.is_in_flight()
    }

    pub fn is_session_replay_active(&self) -> bool {
        self.replay.lock().is_active()
    }

    pub fn session_replay_endpoint(&self) -> Option<String> {
        self.replay.lock().endpoint().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_clean_response() {
        let response = DecideResponse::parse(json!({
            "featureFlags": {"a": true, "b": "variant"},
            "featureFlagPayloads": {"a": "{\"x\": 1}"},
            "errorsWhileComputingFlags": false
        }))
        .unwrap();

        let DecideResponse::Flags {
            flags,
            payloads,
            partial,
            session_recording,
        } = response
        else {
            panic!("expected flags");
        };
        assert_eq!(flags["a"], FlagValue::Bool(true));
        assert_eq!(flags["b"], FlagValue::String("variant".into()));
        assert_eq!(payloads["a"], json!("{\"x\": 1}"));
        assert!(!partial);
        assert!(session_recording.is_none());
    }

    #[test]
    fn test_parse_quota_limited_wins() {
        let response = DecideResponse::parse(json!({
            "quotaLimited": ["feature_flags"],
            "featureFlags": {"a": true},
            "featureFlagPayloads": {}
        }))
        .unwrap();
        assert!(matches!(response, DecideResponse::QuotaLimited));
    }

    #[test]
    fn test_parse_other_quota_is_ignored() {
        let response = DecideResponse::parse(json!({
            "quotaLimited": ["recordings"],
            "featureFlags": {},
            "featureFlagPayloads": {}
        }))
        .unwrap();
        assert!(matches!(response, DecideResponse::Flags { .. }));
    }

    #[test]
    fn test_parse_missing_fields_is_error() {
        let missing_payloads = DecideResponse::parse(json!({"featureFlags": {}}));
        assert!(missing_payloads.is_err());

        let wrong_type = DecideResponse::parse(json!({
            "featureFlags": [],
            "featureFlagPayloads": {}
        }));
        assert!(wrong_type.is_err());

        let not_object = DecideResponse::parse(json!("oops"));
        assert_eq!(
            not_object.err().map(|e| e.code),
            Some(ErrorCode::FlagsMalformedResponse)
        );
    }
}
