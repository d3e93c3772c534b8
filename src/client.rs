use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::core::{
    DeliveryConfig, DeliveryController, FeatureFlagStore, FeatureFlagsLoaded, FlushOutcome,
    IdentityManager, IdentitySource, NetworkStatus, RemoteConfigCache, SignalKitOptions,
    SyncCoordinator,
};
use crate::error::{Result, SignalKitError};
use crate::event_store::EventStore;
use crate::http::{HttpTransport, Transport};
use crate::storage::Storage;
use crate::types::{
    Event, FlagMap, FlagValue, ALIAS_EVENT, FEATURE_FLAG_CALLED_EVENT, GROUP_IDENTIFY_EVENT,
    IDENTIFY_EVENT,
};

pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SDK_NAME: &str = "signalkit-rust";

/// A client instance: event capture, delivery and feature flags.
///
/// Every component is owned by the instance, so several clients with
/// different storage paths can live in one process.
pub struct SignalKitClient {
    options: SignalKitOptions,
    identity: Arc<IdentityManager>,
    delivery: Arc<DeliveryController>,
    remote_config: Arc<RemoteConfigCache>,
    flags: Arc<FeatureFlagStore>,
    sync: SyncCoordinator,
    closed: AtomicBool,
}

impl SignalKitClient {
    /// Create a client that talks HTTP to `options.host`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(options: SignalKitOptions) -> Result<Self> {
        options.validate()?;
        let transport = Arc::new(HttpTransport::new(&options)?);
        Self::with_transport(options, transport)
    }

    /// Create a client on top of a custom transport.
    pub fn with_transport(options: SignalKitOptions, transport: Arc<dyn Transport>) -> Result<Self> {
        options.validate()?;
        Handle::try_current().map_err(|_| SignalKitError::no_runtime())?;

        let storage = Arc::new(Storage::new(&options.storage_path));
        let identity = Arc::new(IdentityManager::new(Arc::clone(&storage)));

        let delivery = DeliveryController::new(
            EventStore::open(storage.queue_dir()),
            Arc::clone(&transport),
            DeliveryConfig::from(&options),
        )?;
        let remote_config = RemoteConfigCache::new(
            Arc::clone(&transport),
            Arc::clone(&storage),
            options.remote_config,
        )?;
        let flags = FeatureFlagStore::new(
            transport,
            storage,
            Arc::clone(&remote_config),
            Arc::clone(&identity) as Arc<dyn IdentitySource>,
            options.preload_feature_flags,
        )?;
        let sync = SyncCoordinator::start(&delivery, Arc::clone(&flags))?;

        delivery.start();
        if options.remote_config {
            remote_config.start();
        } else if options.preload_feature_flags {
            flags.reload_in_background();
        }

        tracing::debug!("SignalKit client started for {}", options.base_url());

        Ok(Self {
            options,
            identity,
            delivery,
            remote_config,
            flags,
            sync,
            closed: AtomicBool::new(false),
        })
    }

    /// Capture an event for the current user.
    pub fn capture(&self, event: impl Into<String>, properties: Option<Map<String, Value>>) {
        let event = Event::new(event, self.identity.distinct_id())
            .properties(properties.unwrap_or_default());
        self.enqueue(event);
    }

    /// Queue a fully built event as is, apart from the library properties.
    pub fn capture_event(&self, event: Event) {
        self.enqueue(event);
    }

    fn enqueue(&self, mut event: Event) {
        if self.is_closed() {
            tracing::debug!("Client closed, ignoring {}", event.event);
            return;
        }

        event
            .properties
            .insert("$lib".to_string(), Value::from(SDK_NAME));
        event
            .properties
            .insert("$lib_version".to_string(), Value::from(SDK_VERSION));

        let groups = self.identity.groups();
        if !groups.is_empty() {
            event
                .properties
                .entry("$groups")
                .or_insert_with(|| json!(groups));
        }

        if let Some(flags) = self.flags.get_feature_flags() {
            add_feature_flag_properties(&mut event.properties, &flags);
        }

        self.delivery.add(&event);
    }

    /// Attribute future events to `distinct_id`.
    ///
    /// Every call queues an `$identify` event linking the anonymous id to
    /// the new id. Flags are reloaded once the server has received it.
    pub fn identify(&self, distinct_id: impl Into<String>, properties: Option<Map<String, Value>>) {
        let distinct_id = distinct_id.into();
        if distinct_id.is_empty() {
            tracing::warn!("identify called with an empty distinct id, ignoring");
            return;
        }

        let identified = self.identity.identify(distinct_id.clone());
        if identified.changed {
            tracing::debug!("Distinct id changed from {}", identified.previous);
        }

        let mut event = Event::new(IDENTIFY_EVENT, distinct_id)
            .with_property("$anon_distinct_id", identified.anonymous_id);
        if let Some(properties) = properties {
            event = event.with_property("$set", Value::Object(properties));
        }
        self.enqueue(event);
    }

    /// Link `alias` to the current user.
    pub fn alias(&self, alias: impl Into<String>) {
        let event = Event::new(ALIAS_EVENT, self.identity.distinct_id())
            .with_property("alias", alias.into());
        self.enqueue(event);
    }

    /// Put the current user in a group and reload flags for the new group set.
    pub fn group(
        &self,
        group_type: impl Into<String>,
        group_key: impl Into<String>,
        properties: Option<Map<String, Value>>,
    ) {
        let group_type = group_type.into();
        let group_key = group_key.into();
        self.identity.group(group_type.clone(), group_key.clone());

        let mut event = Event::new(GROUP_IDENTIFY_EVENT, self.identity.distinct_id())
            .with_property("$group_type", group_type)
            .with_property("$group_key", group_key);
        if let Some(properties) = properties {
            event = event.with_property("$group_set", Value::Object(properties));
        }
        self.enqueue(event);

        // Group membership is applied locally, no need to wait for delivery.
        self.flags.reload_in_background();
    }

    /// Forget the current user, their cached flags and any queued events.
    pub fn reset(&self) {
        self.flags.reset();
        self.identity.reset();
        self.delivery.store().clear();
    }

    pub async fn flush(&self) -> FlushOutcome {
        self.delivery.flush().await
    }

    pub fn set_network_status(&self, status: NetworkStatus) {
        self.delivery.set_network_status(status);
    }

    /// Cached value of a flag.
    ///
    /// The first read after the value changed emits `$feature_flag_called`
    /// when `send_feature_flag_event` is enabled.
    pub fn get_feature_flag(&self, key: &str) -> Option<FlagValue> {
        let value = self.flags.get_feature_flag(key);

        if self.options.send_feature_flag_event && self.flags.report_flag_call(key) {
            let response = value
                .as_ref()
                .and_then(|v| serde_json::to_value(v).ok())
                .unwrap_or(Value::Null);
            let event = Event::new(FEATURE_FLAG_CALLED_EVENT, self.identity.distinct_id())
                .with_property("$feature_flag", key)
                .with_property("$feature_flag_response", response);
            self.enqueue(event);
        }

        value
    }

    pub fn is_feature_enabled(&self, key: &str) -> bool {
        self.get_feature_flag(key)
            .is_some_and(|value| value.is_enabled())
    }

    pub fn get_feature_flag_payload(&self, key: &str) -> Option<Value> {
        self.flags.get_feature_flag_payload(key)
    }

    pub fn get_feature_flags(&self) -> Option<FlagMap> {
        self.flags.get_feature_flags()
    }

    pub async fn reload_feature_flags(&self) -> Option<FlagMap> {
        self.flags.reload_feature_flags().await
    }

    pub fn subscribe_feature_flags(&self) -> broadcast::Receiver<FeatureFlagsLoaded> {
        self.flags.subscribe()
    }

    pub fn is_session_replay_active(&self) -> bool {
        self.flags.is_session_replay_active()
    }

    pub fn distinct_id(&self) -> String {
        self.identity.distinct_id()
    }

    pub fn anonymous_id(&self) -> String {
        self.identity.anonymous_id()
    }

    pub fn queue_depth(&self) -> usize {
        self.delivery.depth()
    }

    pub fn remote_config(&self) -> &RemoteConfigCache {
        &self.remote_config
    }

    pub fn options(&self) -> &SignalKitOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flush once more and stop background work. Undelivered events stay on
    /// disk for the next client using the same storage path.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let outcome = self.delivery.flush().await;
        tracing::debug!("Final flush on close: {:?}", outcome);
        self.delivery.stop();
        self.sync.stop();
    }
}

impl Drop for SignalKitClient {
    fn drop(&mut self) {
        self.delivery.stop();
    }
}

/// `$feature/<key>` for every cached flag, plus the sorted keys of enabled flags.
fn add_feature_flag_properties(properties: &mut Map<String, Value>, flags: &FlagMap) {
    let mut active = Vec::new();
    for (key, value) in flags {
        properties.insert(format!("$feature/{}", key), json!(value));
        if value.is_enabled() {
            active.push(key.clone());
        }
    }

    if !active.is_empty() {
        active.sort();
        properties.insert("$active_feature_flags".to_string(), json!(active));
    }
}

pub type SharedClient = Arc<SignalKitClient>;
