//! Cached remote config descriptor.
//!
//! The descriptor tells the client whether the project has any feature
//! flags at all, so flag requests can be skipped for projects without them.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

use super::single_flight::SingleFlight;
use crate::error::{ErrorCode, Result, SignalKitError};
use crate::http::Transport;
use crate::storage::{Storage, StorageKey};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfigDescriptor {
    #[serde(
        rename = "hasFeatureFlags",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub has_feature_flags: Option<bool>,

    #[serde(
        rename = "sessionRecording",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_recording: Option<serde_json::Value>,

    /// Everything else the server sent, kept so the persisted copy is complete.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RemoteConfigDescriptor {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(SignalKitError::new(
                ErrorCode::RemoteConfigMalformed,
                "Remote config is not a JSON object",
            ));
        }
        serde_json::from_value(value).map_err(|e| {
            SignalKitError::with_source(
                ErrorCode::RemoteConfigMalformed,
                "Remote config has unexpected field types",
                e,
            )
        })
    }
}

/// Called with every freshly fetched descriptor.
pub type RemoteConfigCallback = Arc<dyn Fn(&RemoteConfigDescriptor) + Send + Sync>;

pub struct RemoteConfigCache {
    enabled: bool,
    transport: Arc<dyn Transport>,
    storage: Arc<Storage>,
    descriptor: RwLock<Option<RemoteConfigDescriptor>>,
    did_fetch: AtomicBool,
    flight: SingleFlight<Option<RemoteConfigDescriptor>>,
    callbacks: RwLock<Vec<RemoteConfigCallback>>,
    runtime: Handle,
}

impl RemoteConfigCache {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<Storage>,
        enabled: bool,
    ) -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|_| SignalKitError::no_runtime())?;
        let descriptor = storage.get_json::<RemoteConfigDescriptor>(StorageKey::RemoteConfig);

        Ok(Arc::new(Self {
            enabled,
            transport,
            storage,
            descriptor: RwLock::new(descriptor),
            did_fetch: AtomicBool::new(false),
            flight: SingleFlight::new(),
            callbacks: RwLock::new(Vec::new()),
            runtime,
        }))
    }

    /// Fetch once in the background unless a fetch already happened.
    pub fn start(self: &Arc<Self>) {
        if !self.enabled || self.has_fetched() || self.flight.is_in_flight() {
            return;
        }
        let cache = Arc::clone(self);
        self.runtime.spawn(async move {
            cache.reload_remote_config().await;
        });
    }

    /// Fetch the descriptor, joining a fetch that is already running.
    pub async fn reload_remote_config(&self) -> Option<RemoteConfigDescriptor> {
        if !self.enabled {
            return None;
        }
        self.flight.run(|| self.fetch()).await
    }

    async fn fetch(&self) -> Option<RemoteConfigDescriptor> {
        let result = self
            .transport
            .remote_config()
            .await
            .and_then(RemoteConfigDescriptor::from_value);

        let loaded = match result {
            Ok(descriptor) => {
                self.storage.set_json(StorageKey::RemoteConfig, &descriptor);
                *self.descriptor.write() = Some(descriptor.clone());
                tracing::debug!(
                    "Remote config loaded (hasFeatureFlags: {:?})",
                    descriptor.has_feature_flags
                );
                Some(descriptor)
            }
            Err(e) => {
                tracing::warn!("Failed to load remote config: {}", e);
                None
            }
        };

        self.did_fetch.store(true, Ordering::SeqCst);

        if let Some(descriptor) = &loaded {
            let callbacks = self.callbacks.read().clone();
            for callback in callbacks {
                callback(descriptor);
            }
        }

        loaded
    }

    pub fn on_loaded(&self, callback: RemoteConfigCallback) {
        self.callbacks.write().push(callback);
    }

    pub fn get_remote_config(&self) -> Option<RemoteConfigDescriptor> {
        self.descriptor.read().clone()
    }

    /// `None` until a descriptor with `hasFeatureFlags` is known.
    pub fn flags_exist(&self) -> Option<bool> {
        self.descriptor
            .read()
            .as_ref()
            .and_then(|d| d.has_feature_flags)
    }

    /// Whether a fetch completed (successfully or not) since construction.
    pub fn has_fetched(&self) -> bool {
        self.did_fetch.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
