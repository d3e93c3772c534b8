//! SignalKit Rust SDK
//!
//! Durable analytics event delivery and a locally cached feature flag
//! evaluation for Rust applications.
//!
//! Captured events are written to disk before anything else happens, so they
//! survive crashes and restarts. A delivery controller sends them in batches,
//! backs off when the service is unreachable and pauses while the network is
//! down. Feature flags are evaluated by the server, cached in memory and on
//! disk, and reloaded after identity changes reach the server.
//!
//! # Quick Start
//!
//! ```no_run
//! use signalkit::{SignalKitClient, SignalKitOptions};
//!
//! #[tokio::main]
//! async fn main() -> signalkit::Result<()> {
//!     let options = SignalKitOptions::builder("phc_your_api_key")
//!         .storage_path("/var/lib/my-app/signalkit")
//!         .build();
//!     let client = SignalKitClient::new(options)?;
//!
//!     client.identify("user-123", None);
//!     client.capture("checkout_started", None);
//!
//!     if client.is_feature_enabled("new-checkout") {
//!         // ...
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod error;
pub mod event_store;
pub mod http;
pub mod storage;
pub mod types;
mod client;

pub use types::{
    Event, FlagDiff, FlagMap, FlagValue, PayloadMap, ALIAS_EVENT, FEATURE_FLAG_CALLED_EVENT,
    GROUP_IDENTIFY_EVENT, IDENTIFY_EVENT,
};

pub use error::{ErrorCode, Result, SignalKitError};

pub use core::{
    DataMode, DeliveredBatch, DeliveryConfig, DeliveryController, FeatureFlagStore,
    FeatureFlagsLoaded, FlushOutcome, Identified, IdentityManager, IdentitySource, NetworkStatus,
    RemoteConfigCache, RemoteConfigDescriptor, SessionReplayGate, SignalKitOptions,
    SignalKitOptionsBuilder, SingleFlight, SkipReason, SyncCoordinator,
};

pub use event_store::{EventStore, QueueEntry, QueueKey};

pub use http::{BatchUploadInfo, HttpTransport, Transport};

pub use storage::{Storage, StorageKey, WriteTicket};

pub use client::{SharedClient, SignalKitClient, SDK_NAME, SDK_VERSION};
