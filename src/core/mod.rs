mod config;
mod delivery;
mod feature_flags;
mod identity;
mod remote_config;
mod session_replay;
mod single_flight;
mod sync;

pub use config::{
    DataMode, SignalKitOptions, SignalKitOptionsBuilder, DEFAULT_FLUSH_AT,
    DEFAULT_FLUSH_INTERVAL, DEFAULT_HOST, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_QUEUE_SIZE,
    DEFAULT_MAX_RETRY_DELAY, DEFAULT_RETRY_DELAY, DEFAULT_STORAGE_DIR, DEFAULT_TIMEOUT,
};
pub use delivery::{
    DeliveredBatch, DeliveryConfig, DeliveryController, FlushOutcome, NetworkStatus, SkipReason,
};
pub use feature_flags::{FeatureFlagStore, FeatureFlagsLoaded};
pub use identity::{Identified, IdentityManager, IdentitySource};
pub use remote_config::{RemoteConfigCache, RemoteConfigCallback, RemoteConfigDescriptor};
pub use session_replay::{is_recording_active, SessionReplayGate};
pub use single_flight::SingleFlight;
pub use sync::{contains_identity_change, SyncCoordinator};
