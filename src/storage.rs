//! Single-file JSON persistence for cached client state.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{ErrorCode, SignalKitError};

/// Everything the client persists under its storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    DistinctId,
    AnonymousId,
    Groups,
    EnabledFeatureFlags,
    EnabledFeatureFlagPayloads,
    RemoteConfig,
    SessionReplay,
    /// Directory of the persistent event queue.
    QueueFolder,
}

impl StorageKey {
    pub fn file_name(&self) -> &'static str {
        match self {
            StorageKey::DistinctId => "signalkit.distinctId",
            StorageKey::AnonymousId => "signalkit.anonymousId",
            StorageKey::Groups => "signalkit.groups",
            StorageKey::EnabledFeatureFlags => "signalkit.enabledFeatureFlags",
            StorageKey::EnabledFeatureFlagPayloads => "signalkit.enabledFeatureFlagPayloads",
            StorageKey::RemoteConfig => "signalkit.remoteConfig",
            StorageKey::SessionReplay => "signalkit.sessionReplay",
            StorageKey::QueueFolder => "signalkit.queueFolder",
        }
    }
}

/// Position of a write in the per-key write order.
///
/// Take the ticket while holding the lock that guards the in-memory state
/// being persisted, then write after releasing it. A write whose ticket is
/// older than one already applied to the same key is skipped, so disk never
/// goes back to an older snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTicket {
    key: StorageKey,
    seq: u64,
}

impl WriteTicket {
    pub fn key(&self) -> StorageKey {
        self.key
    }
}

#[derive(Debug, Default)]
struct WriteOrder {
    next: AtomicU64,
    /// Last applied ticket per key. Held around the file operation.
    applied: Mutex<HashMap<StorageKey, u64>>,
}

/// Key-value store of JSON documents, one file per key.
///
/// Reads of missing or unreadable files yield `None`; write failures are
/// logged. Nothing here returns an error to the caller.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    order: Arc<WriteOrder>,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if let Err(e) = fs::create_dir_all(&root) {
            tracing::warn!(
                "{}",
                SignalKitError::with_source(
                    ErrorCode::StorageWriteError,
                    format!("Failed to create storage directory {}", root.display()),
                    e,
                )
            );
        }
        Self {
            root,
            order: Arc::new(WriteOrder::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: StorageKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.path(StorageKey::QueueFolder)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: StorageKey) -> Option<T> {
        let bytes = match fs::read(self.path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(
                    "{}",
                    SignalKitError::with_source(
                        ErrorCode::StorageReadError,
                        format!("Failed to read {}", key.file_name()),
                        e,
                    )
                );
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    "{}",
                    SignalKitError::with_source(
                        ErrorCode::StorageInvalidData,
                        format!("Ignoring unreadable {}", key.file_name()),
                        e,
                    )
                );
                None
            }
        }
    }

    /// Reserve the next write slot for `key`.
    pub fn ticket(&self, key: StorageKey) -> WriteTicket {
        WriteTicket {
            key,
            seq: self.order.next.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: StorageKey, value: &T) {
        self.write_json(self.ticket(key), value);
    }

    pub fn remove(&self, key: StorageKey) {
        self.write_remove(self.ticket(key));
    }

    /// Write through a temp file and rename, so a crash never leaves half a document.
    ///
    /// Returns false when a newer ticket for the same key was already applied.
    pub fn write_json<T: Serialize + ?Sized>(&self, ticket: WriteTicket, value: &T) -> bool {
        let key = ticket.key;
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to serialize {}: {}", key.file_name(), e);
                return false;
            }
        };

        self.apply(ticket, || {
            let target = self.path(key);
            let temp = self
                .root
                .join(format!(".{}.{}.tmp", key.file_name(), ticket.seq));

            let result = fs::write(&temp, &bytes).and_then(|_| fs::rename(&temp, &target));
            if let Err(e) = result {
                let _ = fs::remove_file(&temp);
                tracing::warn!(
                    "{}",
                    SignalKitError::with_source(
                        ErrorCode::StorageWriteError,
                        format!("Failed to write {}", key.file_name()),
                        e,
                    )
                );
            }
        })
    }

    /// Remove the document (or the queue folder). Same ordering as [`write_json`](Self::write_json).
    pub fn write_remove(&self, ticket: WriteTicket) -> bool {
        let key = ticket.key;
        self.apply(ticket, || {
            let path = self.path(key);
            let result = if key == StorageKey::QueueFolder {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };

            match result {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {}: {}", key.file_name(), e),
            }
        })
    }

    fn apply(&self, ticket: WriteTicket, write: impl FnOnce()) -> bool {
        let mut applied = self.order.applied.lock();
        let last = applied.entry(ticket.key).or_insert(0);
        if *last > ticket.seq {
            tracing::debug!("Skipping stale write of {}", ticket.key.file_name());
            return false;
        }
        *last = ticket.seq;
        write();
        true
    }
}
