//! Crash-resilient event queue backed by one file per entry.
//!
//! Every queued event is written to its own file inside the queue directory,
//! named after a strictly increasing [`QueueKey`]. On startup the directory
//! listing is read once to rebuild the in-memory index; afterwards the index
//! is only mutated in memory.
//!
//! Disk failures never surface as errors: a failed write drops that event, an
//! unreadable entry is deleted and skipped. Both are logged.
//!
//! # Example
//!
//! ```no_run
//! use signalkit::event_store::EventStore;
//! use signalkit::Event;
//!
//! let store = EventStore::open("/var/lib/signalkit/queue");
//!
//! let event = Event::new("purchase", "user-123");
//! store.add(&serde_json::to_vec(&event).unwrap());
//!
//! // Oldest entries first
//! let batch = store.peek_as::<Event>(50);
//! let keys: Vec<_> = batch.iter().map(|(key, _)| *key).collect();
//! store.remove(&keys);
//! ```

use fs2::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ErrorCode, SignalKitError};

/// Width of an entry file name; keys are zero-padded so names sort like numbers.
pub const QUEUE_KEY_WIDTH: usize = 20;

const LOCK_FILE_NAME: &str = ".lock";

/// Largest key accepted from disk. Anything above leaves no room for new keys.
pub const MAX_QUEUE_KEY: u64 = u64::MAX / 2;

/// Creation-order key of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey(u64);

impl QueueKey {
    pub fn value(&self) -> u64 {
        self.0
    }

    /// File name of the entry on disk.
    pub fn file_name(&self) -> String {
        format!("{:0width$}", self.0, width = QUEUE_KEY_WIDTH)
    }

    /// Parse an entry file name. Anything that is not all digits is rejected.
    pub fn parse(name: &str) -> Option<Self> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        name.parse().ok().map(QueueKey)
    }
}

/// A raw entry read from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub key: QueueKey,
    pub bytes: Vec<u8>,
}

struct IndexState {
    keys: VecDeque<QueueKey>,
    last_key: u64,
}

/// Durable FIFO of serialized events.
pub struct EventStore {
    dir: PathBuf,
    index: Mutex<IndexState>,
    /// Held for the lifetime of the store; dropping it releases the lock.
    _lock_file: Option<File>,
}

impl EventStore {
    /// Open (or create) the queue in `dir` and rebuild its index.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();

        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!(
                "{}",
                SignalKitError::with_source(
                    ErrorCode::StorageWriteError,
                    format!("Failed to create queue directory {}", dir.display()),
                    e,
                )
            );
        }

        let lock_file = acquire_lock(&dir);
        let keys = load_index(&dir);
        let last_key = keys.back().map(QueueKey::value).unwrap_or(0);

        if !keys.is_empty() {
            tracing::info!("Recovered {} queued events from {}", keys.len(), dir.display());
        }

        Self {
            dir,
            index: Mutex::new(IndexState { keys, last_key }),
            _lock_file: lock_file,
        }
    }

    /// Directory holding the entry files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append an entry. Returns `None` when the write failed and the entry was dropped.
    pub fn add(&self, bytes: &[u8]) -> Option<QueueKey> {
        let key = {
            let mut index = self.index.lock();
            let Some(after_last) = index.last_key.checked_add(1) else {
                tracing::warn!("Queue key space exhausted, dropping entry");
                return None;
            };
            let next = now_micros().max(after_last);
            index.last_key = next;
            QueueKey(next)
        };

        if let Err(e) = write_entry(&self.entry_path(key), bytes) {
            tracing::warn!(
                "{}",
                SignalKitError::with_source(
                    ErrorCode::StorageWriteError,
                    format!("Could not write queue entry {}, dropping it", key.file_name()),
                    e,
                )
            );
            return None;
        }

        let mut index = self.index.lock();
        match index.keys.back() {
            // A concurrent add that allocated a later key finished writing first.
            Some(last) if *last > key => {
                let position = index.keys.partition_point(|k| *k < key);
                index.keys.insert(position, key);
            }
            _ => index.keys.push_back(key),
        }

        Some(key)
    }

    /// Up to `count` of the oldest entries, unreadable ones deleted and skipped.
    pub fn peek(&self, count: usize) -> Vec<QueueEntry> {
        self.scan(count, |key, bytes| Some(QueueEntry { key: *key, bytes }))
    }

    /// Up to `count` of the oldest entries that decode as `T`.
    ///
    /// Entries that cannot be read or decoded are deleted and skipped; the scan
    /// keeps going until `count` good entries are found or the queue ends.
    pub fn peek_as<T: DeserializeOwned>(&self, count: usize) -> Vec<(QueueKey, T)> {
        self.scan(count, |key, bytes| match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => Some((*key, value)),
            Err(e) => {
                tracing::warn!("Queue entry {} is corrupted: {}", key.file_name(), e);
                None
            }
        })
    }

    /// Remove up to `count` of the oldest entries. Returns how many were removed.
    pub fn pop(&self, count: usize) -> usize {
        let removed: Vec<QueueKey> = {
            let mut index = self.index.lock();
            let count = count.min(index.keys.len());
            index.keys.drain(..count).collect()
        };

        for key in &removed {
            self.delete_file(*key);
        }
        removed.len()
    }

    /// Remove the given entries wherever they are in the queue.
    pub fn remove(&self, keys: &[QueueKey]) -> usize {
        if keys.is_empty() {
            return 0;
        }

        let wanted: HashSet<QueueKey> = keys.iter().copied().collect();
        let removed: Vec<QueueKey> = {
            let mut index = self.index.lock();
            let removed = index
                .keys
                .iter()
                .filter(|k| wanted.contains(k))
                .copied()
                .collect();
            index.keys.retain(|k| !wanted.contains(k));
            removed
        };

        for key in &removed {
            self.delete_file(*key);
        }
        removed.len()
    }

    /// Remove the entry at `position` (0 is the oldest).
    pub fn delete(&self, position: usize) -> bool {
        let removed = self.index.lock().keys.remove(position);
        match removed {
            Some(key) => {
                self.delete_file(key);
                true
            }
            None => false,
        }
    }

    /// Drop every entry, including files the index no longer knows about.
    pub fn clear(&self) {
        self.index.lock().keys.clear();

        match fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    if name.to_str().and_then(QueueKey::parse).is_some() {
                        remove_file_quietly(&entry.path());
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to list queue directory for clear: {}", e),
        }
    }

    pub fn depth(&self) -> usize {
        self.index.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.lock().keys.is_empty()
    }

    /// Snapshot of the index, oldest first.
    pub fn keys(&self) -> Vec<QueueKey> {
        self.index.lock().keys.iter().copied().collect()
    }

    fn scan<T, F>(&self, count: usize, mut decode: F) -> Vec<T>
    where
        F: FnMut(&QueueKey, Vec<u8>) -> Option<T>,
    {
        if count == 0 {
            return Vec::new();
        }

        let keys = self.keys();
        let mut results = Vec::with_capacity(count.min(keys.len()));

        for key in keys {
            if results.len() == count {
                break;
            }

            match fs::read(self.entry_path(key)) {
                Ok(bytes) => match decode(&key, bytes) {
                    Some(value) => results.push(value),
                    None => self.discard(key),
                },
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::debug!("Queue entry {} no longer exists", key.file_name());
                    self.forget(key);
                }
                Err(e) => {
                    tracing::warn!("Queue entry {} is unreadable: {}", key.file_name(), e);
                    self.discard(key);
                }
            }
        }

        results
    }

    fn discard(&self, key: QueueKey) {
        self.forget(key);
        self.delete_file(key);
    }

    fn forget(&self, key: QueueKey) {
        self.index.lock().keys.retain(|k| *k != key);
    }

    fn delete_file(&self, key: QueueKey) {
        remove_file_quietly(&self.entry_path(key));
    }

    fn entry_path(&self, key: QueueKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

fn write_entry(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
    }
}

fn acquire_lock(dir: &Path) -> Option<File> {
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(dir.join(LOCK_FILE_NAME));

    match lock_file {
        Ok(file) => match file.try_lock_exclusive() {
            Ok(()) => Some(file),
            Err(e) => {
                tracing::warn!(
                    "Queue directory {} is in use by another instance: {}",
                    dir.display(),
                    e
                );
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to open queue lock file: {}", e);
            None
        }
    }
}

fn load_index(dir: &Path) -> VecDeque<QueueKey> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to load files for queue {}: {}", dir.display(), e);
            return VecDeque::new();
        }
    };

    let mut keys: Vec<QueueKey> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        match QueueKey::parse(name) {
            Some(key) if key.value() > MAX_QUEUE_KEY => {
                tracing::warn!("Deleting queue entry with out-of-range key {}", name);
                remove_file_quietly(&entry.path());
            }
            Some(key) => keys.push(key),
            None => tracing::debug!("Ignoring unexpected file in queue directory: {}", name),
        }
    }

    keys.sort_unstable();
    keys.into()
}
