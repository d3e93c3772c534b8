//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use signalkit::{
    BatchUploadInfo, ErrorCode, Event, IdentitySource, Result, SignalKitError,
    SignalKitOptions, SignalKitOptionsBuilder, Transport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

const RELEASE_PERMITS: usize = 1024;

/// Scripted reply for `decide` and `remote_config`.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Error(ErrorCode),
}

impl Reply {
    fn into_result(self) -> Result<Value> {
        match self {
            Reply::Json(value) => Ok(value),
            Reply::Error(code) => Err(SignalKitError::new(code, "scripted failure")),
        }
    }
}

/// In-memory transport that records calls and replays scripted responses.
///
/// Unscripted batches answer 200, unscripted decide calls answer an empty
/// flag set and unscripted remote config calls report that flags exist.
#[derive(Default)]
pub struct MockTransport {
    batch_statuses: Mutex<VecDeque<Option<u16>>>,
    decide_replies: Mutex<VecDeque<Reply>>,
    remote_config_replies: Mutex<VecDeque<Reply>>,
    batches: Mutex<Vec<Vec<Event>>>,
    decide_requests: Mutex<Vec<(String, String, HashMap<String, String>)>>,
    batch_calls: AtomicUsize,
    decide_calls: AtomicUsize,
    remote_config_calls: AtomicUsize,
    batch_gate: Mutex<Option<Arc<Semaphore>>>,
    decide_gate: Mutex<Option<Arc<Semaphore>>>,
    remote_config_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_batch_status(&self, status: Option<u16>) {
        self.batch_statuses.lock().push_back(status);
    }

    pub fn push_decide(&self, reply: Reply) {
        self.decide_replies.lock().push_back(reply);
    }

    pub fn push_flags(&self, flags: Value, payloads: Value, errors_while_computing: bool) {
        self.push_decide(Reply::Json(json!({
            "featureFlags": flags,
            "featureFlagPayloads": payloads,
            "errorsWhileComputingFlags": errors_while_computing,
        })));
    }

    pub fn push_remote_config(&self, reply: Reply) {
        self.remote_config_replies.lock().push_back(reply);
    }

    /// Block batch uploads until [`release_batches`](Self::release_batches).
    pub fn hold_batches(&self) {
        *self.batch_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_batches(&self) {
        if let Some(gate) = self.batch_gate.lock().take() {
            gate.add_permits(RELEASE_PERMITS);
        }
    }

    pub fn hold_decide(&self) {
        *self.decide_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_decide(&self) {
        if let Some(gate) = self.decide_gate.lock().take() {
            gate.add_permits(RELEASE_PERMITS);
        }
    }

    pub fn hold_remote_config(&self) {
        *self.remote_config_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_remote_config(&self) {
        if let Some(gate) = self.remote_config_gate.lock().take() {
            gate.add_permits(RELEASE_PERMITS);
        }
    }

    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().clone()
    }

    pub fn delivered_events(&self) -> Vec<Event> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn decide_requests(&self) -> Vec<(String, String, HashMap<String, String>)> {
        self.decide_requests.lock().clone()
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn decide_calls(&self) -> usize {
        self.decide_calls.load(Ordering::SeqCst)
    }

    pub fn remote_config_calls(&self) -> usize {
        self.remote_config_calls.load(Ordering::SeqCst)
    }
}

async fn pass_gate(gate: &Mutex<Option<Arc<Semaphore>>>) {
    let gate = gate.lock().clone();
    if let Some(gate) = gate {
        if let Ok(permit) = gate.acquire().await {
            permit.forget();
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn batch(&self, events: &[Event]) -> BatchUploadInfo {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        pass_gate(&self.batch_gate).await;

        self.batches.lock().push(events.to_vec());
        let status = self.batch_statuses.lock().pop_front().unwrap_or(Some(200));
        match status {
            Some(code) => BatchUploadInfo::status(code),
            None => BatchUploadInfo::failed(SignalKitError::new(
                ErrorCode::NetworkError,
                "scripted offline",
            )),
        }
    }

    async fn decide(
        &self,
        distinct_id: &str,
        anonymous_id: &str,
        groups: &HashMap<String, String>,
    ) -> Result<Value> {
        self.decide_calls.fetch_add(1, Ordering::SeqCst);
        self.decide_requests.lock().push((
            distinct_id.to_string(),
            anonymous_id.to_string(),
            groups.clone(),
        ));
        pass_gate(&self.decide_gate).await;

        self.decide_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| {
                Reply::Json(json!({"featureFlags": {}, "featureFlagPayloads": {}}))
            })
            .into_result()
    }

    async fn remote_config(&self) -> Result<Value> {
        self.remote_config_calls.fetch_add(1, Ordering::SeqCst);
        pass_gate(&self.remote_config_gate).await;

        self.remote_config_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Reply::Json(json!({"hasFeatureFlags": true})))
            .into_result()
    }
}

/// Fixed identity for driving the flag store directly.
pub struct StaticIdentity {
    pub distinct_id: String,
    pub anonymous_id: String,
    pub groups: HashMap<String, String>,
}

impl StaticIdentity {
    pub fn new(distinct_id: &str) -> Arc<Self> {
        Arc::new(Self {
            distinct_id: distinct_id.to_string(),
            anonymous_id: format!("anon-{}", distinct_id),
            groups: HashMap::new(),
        })
    }
}

impl IdentitySource for StaticIdentity {
    fn distinct_id(&self) -> String {
        self.distinct_id.clone()
    }

    fn anonymous_id(&self) -> String {
        self.anonymous_id.clone()
    }

    fn groups(&self) -> HashMap<String, String> {
        self.groups.clone()
    }
}

/// Options pointing at `dir` with every automatic network trigger disabled.
pub fn quiet_options(dir: &TempDir) -> SignalKitOptionsBuilder {
    SignalKitOptions::builder("phc_test_key")
        .storage_path(dir.path())
        .remote_config(false)
        .preload_feature_flags(false)
        .flush_at(1000)
        .flush_interval(Duration::from_secs(3600))
}

pub fn event(name: &str) -> Event {
    Event::new(name, "user-1")
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
