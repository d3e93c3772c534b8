//! SignalKit Rust SDK Lab
//!
//! Verification script that drives a client against an in-process transport.
//! Run with: cargo run --example sdk-lab

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use signalkit::{
    BatchUploadInfo, Event, FlushOutcome, NetworkStatus, Result, SignalKitClient,
    SignalKitOptions, Transport,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const PASS: &str = "\x1b[32m[PASS]\x1b[0m";
const FAIL: &str = "\x1b[31m[FAIL]\x1b[0m";

/// Accepts every batch and serves a fixed flag set.
#[derive(Default)]
struct LabTransport {
    delivered: Mutex<Vec<Event>>,
    decide_calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for LabTransport {
    async fn batch(&self, events: &[Event]) -> BatchUploadInfo {
        self.delivered.lock().extend_from_slice(events);
        BatchUploadInfo::status(200)
    }

    async fn decide(
        &self,
        distinct_id: &str,
        _anonymous_id: &str,
        _groups: &HashMap<String, String>,
    ) -> Result<Value> {
        self.decide_calls.lock().push(distinct_id.to_string());
        let beta = distinct_id == "lab-user-123";
        Ok(json!({
            "featureFlags": {"lab-bool": true, "lab-variant": "test", "lab-beta": beta},
            "featureFlagPayloads": {"lab-variant": "{\"count\": 100}"},
            "sessionRecording": {"endpoint": "/s/", "linkedFlag": "lab-bool"}
        }))
    }

    async fn remote_config(&self) -> Result<Value> {
        Ok(json!({"hasFeatureFlags": true}))
    }
}

#[tokio::main]
async fn main() {
    println!("=== SignalKit Rust SDK Lab ===\n");

    let mut passed = 0;
    let mut failed = 0;

    macro_rules! pass {
        ($test:expr) => {{
            println!("{} {}", PASS, $test);
            passed += 1;
        }};
    }

    macro_rules! fail {
        ($test:expr) => {{
            println!("{} {}", FAIL, $test);
            failed += 1;
        }};
    }

    let storage = std::env::temp_dir().join(format!("signalkit-lab-{}", std::process::id()));
    let transport = Arc::new(LabTransport::default());

    println!("Testing initialization...");
    let options = SignalKitOptions::builder("phc_lab_test_key")
        .storage_path(&storage)
        .flush_at(100)
        .build();

    let client = match SignalKitClient::with_transport(options, transport.clone()) {
        Ok(c) => c,
        Err(e) => {
            fail!(format!("Initialization - {}", e));
            print_summary(passed, failed);
            std::process::exit(1);
        }
    };
    pass!("Initialization");

    // Remote config reports flags, so they are preloaded in the background.
    let mut preloaded = false;
    for _ in 0..100 {
        if client.get_feature_flags().is_some() {
            preloaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    if preloaded {
        pass!("Feature flag preload");
    } else {
        fail!("Feature flag preload - flags never arrived");
    }

    println!("\nTesting flag lookups...");
    if client.is_feature_enabled("lab-bool") {
        pass!("Boolean flag");
    } else {
        fail!("Boolean flag - expected enabled");
    }

    match client.get_feature_flag("lab-variant") {
        Some(value) if value.as_string() == Some("test") => pass!("Variant flag"),
        other => fail!(format!("Variant flag - got {:?}", other)),
    }

    match client.get_feature_flag_payload("lab-variant") {
        Some(payload) if payload["count"] == json!(100) => pass!("Flag payload"),
        other => fail!(format!("Flag payload - got {:?}", other)),
    }

    if !client.is_feature_enabled("non-existent") {
        pass!("Missing flag is disabled");
    } else {
        fail!("Missing flag - expected disabled");
    }

    if client.is_session_replay_active() {
        pass!("Session replay linked flag");
    } else {
        fail!("Session replay - expected active");
    }

    println!("\nTesting identity...");
    client.identify("lab-user-123", None);
    if client.distinct_id() == "lab-user-123" {
        pass!("identify()");
    } else {
        fail!(format!("identify() - distinct id is {}", client.distinct_id()));
    }

    client.capture("lab_verification", None);
    match client.flush().await {
        FlushOutcome::Delivered { count } => pass!(format!("flush() delivered {}", count)),
        other => fail!(format!("flush() - {:?}", other)),
    }

    let mut reloaded = false;
    for _ in 0..100 {
        if client.is_feature_enabled("lab-beta") {
            reloaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    if reloaded {
        pass!("Flags reloaded after identify");
    } else {
        fail!(format!(
            "Flags reload after identify - decide calls: {:?}",
            transport.decide_calls.lock()
        ));
    }

    println!("\nTesting network gating...");
    client.set_network_status(NetworkStatus::Unreachable);
    client.capture("offline_event", None);
    match client.flush().await {
        FlushOutcome::Skipped(_) => pass!("Flush skipped while offline"),
        other => fail!(format!("Offline flush - {:?}", other)),
    }
    client.set_network_status(NetworkStatus::Wifi);

    println!("\nTesting cleanup...");
    client.reset();
    if client.get_feature_flags().is_none() && client.distinct_id() != "lab-user-123" {
        pass!("reset()");
    } else {
        fail!("reset() - state not cleared");
    }

    client.close().await;
    if client.queue_depth() == 0 {
        pass!("close() flushed the queue");
    } else {
        fail!(format!("close() - {} events left", client.queue_depth()));
    }

    println!(
        "\nDelivered {} events in total",
        transport.delivered.lock().len()
    );
    let _ = std::fs::remove_dir_all(&storage);

    print_summary(passed, failed);

    if failed > 0 {
        println!("\n\x1b[31mSome verifications failed!\x1b[0m");
        std::process::exit(1);
    } else {
        println!("\n\x1b[32mAll verifications passed!\x1b[0m");
        std::process::exit(0);
    }
}

fn print_summary(passed: i32, failed: i32) {
    println!("\n{}", "=".repeat(40));
    println!("Results: {} passed, {} failed", passed, failed);
    println!("{}", "=".repeat(40));
}
