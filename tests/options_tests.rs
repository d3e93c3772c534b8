use signalkit::core::{
    DEFAULT_FLUSH_INTERVAL, DEFAULT_HOST, DEFAULT_MAX_RETRY_DELAY, DEFAULT_RETRY_DELAY,
    DEFAULT_STORAGE_DIR,
};
use signalkit::{DataMode, DeliveryConfig, ErrorCode, SignalKitOptions};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_default_values() {
    let options = SignalKitOptions::new("phc_test_key");

    assert_eq!(options.api_key, "phc_test_key");
    assert_eq!(options.host, DEFAULT_HOST);
    assert_eq!(options.storage_path, PathBuf::from(DEFAULT_STORAGE_DIR));
    assert_eq!(options.flush_at, 20);
    assert_eq!(options.max_batch_size, 50);
    assert_eq!(options.max_queue_size, 1000);
    assert_eq!(options.flush_interval, DEFAULT_FLUSH_INTERVAL);
    assert_eq!(options.data_mode, DataMode::Any);
    assert!(options.preload_feature_flags);
    assert!(options.remote_config);
    assert!(options.send_feature_flag_event);
    assert_eq!(options.timeout, Duration::from_secs(10));
    assert_eq!(options.retry_delay, DEFAULT_RETRY_DELAY);
    assert_eq!(options.max_retry_delay, DEFAULT_MAX_RETRY_DELAY);
}

#[test]
fn test_builder_custom_values() {
    let options = SignalKitOptions::builder("phc_test_key")
        .host("http://localhost:8000")
        .storage_path("/tmp/signalkit-test")
        .flush_at(5)
        .max_batch_size(10)
        .max_queue_size(100)
        .flush_interval(Duration::from_secs(60))
        .data_mode(DataMode::Wifi)
        .preload_feature_flags(false)
        .remote_config(false)
        .send_feature_flag_event(false)
        .timeout(Duration::from_secs(3))
        .retry_delay(Duration::from_secs(1))
        .max_retry_delay(Duration::from_secs(8))
        .build();

    assert_eq!(options.host, "http://localhost:8000");
    assert_eq!(options.storage_path, PathBuf::from("/tmp/signalkit-test"));
    assert_eq!(options.flush_at, 5);
    assert_eq!(options.max_batch_size, 10);
    assert_eq!(options.max_queue_size, 100);
    assert_eq!(options.flush_interval, Duration::from_secs(60));
    assert_eq!(options.data_mode, DataMode::Wifi);
    assert!(!options.preload_feature_flags);
    assert!(!options.remote_config);
    assert!(!options.send_feature_flag_event);
    assert_eq!(options.timeout, Duration::from_secs(3));
    assert_eq!(options.retry_delay, Duration::from_secs(1));
    assert_eq!(options.max_retry_delay, Duration::from_secs(8));
    assert!(options.validate().is_ok());
}

#[test]
fn test_validate_empty_api_key() {
    let result = SignalKitOptions::new("  ").validate();

    assert!(result.is_err());
    let error = result.unwrap_err();
    assert_eq!(error.code, ErrorCode::ConfigInvalidApiKey);
    assert!(error.is_config_error());
}

#[test]
fn test_validate_rejects_bad_hosts() {
    for host in ["", "not a url", "ftp://example.com"] {
        let options = SignalKitOptions::builder("phc_test_key").host(host).build();
        let code = options.validate().err().map(|e| e.code);
        assert_eq!(code, Some(ErrorCode::ConfigInvalidUrl), "host {:?}", host);
    }
}

#[test]
fn test_validate_zero_batch_sizes() {
    let flush_at = SignalKitOptions::builder("phc_test_key").flush_at(0).build();
    assert_eq!(
        flush_at.validate().unwrap_err().code,
        ErrorCode::ConfigInvalidBatchSize
    );

    let batch = SignalKitOptions::builder("phc_test_key")
        .max_batch_size(0)
        .build();
    assert_eq!(
        batch.validate().unwrap_err().code,
        ErrorCode::ConfigInvalidBatchSize
    );
}

#[test]
fn test_validate_zero_queue_size() {
    let options = SignalKitOptions::builder("phc_test_key")
        .max_queue_size(0)
        .build();
    assert_eq!(
        options.validate().unwrap_err().code,
        ErrorCode::ConfigInvalidQueueSize
    );
}

#[test]
fn test_validate_zero_flush_interval() {
    let options = SignalKitOptions::builder("phc_test_key")
        .flush_interval(Duration::ZERO)
        .build();
    assert_eq!(
        options.validate().unwrap_err().code,
        ErrorCode::ConfigInvalidInterval
    );
}

#[test]
fn test_delivery_config_from_options() {
    let options = SignalKitOptions::builder("phc_test_key")
        .flush_at(7)
        .max_batch_size(3)
        .retry_delay(Duration::from_secs(2))
        .max_retry_delay(Duration::from_secs(5))
        .build();
    let config = DeliveryConfig::from(&options);

    assert_eq!(config.flush_at, 7);
    assert_eq!(config.max_batch_size, 3);
    assert_eq!(config.backoff_delay(1), Duration::from_secs(2));
    assert_eq!(config.backoff_delay(2), Duration::from_secs(4));
    assert_eq!(config.backoff_delay(10), Duration::from_secs(5));
}

#[test]
fn test_options_debug() {
    let options = SignalKitOptions::new("phc_test_key");
    let debug_str = format!("{:?}", options);

    assert!(debug_str.contains("phc_test_key"));
    assert!(debug_str.contains("SignalKitOptions"));
}
