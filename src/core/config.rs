use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ErrorCode, Result, SignalKitError};

pub const DEFAULT_HOST: &str = "https://ingest.signalkit.dev";
pub const DEFAULT_STORAGE_DIR: &str = ".signalkit";
pub const DEFAULT_FLUSH_AT: usize = 20;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Which connections events may be sent over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataMode {
    #[default]
    Any,
    Wifi,
}

#[derive(Debug, Clone)]
pub struct SignalKitOptions {
    pub api_key: String,
    pub host: String,
    pub storage_path: PathBuf,
    /// Queue depth that triggers a flush without waiting for the timer.
    pub flush_at: usize,
    pub max_batch_size: usize,
    /// Soft limit; the oldest event is evicted when it is reached.
    pub max_queue_size: usize,
    pub flush_interval: Duration,
    pub data_mode: DataMode,
    pub preload_feature_flags: bool,
    pub remote_config: bool,
    pub send_feature_flag_event: bool,
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl SignalKitOptions {
    pub fn new(api_key: impl Into<String>) -> Self {
        SignalKitOptionsBuilder::new(api_key).build()
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(SignalKitError::config_error(
                ErrorCode::ConfigInvalidApiKey,
                "API key is required",
            ));
        }

        match reqwest::Url::parse(&self.host) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(SignalKitError::config_error(
                    ErrorCode::ConfigInvalidUrl,
                    format!("Invalid host: {}", self.host),
                ));
            }
        }

        if self.flush_at == 0 || self.max_batch_size == 0 {
            return Err(SignalKitError::config_error(
                ErrorCode::ConfigInvalidBatchSize,
                "flush_at and max_batch_size must be positive",
            ));
        }

        if self.max_queue_size == 0 {
            return Err(SignalKitError::config_error(
                ErrorCode::ConfigInvalidQueueSize,
                "max_queue_size must be positive",
            ));
        }

        if self.flush_interval.is_zero() {
            return Err(SignalKitError::config_error(
                ErrorCode::ConfigInvalidInterval,
                "Flush interval must be positive",
            ));
        }

        Ok(())
    }

    pub fn builder(api_key: impl Into<String>) -> SignalKitOptionsBuilder {
        SignalKitOptionsBuilder::new(api_key)
    }

    /// Host without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.host.trim_end_matches('/')
    }
}

pub struct SignalKitOptionsBuilder {
    api_key: String,
    host: String,
    storage_path: PathBuf,
    flush_at: usize,
    max_batch_size: usize,
    max_queue_size: usize,
    flush_interval: Duration,
    data_mode: DataMode,
    preload_feature_flags: bool,
    remote_config: bool,
    send_feature_flag_event: bool,
    timeout: Duration,
    retry_delay: Duration,
    max_retry_delay: Duration,
}

impl SignalKitOptionsBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            host: DEFAULT_HOST.to_string(),
            storage_path: PathBuf::from(DEFAULT_STORAGE_DIR),
            flush_at: DEFAULT_FLUSH_AT,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            data_mode: DataMode::Any,
            preload_feature_flags: true,
            remote_config: true,
            send_feature_flag_event: true,
            timeout: DEFAULT_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn flush_at(mut self, count: usize) -> Self {
        self.flush_at = count;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn data_mode(mut self, mode: DataMode) -> Self {
        self.data_mode = mode;
        self
    }

    pub fn preload_feature_flags(mut self, enabled: bool) -> Self {
        self.preload_feature_flags = enabled;
        self
    }

    pub fn remote_config(mut self, enabled: bool) -> Self {
        self.remote_config = enabled;
        self
    }

    pub fn send_feature_flag_event(mut self, enabled: bool) -> Self {
        self.send_feature_flag_event = enabled;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    pub fn build(self) -> SignalKitOptions {
        SignalKitOptions {
            api_key: self.api_key,
            host: self.host,
            storage_path: self.storage_path,
            flush_at: self.flush_at,
            max_batch_size: self.max_batch_size,
            max_queue_size: self.max_queue_size,
            flush_interval: self.flush_interval,
            data_mode: self.data_mode,
            preload_feature_flags: self.preload_feature_flags,
            remote_config: self.remote_config,
            send_feature_flag_event: self.send_feature_flag_event,
            timeout: self.timeout,
            retry_delay: self.retry_delay,
            max_retry_delay: self.max_retry_delay,
        }
    }
}
