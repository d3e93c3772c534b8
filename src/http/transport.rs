use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{Result, SignalKitError};
use crate::types::Event;

/// Outcome of a batch upload.
///
/// `status_code` is `None` when no HTTP response was received at all
/// (connection refused, timeout, offline).
#[derive(Debug, Default)]
pub struct BatchUploadInfo {
    pub status_code: Option<u16>,
    pub error: Option<SignalKitError>,
}

impl BatchUploadInfo {
    pub fn status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            error: None,
        }
    }

    pub fn failed(error: SignalKitError) -> Self {
        Self {
            status_code: None,
            error: Some(error),
        }
    }

    /// Redirects and missing responses are retried; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self.status_code {
            None => true,
            Some(code) => (300..=399).contains(&code),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status_code, Some(code) if (200..=299).contains(&code))
    }
}

/// Network seam used by delivery and the flag caches.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Upload a batch of events.
    async fn batch(&self, events: &[Event]) -> BatchUploadInfo;

    /// Evaluate feature flags for an identity.
    async fn decide(
        &self,
        distinct_id: &str,
        anonymous_id: &str,
        groups: &HashMap<String, String>,
    ) -> Result<serde_json::Value>;

    /// Fetch the remote config descriptor.
    async fn remote_config(&self) -> Result<serde_json::Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_retryable_statuses() {
        assert!(BatchUploadInfo::status(302).is_retryable());
        assert!(BatchUploadInfo::status(399).is_retryable());
        assert!(BatchUploadInfo::failed(SignalKitError::new(ErrorCode::NetworkError, "offline"))
            .is_retryable());

        assert!(!BatchUploadInfo::status(200).is_retryable());
        assert!(!BatchUploadInfo::status(400).is_retryable());
        assert!(!BatchUploadInfo::status(503).is_retryable());
    }

    #[test]
    fn test_success_range() {
        assert!(BatchUploadInfo::status(200).is_success());
        assert!(BatchUploadInfo::status(204).is_success());
        assert!(!BatchUploadInfo::status(302).is_success());
        assert!(!BatchUploadInfo::default().is_success());
    }
}
