use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;

use super::transport::{BatchUploadInfo, Transport};
use crate::core::SignalKitOptions;
use crate::error::{ErrorCode, Result, SignalKitError};
use crate::types::Event;

const USER_AGENT: &str = concat!("signalkit-rust/", env!("CARGO_PKG_VERSION"));

/// [`Transport`] speaking JSON over HTTP to the ingestion host.
pub struct HttpTransport {
    client: Client,
    api_key: String,
    base_url: String,
}

impl HttpTransport {
    pub fn new(options: &SignalKitOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                SignalKitError::with_source(
                    ErrorCode::NetworkError,
                    "Failed to create HTTP client",
                    e,
                )
            })?;

        Ok(Self {
            client,
            api_key: options.api_key.clone(),
            base_url: options.base_url().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await.map_err(|e| {
                SignalKitError::with_source(
                    ErrorCode::HttpInvalidResponse,
                    "Failed to read response",
                    e,
                )
            })?;

            serde_json::from_str(&body).map_err(|e| {
                SignalKitError::with_source(
                    ErrorCode::HttpInvalidResponse,
                    format!("Failed to parse response: {}", e),
                    e,
                )
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_to_error(status, &body))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn batch(&self, events: &[Event]) -> BatchUploadInfo {
        let body = json!({
            "api_key": self.api_key,
            "batch": events,
            "sent_at": chrono::Utc::now().to_rfc3339(),
        });

        let response = match self.client.post(self.url("/batch/")).json(&body).send().await {
            Ok(response) => response,
            Err(e) => return BatchUploadInfo::failed(convert_error(e)),
        };

        let status = response.status();
        if status.is_success() {
            return BatchUploadInfo::status(status.as_u16());
        }

        let body = response.text().await.unwrap_or_default();
        BatchUploadInfo {
            status_code: Some(status.as_u16()),
            error: Some(status_to_error(status, &body)),
        }
    }

    async fn decide(
        &self,
        distinct_id: &str,
        anonymous_id: &str,
        groups: &HashMap<String, String>,
    ) -> Result<serde_json::Value> {
        let body = json!({
            "api_key": self.api_key,
            "distinct_id": distinct_id,
            "$anon_distinct_id": anonymous_id,
            "$groups": groups,
        });

        let response = self
            .client
            .post(self.url("/decide/?v=3"))
            .json(&body)
            .send()
            .await
            .map_err(convert_error)?;

        self.handle_response(response).await
    }

    async fn remote_config(&self) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(self.url(&format!("/array/{}/config", self.api_key)))
            .send()
            .await
            .map_err(convert_error)?;

        self.handle_response(response).await
    }
}

fn status_to_error(status: StatusCode, body: &str) -> SignalKitError {
    let (code, category) = match status {
        StatusCode::BAD_REQUEST => (ErrorCode::HttpBadRequest, "Client Error"),
        StatusCode::UNAUTHORIZED => (ErrorCode::HttpUnauthorized, "Authentication Error"),
        StatusCode::FORBIDDEN => (ErrorCode::HttpForbidden, "Authorization Error"),
        StatusCode::NOT_FOUND => (ErrorCode::HttpNotFound, "Not Found"),
        StatusCode::TOO_MANY_REQUESTS => (ErrorCode::HttpRateLimited, "Rate Limited"),
        s if s.is_redirection() => (ErrorCode::HttpRedirect, "Redirect"),
        s if s.is_server_error() => (ErrorCode::HttpServerError, "Server Error"),
        s if s.is_client_error() => (ErrorCode::HttpBadRequest, "Client Error"),
        _ => (ErrorCode::HttpInvalidResponse, "Unexpected Status"),
    };

    SignalKitError::network_error(code, format!("{}: {} - {}", category, status.as_u16(), body))
}

fn convert_error(error: reqwest::Error) -> SignalKitError {
    if error.is_timeout() {
        SignalKitError::with_source(ErrorCode::NetworkTimeout, "Request timed out", error)
    } else if error.is_connect() {
        SignalKitError::with_source(ErrorCode::NetworkError, "Connection failed", error)
    } else {
        SignalKitError::with_source(ErrorCode::NetworkError, error.to_string(), error)
    }
}
