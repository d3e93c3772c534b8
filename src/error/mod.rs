use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Initialization errors
    InitNoRuntime,

    // Configuration errors
    ConfigInvalidApiKey,
    ConfigInvalidUrl,
    ConfigInvalidInterval,
    ConfigInvalidBatchSize,
    ConfigInvalidQueueSize,

    // Network errors
    NetworkError,
    NetworkTimeout,

    // HTTP errors
    HttpBadRequest,
    HttpUnauthorized,
    HttpForbidden,
    HttpNotFound,
    HttpRateLimited,
    HttpRedirect,
    HttpServerError,
    HttpInvalidResponse,

    // Storage errors
    StorageReadError,
    StorageWriteError,
    StorageInvalidData,

    // Event errors
    EventSerializationFailed,

    // Feature flag errors
    FlagsMalformedResponse,
    FlagsQuotaLimited,
    RemoteConfigMalformed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InitNoRuntime => "INIT_NO_RUNTIME",
            ErrorCode::ConfigInvalidApiKey => "CONFIG_INVALID_API_KEY",
            ErrorCode::ConfigInvalidUrl => "CONFIG_INVALID_URL",
            ErrorCode::ConfigInvalidInterval => "CONFIG_INVALID_INTERVAL",
            ErrorCode::ConfigInvalidBatchSize => "CONFIG_INVALID_BATCH_SIZE",
            ErrorCode::ConfigInvalidQueueSize => "CONFIG_INVALID_QUEUE_SIZE",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::HttpBadRequest => "HTTP_BAD_REQUEST",
            ErrorCode::HttpUnauthorized => "HTTP_UNAUTHORIZED",
            ErrorCode::HttpForbidden => "HTTP_FORBIDDEN",
            ErrorCode::HttpNotFound => "HTTP_NOT_FOUND",
            ErrorCode::HttpRateLimited => "HTTP_RATE_LIMITED",
            ErrorCode::HttpRedirect => "HTTP_REDIRECT",
            ErrorCode::HttpServerError => "HTTP_SERVER_ERROR",
            ErrorCode::HttpInvalidResponse => "HTTP_INVALID_RESPONSE",
            ErrorCode::StorageReadError => "STORAGE_READ_ERROR",
            ErrorCode::StorageWriteError => "STORAGE_WRITE_ERROR",
            ErrorCode::StorageInvalidData => "STORAGE_INVALID_DATA",
            ErrorCode::EventSerializationFailed => "EVENT_SERIALIZATION_FAILED",
            ErrorCode::FlagsMalformedResponse => "FLAGS_MALFORMED_RESPONSE",
            ErrorCode::FlagsQuotaLimited => "FLAGS_QUOTA_LIMITED",
            ErrorCode::RemoteConfigMalformed => "REMOTE_CONFIG_MALFORMED",
        }
    }

    /// Whether a later attempt of the same operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::NetworkTimeout
                | ErrorCode::HttpRedirect
                | ErrorCode::HttpRateLimited
                | ErrorCode::HttpServerError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct SignalKitError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SignalKitError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn network_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn no_runtime() -> Self {
        Self::new(
            ErrorCode::InitNoRuntime,
            "SignalKit must be created from within a Tokio runtime.",
        )
    }

    pub fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConfigInvalidApiKey
                | ErrorCode::ConfigInvalidUrl
                | ErrorCode::ConfigInvalidInterval
                | ErrorCode::ConfigInvalidBatchSize
                | ErrorCode::ConfigInvalidQueueSize
        )
    }

    pub fn is_network_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::NetworkError
                | ErrorCode::NetworkTimeout
                | ErrorCode::HttpBadRequest
                | ErrorCode::HttpUnauthorized
                | ErrorCode::HttpForbidden
                | ErrorCode::HttpNotFound
                | ErrorCode::HttpRateLimited
                | ErrorCode::HttpRedirect
                | ErrorCode::HttpServerError
                | ErrorCode::HttpInvalidResponse
        )
    }
}

pub type Result<T> = std::result::Result<T, SignalKitError>;
