//! Error types for the sniper bot

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sniper bot
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    #[error("No usable {0} endpoints configured")]
    NoEndpoints(String),

    // Transient network errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Gateway error (HTTP {status}): {message}")]
    Gateway { status: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Endpoint disabled for this call: {0}")]
    EndpointDisabled(String),

    // Permanent call errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    // Discovery errors
    #[error("Creation event extraction failed: {0}")]
    Extraction(String),

    // Trading errors
    #[error("Quote failed: {0}")]
    Quote(String),

    #[error("Swap execution failed: {0}")]
    Execution(String),

    #[error("Price unavailable for {0}")]
    PriceUnavailable(String),

    // Position management errors
    #[error("Position already open: {0}")]
    DuplicatePosition(String),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Position persistence failed: {0}")]
    PositionPersistence(String),

    #[error("Invalid profit tier table: {0}")]
    InvalidTiers(String),

    // Filter errors
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited(_)
                | Error::Gateway { .. }
                | Error::Timeout(_)
                | Error::EndpointDisabled(_)
        )
    }

    /// Classify a non-success HTTP status code
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Error::RateLimited(message),
            410 | 502 | 503 => Error::Gateway { status, message },
            504 | 408 => Error::Timeout(message),
            404 => Error::NotFound(message),
            400..=499 => Error::InvalidRequest(format!("HTTP {}: {}", status, message)),
            _ => Error::Rpc(format!("HTTP {}: {}", status, message)),
        }
    }

    /// Classify an error we only have the text of.
    ///
    /// Messages often embed base58 addresses and signatures, so only whole
    /// phrases match, never a bare status code.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let has = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

        if has(&["429 too many requests", "status 429", "too many requests", "rate limit"]) {
            Error::RateLimited(message)
        } else if has(&["502 bad gateway", "status 502", "bad gateway"]) {
            Error::Gateway { status: 502, message }
        } else if has(&["503 service unavailable", "status 503", "service unavailable"]) {
            Error::Gateway { status: 503, message }
        } else if has(&["410 gone", "status 410"]) {
            Error::Gateway { status: 410, message }
        } else if has(&["timed out", "deadline has elapsed"]) {
            Error::Timeout(message)
        } else if has(&["is disabled", "is not enabled"]) {
            Error::EndpointDisabled(message)
        } else {
            Error::Rpc(message)
        }
    }

    /// Classify a JSON-RPC error response by its code alone
    pub fn from_rpc_code(code: i64, message: &str) -> Self {
        let message = format!("{} ({})", message, code);
        match code {
            // Node is behind / slot skipped: transient on this endpoint
            -32004 | -32005 | -32007 | -32014 | -32016 => Error::Gateway {
                status: 503,
                message,
            },
            429 | -32429 => Error::RateLimited(message),
            // Method not allowed on this endpoint (e.g. disabled gPA)
            -32601 => Error::EndpointDisabled(message),
            -32600 | -32602 => Error::InvalidRequest(message),
            _ => Error::Rpc(message),
        }
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        use solana_client::client_error::ClientErrorKind;
        use solana_client::rpc_request::RpcError;

        match e.kind() {
            ClientErrorKind::Reqwest(inner) => {
                if inner.is_timeout() {
                    Error::Timeout(inner.to_string())
                } else if let Some(status) = inner.status() {
                    Error::from_http_status(status.as_u16(), inner.to_string())
                } else {
                    Error::from_message(inner.to_string())
                }
            }
            ClientErrorKind::RpcError(RpcError::RpcResponseError { code, message, .. }) => {
                Error::from_rpc_code(*code, message)
            }
            ClientErrorKind::Io(inner) => Error::from_message(inner.to_string()),
            ClientErrorKind::SerdeJson(inner) => Error::Deserialization(inner.to_string()),
            _ => Error::from_message(e.to_string()),
        }
    }
}

// Conversion from reqwest errors (aggregator HTTP calls)
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            Error::from_http_status(status.as_u16(), e.to_string())
        } else if e.is_decode() {
            Error::Deserialization(e.to_string())
        } else {
            Error::from_message(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
