//! Custom error types for pubdigest.
//!
//! This module defines all error types used throughout the library.
//! All fallible functions return `Result<T, DigestError>` instead of using `unwrap()`.
//! Missing article fields are not errors; see [`crate::record`] for the sentinels.

use thiserror::Error;

/// Main error type for pubdigest operations.
#[derive(Debug, Error)]
pub enum DigestError {
    /// Network failure, timeout, or non-success HTTP status on an outbound call
    #[error("Transport error ({endpoint}{}): {message}", status_suffix(.status))]
    Transport {
        /// Endpoint that was called (host and path, never secrets)
        endpoint: String,
        /// HTTP status, when a response was received
        status: Option<u16>,
        /// Underlying error description
        message: String,
    },

    /// Response body does not have the expected shape
    #[error("Malformed response from {endpoint}: {message}")]
    MalformedResponse {
        /// Endpoint that returned the body
        endpoint: String,
        /// What could not be decoded
        message: String,
    },

    /// Summarization service returned no usable text
    #[error("Summarizer error: {0}")]
    Summarizer(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(", status {}", s)).unwrap_or_default()
}

impl DigestError {
    /// Wrap a reqwest error raised while calling `endpoint`.
    ///
    /// The request URL is stripped from the message; it may contain secrets.
    pub fn transport(endpoint: impl Into<String>, err: reqwest::Error) -> Self {
        DigestError::Transport {
            endpoint: endpoint.into(),
            status: err.status().map(|s| s.as_u16()),
            message: err.without_url().to_string(),
        }
    }

    /// Build a transport error for a non-success HTTP status.
    pub fn status(endpoint: impl Into<String>, status: reqwest::StatusCode) -> Self {
        DigestError::Transport {
            endpoint: endpoint.into(),
            status: Some(status.as_u16()),
            message: format!("HTTP {}", status),
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Transport failures without a status (connect errors, timeouts), HTTP 429
    /// and HTTP 5xx are transient. Everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            DigestError::Transport { status: None, .. } => true,
            DigestError::Transport {
                status: Some(code), ..
            } => *code == 429 || (500..600).contains(code),
            _ => false,
        }
    }
}

/// Result type alias using `DigestError`
pub type Result<T> = std::result::Result<T, DigestError>;

/// Reduce a URL to `host/path` for logs and errors.
///
/// Webhook URLs carry their secret in the path, so `keep_path = false`
/// drops it and keeps only the host.
pub fn redact_endpoint(raw: &str, keep_path: bool) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("<no-host>");
            if keep_path {
                format!("{}{}", host, parsed.path())
            } else {
                host.to_string()
            }
        }
        Err(_) => "<invalid-url>".to_string(),
    }
}
