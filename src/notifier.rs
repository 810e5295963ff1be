//! Digest delivery.
//!
//! [`WebhookNotifier`] posts `{"text": message}` to a Slack-style incoming
//! webhook. The webhook URL is a secret, so only its host ever reaches logs
//! and error messages.

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::error::{redact_endpoint, DigestError, Result};
use crate::retry::{with_retry, RetryPolicy};

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Delivers one message
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

/// Incoming-webhook notifier
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DigestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post_once(&self, endpoint: &str, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await
            .map_err(|e| DigestError::transport(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::status(endpoint, status));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let endpoint = redact_endpoint(&self.url, false);
        let endpoint_ref = &endpoint;

        with_retry(self.retry, "webhook", || async move {
            self.post_once(endpoint_ref, message).await
        })
        .await?;

        info!(endpoint = %endpoint, chars = message.chars().count(), "Digest delivered");
        Ok(())
    }
}

/// Prints the message instead of delivering it (`--dry-run`)
#[derive(Debug, Default)]
pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        println!("{}", message);
        Ok(())
    }
}
