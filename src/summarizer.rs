//! LLM-based abstract summarization.
//!
//! This module sends one abstract per request to an OpenAI-compatible API and
//! returns the generated summary. Two request shapes are supported: the
//! `responses` endpoint (`input` string) and the `chat/completions` endpoint
//! (`messages` list). The reply text is looked up in every shape either
//! endpoint is known to return.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::{redact_endpoint, DigestError, Result};
use crate::prompts::summarize::{build_system_prompt, build_user_prompt, DEFAULT_LANGUAGE};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model, cheap and accurate enough for abstracts
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Text shown in the digest in place of a summary that could not be produced
pub fn summary_placeholder(err: &DigestError) -> String {
    format!("(Summary unavailable: {})", err)
}

/// Anything that can turn abstract text into a summary
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize one abstract.
    async fn summarize(&self, text: &str) -> Result<String>;

    /// Tokens spent so far, when the service reports them
    fn usage(&self) -> Option<TokenUsage> {
        None
    }
}

/// Which request/response shape the service speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ApiStyle {
    /// `POST {base}/responses` with an `input` prompt
    #[default]
    Responses,
    /// `POST {base}/chat/completions` with a `messages` list
    Chat,
}

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub api_style: ApiStyle,
}

impl LlmConfig {
    /// Defaults for everything but the credential
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            api_style: ApiStyle::default(),
        }
    }
}

/// Token usage tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Accumulated token usage with atomic counters
#[derive(Default)]
struct AtomicTokenUsage {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    total_tokens: AtomicU64,
}

impl AtomicTokenUsage {
    fn add(&self, usage: &TokenUsage) {
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens.fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.total_tokens.fetch_add(usage.total_tokens, Ordering::Relaxed);
    }

    fn get(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
        }
    }
}

/// OpenAI-compatible summarization client
pub struct OpenAiSummarizer {
    client: reqwest::Client,
    config: LlmConfig,
    usage: AtomicTokenUsage,
}

impl OpenAiSummarizer {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DigestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            usage: AtomicTokenUsage::default(),
        })
    }

    fn api_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match self.config.api_style {
            ApiStyle::Responses => format!("{}/responses", base),
            ApiStyle::Chat => format!("{}/chat/completions", base),
        }
    }

    fn request_body(&self, text: &str) -> Value {
        let system = build_system_prompt(&self.config.language);
        let user = build_user_prompt(&self.config.language, text);

        match self.config.api_style {
            ApiStyle::Responses => serde_json::json!({
                "model": self.config.model,
                "instructions": system,
                "input": user,
            }),
            ApiStyle::Chat => serde_json::json!({
                "model": self.config.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user}
                ],
                "temperature": 0.2
            }),
        }
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        let api_url = self.api_url();
        let endpoint = redact_endpoint(&api_url, true);

        debug!(model = %self.config.model, chars = text.len(), "Sending summarization request");

        let response = self
            .client
            .post(&api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|e| DigestError::transport(endpoint.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::status(endpoint, status));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| DigestError::Summarizer(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(usage) = extract_usage(&data) {
            self.usage.add(&usage);
        }

        extract_generated_text(&data).ok_or_else(|| {
            let preview: String = data.to_string().chars().take(200).collect();
            DigestError::Summarizer(format!("Unexpected response: {}", preview))
        })
    }

    fn usage(&self) -> Option<TokenUsage> {
        Some(self.usage.get())
    }
}

/// First generated text payload in any recognized response shape.
///
/// Checked in order: `output_text`, `output[*].content[*].text`,
/// `choices[0].message.content`.
pub fn extract_generated_text(data: &Value) -> Option<String> {
    let non_empty = |v: &Value| {
        v.as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(text) = data.get("output_text").and_then(non_empty) {
        return Some(text);
    }

    let from_output = data
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .find_map(|block| block.get("text").and_then(non_empty));
    if from_output.is_some() {
        return from_output;
    }

    data.pointer("/choices/0/message/content").and_then(non_empty)
}

/// Usage block of either endpoint (`prompt_tokens`/`input_tokens` naming)
fn extract_usage(data: &Value) -> Option<TokenUsage> {
    let usage = data.get("usage")?;
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| usage.get(*n).and_then(Value::as_u64))
            .unwrap_or(0)
    };

    let prompt_tokens = field(&["prompt_tokens", "input_tokens"]);
    let completion_tokens = field(&["completion_tokens", "output_tokens"]);
    let total_tokens = field(&["total_tokens"]).max(prompt_tokens + completion_tokens);

    Some(TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn summarizer(server: &Server, api_style: ApiStyle) -> OpenAiSummarizer {
        let mut config = LlmConfig::new("sk-test");
        config.base_url = server.url();
        config.api_style = api_style;
        OpenAiSummarizer::new(config).expect("summarizer")
    }

    #[test]
    fn test_extract_output_text() {
        let data = json!({"output_text": "要約です"});
        assert_eq!(extract_generated_text(&data), Some("要約です".to_string()));
    }

    #[test]
    fn test_extract_nested_output_blocks() {
        let data = json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [{"type": "output_text", "text": "Nested summary"}]}
            ]
        });
        assert_eq!(extract_generated_text(&data), Some("Nested summary".to_string()));
    }

    #[test]
    fn test_extract_chat_completion() {
        let data = json!({"choices": [{"message": {"role": "assistant", "content": "Chat summary"}}]});
        assert_eq!(extract_generated_text(&data), Some("Chat summary".to_string()));
    }

    #[test]
    fn test_extract_unknown_shape() {
        assert_eq!(extract_generated_text(&json!({"error": {"message": "quota"}})), None);
        assert_eq!(extract_generated_text(&json!({"output_text": "   "})), None);
    }

    #[test]
    fn test_extract_usage_both_namings() {
        let chat = json!({"usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}});
        assert_eq!(extract_usage(&chat).map(|u| u.total_tokens), Some(15));

        let responses = json!({"usage": {"input_tokens": 7, "output_tokens": 3}});
        let usage = extract_usage(&responses).expect("usage");
        assert_eq!(usage.prompt_tokens, 7);
        assert_eq!(usage.total_tokens, 10);
    }

    #[tokio::test]
    async fn test_summarize_responses_endpoint() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/responses")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({"model": DEFAULT_MODEL})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "output": [{"content": [{"type": "output_text", "text": "短い要約"}]}],
                    "usage": {"input_tokens": 100, "output_tokens": 20, "total_tokens": 120}
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let summarizer = summarizer(&server, ApiStyle::Responses);
        let text = summarizer.summarize("Abstract body").await.expect("summary");
        assert_eq!(text, "短い要約");
        assert_eq!(summarizer.usage().map(|u| u.total_tokens), Some(120));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_summarize_chat_endpoint() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("Abstract body".to_string()))
            .with_status(200)
            .with_body(json!({"choices": [{"message": {"content": "Chat reply"}}]}).to_string())
            .create_async()
            .await;

        let text = summarizer(&server, ApiStyle::Chat)
            .summarize("Abstract body")
            .await
            .expect("summary");
        assert_eq!(text, "Chat reply");
    }

    #[tokio::test]
    async fn test_summarize_error_status() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/responses")
            .with_status(429)
            .with_body(r#"{"error": {"message": "rate limited"}}"#)
            .create_async()
            .await;

        let err = summarizer(&server, ApiStyle::Responses)
            .summarize("Abstract body")
            .await
            .expect_err("429");
        assert!(matches!(err, DigestError::Transport { status: Some(429), .. }));
        assert!(summary_placeholder(&err).starts_with("(Summary unavailable:"));
    }

    #[tokio::test]
    async fn test_summarize_unexpected_body() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/responses")
            .with_status(200)
            .with_body(r#"{"status": "incomplete"}"#)
            .create_async()
            .await;

        let err = summarizer(&server, ApiStyle::Responses)
            .summarize("Abstract body")
            .await
            .expect_err("no text");
        assert!(matches!(err, DigestError::Summarizer(_)));
    }
}
