//! Run configuration and startup validation.
//!
//! Secrets are read from the environment once, at startup, and handed to the
//! components that need them. [`Config::validate`] is the single fail-fast
//! check: a secret missing for an enabled feature is a configuration error
//! before any request is made, never a failure halfway through a digest.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::digest::{DigestStyle, DEFAULT_HEADER};
use crate::error::{DigestError, Result};
use crate::notifier::{Notifier, StdoutNotifier, WebhookNotifier};
use crate::pipeline::{PauseRange, PipelineOptions};
use crate::pubmed::{PubmedClient, ResponseFormat};
use crate::query::{QueryBuilder, QueryDefinition, SearchQuery, SortOrder, DEFAULT_MAX_RESULTS};
use crate::retry::RetryPolicy;
use crate::summarizer::{ApiStyle, LlmConfig, OpenAiSummarizer, Summarizer};

/// Credential for the summarization service
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Incoming webhook URL
pub const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";
/// Optional NCBI API key
pub const ENV_NCBI_API_KEY: &str = "NCBI_API_KEY";

/// Secrets supplied by the environment
#[derive(Clone, Default)]
pub struct Secrets {
    pub llm_api_key: Option<String>,
    pub webhook_url: Option<String>,
    pub ncbi_api_key: Option<String>,
}

impl Secrets {
    /// Read all secrets from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read secrets through `lookup`; blank values count as absent
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            llm_api_key: get(ENV_OPENAI_API_KEY),
            webhook_url: get(ENV_SLACK_WEBHOOK_URL),
            ncbi_api_key: get(ENV_NCBI_API_KEY),
        }
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("llm_api_key", &shown(&self.llm_api_key))
            .field("webhook_url", &shown(&self.webhook_url))
            .field("ncbi_api_key", &shown(&self.ncbi_api_key))
            .finish()
    }
}

/// Everything one run needs
#[derive(Debug, Clone)]
pub struct Config {
    pub query: QueryDefinition,
    pub max_results: usize,
    pub last_days: Option<u32>,
    pub sort: SortOrder,
    pub search_format: ResponseFormat,
    /// Summarize abstracts through the LLM
    pub summarize: bool,
    pub llm_base_url: String,
    pub llm_model: String,
    pub language: String,
    pub api_style: ApiStyle,
    pub style: DigestStyle,
    pub header: String,
    /// Print the digest instead of posting it
    pub dry_run: bool,
    /// Retries for the search and notification calls
    pub retries: u32,
    pub summary_pause: PauseRange,
    pub csv_path: Option<PathBuf>,
    pub secrets: Secrets,
}

impl Default for Config {
    fn default() -> Self {
        let llm = LlmConfig::new("");
        Self {
            query: QueryDefinition::default(),
            max_results: DEFAULT_MAX_RESULTS,
            last_days: None,
            sort: SortOrder::default(),
            search_format: ResponseFormat::default(),
            summarize: true,
            llm_base_url: llm.base_url,
            llm_model: llm.model,
            language: llm.language,
            api_style: llm.api_style,
            style: DigestStyle::default(),
            header: DEFAULT_HEADER.to_string(),
            dry_run: false,
            retries: RetryPolicy::default().max_retries,
            summary_pause: PauseRange::default(),
            csv_path: None,
            secrets: Secrets::default(),
        }
    }
}

/// Components built from a validated [`Config`]
pub struct Components {
    pub pubmed: PubmedClient,
    pub summarizer: Option<Box<dyn Summarizer>>,
    pub notifier: Box<dyn Notifier>,
}

impl Config {
    /// Summaries are requested only in the full digest style
    pub fn summarization_enabled(&self) -> bool {
        self.summarize && self.style == DigestStyle::Full
    }

    /// Fail fast on anything that would break the run later.
    pub fn validate(&self) -> Result<()> {
        if self.max_results == 0 {
            return Err(DigestError::Config("max results must be at least 1".to_string()));
        }
        if self.last_days == Some(0) {
            return Err(DigestError::Config("day window must be at least 1 day".to_string()));
        }
        if self.query.journals.iter().all(|j| j.trim().is_empty())
            && self.query.keywords.iter().all(|k| k.trim().is_empty())
        {
            return Err(DigestError::Config(
                "query definition has no journals and no keywords".to_string(),
            ));
        }
        if self.summarization_enabled() && self.secrets.llm_api_key.is_none() {
            return Err(DigestError::Config(format!(
                "{} is required when summarization is enabled (use --no-summary to disable)",
                ENV_OPENAI_API_KEY
            )));
        }
        if !self.dry_run {
            let url = self.secrets.webhook_url.as_deref().ok_or_else(|| {
                DigestError::Config(format!(
                    "{} is required unless --dry-run is given",
                    ENV_SLACK_WEBHOOK_URL
                ))
            })?;
            if url::Url::parse(url).is_err() {
                return Err(DigestError::Config(format!(
                    "{} is not a valid URL",
                    ENV_SLACK_WEBHOOK_URL
                )));
            }
        }
        Ok(())
    }

    /// Build the search query against `today`
    pub fn search_query(&self, today: chrono::NaiveDate) -> SearchQuery {
        QueryBuilder::from_definition(&self.query)
            .last_days(self.last_days)
            .max_results(self.max_results)
            .sort(self.sort)
            .build(today)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retries,
            ..RetryPolicy::default()
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            header: self.header.clone(),
            style: self.style,
            summary_pause: self.summary_pause,
            csv_path: self.csv_path.clone(),
        }
    }

    /// Validate, then construct every component with its secrets.
    pub fn build(&self) -> Result<Components> {
        self.validate()?;

        let pubmed = PubmedClient::new(self.secrets.ncbi_api_key.clone())?
            .with_format(self.search_format)
            .with_retry(self.retry_policy());

        let summarizer: Option<Box<dyn Summarizer>> = if self.summarization_enabled() {
            let api_key = self.secrets.llm_api_key.clone().ok_or_else(|| {
                DigestError::Config(format!("{} is not set", ENV_OPENAI_API_KEY))
            })?;
            let llm = LlmConfig {
                base_url: self.llm_base_url.clone(),
                api_key,
                model: self.llm_model.clone(),
                language: self.language.clone(),
                api_style: self.api_style,
            };
            Some(Box::new(OpenAiSummarizer::new(llm)?))
        } else {
            None
        };

        let notifier: Box<dyn Notifier> = if self.dry_run {
            Box::new(StdoutNotifier)
        } else {
            let url = self.secrets.webhook_url.clone().ok_or_else(|| {
                DigestError::Config(format!("{} is not set", ENV_SLACK_WEBHOOK_URL))
            })?;
            Box::new(WebhookNotifier::new(url)?.with_retry(self.retry_policy()))
        };

        Ok(Components {
            pubmed,
            summarizer,
            notifier,
        })
    }
}

/// Pause between summarization calls, in milliseconds
pub fn pause_from_millis(min_ms: u64, max_ms: u64) -> PauseRange {
    PauseRange::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(llm: bool, webhook: bool) -> Secrets {
        Secrets {
            llm_api_key: llm.then(|| "sk-test".to_string()),
            webhook_url: webhook.then(|| "https://hooks.slack.com/services/T/B/x".to_string()),
            ncbi_api_key: None,
        }
    }

    fn config(secrets: Secrets) -> Config {
        Config {
            secrets,
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(config(secrets(true, true)).validate().is_ok());
        assert!(config(secrets(true, true)).build().is_ok());
    }

    #[test]
    fn test_missing_llm_key_with_summary_enabled() {
        let err = config(secrets(false, true)).validate().expect_err("missing key");
        assert!(err.to_string().contains(ENV_OPENAI_API_KEY));
    }

    #[test]
    fn test_missing_llm_key_without_summary_is_fine() {
        let mut cfg = config(secrets(false, true));
        cfg.summarize = false;
        assert!(cfg.validate().is_ok());

        let mut links = config(secrets(false, true));
        links.style = DigestStyle::LinksOnly;
        assert!(links.validate().is_ok());
        assert!(links.build().expect("components").summarizer.is_none());
    }

    #[test]
    fn test_missing_webhook() {
        let err = config(secrets(true, false)).validate().expect_err("missing webhook");
        assert!(err.to_string().contains(ENV_SLACK_WEBHOOK_URL));

        let mut dry = config(secrets(true, false));
        dry.dry_run = true;
        assert!(dry.validate().is_ok());
    }

    #[test]
    fn test_invalid_webhook_url() {
        let mut s = secrets(true, true);
        s.webhook_url = Some("not a url".to_string());
        assert!(config(s).validate().is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut cfg = config(secrets(true, true));
        cfg.max_results = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = config(secrets(true, true));
        cfg.last_days = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_empty_query_rejected() {
        let mut cfg = config(secrets(true, true));
        cfg.query = QueryDefinition {
            journals: vec![],
            keywords: vec![" ".to_string()],
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_secrets_from_lookup_ignores_blank() {
        let secrets = Secrets::from_lookup(|name| match name {
            ENV_OPENAI_API_KEY => Some("  ".to_string()),
            ENV_SLACK_WEBHOOK_URL => Some("https://example.org/hook".to_string()),
            _ => None,
        });
        assert!(secrets.llm_api_key.is_none());
        assert!(secrets.webhook_url.is_some());
        assert!(!format!("{:?}", secrets).contains("example.org"));
    }
}
