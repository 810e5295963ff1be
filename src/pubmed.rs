//! PubMed E-utilities client.
//!
//! Endpoints used:
//! - `esearch.fcgi`: query string to an ordered list of PMIDs
//! - `efetch.fcgi`: one PMID to its XML detail document
//!
//! NCBI allows 3 requests/second without an API key (10 with one), so calls
//! are spaced by a minimum interval.

use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{redact_endpoint, DigestError, Result};
use crate::parser::{parse_article_xml, parse_id_list_xml};
use crate::query::{DateRange, SearchQuery};
use crate::record::{ArticleRecord, RecordId};
use crate::retry::{with_retry, RetryPolicy};

/// E-utilities base URL
pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Minimum spacing between E-utilities calls without an API key
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(340);

/// Minimum spacing with an API key
const MIN_REQUEST_INTERVAL_WITH_KEY: Duration = Duration::from_millis(110);

/// Search response format selector (`retmode`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ResponseFormat {
    #[default]
    Json,
    Xml,
}

impl ResponseFormat {
    fn as_param(&self) -> &'static str {
        match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Xml => "xml",
        }
    }
}

/// E-utilities client with request spacing
pub struct PubmedClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    format: ResponseFormat,
    retry: RetryPolicy,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl PubmedClient {
    /// Create a client for the public E-utilities endpoint.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Optional NCBI API key for the higher rate limit
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pubdigest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DigestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let min_interval = if api_key.is_some() {
            MIN_REQUEST_INTERVAL_WITH_KEY
        } else {
            MIN_REQUEST_INTERVAL
        };

        Ok(Self {
            client,
            base_url: EUTILS_BASE_URL.to_string(),
            api_key,
            format: ResponseFormat::default(),
            retry: RetryPolicy::default(),
            min_interval,
            last_request: Mutex::new(None),
        })
    }

    /// Point the client at another E-utilities host (mirrors, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    /// Retry policy for the search call
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    /// Wait until `min_interval` has passed since the previous call
    async fn wait_for_rate_limit(&self) {
        let remaining = {
            let last = self.last_request.lock().ok().and_then(|l| *l);
            last.and_then(|t| self.min_interval.checked_sub(t.elapsed()))
        };

        if let Some(wait) = remaining {
            tokio::time::sleep(wait).await;
        }

        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(Instant::now());
        }
    }

    /// Run a search and return at most `query.max_results()` ids in service order.
    ///
    /// # Errors
    ///
    /// `Transport` on network failure or non-success status (after retries),
    /// `MalformedResponse` when the body is not an id list.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<RecordId>> {
        let url = self.endpoint("esearch.fcgi");
        let endpoint = redact_endpoint(&url, true);

        info!(
            term = query.term(),
            max_results = query.max_results(),
            date_range = ?query.date_range(),
            "Searching PubMed"
        );

        let params = self.search_params(query);
        let (url_ref, endpoint_ref, params_ref) = (&url, &endpoint, &params);
        let body = with_retry(self.retry, "esearch", || async move {
            self.wait_for_rate_limit().await;
            self.get_text(url_ref, endpoint_ref, params_ref).await
        })
        .await?;

        let mut ids = match self.format {
            ResponseFormat::Json => decode_json_ids(&body),
            ResponseFormat::Xml => parse_id_list_xml(&body),
        }
        .map_err(|message| DigestError::MalformedResponse {
            endpoint: endpoint.clone(),
            message,
        })?;

        ids.truncate(query.max_results());
        info!(count = ids.len(), "Search complete");

        Ok(ids.into_iter().map(RecordId::new).collect())
    }

    fn search_params(&self, query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("term", query.term().to_string()),
            ("retmax", query.max_results().to_string()),
            ("sort", query.sort().as_param().to_string()),
            ("retmode", self.format.as_param().to_string()),
        ];
        if let Some(range) = query.date_range() {
            params.push(("datetype", "pdat".to_string()));
            params.push(("mindate", DateRange::format_bound(range.start)));
            params.push(("maxdate", DateRange::format_bound(range.end)));
        }
        self.push_common(&mut params);
        params
    }

    fn push_common(&self, params: &mut Vec<(&'static str, String)>) {
        params.push(("tool", "pubdigest".to_string()));
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
    }

    /// Fetch and extract one detail document.
    ///
    /// Missing fields never fail the call; only transport failures do.
    pub async fn fetch_record(&self, id: &RecordId) -> Result<ArticleRecord> {
        let url = self.endpoint("efetch.fcgi");
        let endpoint = redact_endpoint(&url, true);

        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("id", id.as_str().to_string()),
            ("retmode", "xml".to_string()),
        ];
        self.push_common(&mut params);

        debug!(pmid = %id, "Fetching detail document");
        self.wait_for_rate_limit().await;
        let xml = self.get_text(&url, &endpoint, &params).await?;

        Ok(parse_article_xml(id.clone(), &xml))
    }

    async fn get_text(
        &self,
        url: &str,
        endpoint: &str,
        params: &[(&'static str, String)],
    ) -> Result<String> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| DigestError::transport(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::status(endpoint, status));
        }

        response
            .text()
            .await
            .map_err(|e| DigestError::transport(endpoint, e))
    }
}

// === esearch JSON response types ===

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Option<Vec<String>>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

fn decode_json_ids(body: &str) -> std::result::Result<Vec<String>, String> {
    let data: ESearchResponse =
        serde_json::from_str(body).map_err(|e| format!("JSON decode failed: {}", e))?;

    match (data.esearchresult.idlist, data.esearchresult.error) {
        (Some(ids), _) => Ok(ids),
        (None, Some(err)) => Err(format!("service error: {}", err)),
        (None, None) => Err("missing idlist".to_string()),
    }
}
