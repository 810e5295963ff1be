//! One digest run: search, fetch, summarize, render, notify.
//!
//! Every step is awaited in sequence. Search and notification failures end
//! the run with an error; a detail fetch failure drops only that record and
//! a summarization failure only replaces that record's summary with a
//! placeholder. When the search found ids but every fetch failed, the run
//! fails with the last fetch error and nothing is sent. Otherwise the
//! notifier is called exactly once per run, with the no-results message when
//! the search comes back empty.

use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::digest::{Digest, DigestStyle, DEFAULT_HEADER};
use crate::error::{DigestError, Result};
use crate::export::save_csv;
use crate::notifier::Notifier;
use crate::pubmed::PubmedClient;
use crate::query::SearchQuery;
use crate::record::{ArticleRecord, RecordId};
use crate::summarizer::{summary_placeholder, Summarizer, TokenUsage};

/// Randomized pause between successive summarization calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseRange {
    min: Duration,
    max: Duration,
}

impl Default for PauseRange {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(2))
    }
}

impl PauseRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Draw one pause uniformly from the range
    pub fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if min == max {
            return self.min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Presentation and side-output settings for a run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub header: String,
    pub style: DigestStyle,
    pub summary_pause: PauseRange,
    /// Also archive the digest entries here
    pub csv_path: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            header: DEFAULT_HEADER.to_string(),
            style: DigestStyle::default(),
            summary_pause: PauseRange::default(),
            csv_path: None,
        }
    }
}

/// What a finished run did
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Ids returned by the search, in order
    pub ids: Vec<RecordId>,
    /// Ids dropped because their detail fetch failed
    pub skipped: Vec<RecordId>,
    pub summarized: usize,
    pub summary_failures: usize,
    pub digest: Digest,
    /// Rows written to the CSV archive; `None` when not requested or the write failed
    pub csv_rows: Option<usize>,
    /// The exact message handed to the notifier
    pub message: String,
    pub usage: Option<TokenUsage>,
}

/// The pipeline's collaborators
pub struct Pipeline<'a> {
    pubmed: &'a PubmedClient,
    summarizer: Option<&'a dyn Summarizer>,
    notifier: &'a dyn Notifier,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        pubmed: &'a PubmedClient,
        summarizer: Option<&'a dyn Summarizer>,
        notifier: &'a dyn Notifier,
        options: PipelineOptions,
    ) -> Self {
        Self {
            pubmed,
            summarizer,
            notifier,
            options,
        }
    }

    /// Run once for `query`.
    ///
    /// # Errors
    ///
    /// The search error, the last fetch error when no record could be
    /// fetched, or the notification error.
    pub async fn run(&self, query: &SearchQuery) -> Result<RunReport> {
        let ids = self.pubmed.search(query).await.map_err(|e| {
            error!(error = %e, "Search failed");
            e
        })?;

        let mut digest = Digest::new(self.options.header.clone(), self.options.style);
        let (records, skipped, last_error) = self.fetch_records(&ids).await;
        if records.is_empty() {
            if let Some(e) = last_error {
                error!(count = ids.len(), error = %e, "Every detail fetch failed");
                return Err(e);
            }
        }

        let mut summarized = 0;
        let mut summary_failures = 0;
        match self.summarizer.filter(|_| self.options.style == DigestStyle::Full) {
            Some(summarizer) => {
                let mut first = true;
                for record in records {
                    if !record.has_abstract() {
                        digest.push(record, None);
                        continue;
                    }
                    if !first {
                        tokio::time::sleep(self.options.summary_pause.sample()).await;
                    }
                    first = false;

                    let summary = match summarizer.summarize(&record.abstract_text).await {
                        Ok(text) => {
                            summarized += 1;
                            text
                        }
                        Err(e) => {
                            warn!(pmid = %record.id, error = %e, "Summarization failed");
                            summary_failures += 1;
                            summary_placeholder(&e)
                        }
                    };
                    digest.push(record, Some(summary));
                }
            }
            None => {
                for record in records {
                    digest.push(record, None);
                }
            }
        }

        let csv_rows = self.options.csv_path.as_ref().and_then(|path| {
            save_csv(path, &digest)
                .map_err(|e| warn!(path = %path.display(), error = %e, "CSV export failed"))
                .ok()
        });

        let message = digest.render();
        self.notifier.send(&message).await.map_err(|e| {
            error!(error = %e, "Notification failed");
            e
        })?;

        let usage = self.summarizer.and_then(|s| s.usage());
        if let Some(usage) = usage {
            info!(
                prompt = usage.prompt_tokens,
                completion = usage.completion_tokens,
                total = usage.total_tokens,
                "Token usage"
            );
        }
        info!(
            entries = digest.len(),
            skipped = skipped.len(),
            summary_failures,
            "Digest sent"
        );

        Ok(RunReport {
            ids,
            skipped,
            summarized,
            summary_failures,
            digest,
            csv_rows,
            message,
            usage,
        })
    }

    /// Fetch details in id order; failed ids are logged and returned
    /// separately, along with the last fetch error.
    async fn fetch_records(
        &self,
        ids: &[RecordId],
    ) -> (Vec<ArticleRecord>, Vec<RecordId>, Option<DigestError>) {
        let mut records = Vec::with_capacity(ids.len());
        let mut skipped = Vec::new();
        let mut last_error = None;

        for (idx, id) in ids.iter().enumerate() {
            match self.pubmed.fetch_record(id).await {
                Ok(record) => {
                    info!(pmid = %id, n = idx + 1, of = ids.len(), "Fetched record");
                    records.push(record);
                }
                Err(e) => {
                    warn!(pmid = %id, error = %e, "Skipping record after fetch failure");
                    skipped.push(id.clone());
                    last_error = Some(e);
                }
            }
        }

        (records, skipped, last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{DIVIDER, NO_RESULTS_MESSAGE};
    use crate::query::QueryBuilder;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use mockito::{Matcher, Server, ServerGuard};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &str) -> Result<()> {
            self.messages.lock().expect("lock").push(message.to_string());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _message: &str) -> Result<()> {
            Err(DigestError::Transport {
                endpoint: "hooks.example.org".to_string(),
                status: Some(500),
                message: "server error".to_string(),
            })
        }
    }

    /// Upper-cases the text; fails on abstracts containing "FAIL".
    #[derive(Default)]
    struct FakeSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize(&self, text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("FAIL") {
                return Err(DigestError::Summarizer("model refused".to_string()));
            }
            Ok(format!("summary of {}", text))
        }
    }

    fn article_xml(id: &str, title: &str, abstract_text: Option<&str>) -> String {
        let abstract_block = abstract_text
            .map(|t| format!("<Abstract><AbstractText>{}</AbstractText></Abstract>", t))
            .unwrap_or_default();
        format!(
            "<PubmedArticleSet><PubmedArticle><MedlineCitation><PMID>{id}</PMID><Article>\
             <Journal><Title>Test Journal</Title></Journal>\
             <ArticleTitle>{title}</ArticleTitle>{abstract_block}\
             </Article></MedlineCitation></PubmedArticle></PubmedArticleSet>"
        )
    }

    async fn mock_search(server: &mut ServerGuard, ids: &[&str]) -> mockito::Mock {
        let body = serde_json::json!({ "esearchresult": { "idlist": ids } });
        server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await
    }

    async fn mock_fetch(server: &mut ServerGuard, id: &str, status: usize, body: String) -> mockito::Mock {
        server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::UrlEncoded("id".into(), id.into()))
            .with_status(status)
            .with_body(body)
            .expect(1)
            .create_async()
            .await
    }

    fn pubmed(server: &ServerGuard) -> PubmedClient {
        PubmedClient::new(None)
            .expect("client")
            .with_base_url(server.url())
            .with_min_interval(Duration::ZERO)
            .with_retry(RetryPolicy::none())
    }

    fn query() -> SearchQuery {
        QueryBuilder::new()
            .journals(["Test Journal"])
            .keywords(["microbiome"])
            .max_results(5)
            .build(NaiveDate::from_ymd_opt(2024, 5, 1).expect("date"))
    }

    fn options(style: DigestStyle) -> PipelineOptions {
        PipelineOptions {
            header: "Header".to_string(),
            style,
            summary_pause: PauseRange::none(),
            csv_path: None,
        }
    }

    #[tokio::test]
    async fn test_empty_search_sends_no_results_message_once() {
        let mut server = Server::new_async().await;
        let _search = mock_search(&mut server, &[]).await;
        let fetch = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = pubmed(&server);
        let summarizer = FakeSummarizer::default();
        let notifier = RecordingNotifier::default();
        let pipeline = Pipeline::new(&client, Some(&summarizer), &notifier, options(DigestStyle::Full));

        let report = pipeline.run(&query()).await.expect("run");
        assert!(report.ids.is_empty());
        assert_eq!(notifier.messages(), vec![NO_RESULTS_MESSAGE.to_string()]);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
        fetch.assert_async().await;
    }

    #[tokio::test]
    async fn test_full_run_preserves_order_and_isolates_summary_failure() {
        let mut server = Server::new_async().await;
        let _search = mock_search(&mut server, &["30", "10", "20"]).await;
        let _a = mock_fetch(&mut server, "30", 200, article_xml("30", "Third", Some("alpha"))).await;
        let _b = mock_fetch(&mut server, "10", 200, article_xml("10", "First", Some("FAIL here"))).await;
        let _c = mock_fetch(&mut server, "20", 200, article_xml("20", "Second", None)).await;

        let client = pubmed(&server);
        let summarizer = FakeSummarizer::default();
        let notifier = RecordingNotifier::default();
        let pipeline = Pipeline::new(&client, Some(&summarizer), &notifier, options(DigestStyle::Full));

        let report = pipeline.run(&query()).await.expect("run");

        // The record without an abstract is never sent to the summarizer
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.summarized, 1);
        assert_eq!(report.summary_failures, 1);

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        let parts: Vec<&str> = messages[0].split(DIVIDER).collect();
        assert_eq!(parts.len(), 4);
        assert!(parts[1].contains("*Title*: Third"));
        assert!(parts[1].contains("summary of alpha"));
        assert!(parts[2].contains("*Title*: First"));
        assert!(parts[2].contains("(Summary unavailable:"));
        assert!(parts[3].contains("*Title*: Second"));
        assert!(parts[3].contains("(No Abstract)"));
        assert_eq!(report.message, messages[0]);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_only_that_record() {
        let mut server = Server::new_async().await;
        let _search = mock_search(&mut server, &["1", "2"]).await;
        let _a = mock_fetch(&mut server, "1", 500, String::new()).await;
        let _b = mock_fetch(&mut server, "2", 200, article_xml("2", "Kept", Some("text"))).await;

        let client = pubmed(&server);
        let notifier = RecordingNotifier::default();
        let pipeline = Pipeline::new(&client, None, &notifier, options(DigestStyle::Full));

        let report = pipeline.run(&query()).await.expect("run");
        assert_eq!(report.skipped, vec![RecordId::new("1")]);
        assert_eq!(report.digest.len(), 1);

        let message = &notifier.messages()[0];
        assert!(message.contains("*Title*: Kept"));
        assert!(message.contains("*Abstract*:\ntext"));
    }

    #[tokio::test]
    async fn test_all_fetches_failing_aborts_without_no_results_message() {
        let mut server = Server::new_async().await;
        let _search = mock_search(&mut server, &["1", "2"]).await;
        let _a = mock_fetch(&mut server, "1", 500, String::new()).await;
        let _b = mock_fetch(&mut server, "2", 503, String::new()).await;

        let client = pubmed(&server);
        let notifier = RecordingNotifier::default();
        let pipeline = Pipeline::new(&client, None, &notifier, options(DigestStyle::Full));

        let err = pipeline.run(&query()).await.expect_err("every fetch failed");
        assert!(matches!(err, DigestError::Transport { status: Some(503), .. }));
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_csv_failure_is_reported_and_run_continues() {
        let mut server = Server::new_async().await;
        let _search = mock_search(&mut server, &["4"]).await;
        let _a = mock_fetch(&mut server, "4", 200, article_xml("4", "Archived", Some("text"))).await;

        let dir = tempfile::tempdir().expect("tempdir");
        let mut opts = options(DigestStyle::Full);
        opts.csv_path = Some(dir.path().join("missing").join("out.csv"));

        let client = pubmed(&server);
        let notifier = RecordingNotifier::default();
        let pipeline = Pipeline::new(&client, None, &notifier, opts);

        let report = pipeline.run(&query()).await.expect("run");
        assert_eq!(report.csv_rows, None);
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_search_failure_aborts_without_notifying() {
        let mut server = Server::new_async().await;
        let _search = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let client = pubmed(&server);
        let notifier = RecordingNotifier::default();
        let pipeline = Pipeline::new(&client, None, &notifier, options(DigestStyle::Full));

        let err = pipeline.run(&query()).await.expect_err("search fails");
        assert!(matches!(err, DigestError::Transport { status: Some(502), .. }));
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_notification_failure_is_returned() {
        let mut server = Server::new_async().await;
        let _search = mock_search(&mut server, &[]).await;

        let client = pubmed(&server);
        let pipeline = Pipeline::new(&client, None, &FailingNotifier, options(DigestStyle::Full));

        let err = pipeline.run(&query()).await.expect_err("notify fails");
        assert!(matches!(err, DigestError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_links_only_skips_summarizer_and_exports_csv() {
        let mut server = Server::new_async().await;
        let _search = mock_search(&mut server, &["7"]).await;
        let _a = mock_fetch(&mut server, "7", 200, article_xml("7", "Linked", Some("text"))).await;

        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("out.csv");
        let mut opts = options(DigestStyle::LinksOnly);
        opts.csv_path = Some(csv_path.clone());

        let client = pubmed(&server);
        let summarizer = FakeSummarizer::default();
        let notifier = RecordingNotifier::default();
        let pipeline = Pipeline::new(&client, Some(&summarizer), &notifier, opts);

        let report = pipeline.run(&query()).await.expect("run");
        assert_eq!(report.csv_rows, Some(1));
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
        assert!(notifier.messages()[0].contains("*Linked*\nhttps://pubmed.ncbi.nlm.nih.gov/7/"));
        assert!(csv_path.exists());
    }

    #[test]
    fn test_pause_range_sampling() {
        let range = PauseRange::new(Duration::from_millis(20), Duration::from_millis(10));
        for _ in 0..50 {
            let pause = range.sample();
            assert!(pause >= Duration::from_millis(10) && pause <= Duration::from_millis(20));
        }
        assert_eq!(PauseRange::none().sample(), Duration::ZERO);
    }
}
