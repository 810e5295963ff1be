//! pubdigest - daily PubMed digest
//!
//! Searches PubMed for recent articles matching a journal and keyword query,
//! fetches each record, optionally summarizes the abstracts and posts the
//! digest to a chat webhook.
//!
//! ## Usage
//!
//! ```bash
//! OPENAI_API_KEY=... SLACK_WEBHOOK_URL=... pubdigest run --days 1
//! pubdigest run --no-summary --dry-run
//! pubdigest query --keyword microbiome --journal Nature
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use pubdigest::config::{pause_from_millis, Config, Secrets};
use pubdigest::digest::{DigestStyle, DEFAULT_HEADER};
use pubdigest::pipeline::{Pipeline, RunReport};
use pubdigest::prompts::DEFAULT_LANGUAGE;
use pubdigest::pubmed::ResponseFormat;
use pubdigest::query::{QueryDefinition, SortOrder, DEFAULT_MAX_RESULTS};
use pubdigest::summarizer::{ApiStyle, DEFAULT_BASE_URL, DEFAULT_MODEL};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// PubMed new-article digest
#[derive(Parser)]
#[command(name = "pubdigest")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, summarize and post today's digest
    Run(RunArgs),
    /// Print the search term and parameters without any network call
    Query {
        #[command(flatten)]
        query: QueryArgs,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// JSON file with "journals" and "keywords" lists
    #[arg(long)]
    query_file: Option<PathBuf>,

    /// Journal to search (repeatable, replaces the configured list)
    #[arg(long = "journal")]
    journals: Vec<String>,

    /// Keyword to search (repeatable, replaces the configured list)
    #[arg(long = "keyword")]
    keywords: Vec<String>,

    /// Maximum number of articles
    #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_RESULTS)]
    max_results: usize,

    /// Only articles published in the last N days
    #[arg(long)]
    days: Option<u32>,

    /// Result ordering
    #[arg(long, value_enum, default_value_t = SortOrder::MostRecent)]
    sort: SortOrder,
}

impl QueryArgs {
    fn definition(&self) -> Result<QueryDefinition> {
        let mut definition = match &self.query_file {
            Some(path) => QueryDefinition::load(path)
                .with_context(|| format!("Failed to load query file {}", path.display()))?,
            None => QueryDefinition::default(),
        };
        if !self.journals.is_empty() {
            definition.journals = self.journals.clone();
        }
        if !self.keywords.is_empty() {
            definition.keywords = self.keywords.clone();
        }
        Ok(definition)
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    query: QueryArgs,

    /// Post raw abstracts instead of LLM summaries
    #[arg(long)]
    no_summary: bool,

    /// Digest layout
    #[arg(long, value_enum, default_value_t = DigestStyle::Full)]
    style: DigestStyle,

    /// Header line of the digest
    #[arg(long, default_value = DEFAULT_HEADER)]
    header: String,

    /// Print the digest instead of posting it
    #[arg(long)]
    dry_run: bool,

    /// Retries for search and webhook calls (0 disables)
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Also write the records to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// E-utilities search response format
    #[arg(long, value_enum, default_value_t = ResponseFormat::Json)]
    search_format: ResponseFormat,

    // === Summarization ===
    /// LLM API base URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    llm_base_url: String,

    /// LLM model name
    #[arg(long, default_value = DEFAULT_MODEL)]
    llm_model: String,

    /// LLM endpoint shape
    #[arg(long, value_enum, default_value_t = ApiStyle::Responses)]
    api_style: ApiStyle,

    /// Language of the summaries
    #[arg(long, default_value = DEFAULT_LANGUAGE)]
    language: String,

    /// Minimum pause between summarization calls (ms)
    #[arg(long, default_value_t = 1000)]
    pause_min_ms: u64,

    /// Maximum pause between summarization calls (ms)
    #[arg(long, default_value_t = 2000)]
    pause_max_ms: u64,
}

impl RunArgs {
    fn into_config(self, secrets: Secrets) -> Result<Config> {
        Ok(Config {
            query: self.query.definition()?,
            max_results: self.query.max_results,
            last_days: self.query.days,
            sort: self.query.sort,
            search_format: self.search_format,
            summarize: !self.no_summary,
            llm_base_url: self.llm_base_url,
            llm_model: self.llm_model,
            language: self.language,
            api_style: self.api_style,
            style: self.style,
            header: self.header,
            dry_run: self.dry_run,
            retries: self.retries,
            summary_pause: pause_from_millis(self.pause_min_ms, self.pause_max_ms),
            csv_path: self.csv,
            secrets,
        })
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Run(args) => run_digest(args).await,
        Commands::Query { query } => print_query(&query),
    }
}

// ============================================================================
// Digest Run
// ============================================================================

async fn run_digest(args: RunArgs) -> Result<()> {
    let config = args.into_config(Secrets::from_env())?;
    info!(secrets = ?config.secrets, dry_run = config.dry_run, "Starting digest run");

    let components = config.build().context("Invalid configuration")?;
    let query = config.search_query(Local::now().date_naive());

    let progress = Progress::for_config(&config);
    progress.line("\n--- Searching PubMed ---");
    progress.line(&query);

    let pipeline = Pipeline::new(
        &components.pubmed,
        components.summarizer.as_deref(),
        components.notifier.as_ref(),
        config.pipeline_options(),
    );
    let report = pipeline.run(&query).await.context("Digest run failed")?;

    for line in summary_lines(&report, &config) {
        progress.line(line);
    }

    Ok(())
}

/// Progress output; under `--dry-run` stdout carries only the digest
struct Progress {
    to_stderr: bool,
}

impl Progress {
    fn for_config(config: &Config) -> Self {
        Self {
            to_stderr: config.dry_run,
        }
    }

    fn line(&self, line: impl std::fmt::Display) {
        if self.to_stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
}

/// Closing progress lines for a finished run
fn summary_lines(report: &RunReport, config: &Config) -> Vec<String> {
    let mut lines = vec![
        "\n--- Done ---".to_string(),
        format!("Found {} articles", report.ids.len()),
    ];
    if !report.skipped.is_empty() {
        lines.push(format!("Skipped {} articles after fetch errors", report.skipped.len()));
    }
    if config.summarization_enabled() {
        lines.push(format!(
            "Summarized {} abstracts ({} failed)",
            report.summarized, report.summary_failures
        ));
    }
    if let Some(usage) = report.usage {
        lines.push(format!(
            "Tokens: {} prompt + {} completion = {} total",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        ));
    }
    if let Some(path) = &config.csv_path {
        match report.csv_rows {
            Some(rows) if rows > 0 => lines.push(format!("Saved: {:?}", path)),
            Some(_) => {}
            None => lines.push(format!("CSV export to {:?} failed, see log", path)),
        }
    }
    lines
}

fn print_query(args: &QueryArgs) -> Result<()> {
    let config = Config {
        query: args.definition()?,
        max_results: args.max_results,
        last_days: args.days,
        sort: args.sort,
        ..Config::default()
    };
    let query = config.search_query(Local::now().date_naive());
    println!("{}", query);
    Ok(())
}
