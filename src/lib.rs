//! # pubdigest
//!
//! Daily PubMed digest: search recent articles, fetch their metadata,
//! optionally summarize each abstract with an LLM and post one message to a
//! chat webhook.
//!
//! ## Modules
//!
//! - [`query`] - Search term and date window construction
//! - [`pubmed`] - E-utilities client (esearch, efetch)
//! - [`parser`] - Detail and id-list XML extraction
//! - [`summarizer`] - OpenAI-compatible abstract summarization
//! - [`digest`] - Message formatting
//! - [`notifier`] - Webhook delivery
//! - [`pipeline`] - One end-to-end run
//! - [`config`] - Secrets and startup validation
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pubdigest::config::{Config, Secrets};
//! use pubdigest::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config { secrets: Secrets::from_env(), ..Config::default() };
//!     let components = config.build()?;
//!     let pipeline = Pipeline::new(
//!         &components.pubmed,
//!         components.summarizer.as_deref(),
//!         components.notifier.as_ref(),
//!         config.pipeline_options(),
//!     );
//!     let query = config.search_query(chrono::Local::now().date_naive());
//!     let report = pipeline.run(&query).await?;
//!     println!("Sent {} entries", report.digest.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod digest;
pub mod error;
pub mod export;
pub mod notifier;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod pubmed;
pub mod query;
pub mod record;
pub mod retry;
pub mod summarizer;

pub use error::{DigestError, Result};
