//! Article data model.
//!
//! An [`ArticleRecord`] is built once from a PubMed detail document and read
//! afterwards. Fields that could not be extracted hold explicit sentinel
//! strings so that formatting never has to branch on presence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel for a missing article title
pub const MISSING_TITLE: &str = "(No Title)";
/// Sentinel for an empty author list
pub const MISSING_AUTHORS: &str = "(No authors)";
/// Sentinel for a missing journal title
pub const MISSING_JOURNAL: &str = "(No Journal)";
/// Sentinel for a missing publication date
pub const MISSING_DATE: &str = "(No Date)";
/// Sentinel for an empty keyword list
pub const MISSING_KEYWORDS: &str = "(No Keywords)";
/// Sentinel for a missing abstract
pub const MISSING_ABSTRACT: &str = "(No Abstract)";

/// Canonical article URL template, `{id}` is replaced by the PMID
pub const ARTICLE_URL_TEMPLATE: &str = "https://pubmed.ncbi.nlm.nih.gov/{id}/";

/// Opaque record identifier (PMID) issued by the search service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical PubMed link for this record
    pub fn article_url(&self) -> String {
        ARTICLE_URL_TEMPLATE.replace("{id}", &self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Publication date with optional month and day.
///
/// Month is kept as written by the service (`"Mar"` or `"03"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubDate {
    pub year: String,
    pub month: Option<String>,
    pub day: Option<String>,
}

impl fmt::Display for PubDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.year,
            self.month.as_deref().unwrap_or("--"),
            self.day.as_deref().unwrap_or("--")
        )
    }
}

/// Metadata extracted from one detail document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: RecordId,
    pub title: String,
    /// Author display names, in service order
    pub authors: Vec<String>,
    pub journal: String,
    pub pub_date: Option<PubDate>,
    pub keywords: Vec<String>,
    pub abstract_text: String,
}

impl ArticleRecord {
    /// A record whose every field holds its sentinel.
    pub fn missing(id: RecordId) -> Self {
        Self {
            id,
            title: MISSING_TITLE.to_string(),
            authors: Vec::new(),
            journal: MISSING_JOURNAL.to_string(),
            pub_date: None,
            keywords: Vec::new(),
            abstract_text: MISSING_ABSTRACT.to_string(),
        }
    }

    /// Comma-separated author names, or the sentinel
    pub fn authors_display(&self) -> String {
        join_or(&self.authors, MISSING_AUTHORS)
    }

    /// Comma-separated keywords, or the sentinel
    pub fn keywords_display(&self) -> String {
        join_or(&self.keywords, MISSING_KEYWORDS)
    }

    pub fn date_display(&self) -> String {
        self.pub_date
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| MISSING_DATE.to_string())
    }

    pub fn has_abstract(&self) -> bool {
        self.abstract_text != MISSING_ABSTRACT
    }
}

fn join_or(items: &[String], sentinel: &str) -> String {
    if items.is_empty() {
        sentinel.to_string()
    } else {
        items.join(", ")
    }
}

/// Display name for one author: "given family", or family alone.
pub fn author_display_name(fore_name: Option<&str>, last_name: Option<&str>) -> Option<String> {
    let fore = fore_name.map(str::trim).filter(|s| !s.is_empty());
    let last = last_name.map(str::trim).filter(|s| !s.is_empty());
    match (fore, last) {
        (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
        (None, Some(l)) => Some(l.to_string()),
        _ => None,
    }
}
