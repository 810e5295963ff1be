//! PubMed query construction.
//!
//! Builds the boolean search expression sent to `esearch`: journal names are
//! OR-ed together, topic keywords are OR-ed together, and the two groups are
//! AND-ed. An optional trailing day window becomes an inclusive date range.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::Result;

/// Default result cap used by the digest
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Journals queried when no query file is given
pub const DEFAULT_JOURNALS: &[&str] = &[
    "Nature",
    "Science",
    "Cell",
    "Nature Neuroscience",
    "Nature Communications",
    "Nature Medicine",
    "Nature Methods",
    "Neuron",
    "Cell Reports",
    "Current Biology",
    "Anesthesiology",
    "British Journal of Anaesthesia",
    "Anesthesia & Analgesia",
    "Anaesthesia",
    "Journal of Anesthesia",
    "Journal of Neuroscience",
    "The Journal of Physiology",
    "eLife",
];

/// Topic keywords queried when no query file is given
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "neuroscience",
    "synaptic",
    "axon",
    "hippocampus",
    "anesthesia",
    "sevoflurane",
    "isoflurane",
    "propofol",
    "volatile anesthetics",
];

/// Result ordering requested from the search service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Most recent publication date first
    #[default]
    MostRecent,
    /// Service relevance ranking
    Relevance,
}

impl SortOrder {
    /// Value of the `sort` request parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            SortOrder::MostRecent => "pub_date",
            SortOrder::Relevance => "relevance",
        }
    }
}

/// Inclusive calendar-day range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The last `days` days up to and including `today`.
    pub fn last_days(days: u32, today: NaiveDate) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    /// Bound formatted for `mindate` / `maxdate`
    pub fn format_bound(date: NaiveDate) -> String {
        date.format("%Y/%m/%d").to_string()
    }
}

/// A fully built search request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    term: String,
    date_range: Option<DateRange>,
    max_results: usize,
    sort: SortOrder,
}

impl SearchQuery {
    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn date_range(&self) -> Option<DateRange> {
        self.date_range
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn sort(&self) -> SortOrder {
        self.sort
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "term:    {}", self.term)?;
        writeln!(f, "retmax:  {}", self.max_results)?;
        write!(f, "sort:    {}", self.sort.as_param())?;
        if let Some(range) = self.date_range {
            write!(
                f,
                "\nmindate: {}\nmaxdate: {}",
                DateRange::format_bound(range.start),
                DateRange::format_bound(range.end)
            )?;
        }
        Ok(())
    }
}

/// Journal and keyword lists, loadable from a JSON file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDefinition {
    #[serde(default)]
    pub journals: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Default for QueryDefinition {
    fn default() -> Self {
        Self {
            journals: DEFAULT_JOURNALS.iter().map(|s| s.to_string()).collect(),
            keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl QueryDefinition {
    /// Load a definition from a JSON file of the form
    /// `{"journals": [...], "keywords": [...]}`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Builder for [`SearchQuery`]
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    journals: Vec<String>,
    keywords: Vec<String>,
    last_days: Option<u32>,
    max_results: usize,
    sort: SortOrder,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self {
            journals: Vec::new(),
            keywords: Vec::new(),
            last_days: None,
            max_results: DEFAULT_MAX_RESULTS,
            sort: SortOrder::default(),
        }
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the journal and keyword lists of a definition
    pub fn from_definition(definition: &QueryDefinition) -> Self {
        Self::new()
            .journals(definition.journals.iter().cloned())
            .keywords(definition.keywords.iter().cloned())
    }

    pub fn journals<I, S>(mut self, journals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.journals.extend(journals.into_iter().map(Into::into));
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    /// Restrict to articles published within the last `days` days
    pub fn last_days(mut self, days: Option<u32>) -> Self {
        self.last_days = days;
        self
    }

    /// Result cap; zero is clamped to one
    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Build the query, resolving the day window against `today`.
    pub fn build(self, today: NaiveDate) -> SearchQuery {
        let journal_clause = or_group(&self.journals, |j| format!("\"{}\"[Journal]", j));
        let keyword_clause = or_group(&self.keywords, |k| format!("\"{}\"", k));

        let term = [journal_clause, keyword_clause]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" AND ");

        SearchQuery {
            term,
            date_range: self.last_days.map(|d| DateRange::last_days(d, today)),
            max_results: self.max_results,
            sort: self.sort,
        }
    }
}

/// `("a" OR "b")`, or `None` when there are no non-blank items
fn or_group(items: &[String], quote: impl Fn(&str) -> String) -> Option<String> {
    let parts: Vec<String> = items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| quote(&s.replace('"', "")))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(format!("({})", parts.join(" OR ")))
    }
}
