//! Digest message assembly.
//!
//! A [`Digest`] is an ordered list of records, each optionally paired with a
//! summary, rendered into one chat message: a header line followed by one
//! fixed block per record, blocks separated by [`DIVIDER`].

use crate::record::ArticleRecord;

/// Separator placed before every record block
pub const DIVIDER: &str = "\n---------------------------------\n";

/// Sent instead of a digest when the search returned nothing
pub const NO_RESULTS_MESSAGE: &str = "*📰 PubMed digest*: no new articles matched the query today.";

/// Default header line
pub const DEFAULT_HEADER: &str = "*📰 Today's new PubMed articles*";

/// How much of each record to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DigestStyle {
    /// Every extracted field plus summary or abstract
    #[default]
    Full,
    /// Title and link only
    LinksOnly,
}

/// One record and its summary, if one was requested
#[derive(Debug, Clone)]
pub struct DigestEntry {
    pub record: ArticleRecord,
    pub summary: Option<String>,
}

/// The ordered digest for one run
#[derive(Debug, Clone)]
pub struct Digest {
    header: String,
    style: DigestStyle,
    entries: Vec<DigestEntry>,
}

impl Digest {
    pub fn new(header: impl Into<String>, style: DigestStyle) -> Self {
        Self {
            header: header.into(),
            style,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, record: ArticleRecord, summary: Option<String>) {
        self.entries.push(DigestEntry { record, summary });
    }

    pub fn entries(&self) -> &[DigestEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Serialize to the message string.
    ///
    /// Never produces an empty-bodied digest: no entries gives [`NO_RESULTS_MESSAGE`].
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return NO_RESULTS_MESSAGE.to_string();
        }

        let mut message = self.header.trim_end().to_string();
        message.push('\n');

        for entry in &self.entries {
            message.push_str(DIVIDER);
            match self.style {
                DigestStyle::Full => render_full(&mut message, entry),
                DigestStyle::LinksOnly => render_link(&mut message, &entry.record),
            }
        }

        message
    }
}

fn render_full(out: &mut String, entry: &DigestEntry) {
    let record = &entry.record;
    out.push_str(&format!("*Title*: {}\n", record.title));
    out.push_str(&format!("*Authors*: {}\n", record.authors_display()));
    out.push_str(&format!("*Journal*: {}\n", record.journal));
    out.push_str(&format!("*Published*: {}\n", record.date_display()));
    out.push_str(&format!("*Keywords*: {}\n", record.keywords_display()));
    out.push_str(&format!("*PMID*: {}\n", record.id.article_url()));
    match &entry.summary {
        Some(summary) => out.push_str(&format!("*Summary*:\n{}\n", summary)),
        None => out.push_str(&format!("*Abstract*:\n{}\n", record.abstract_text)),
    }
}

fn render_link(out: &mut String, record: &ArticleRecord) {
    out.push_str(&format!("*{}*\n", record.title));
    out.push_str(&format!("{}\n", record.id.article_url()));
}
