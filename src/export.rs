//! CSV archive of a digest.

use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::digest::{Digest, DigestEntry};
use crate::error::Result;

/// One CSV row per digest entry
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    pmid: &'a str,
    title: &'a str,
    authors: String,
    journal: &'a str,
    published: String,
    keywords: String,
    link: String,
    abstract_text: &'a str,
    summary: &'a str,
}

impl<'a> From<&'a DigestEntry> for CsvRow<'a> {
    fn from(entry: &'a DigestEntry) -> Self {
        let record = &entry.record;
        Self {
            pmid: record.id.as_str(),
            title: &record.title,
            authors: record.authors_display(),
            journal: &record.journal,
            published: record.date_display(),
            keywords: record.keywords_display(),
            link: record.id.article_url(),
            abstract_text: &record.abstract_text,
            summary: entry.summary.as_deref().unwrap_or_default(),
        }
    }
}

/// Write every entry of `digest` to `path`, header row included.
///
/// An empty digest writes nothing and returns `Ok(0)`.
pub fn save_csv(path: &Path, digest: &Digest) -> Result<usize> {
    if digest.is_empty() {
        info!(path = %path.display(), "No records to export");
        return Ok(0);
    }

    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_path(path)?;
    for entry in digest.entries() {
        wtr.serialize(CsvRow::from(entry))?;
    }
    wtr.flush()?;

    info!(path = %path.display(), rows = digest.len(), "Saved CSV");
    Ok(digest.len())
}
