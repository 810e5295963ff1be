//! PubMed XML extraction using quick-xml.
//!
//! Fields are addressed by element path (`Article/Journal/Title`,
//! `AuthorList/Author/LastName`, ...) while streaming through the document.
//! Extraction never fails: a field that cannot be located keeps its sentinel,
//! and malformed markup ends extraction with whatever was read so far.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::record::{
    author_display_name, ArticleRecord, PubDate, RecordId, MISSING_ABSTRACT, MISSING_JOURNAL,
    MISSING_TITLE,
};

/// Text-bearing element currently being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    ForeName,
    LastName,
    CollectiveName,
    JournalTitle,
    Year,
    Month,
    Day,
    MedlineDate,
    Keyword,
    AbstractText,
}

#[derive(Debug, Default)]
struct AuthorParts {
    fore_name: Option<String>,
    last_name: Option<String>,
    collective_name: Option<String>,
}

#[derive(Debug, Default)]
struct DateParts {
    year: Option<String>,
    month: Option<String>,
    day: Option<String>,
    medline_date: Option<String>,
}

/// Accumulates fields while walking one `PubmedArticle`
#[derive(Debug, Default)]
struct ArticleBuilder {
    title: Option<String>,
    authors: Vec<String>,
    current_author: Option<AuthorParts>,
    journal: Option<String>,
    date: Option<DateParts>,
    date_done: bool,
    keywords: Vec<String>,
    abstract_sections: Vec<String>,
    abstract_label: Option<String>,
}

impl ArticleBuilder {
    /// Decide whether the element just opened under `path` starts a capture.
    fn open(&mut self, name: &str, path: &[String], start: &BytesStart) -> Option<Field> {
        let parent = path.last().map(String::as_str);
        let grandparent = path.len().checked_sub(2).map(|i| path[i].as_str());

        match (name, parent) {
            ("ArticleTitle", Some("Article")) if self.title.is_none() => Some(Field::Title),
            ("Author", Some("AuthorList")) if grandparent == Some("Article") => {
                self.current_author = Some(AuthorParts::default());
                None
            }
            ("ForeName", Some("Author")) if self.current_author.is_some() => Some(Field::ForeName),
            ("LastName", Some("Author")) if self.current_author.is_some() => Some(Field::LastName),
            ("CollectiveName", Some("Author")) if self.current_author.is_some() => {
                Some(Field::CollectiveName)
            }
            ("Title", Some("Journal")) if self.journal.is_none() => Some(Field::JournalTitle),
            ("PubDate", Some("JournalIssue")) if !self.date_done => {
                self.date = Some(DateParts::default());
                None
            }
            ("Year", Some("PubDate")) if self.in_date() => Some(Field::Year),
            ("Month", Some("PubDate")) if self.in_date() => Some(Field::Month),
            ("Day", Some("PubDate")) if self.in_date() => Some(Field::Day),
            ("MedlineDate", Some("PubDate")) if self.in_date() => Some(Field::MedlineDate),
            ("Keyword", Some("KeywordList")) => Some(Field::Keyword),
            ("AbstractText", Some("Abstract")) => {
                self.abstract_label = attribute(start, b"Label");
                Some(Field::AbstractText)
            }
            _ => None,
        }
    }

    fn in_date(&self) -> bool {
        self.date.is_some() && !self.date_done
    }

    /// Store the text collected for `field`.
    fn finish(&mut self, field: Field, text: String) {
        let text = normalize_whitespace(&text);
        if text.is_empty() {
            return;
        }

        match field {
            Field::Title => self.title = Some(text),
            Field::JournalTitle => self.journal = Some(text),
            Field::Keyword => self.keywords.push(text),
            Field::AbstractText => {
                let section = match self.abstract_label.take() {
                    Some(label) if !label.trim().is_empty() => format!("{}: {}", label.trim(), text),
                    _ => text,
                };
                self.abstract_sections.push(section);
            }
            Field::ForeName | Field::LastName | Field::CollectiveName => {
                if let Some(author) = self.current_author.as_mut() {
                    let slot = match field {
                        Field::ForeName => &mut author.fore_name,
                        Field::LastName => &mut author.last_name,
                        _ => &mut author.collective_name,
                    };
                    *slot = Some(text);
                }
            }
            Field::Year | Field::Month | Field::Day | Field::MedlineDate => {
                if let Some(date) = self.date.as_mut() {
                    let slot = match field {
                        Field::Year => &mut date.year,
                        Field::Month => &mut date.month,
                        Field::Day => &mut date.day,
                        _ => &mut date.medline_date,
                    };
                    *slot = Some(text);
                }
            }
        }
    }

    /// Handle a closing tag that is not the end of a capture.
    fn close(&mut self, name: &str) {
        match name {
            "Author" => {
                if let Some(parts) = self.current_author.take() {
                    let display = author_display_name(
                        parts.fore_name.as_deref(),
                        parts.last_name.as_deref(),
                    )
                    .or(parts.collective_name);
                    if let Some(display) = display {
                        self.authors.push(display);
                    }
                }
            }
            "PubDate" if self.date.is_some() => self.date_done = true,
            _ => {}
        }
    }

    fn build(self, id: RecordId) -> ArticleRecord {
        let pub_date = self.date.and_then(resolve_date);
        let abstract_text = if self.abstract_sections.is_empty() {
            MISSING_ABSTRACT.to_string()
        } else {
            self.abstract_sections.join("\n")
        };

        ArticleRecord {
            id,
            title: self.title.unwrap_or_else(|| MISSING_TITLE.to_string()),
            authors: self.authors,
            journal: self.journal.unwrap_or_else(|| MISSING_JOURNAL.to_string()),
            pub_date,
            keywords: self.keywords,
            abstract_text,
        }
    }
}

/// Year is required; `MedlineDate` ("2023 Nov-Dec") supplies it when `Year` is absent.
fn resolve_date(parts: DateParts) -> Option<PubDate> {
    let year = parts
        .year
        .or_else(|| parts.medline_date.as_deref().and_then(first_year))?;
    Some(PubDate {
        year,
        month: parts.month,
        day: parts.day,
    })
}

static YEAR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b(\d{4})\b").ok());

fn first_year(text: &str) -> Option<String> {
    YEAR_RE
        .as_ref()?
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn attribute(start: &BytesStart, key: &[u8]) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract an [`ArticleRecord`] from an `efetch` XML document.
///
/// Only the first `PubmedArticle` in the document is read.
pub fn parse_article_xml(id: RecordId, xml: &str) -> ArticleRecord {
    let mut reader = Reader::from_str(xml);
    let mut builder = ArticleBuilder::default();
    let mut path: Vec<String> = Vec::new();
    // (field, depth at which it was opened, collected text)
    let mut capture: Option<(Field, usize, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if capture.is_none() {
                    if let Some(field) = builder.open(&name, &path, &e) {
                        capture = Some((field, path.len(), String::new()));
                    }
                }
                path.push(name);
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                path.pop();

                let finished = matches!(&capture, Some((_, depth, _)) if *depth == path.len());
                if finished {
                    if let Some((field, _, text)) = capture.take() {
                        builder.finish(field, text);
                    }
                } else if capture.is_none() {
                    builder.close(&name);
                    if name == "PubmedArticle" {
                        break;
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some((_, _, text)) = capture.as_mut() {
                    match e.unescape() {
                        Ok(s) => text.push_str(&s),
                        Err(_) => text.push_str(&String::from_utf8_lossy(&e)),
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if let Some((_, _, text)) = capture.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(
                    pmid = %id,
                    position = reader.buffer_position(),
                    error = %e,
                    "Malformed detail document, keeping fields read so far"
                );
                break;
            }
            _ => {}
        }
    }

    // Text collected before a truncation still counts
    if let Some((field, _, text)) = capture.take() {
        builder.finish(field, text);
    }

    let record = builder.build(id);
    debug!(
        pmid = %record.id,
        authors = record.authors.len(),
        keywords = record.keywords.len(),
        has_abstract = record.has_abstract(),
        "Parsed detail document"
    );
    record
}

/// Extract the `IdList/Id` values of an `esearch` XML response.
///
/// Returns an error message when the document is not an `eSearchResult` or
/// reports an `ERROR`.
pub fn parse_id_list_xml(xml: &str) -> std::result::Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();
    let mut ids = Vec::new();
    let mut seen_root = false;
    let mut error_text: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if path.is_empty() && name == "eSearchResult" {
                    seen_root = true;
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                if text.is_empty() {
                    continue;
                }
                let in_id_list = path.len() >= 2
                    && path[path.len() - 1] == "Id"
                    && path[path.len() - 2] == "IdList";
                if in_id_list {
                    ids.push(text);
                } else if path.last().map(String::as_str) == Some("ERROR") {
                    error_text = Some(text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML error: {}", e)),
            _ => {}
        }
    }

    if !seen_root {
        return Err("missing eSearchResult element".to_string());
    }
    if let Some(err) = error_text {
        return Err(format!("service error: {}", err));
    }
    Ok(ids)
}
