//! Content records and the rules that decide whether they are new
//!
//! A [`Record`] is the unit persisted by the store. Its content fingerprint is
//! computed once at construction and never changes afterwards.

mod fingerprint;
mod validate;

pub use fingerprint::{collapse_whitespace, content_fingerprint, detect_language, normalize_text};
pub use validate::{validate, ValidationError, ValidationRules};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// One extracted document
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub source: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
    pub language: Option<String>,
    pub retrieved_at: DateTime<Utc>,
    pub content_fingerprint: String,
}

impl Record {
    /// Creates a record, fingerprinting its content and detecting its language
    ///
    /// # Arguments
    ///
    /// * `id` - Unique record ID, usually `"{source}_{identifier}"`
    /// * `source` - Source name from the configuration
    /// * `url` - Normalized URL the record was fetched from
    /// * `title` - Extracted title
    /// * `body` - Extracted body text
    /// * `content_type` - Content type label (fatwa, article, ...)
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let body = body.into();
        let content_fingerprint = content_fingerprint(&title, &body);
        let language = detect_language(&format!("{} {}", title, body)).map(str::to_string);

        Self {
            id: id.into(),
            source: source.into(),
            url: url.into(),
            title,
            body,
            content_type: content_type.into(),
            metadata: BTreeMap::new(),
            language,
            retrieved_at: Utc::now(),
            content_fingerprint,
        }
    }

    /// Adds one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Overrides the detected language
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Number of whitespace separated words in the body
    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }
}
