//! Record validation applied between parsing and storage

use crate::content::Record;
use std::collections::BTreeSet;
use thiserror::Error;
use url::Url;

/// Reasons a parsed record is rejected before it reaches the store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid record URL: {0}")]
    InvalidUrl(String),

    #[error("content type '{0}' is not accepted")]
    UnacceptedContentType(String),

    #[error("body too short: {words} words (minimum {min})")]
    TooShort { words: usize, min: usize },

    #[error("residual HTML markup in {0}")]
    ResidualHtml(&'static str),
}

/// Per-source acceptance rules
#[derive(Debug, Clone)]
pub struct ValidationRules {
    pub accepted_content_types: BTreeSet<String>,
    pub min_words: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            accepted_content_types: ["fatwa", "article", "hadith", "book", "lecture"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_words: 10,
        }
    }
}

/// Validates a record against the source's rules
///
/// # Arguments
///
/// * `record` - The parsed record
/// * `rules` - Acceptance rules of the record's source
///
/// # Returns
///
/// * `Ok(())` - Record may be saved
/// * `Err(ValidationError)` - First rule the record breaks
pub fn validate(record: &Record, rules: &ValidationRules) -> Result<(), ValidationError> {
    for (name, value) in [
        ("id", &record.id),
        ("source", &record.source),
        ("title", &record.title),
        ("body", &record.body),
    ] {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(name));
        }
    }

    match Url::parse(&record.url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        _ => return Err(ValidationError::InvalidUrl(record.url.clone())),
    }

    if !rules.accepted_content_types.contains(&record.content_type) {
        return Err(ValidationError::UnacceptedContentType(
            record.content_type.clone(),
        ));
    }

    let words = record.body.split_whitespace().count();
    if words < rules.min_words {
        return Err(ValidationError::TooShort {
            words,
            min: rules.min_words,
        });
    }

    if contains_markup(&record.title) {
        return Err(ValidationError::ResidualHtml("title"));
    }
    if contains_markup(&record.body) {
        return Err(ValidationError::ResidualHtml("body"));
    }

    Ok(())
}

/// Detects leftover tags such as `<p>`, `</div>` or `<br/>`
///
/// A `<` followed by a letter, `/` or `!` and later closed by `>` counts as
/// a tag; bare comparisons like `a < b` do not.
fn contains_markup(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while let Some(offset) = text[i..].find('<') {
        let start = i + offset;
        let next = bytes.get(start + 1).copied();
        let opens_tag = matches!(next, Some(b) if b.is_ascii_alphabetic() || b == b'/' || b == b'!');
        if opens_tag {
            let rest = &text[start + 1..];
            let closing = rest.find('>');
            let reopening = rest.find('<');
            if let Some(close) = closing {
                if reopening.map_or(true, |open| close < open) {
                    return true;
                }
            }
        }
        i = start + 1;
    }
    false
}
