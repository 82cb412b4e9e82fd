//! HTML field extraction
//!
//! Site-specific extraction sits behind the [`Parser`] trait. The
//! [`SelectorParser`] covers the common case of a page whose title and body
//! can be reached with CSS selectors.

use crate::config::SourceConfig;
use crate::content::{collapse_whitespace, Record};
use crate::crawler::WorkItem;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

/// Extracts a record from a fetched page
///
/// Returning `None` means the page carries no usable content; the item is
/// counted as skipped and its URL is marked visited.
pub trait Parser: Send + Sync {
    fn parse(&self, body: &str, item: &WorkItem) -> Option<Record>;
}

/// Parser driven by configured CSS selectors
///
/// # Extraction Rules
///
/// - Title: text of the first match of the first title selector that yields text
/// - Body: text of the first body selector that yields text, with elements
///   matching a strip selector (scripts, navigation, ...) removed
/// - Metadata: text of the first match of each metadata selector
/// - Whitespace runs collapse to a single space
#[derive(Debug)]
pub struct SelectorParser {
    source: String,
    content_type: String,
    language: Option<String>,
    title: Vec<Selector>,
    body: Vec<Selector>,
    strip: Vec<Selector>,
    metadata: Vec<(String, Selector)>,
}

fn compile(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn compile_all(selectors: &[String]) -> Result<Vec<Selector>, ConfigError> {
    selectors.iter().map(|s| compile(s)).collect()
}

impl SelectorParser {
    /// Builds a parser from a source's `[source.parser]` section
    ///
    /// # Arguments
    ///
    /// * `source` - The source configuration
    ///
    /// # Returns
    ///
    /// * `Ok(SelectorParser)` - All selectors compiled
    /// * `Err(ConfigError)` - A selector failed to parse
    pub fn from_config(source: &SourceConfig) -> Result<Self, ConfigError> {
        let parser = &source.parser;
        Ok(Self {
            source: source.name.clone(),
            content_type: source.content_type.clone(),
            language: source.language.clone(),
            title: compile_all(&parser.title_selectors)?,
            body: compile_all(&parser.body_selectors)?,
            strip: compile_all(&parser.strip_selectors)?,
            metadata: parser
                .metadata
                .iter()
                .map(|(key, selector)| Ok((key.clone(), compile(selector)?)))
                .collect::<Result<_, ConfigError>>()?,
        })
    }

    /// Text of an element, skipping any subtree matched by a strip selector
    fn element_text(&self, element: ElementRef<'_>) -> String {
        let stripped: HashSet<_> = self
            .strip
            .iter()
            .flat_map(|selector| element.select(selector).map(|el| el.id()))
            .collect();

        let mut text = String::new();
        for node in element.descendants() {
            let Some(fragment) = node.value().as_text() else {
                continue;
            };
            if node.ancestors().any(|a| stripped.contains(&a.id())) {
                continue;
            }
            let fragment: &str = fragment;
            text.push_str(fragment);
            text.push(' ');
        }

        collapse_whitespace(&text)
    }

    fn first_text(&self, document: &Html, selectors: &[Selector]) -> Option<String> {
        selectors.iter().find_map(|selector| {
            document
                .select(selector)
                .map(|el| self.element_text(el))
                .find(|text| !text.is_empty())
        })
    }
}

impl Parser for SelectorParser {
    fn parse(&self, body: &str, item: &WorkItem) -> Option<Record> {
        let document = Html::parse_document(body);

        let title = self.first_text(&document, &self.title)?;
        let text = self.first_text(&document, &self.body)?;

        let mut record = Record::new(
            item.record_id(),
            self.source.clone(),
            item.url.as_str(),
            title,
            text,
            self.content_type.clone(),
        );

        for (key, selector) in &self.metadata {
            if let Some(value) = self.first_text(&document, std::slice::from_ref(selector)) {
                record = record.with_metadata(key.clone(), value);
            }
        }
        if let Some(language) = &self.language {
            record = record.with_language(language.clone());
        }

        Some(record)
    }
}
