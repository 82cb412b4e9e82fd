//! Link discovery on listing pages
//!
//! A [`Discoverer`] turns a listing page into item URLs to fetch and further
//! listing pages (pagination, categories) to visit.

use crate::config::DiscoveryConfig;
use crate::url::{host_key, normalize_url};
use crate::ConfigError;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Links found on one listing page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Item pages to fetch and parse
    pub items: Vec<Url>,
    /// Further listing pages to discover from
    pub more: Vec<Url>,
}

/// Extracts item and listing links from a listing page
pub trait Discoverer: Send + Sync {
    fn discover(&self, page: &Url, body: &str) -> Discovery;
}

/// Discoverer driven by configured CSS selectors
#[derive(Debug)]
pub struct SelectorDiscoverer {
    item: Selector,
    more: Option<Selector>,
    same_host_only: bool,
}

impl SelectorDiscoverer {
    /// Builds a discoverer from a `[source.discovery]` section
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, ConfigError> {
        let compile = |selector: &str| {
            Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
                selector: selector.to_string(),
                message: e.to_string(),
            })
        };

        Ok(Self {
            item: compile(&config.item_selector)?,
            more: config.more_selector.as_deref().map(compile).transpose()?,
            same_host_only: config.same_host_only,
        })
    }

    fn collect(&self, document: &Html, selector: &Selector, page: &Url) -> Vec<Url> {
        let page_host = host_key(page);
        let mut seen = HashSet::new();

        document
            .select(selector)
            .filter(|el| el.value().attr("download").is_none())
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| resolve_link(href, page))
            .filter(|url| !self.same_host_only || host_key(url) == page_host)
            .filter(|url| seen.insert(url.as_str().to_string()))
            .collect()
    }
}

impl Discoverer for SelectorDiscoverer {
    fn discover(&self, page: &Url, body: &str) -> Discovery {
        let document = Html::parse_document(body);

        let items = self.collect(&document, &self.item, page);
        let more = match &self.more {
            Some(selector) => self
                .collect(&document, selector, page)
                .into_iter()
                .filter(|url| url != page)
                .collect(),
            None => Vec::new(),
        };

        Discovery { items, more }
    }
}

/// Resolves a link href to a normalized absolute URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    normalize_url(absolute.as_str()).ok()
}
