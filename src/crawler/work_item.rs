//! Fetch targets handed to the worker pool

use crate::url::{host_key, normalize_url, UrlTemplate};
use crate::UrlResult;
use sha2::{Digest, Sha256};
use url::Url;

/// One fetch target, immutable once enqueued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub source: String,
    /// Identifier in a numeric URL space; `None` for discovered URLs
    pub identifier: Option<u64>,
    pub url: Url,
    pub host: String,
}

impl WorkItem {
    /// Builds the work item for one identifier of a numeric source
    ///
    /// # Arguments
    ///
    /// * `source` - Source name
    /// * `identifier` - Numeric identifier
    /// * `template` - The source's URL template
    pub fn numeric(source: &str, identifier: u64, template: &UrlTemplate) -> UrlResult<Self> {
        let url = normalize_url(&template.render(identifier))?;
        Ok(Self {
            source: source.to_string(),
            identifier: Some(identifier),
            host: host_key(&url),
            url,
        })
    }

    /// Builds the work item for a URL found by discovery
    ///
    /// The URL is expected to be normalized already.
    pub fn discovered(source: &str, url: Url) -> Self {
        Self {
            source: source.to_string(),
            identifier: None,
            host: host_key(&url),
            url,
        }
    }

    /// Stable per-source key: the identifier, or a short hash of the URL
    pub fn key(&self) -> String {
        match self.identifier {
            Some(id) => id.to_string(),
            None => {
                let digest = Sha256::digest(self.url.as_str().as_bytes());
                hex::encode(&digest[..8])
            }
        }
    }

    /// Record ID for content extracted from this item
    pub fn record_id(&self) -> String {
        format!("{}_{}", self.source, self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_item() {
        let template = UrlTemplate::parse("https://islamqa.info/en/answers/{id}").unwrap();
        let item = WorkItem::numeric("islamqa", 42, &template).unwrap();
        assert_eq!(item.url.as_str(), "https://islamqa.info/en/answers/42");
        assert_eq!(item.host, "islamqa.info");
        assert_eq!(item.record_id(), "islamqa_42");
    }

    #[test]
    fn test_discovered_item_key_is_stable() {
        let url = Url::parse("https://abdurrahman.org/2024/01/post/").unwrap();
        let a = WorkItem::discovered("abdurrahman", url.clone());
        let b = WorkItem::discovered("abdurrahman", url);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().len(), 16);
        assert!(a.identifier.is_none());
    }
}
