//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.
//! Workers consult a [`RobotsCheck`] before every fetch; the Crawl-delay it reports
//! raises the host's politeness delay.

mod cache;
mod parser;

pub use cache::CachedRobots;
pub use parser::ParsedRobots;

use crate::url::host_key;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use url::Url;

/// Answer of a robots check for one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub crawl_delay: Option<Duration>,
}

impl RobotsVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            crawl_delay: None,
        }
    }
}

/// Capability that decides whether a URL may be fetched
#[async_trait]
pub trait RobotsCheck: Send + Sync {
    /// Full verdict including the host's Crawl-delay
    async fn check(&self, url: &Url) -> RobotsVerdict;

    /// Returns true if the URL may be fetched
    async fn is_allowed(&self, url: &Url) -> bool {
        self.check(url).await.allowed
    }
}

/// Robots check that fetches robots.txt once per host and caches it for a day
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    entries: Mutex<HashMap<String, Arc<OnceCell<CachedRobots>>>>,
}

impl RobotsCache {
    /// Creates an empty cache
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client used for robots.txt requests
    /// * `user_agent` - Product token matched against `User-agent` groups
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn robots_for(&self, url: &Url) -> ParsedRobots {
        let host = host_key(url);

        // The map lock only hands out the host's cell; callers for the same
        // host wait on the cell while its robots.txt is fetched.
        let cell = {
            let mut entries = self.entries.lock().await;
            let cell = entries.entry(host).or_default();
            if cell.get().is_some_and(|entry| entry.is_stale()) {
                *cell = Arc::new(OnceCell::new());
            }
            Arc::clone(cell)
        };

        cell.get_or_init(|| async {
            CachedRobots::new(fetch_robots(&self.client, url).await)
        })
        .await
        .content
        .clone()
    }
}

#[async_trait]
impl RobotsCheck for RobotsCache {
    async fn check(&self, url: &Url) -> RobotsVerdict {
        let robots = self.robots_for(url).await;
        RobotsVerdict {
            allowed: robots.is_allowed(url.as_str(), &self.user_agent),
            crawl_delay: robots.crawl_delay(&self.user_agent),
        }
    }
}

/// Fetches robots.txt for the host of a URL
///
/// Any failure (network error, non-2xx status, unreadable body) yields an
/// allow-all ruleset.
///
/// # Arguments
///
/// * `client` - The HTTP client
/// * `url` - Any URL on the host
///
/// # Returns
///
/// The parsed robots.txt
pub async fn fetch_robots(client: &reqwest::Client, url: &Url) -> ParsedRobots {
    let robots_url = format!("{}://{}/robots.txt", url.scheme(), host_key(url));

    match client.get(&robots_url).send().await {
        Ok(response) if response.status().is_success() => match response.text().await {
            Ok(body) => {
                tracing::debug!("Fetched {} ({} bytes)", robots_url, body.len());
                ParsedRobots::from_content(&body)
            }
            Err(e) => {
                tracing::debug!("Unreadable robots.txt at {}: {}", robots_url, e);
                ParsedRobots::allow_all()
            }
        },
        Ok(response) => {
            tracing::debug!(
                "No robots.txt at {} (HTTP {}), allowing all",
                robots_url,
                response.status().as_u16()
            );
            ParsedRobots::allow_all()
        }
        Err(e) => {
            tracing::debug!("Failed to fetch {}: {}, allowing all", robots_url, e);
            ParsedRobots::allow_all()
        }
    }
}
