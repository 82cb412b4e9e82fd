//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the engine, including:
//! - Building HTTP clients with proper user agent strings
//! - GET requests with redirect following
//! - Error classification into gaps, transient and permanent failures
//! - The polite fetch path: resource throttle, robots check, per-host
//!   permit, politeness delay and retries

use crate::config::UserAgentConfig;
use crate::crawler::PoliteRateLimiter;
use crate::guard::ResourceGuard;
use crate::robots::RobotsCheck;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Result of a fetch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// Successfully fetched the page
    Success {
        /// Final URL after redirects
        final_url: String,
        /// HTTP status code
        status_code: u16,
        /// Page body content
        body: String,
    },

    /// HTTP 404 or 410: an expected gap
    NotFound { status_code: u16 },

    /// Timeout, connection failure, 408, 429 or 5xx; worth retrying
    Transient {
        status_code: Option<u16>,
        error: String,
    },

    /// Any other failure; not retried
    Failed {
        status_code: Option<u16>,
        error: String,
    },

    /// robots.txt forbids the URL; nothing was requested
    Disallowed,
}

impl FetchResult {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Whole-request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use corpus_harvest::config::UserAgentConfig;
/// use corpus_harvest::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "CorpusHarvest".to_string(),
///     crawler_version: "0.1".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Maps a non-success status onto a fetch result
fn classify_status(status: StatusCode) -> FetchResult {
    let code = status.as_u16();
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchResult::NotFound { status_code: code },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => FetchResult::Transient {
            status_code: Some(code),
            error: format!("HTTP {}", code),
        },
        s if s.is_server_error() => FetchResult::Transient {
            status_code: Some(code),
            error: format!("HTTP {}", code),
        },
        _ => FetchResult::Failed {
            status_code: Some(code),
            error: format!("HTTP {}", code),
        },
    }
}

/// Maps a transport error onto a fetch result
fn classify_error(error: reqwest::Error) -> FetchResult {
    let status_code = error.status().map(|s| s.as_u16());
    if error.is_redirect() || error.is_builder() {
        FetchResult::Failed {
            status_code,
            error: error.to_string(),
        }
    } else if error.is_timeout() {
        FetchResult::Transient {
            status_code,
            error: "Request timeout".to_string(),
        }
    } else if error.is_connect() {
        FetchResult::Transient {
            status_code,
            error: format!("Connection failed: {}", error),
        }
    } else {
        FetchResult::Transient {
            status_code,
            error: error.to_string(),
        }
    }
}

/// Fetches a URL once, without politeness or retries
///
/// # Classification
///
/// | Condition | Result |
/// |-----------|--------|
/// | 2xx with readable body | Success |
/// | 404, 410 | NotFound |
/// | 408, 429, 5xx | Transient |
/// | Timeout, connection failure, body read error | Transient |
/// | Redirect loop or > 10 hops | Failed |
/// | Other status | Failed |
pub async fn fetch_url(client: &Client, url: &Url) -> FetchResult {
    let response = match client.get(url.clone()).send().await {
        Ok(response) => response,
        Err(e) => return classify_error(e),
    };

    let status = response.status();
    if !status.is_success() {
        return classify_status(status);
    }

    let final_url = response.url().to_string();
    match response.text().await {
        Ok(body) => FetchResult::Success {
            final_url,
            status_code: status.as_u16(),
            body,
        },
        Err(e) => FetchResult::Transient {
            status_code: Some(status.as_u16()),
            error: format!("Failed to read body: {}", e),
        },
    }
}

/// Retry settings for transient failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

/// Fetch path shared by workers and discovery
pub struct PoliteFetcher {
    client: Client,
    limiter: Arc<PoliteRateLimiter>,
    guard: Arc<ResourceGuard>,
    robots: Option<Arc<dyn RobotsCheck>>,
    retry: RetryPolicy,
}

impl PoliteFetcher {
    pub fn new(
        client: Client,
        limiter: Arc<PoliteRateLimiter>,
        guard: Arc<ResourceGuard>,
        robots: Option<Arc<dyn RobotsCheck>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            limiter,
            guard,
            robots,
            retry,
        }
    }

    /// Fetches a URL politely
    ///
    /// Throttles on host load, consults robots.txt (adopting its Crawl-delay),
    /// takes a per-host permit, then waits out the politeness delay before
    /// every attempt. Transient failures are retried up to `max_retries`.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to fetch
    /// * `host` - Host key of the URL
    pub async fn fetch(&self, url: &Url, host: &str) -> FetchResult {
        self.guard.throttle_if_needed().await;

        if let Some(robots) = &self.robots {
            let verdict = robots.check(url).await;
            if !verdict.allowed {
                return FetchResult::Disallowed;
            }
            if let Some(delay) = verdict.crawl_delay {
                self.limiter.raise_delay(host, delay);
            }
        }

        let _permit = self.limiter.acquire(host).await;

        let mut attempt = 0;
        loop {
            self.limiter.wait_if_needed(host).await;
            let result = fetch_url(&self.client, url).await;

            if !result.is_transient() || attempt >= self.retry.max_retries {
                return result;
            }

            attempt += 1;
            if let FetchResult::Transient { error, .. } = &result {
                tracing::debug!(
                    "Transient failure for {} ({}), retry {}/{}",
                    url,
                    error,
                    attempt,
                    self.retry.max_retries
                );
            }
            tokio::time::sleep(self.retry.delay).await;
        }
    }
}
