use crate::content::ValidationRules;
use crate::url::UrlTemplate;
use crate::UrlResult;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Corpus-Harvest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Looks up a source by name
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

/// Engine behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Number of concurrent fetch workers
    pub concurrency: usize,

    /// Maximum concurrent requests to the same host
    pub per_host_concurrency: usize,

    /// Minimum time between requests to the same host (milliseconds)
    pub rate_delay_ms: u64,

    /// Per-request timeout (seconds)
    pub request_timeout_secs: u64,

    /// Retries for transient fetch failures
    pub max_retries: u32,

    /// Pause between retries (milliseconds)
    pub retry_delay_ms: u64,

    /// Writer commands grouped into one commit
    pub write_batch_size: usize,

    /// Drops the politeness delay and multiplies concurrency
    pub fast_mode: bool,

    /// Concurrency multiplier applied in fast mode
    pub fast_concurrency_multiplier: usize,

    /// Items between progress log lines
    pub progress_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            per_host_concurrency: 4,
            rate_delay_ms: 1000,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 2000,
            write_batch_size: 32,
            fast_mode: false,
            fast_concurrency_multiplier: 4,
            progress_interval: 50,
        }
    }
}

impl EngineConfig {
    /// Worker count after applying fast mode
    pub fn effective_concurrency(&self) -> usize {
        if self.fast_mode {
            self.concurrency.saturating_mul(self.fast_concurrency_multiplier)
        } else {
            self.concurrency
        }
    }

    /// Per-host concurrency after applying fast mode
    pub fn effective_per_host_concurrency(&self) -> usize {
        if self.fast_mode {
            self.per_host_concurrency
                .saturating_mul(self.fast_concurrency_multiplier)
        } else {
            self.per_host_concurrency
        }
    }

    /// Default politeness delay; zero in fast mode
    pub fn effective_rate_delay(&self) -> Duration {
        if self.fast_mode {
            Duration::ZERO
        } else {
            Duration::from_millis(self.rate_delay_ms)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Host utilization ceilings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResourceConfig {
    pub enabled: bool,

    /// CPU utilization ceiling in percent
    pub cpu_ceiling: f32,

    /// Memory utilization ceiling in percent
    pub memory_ceiling: f32,

    /// Sleep between checks while throttled (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_ceiling: 90.0,
            memory_ceiling: 85.0,
            poll_interval_ms: 5000,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler
    pub crawler_name: String,

    /// Version of the crawler
    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: String,

    /// Email address for crawler-related contact
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Full User-Agent header value
    ///
    /// Format: `Name/Version (+contact_url; contact_email)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}

/// One content source
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    /// Unique source name, used as record ID prefix and checkpoint key
    pub name: String,

    /// Numeric URL space, e.g. `https://islamqa.info/en/answers/{id}`
    pub url_template: Option<String>,

    /// Listing pages to start discovery from
    #[serde(default)]
    pub seeds: Vec<String>,

    /// First identifier of the numeric space
    #[serde(default = "default_start_id")]
    pub start_id: u64,

    /// Last identifier of the numeric space (inclusive)
    pub end_id: Option<u64>,

    /// Content type label given to records of this source
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Content types accepted by validation; defaults to `content-type`
    #[serde(default)]
    pub accepted_content_types: Vec<String>,

    /// Minimum body word count
    #[serde(default = "default_min_words")]
    pub min_words: usize,

    /// Phrases that mark a 2xx page as an expected gap
    #[serde(default)]
    pub absence_markers: Vec<String>,

    /// Consult robots.txt before fetching
    #[serde(default = "default_true")]
    pub respect_robots: bool,

    /// Fixed language label; detected from the text otherwise
    pub language: Option<String>,

    /// Maximum listing pages fetched during discovery
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum pagination depth during discovery
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Per-host politeness delay overrides (milliseconds)
    #[serde(default)]
    pub host_delays: BTreeMap<String, u64>,

    #[serde(default)]
    pub parser: ParserConfig,

    pub discovery: Option<DiscoveryConfig>,
}

fn default_start_id() -> u64 {
    1
}

fn default_content_type() -> String {
    "article".to_string()
}

fn default_min_words() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_pages() -> usize {
    100
}

fn default_max_depth() -> u32 {
    3
}

impl SourceConfig {
    /// Parsed URL template, if this is a numeric source
    pub fn template(&self) -> UrlResult<Option<UrlTemplate>> {
        self.url_template
            .as_deref()
            .map(UrlTemplate::parse)
            .transpose()
    }

    /// Validation rules derived from this source's settings
    pub fn validation_rules(&self) -> ValidationRules {
        let accepted = if self.accepted_content_types.is_empty() {
            vec![self.content_type.clone()]
        } else {
            self.accepted_content_types.clone()
        };

        ValidationRules {
            accepted_content_types: accepted.into_iter().collect(),
            min_words: self.min_words,
        }
    }
}

/// CSS selectors used by the selector parser
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParserConfig {
    /// Title selectors, tried in order
    pub title_selectors: Vec<String>,

    /// Body selectors, tried in order
    pub body_selectors: Vec<String>,

    /// Elements removed from the body before text extraction
    pub strip_selectors: Vec<String>,

    /// Metadata key to selector
    pub metadata: BTreeMap<String, String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            title_selectors: vec!["h1".to_string(), "title".to_string()],
            body_selectors: vec![
                "article".to_string(),
                "main".to_string(),
                "body".to_string(),
            ],
            strip_selectors: vec![
                "script".to_string(),
                "style".to_string(),
                "nav".to_string(),
                "footer".to_string(),
            ],
            metadata: BTreeMap::new(),
        }
    }
}

/// CSS selectors used by the selector discoverer
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscoveryConfig {
    /// Links to item pages
    pub item_selector: String,

    /// Links to further listing pages (pagination, categories)
    pub more_selector: Option<String>,

    /// Ignore links leaving the listing page's host
    #[serde(default = "default_true")]
    pub same_host_only: bool,
}
