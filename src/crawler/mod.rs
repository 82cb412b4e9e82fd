//! Crawler module for fetching, parsing and scheduling
//!
//! This module contains the core crawling logic, including:
//! - Work items over numeric or discovered URL spaces
//! - Polite HTTP fetching with per-host rate limiting and retries
//! - Pluggable page parsing and listing-page discovery
//! - The worker pool and the session scheduler

mod discovery;
mod fetcher;
mod parser;
mod rate_limiter;
mod scheduler;
mod work_item;
mod worker;

pub use discovery::{resolve_link, Discoverer, Discovery, SelectorDiscoverer};
pub use fetcher::{build_http_client, fetch_url, FetchResult, PoliteFetcher, RetryPolicy};
pub use parser::{Parser, SelectorParser};
pub use rate_limiter::PoliteRateLimiter;
pub use scheduler::{CrawlPlan, CrawlRequest, CrawlScheduler, EndPoint, StartPoint};
pub use work_item::WorkItem;
pub use worker::{process_item, FetchWorkerPool, ItemOutcome, SkipReason, WorkerContext};
