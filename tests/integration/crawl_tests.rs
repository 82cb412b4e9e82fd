//! Integration tests for the crawl engine
//!
//! These tests use wiremock to create mock HTTP servers and run full crawl
//! sessions against a temporary SQLite store.

use async_trait::async_trait;
use corpus_harvest::config::{parse_config, Config};
use corpus_harvest::crawler::{CrawlRequest, CrawlScheduler, Discoverer, Discovery};
use corpus_harvest::robots::{RobotsCheck, RobotsVerdict};
use corpus_harvest::storage::{ContentStore, QueryFilter, SqliteContentStore};
use corpus_harvest::{CheckpointStatus, HarvestError, RunPhase};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENGINE: &str = r#"
[engine]
concurrency = 4
per-host-concurrency = 4
rate-delay-ms = 0
max-retries = 0
retry-delay-ms = 10
write-batch-size = 4
progress-interval = 1000

[resources]
enabled = false

[user-agent]
crawler-name = "TestHarvest"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"
"#;

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("harvest.db")
}

/// Builds a config with one numeric source named `islamqa`
fn numeric_config(db: &Path, server: &MockServer, start: u64, end: u64, extra: &str) -> Config {
    let toml = format!(
        r#"{engine}
[output]
database-path = '{db}'

[[source]]
name = "islamqa"
url-template = '{uri}/answers/{{id}}'
start-id = {start}
end-id = {end}
content-type = "fatwa"
{extra}
"#,
        engine = ENGINE,
        db = db.display(),
        uri = server.uri(),
        start = start,
        end = end,
        extra = extra,
    );
    parse_config(&toml).expect("Failed to parse test config")
}

fn answer_page(id: u64) -> String {
    format!(
        r#"<html><head><title>Answer {id}</title></head><body>
        <nav>Home | Questions</nav>
        <h1>Question {id}</h1>
        <article><p>Answer number {id}: praise be to Allah, and may blessings be upon
        the Messenger. Fasting in the month of Ramadan is obligatory.</p></article>
        </body></html>"#,
        id = id
    )
}

async fn mount_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

fn open_store(db: &Path) -> SqliteContentStore {
    SqliteContentStore::new(db).expect("Failed to open store")
}

#[tokio::test]
async fn test_gaps_are_skipped_and_checkpoint_reaches_end() {
    let server = MockServer::start().await;
    for id in [100, 102, 104] {
        mount_page(&server, &format!("/answers/{}", id), answer_page(id)).await;
    }
    mount_status(&server, "/answers/101", 404).await;
    mount_status(&server, "/answers/103", 404).await;

    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 100, 104, "respect-robots = false");
    let scheduler = CrawlScheduler::from_config(config, "test-hash");

    let summary = scheduler
        .run(CrawlRequest::new("islamqa"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, RunPhase::Completed);
    assert_eq!(summary.queued, 5);
    assert_eq!(summary.counters.accepted, 3);
    assert_eq!(summary.counters.skipped_not_found, 2);
    assert_eq!(summary.counters.errors, 0);

    let checkpoint = summary.checkpoint.expect("checkpoint should exist");
    assert_eq!(checkpoint.last_identifier, Some(104));
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);

    let store = open_store(&db_path(&dir));
    let records = store.query(&QueryFilter::source("islamqa")).unwrap();
    let mut ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["islamqa_100", "islamqa_102", "islamqa_104"]);
    assert!(records.iter().all(|r| r.content_type == "fatwa"));
    assert_eq!(store.load_visited("islamqa").unwrap().len(), 5);

    let run = store.latest_run("islamqa").unwrap().unwrap();
    assert_eq!(run.status, CheckpointStatus::Completed);
    assert_eq!(run.totals.accepted, 3);
    assert_eq!(run.config_hash, "test-hash");
}

#[tokio::test]
async fn test_not_found_pages_are_gaps_not_errors() {
    let server = MockServer::start().await;
    for id in 1..=20u64 {
        let route = format!("/answers/{}", id);
        if id % 3 == 0 {
            mount_status(&server, &route, 404).await;
        } else {
            mount_page(&server, &route, answer_page(id)).await;
        }
    }

    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 1, 20, "respect-robots = false");
    let summary = CrawlScheduler::from_config(config, "hash")
        .run(CrawlRequest::new("islamqa"), CancellationToken::new())
        .await
        .unwrap();

    let counters = summary.counters;
    assert_eq!(counters.processed, 20);
    assert_eq!(counters.skipped_not_found, 6);
    assert_eq!(counters.accepted + counters.skipped_not_found, counters.processed);
    assert_eq!(counters.errors, 0);
    assert_eq!(summary.status, RunPhase::Completed);
}

#[tokio::test]
async fn test_resume_fetches_only_the_unvisited_remainder() {
    let server = MockServer::start().await;
    for id in 1..=5u64 {
        mount_page(&server, &format!("/answers/{}", id), answer_page(id)).await;
    }
    for id in 6..=10u64 {
        mount_status(&server, &format!("/answers/{}", id), 503).await;
    }

    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 1, 10, "respect-robots = false");
    let scheduler = CrawlScheduler::from_config(config, "hash");

    let first = scheduler
        .run(CrawlRequest::new("islamqa"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.counters.accepted, 5);
    assert_eq!(first.counters.errors, 5);
    assert_eq!(first.status, RunPhase::Paused);

    // Second run: the first half must not be requested again
    server.reset().await;
    for id in 1..=5u64 {
        Mock::given(method("GET"))
            .and(path(format!("/answers/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_page(id)))
            .expect(0)
            .mount(&server)
            .await;
    }
    for id in 6..=10u64 {
        Mock::given(method("GET"))
            .and(path(format!("/answers/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_page(id)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let second = scheduler
        .run(CrawlRequest::new("islamqa"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.queued, 5);
    assert_eq!(second.counters.accepted, 5);
    assert_eq!(second.status, RunPhase::Completed);
    server.verify().await;

    let store = open_store(&db_path(&dir));
    let records = store.query(&QueryFilter::source("islamqa")).unwrap();
    assert_eq!(records.len(), 10);
    let urls: HashSet<&str> = records.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls.len(), 10);
    assert_eq!(
        store.get_checkpoint("islamqa").unwrap().unwrap().last_identifier,
        Some(10)
    );
}

#[tokio::test]
async fn test_completed_run_resumes_after_last_identifier() {
    let server = MockServer::start().await;
    for id in 1..=6u64 {
        mount_page(&server, &format!("/answers/{}", id), answer_page(id)).await;
    }

    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 1, 6, "respect-robots = false");
    let scheduler = CrawlScheduler::from_config(config, "hash");

    let first = scheduler
        .run(CrawlRequest::new("islamqa").count(3), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.counters.accepted, 3);

    let second = scheduler
        .run(CrawlRequest::new("islamqa"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.queued, 3);
    assert_eq!(second.counters.accepted, 3);
    assert_eq!(
        second.checkpoint.unwrap().last_identifier,
        Some(6)
    );
}

#[tokio::test]
async fn test_identical_content_is_stored_once() {
    let server = MockServer::start().await;
    for id in 1..=3u64 {
        // Mirrors of the same answer under different identifiers
        mount_page(&server, &format!("/answers/{}", id), answer_page(7)).await;
    }

    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 1, 3, "respect-robots = false");
    let summary = CrawlScheduler::from_config(config, "hash")
        .run(CrawlRequest::new("islamqa"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.counters.accepted, 1);
    assert_eq!(summary.counters.skipped_duplicate, 2);

    let store = open_store(&db_path(&dir));
    assert_eq!(store.query(&QueryFilter::source("islamqa")).unwrap().len(), 1);
    assert_eq!(store.load_visited("islamqa").unwrap().len(), 3);
}

#[tokio::test]
async fn test_checkpoint_never_regresses_across_runs() {
    let server = MockServer::start().await;
    for id in (1..=5u64).chain(50..=55) {
        mount_page(&server, &format!("/answers/{}", id), answer_page(id)).await;
    }

    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 1, 100, "respect-robots = false");
    let scheduler = CrawlScheduler::from_config(config, "hash");

    let high = scheduler
        .run(
            CrawlRequest::new("islamqa").start_at(50).end_at(55),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(high.checkpoint.unwrap().last_identifier, Some(55));

    let low = scheduler
        .run(
            CrawlRequest::new("islamqa").start_at(1).end_at(5),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(low.counters.accepted, 5);
    assert_eq!(low.checkpoint.unwrap().last_identifier, Some(55));
}

#[tokio::test]
async fn test_discovery_follows_pagination_once() {
    let server = MockServer::start().await;
    let uri = server.uri();

    Mock::given(method("GET"))
        .and(path("/category/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body>
                <h2><a href="/posts/1/">One</a></h2>
                <h2><a href="/posts/2/">Two</a></h2>
                <a class="next" href="/category/page/2/">Older</a>
            </body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/category/page/2/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body>
                <h2><a href="/posts/2/">Two again</a></h2>
                <h2><a href="/posts/3/">Three</a></h2>
                <a class="next" href="/category/">Newer</a>
            </body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    for id in 1..=3u64 {
        Mock::given(method("GET"))
            .and(path(format!("/posts/{}/", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_page(id)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let toml = format!(
        r#"{engine}
[output]
database-path = '{db}'

[[source]]
name = "blog"
seeds = ['{uri}/category/']
content-type = "article"
respect-robots = false
max-pages = 10
max-depth = 3

[source.discovery]
item-selector = "h2 a"
more-selector = "a.next"
"#,
        engine = ENGINE,
        db = db_path(&dir).display(),
        uri = uri,
    );
    let config = parse_config(&toml).unwrap();

    let summary = CrawlScheduler::from_config(config, "hash")
        .run(CrawlRequest::new("blog"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.queued, 3);
    assert_eq!(summary.counters.accepted, 3);
    assert_eq!(summary.status, RunPhase::Completed);
    server.verify().await;

    let store = open_store(&db_path(&dir));
    let records = store.query(&QueryFilter::source("blog")).unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.id.starts_with("blog_")));
    assert!(records.iter().all(|r| r.content_type == "article"));
}

#[tokio::test]
async fn test_cancelled_run_pauses_without_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(answer_page(1)))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 1, 10, "respect-robots = false");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = CrawlScheduler::from_config(config, "hash")
        .run(CrawlRequest::new("islamqa"), cancel)
        .await
        .unwrap();

    assert_eq!(summary.status, RunPhase::Paused);
    assert_eq!(summary.counters.processed, 0);
    assert_eq!(
        summary.checkpoint.unwrap().status,
        CheckpointStatus::Paused
    );
}

#[tokio::test]
async fn test_interrupt_while_draining_keeps_saved_records() {
    let server = MockServer::start().await;
    for id in 1..=40u64 {
        Mock::given(method("GET"))
            .and(path(format!("/answers/{}", id)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(answer_page(id))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 1, 40, "respect-robots = false");
    let scheduler = CrawlScheduler::from_config(config, "hash");

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        interrupt.cancel();
    });

    let first = scheduler
        .run(CrawlRequest::new("islamqa"), cancel)
        .await
        .unwrap();
    assert_eq!(first.status, RunPhase::Paused);
    assert_eq!(
        first.checkpoint.as_ref().unwrap().status,
        CheckpointStatus::Paused
    );

    // Items in flight at the interrupt were finished and flushed
    let stored = open_store(&db_path(&dir))
        .query(&QueryFilter::source("islamqa"))
        .unwrap()
        .len() as u64;
    assert_eq!(stored, first.counters.accepted);
    assert!(stored > 0 && stored < 40);

    let second = scheduler
        .run(CrawlRequest::new("islamqa"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.queued, 40 - stored);
    assert_eq!(second.counters.accepted, 40 - stored);
    assert_eq!(second.status, RunPhase::Completed);

    let records = open_store(&db_path(&dir))
        .query(&QueryFilter::source("islamqa"))
        .unwrap();
    let urls: HashSet<&str> = records.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(records.len(), 40);
    assert_eq!(urls.len(), 40);
}

#[tokio::test]
async fn test_store_failure_ends_run_in_error() {
    let server = MockServer::start().await;
    for id in 1..=20u64 {
        mount_page(&server, &format!("/answers/{}", id), answer_page(id)).await;
    }

    let dir = TempDir::new().unwrap();
    // Create the schema, then make every insert of answer 5 fail
    drop(open_store(&db_path(&dir)));
    rusqlite::Connection::open(db_path(&dir))
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER fail_answer_five BEFORE INSERT ON records
             WHEN NEW.url LIKE '%/answers/5'
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
        )
        .unwrap();

    let config = numeric_config(&db_path(&dir), &server, 1, 20, "respect-robots = false");
    let summary = CrawlScheduler::from_config(config, "hash")
        .run(CrawlRequest::new("islamqa"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, RunPhase::Error);
    assert_eq!(summary.counters.store_failures, 1);
    assert_eq!(summary.counters.totals().errors, summary.counters.errors + 1);

    let store = open_store(&db_path(&dir));
    let stored = store.query(&QueryFilter::source("islamqa")).unwrap().len() as u64;
    assert_eq!(stored, summary.counters.accepted);
    assert!(!store
        .load_visited("islamqa")
        .unwrap()
        .iter()
        .any(|url| url.ends_with("/answers/5")));

    let checkpoint = store.get_checkpoint("islamqa").unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Error);
    assert_eq!(
        store.latest_run("islamqa").unwrap().unwrap().status,
        CheckpointStatus::Error
    );
}

/// Returns a fixed list of item pages for every listing
struct FixedDiscoverer {
    items: Vec<Url>,
}

impl Discoverer for FixedDiscoverer {
    fn discover(&self, _page: &Url, _body: &str) -> Discovery {
        Discovery {
            items: self.items.clone(),
            more: Vec::new(),
        }
    }
}

/// Denies every path under a prefix
struct DenyPrefix(&'static str);

#[async_trait]
impl RobotsCheck for DenyPrefix {
    async fn check(&self, url: &Url) -> RobotsVerdict {
        RobotsVerdict {
            allowed: !url.path().starts_with(self.0),
            crawl_delay: None,
        }
    }
}

#[tokio::test]
async fn test_plugged_in_discoverer_and_robots_check() {
    let server = MockServer::start().await;
    let uri = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow:"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/listing/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
        .expect(1)
        .mount(&server)
        .await;
    for (id, hits) in [(1u64, 1u64), (2, 1), (3, 0)] {
        Mock::given(method("GET"))
            .and(path(format!("/posts/{}/", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_page(id)))
            .expect(hits)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let toml = format!(
        r#"{engine}
[output]
database-path = '{db}'

[[source]]
name = "blog"
seeds = ['{uri}/listing/']
content-type = "article"
respect-robots = true

[source.discovery]
item-selector = "h2 a"
"#,
        engine = ENGINE,
        db = db_path(&dir).display(),
        uri = uri,
    );
    let config = parse_config(&toml).unwrap();

    let items = ["/posts/1/", "/posts/2/", "/posts/3/"]
        .iter()
        .map(|p| Url::parse(&format!("{}{}", uri, p)).unwrap())
        .collect();
    let summary = CrawlScheduler::from_config(config, "hash")
        .with_discoverer("blog", Arc::new(FixedDiscoverer { items }))
        .with_robots(Arc::new(DenyPrefix("/posts/3")))
        .run(CrawlRequest::new("blog"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.queued, 3);
    assert_eq!(summary.counters.accepted, 2);
    assert_eq!(summary.counters.skipped_robots, 1);
    server.verify().await;
}

#[tokio::test]
async fn test_auto_start_reports_identifiers_below_resume_point() {
    let server = MockServer::start().await;
    for id in 50..=55u64 {
        mount_page(&server, &format!("/answers/{}", id), answer_page(id)).await;
    }

    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 1, 100, "respect-robots = false");
    let scheduler = CrawlScheduler::from_config(config, "hash");

    let explicit = scheduler
        .run(
            CrawlRequest::new("islamqa").start_at(50).end_at(55),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(explicit.status, RunPhase::Completed);

    let plan = scheduler.plan(&CrawlRequest::new("islamqa")).unwrap();
    assert_eq!(plan.range, Some(56..=100));
    assert_eq!(plan.skipped_below, 49);

    let plan = scheduler
        .plan(&CrawlRequest::new("islamqa").start_at(1))
        .unwrap();
    assert_eq!(plan.skipped_below, 0);
    assert_eq!(plan.pending, Some(94));
}

#[tokio::test]
async fn test_robots_disallowed_pages_are_not_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /answers/2\n"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/answers/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(answer_page(2)))
        .expect(0)
        .mount(&server)
        .await;
    for id in [1, 3] {
        mount_page(&server, &format!("/answers/{}", id), answer_page(id)).await;
    }

    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 1, 3, "respect-robots = true");
    let summary = CrawlScheduler::from_config(config, "hash")
        .run(CrawlRequest::new("islamqa"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.counters.accepted, 2);
    assert_eq!(summary.counters.skipped_robots, 1);
    server.verify().await;

    // Denied URLs stay unvisited
    let store = open_store(&db_path(&dir));
    assert_eq!(store.load_visited("islamqa").unwrap().len(), 2);
}

#[tokio::test]
async fn test_absence_marker_counts_as_gap() {
    let server = MockServer::start().await;
    mount_page(&server, "/answers/1", answer_page(1)).await;
    mount_page(
        &server,
        "/answers/2",
        "<html><body><h1>Oops</h1><article>No answer found for this question number \
         please try another search on our site today</article></body></html>"
            .to_string(),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let config = numeric_config(
        &db_path(&dir),
        &server,
        1,
        2,
        "respect-robots = false\nabsence-markers = [\"No Answer Found\"]",
    );
    let summary = CrawlScheduler::from_config(config, "hash")
        .run(CrawlRequest::new("islamqa"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.counters.accepted, 1);
    assert_eq!(summary.counters.skipped_not_found, 1);
}

#[tokio::test]
async fn test_unknown_source_is_rejected() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 1, 2, "respect-robots = false");

    let result = CrawlScheduler::from_config(config, "hash")
        .run(CrawlRequest::new("missing"), CancellationToken::new())
        .await;
    assert!(matches!(result, Err(HarvestError::UnknownSource(_))));
}

#[tokio::test]
async fn test_dry_run_plan_does_not_write() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = numeric_config(&db_path(&dir), &server, 1, 10, "respect-robots = false");

    let plan = CrawlScheduler::from_config(config, "hash")
        .plan(&CrawlRequest::new("islamqa"))
        .unwrap();
    assert_eq!(plan.range, Some(1..=10));
    assert_eq!(plan.pending, Some(10));
    assert!(plan.checkpoint.is_none());

    let store = open_store(&db_path(&dir));
    assert!(store.latest_run("islamqa").unwrap().is_none());
}
