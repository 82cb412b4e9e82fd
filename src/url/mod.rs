//! URL handling module for Corpus-Harvest
//!
//! This module provides URL normalization, per-host keys for politeness
//! bookkeeping, and the numeric URL templates that map an identifier space
//! onto fetchable URLs.

mod normalize;
mod template;

pub use normalize::normalize_url;
pub use template::UrlTemplate;

use url::Url;

/// Returns the key used to group requests by host
///
/// The key is the lowercase host, plus the port when one is explicitly set,
/// so two services on the same machine are throttled independently.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use corpus_harvest::url::host_key;
///
/// let url = Url::parse("https://Example.com/path").unwrap();
/// assert_eq!(host_key(&url), "example.com");
///
/// let url = Url::parse("http://127.0.0.1:8080/x").unwrap();
/// assert_eq!(host_key(&url), "127.0.0.1:8080");
/// ```
pub fn host_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}
