//! Numeric URL templates
//!
//! A template such as `https://islamqa.info/en/answers/{id}` maps every
//! identifier of a numeric target space onto exactly one URL, and maps stored
//! URLs back onto identifiers when a checkpoint has to be rebuilt.

use crate::url::normalize_url;
use crate::UrlError;

const PLACEHOLDER: &str = "{id}";

/// A URL pattern with a single `{id}` placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    prefix: String,
    suffix: String,
}

impl UrlTemplate {
    /// Parses a template string
    ///
    /// The template must contain `{id}` exactly once and must render to a
    /// valid HTTP(S) URL. The rendered form is already normalized, so
    /// `render(id)` can be compared directly against visited URLs.
    ///
    /// # Examples
    ///
    /// ```
    /// use corpus_harvest::url::UrlTemplate;
    ///
    /// let template = UrlTemplate::parse("https://islamqa.info/en/answers/{id}").unwrap();
    /// assert_eq!(template.render(42), "https://islamqa.info/en/answers/42");
    /// assert_eq!(template.extract_id("https://islamqa.info/en/answers/42"), Some(42));
    /// ```
    pub fn parse(template: &str) -> Result<Self, UrlError> {
        let template = template.trim();
        if template.matches(PLACEHOLDER).count() != 1 {
            return Err(UrlError::Template(format!(
                "'{}' must contain {} exactly once",
                template, PLACEHOLDER
            )));
        }

        let (prefix, suffix) = template
            .split_once(PLACEHOLDER)
            .ok_or_else(|| UrlError::Template(template.to_string()))?;

        let parsed = Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        };

        // A template that does not survive normalization unchanged would
        // produce URLs that never match their own visited entries.
        let probe = parsed.render(1);
        let normalized = normalize_url(&probe)?;
        if normalized.as_str() != probe {
            return Err(UrlError::Template(format!(
                "'{}' is not in normalized form (renders as {})",
                template, normalized
            )));
        }

        Ok(parsed)
    }

    /// Renders the URL for one identifier
    pub fn render(&self, id: u64) -> String {
        format!("{}{}{}", self.prefix, id, self.suffix)
    }

    /// Recovers the identifier from a URL produced by this template
    ///
    /// Returns `None` for URLs that were not produced by the template.
    pub fn extract_id(&self, url: &str) -> Option<u64> {
        let digits = url.strip_prefix(&self.prefix)?.strip_suffix(&self.suffix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

impl std::fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.prefix, PLACEHOLDER, self.suffix)
    }
}
