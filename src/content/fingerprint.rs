//! Text normalization, content fingerprints and language detection

use sha2::{Digest, Sha256};

/// Returns true for zero-width and bidirectional control characters
///
/// Covers U+200B..=U+200F (zero-width space, joiners, LRM/RLM) and
/// U+202A..=U+202E (embedding and override controls).
fn is_invisible_control(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}')
}

/// Collapses every whitespace run to a single space and trims both ends
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalizes text for fingerprinting
///
/// Lowercases, removes zero-width/bidi control characters, collapses
/// whitespace runs to a single space and trims.
///
/// # Examples
///
/// ```
/// use corpus_harvest::content::normalize_text;
///
/// assert_eq!(normalize_text("  Hello\u{200B}\n\tWORLD "), "hello world");
/// ```
pub fn normalize_text(text: &str) -> String {
    let lowered: String = text
        .chars()
        .filter(|c| !is_invisible_control(*c))
        .flat_map(char::to_lowercase)
        .collect();
    collapse_whitespace(&lowered)
}

/// Computes the content fingerprint of a title/body pair
///
/// SHA-256 (lowercase hex) of `normalize_text(title + "\n" + body)`.
///
/// # Arguments
///
/// * `title` - Record title
/// * `body` - Record body
///
/// # Returns
///
/// A 64 character hex digest
pub fn content_fingerprint(title: &str, body: &str) -> String {
    let normalized = normalize_text(&format!("{}\n{}", title, body));
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_arabic(c: char) -> bool {
    matches!(c, '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}' | '\u{FB50}'..='\u{FDFF}' | '\u{FE70}'..='\u{FEFF}')
}

/// Detects the script mix of a text
///
/// Returns `"arabic"` when only Arabic-script letters occur, `"english"` when
/// only Latin letters occur, `"mixed"` when both do, and `None` when the text
/// carries no letters of either script.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let mut arabic = false;
    let mut latin = false;

    for c in text.chars() {
        if is_arabic(c) {
            arabic = true;
        } else if c.is_ascii_alphabetic() {
            latin = true;
        }
        if arabic && latin {
            return Some("mixed");
        }
    }

    match (arabic, latin) {
        (true, false) => Some("arabic"),
        (false, true) => Some("english"),
        _ => None,
    }
}
