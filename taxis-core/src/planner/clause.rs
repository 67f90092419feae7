//! Splitting an utterance into clauses

use once_cell::sync::Lazy;
use regex::Regex;

static CONJUNCTION_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\s*;\s*|\s+(?:and\s+then|after\s+that|then|and)\s+|^\s*(?:then|after\s+that)\s+").ok()
});

/// Split on `;`, `and`, `then`, `after that` and `and then`
///
/// Clauses are trimmed (including trailing commas); empty clauses are
/// dropped.
pub fn split_clauses(text: &str) -> Vec<String> {
    let pieces: Vec<&str> = match CONJUNCTION_RE.as_ref() {
        Some(re) => re.split(text).collect(),
        None => vec![text],
    };
    pieces
        .into_iter()
        .map(|p| p.trim().trim_matches(',').trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
