//! CVE identifier extraction
//!
//! An identifier only counts when security vocabulary appears near it, which
//! keeps template text and unrelated numbering out of incident keys.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::{KeywordCategory, RuleTable};

/// Characters inspected on each side of a match
pub const CONTEXT_WINDOW: usize = 120;

static CVE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bCVE-(?:19|20)\d{2}-\d{4,7}\b").unwrap()
});

/// Extract context-validated CVE identifiers, uppercased, unique and sorted
pub fn extract_cves(text: &str, rules: &RuleTable) -> Vec<String> {
    let mut found = BTreeSet::new();

    for m in CVE_REGEX.find_iter(text) {
        let window = context_window(text, m.start(), m.end(), CONTEXT_WINDOW).to_lowercase();
        if rules.mentions(KeywordCategory::SecurityContext, &window) {
            found.insert(m.as_str().to_uppercase());
        }
    }

    found.into_iter().collect()
}

/// Whether text mentions anything shaped like a CVE id, context or not
pub fn contains_cve_id(text: &str) -> bool {
    CVE_REGEX.is_match(text)
}

/// Slice of `text` spanning `radius` characters either side of a byte range
pub fn context_window(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let from = if radius == 0 {
        start
    } else {
        text[..start]
            .char_indices()
            .rev()
            .nth(radius - 1)
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let to = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    &text[from..to]
}
