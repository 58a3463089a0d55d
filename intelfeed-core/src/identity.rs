//! Incident identity
//!
//! Three independent identities per article: the URL hash, the incident key
//! grouping every report of one event, and a fingerprint of the text itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::canonical::{normalize_whitespace, sha256_hex, truncate_chars};

/// Characters of normalized title + summary hashed into a topic key
pub const TOPIC_KEY_CHARS: usize = 500;

/// Which dedup membership set a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Url,
    Incident,
    Content,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Url => write!(f, "url"),
            KeyKind::Incident => write!(f, "incident"),
            KeyKind::Content => write!(f, "content"),
        }
    }
}

/// All dedup keys of one candidate article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleIdentity {
    pub url_hash: String,
    pub incident_key: String,
    pub content_fingerprint: String,
}

impl ArticleIdentity {
    pub fn key(&self, kind: KeyKind) -> &str {
        match kind {
            KeyKind::Url => &self.url_hash,
            KeyKind::Incident => &self.incident_key,
            KeyKind::Content => &self.content_fingerprint,
        }
    }
}

/// Article id: SHA-256 of the canonical URL
pub fn article_id(canonical_url: &str) -> String {
    sha256_hex(canonical_url)
}

/// Incident key from a CVE set when one exists, else from the topic text
pub fn incident_key(cves: &[String], title: &str, summary: &str) -> String {
    cve_key(cves).unwrap_or_else(|| topic_key(title, summary))
}

/// `cve|` key over the sorted, unique, uppercased CVE set
pub fn cve_key(cves: &[String]) -> Option<String> {
    let set: BTreeSet<String> = cves
        .iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect();
    if set.is_empty() {
        return None;
    }
    Some(format!("cve|{}", set.into_iter().collect::<Vec<_>>().join("|")))
}

/// `topic|` key over normalized title and summary
pub fn topic_key(title: &str, summary: &str) -> String {
    format!("topic|{}", sha256_hex(&normalize_topic(title, summary)))
}

pub fn normalize_topic(title: &str, summary: &str) -> String {
    let blob: String = format!("{} {}", title, summary)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    truncate_chars(&normalize_whitespace(&blob), TOPIC_KEY_CHARS).to_string()
}

/// SHA-256 of the lower-cased, whitespace-collapsed text
pub fn content_fingerprint(text: &str) -> String {
    sha256_hex(&normalize_whitespace(&text.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cve_key_order_independent() {
        let a = incident_key(&["CVE-2024-0001".into(), "CVE-2024-0002".into()], "a", "b");
        let b = incident_key(&["CVE-2024-0002".into(), "cve-2024-0001".into()], "c", "d");
        assert_eq!(a, b);
        assert_eq!(a, "cve|CVE-2024-0001|CVE-2024-0002");
    }

    #[test]
    fn test_cve_key_dedups() {
        let key = cve_key(&["CVE-2024-0001".into(), "CVE-2024-0001".into()]);
        assert_eq!(key.as_deref(), Some("cve|CVE-2024-0001"));
        assert_eq!(cve_key(&[]), None);
    }

    #[test]
    fn test_topic_key_normalization() {
        let a = topic_key("Ransomware hits   Hospital!", "Systems offline.");
        let b = topic_key("ransomware hits hospital", "systems: offline");
        assert_eq!(a, b);
        assert!(a.starts_with("topic|"));
        assert_ne!(a, topic_key("Ransomware hits school", "Systems offline."));
    }

    #[test]
    fn test_topic_key_truncates() {
        let long = "word ".repeat(400);
        assert_eq!(normalize_topic(&long, "").chars().count(), TOPIC_KEY_CHARS);
        assert_eq!(topic_key(&long, "tail one"), topic_key(&long, "tail two"));
    }

    #[test]
    fn test_content_fingerprint_whitespace_and_case() {
        assert_eq!(content_fingerprint("Hello\n  World"), content_fingerprint("hello world"));
        assert_ne!(content_fingerprint("hello world"), content_fingerprint("hello there"));
    }

    #[test]
    fn test_article_id_is_url_hash() {
        assert_eq!(article_id("https://a.com/x"), article_id("https://a.com/x"));
        assert_eq!(article_id("https://a.com/x").len(), 64);
    }
}
