//! Entries, articles and the per-entry lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::canonical::{normalize_whitespace, truncate_chars};
use crate::identity::{article_id, content_fingerprint, incident_key, ArticleIdentity};

/// Kind of source an entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Feed,
    Reddit,
    Telegram,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Feed => write!(f, "feed"),
            SourceKind::Reddit => write!(f, "reddit"),
            SourceKind::Telegram => write!(f, "telegram"),
        }
    }
}

/// A normalized item from a source adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub title: String,
    /// Canonical article link
    pub link: String,
    pub summary: String,
    pub published: DateTime<Utc>,
    /// Source identifier, e.g. a feed title or `Reddit:r/netsec`
    pub source: String,
    pub source_kind: SourceKind,
}

impl RawEntry {
    /// Lower-cased title and summary, the text relevance rules run on
    pub fn relevance_text(&self) -> String {
        format!("{} {}", self.title, self.summary).to_lowercase()
    }
}

/// An in-content link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NestedLink {
    pub url: String,
    pub anchor_text: String,
}

/// Lifecycle of one entry through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum EntryState {
    Discovered,
    FilteredOut,
    Passed,
    FetchFailed,
    Fetched,
    Extracted,
    Duplicate,
    Accepted,
}

impl EntryState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition(self, next: EntryState) -> bool {
        use EntryState::*;
        matches!(
            (self, next),
            (Discovered, FilteredOut)
                | (Discovered, Passed)
                | (Passed, FetchFailed)
                | (Passed, Duplicate)
                | (Passed, Fetched)
                | (Fetched, Extracted)
                | (Fetched, FilteredOut)
                | (Extracted, Duplicate)
                | (Extracted, Accepted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EntryState::FilteredOut
                | EntryState::FetchFailed
                | EntryState::Duplicate
                | EntryState::Accepted
        )
    }

    pub const ALL: [EntryState; 8] = [
        EntryState::Discovered,
        EntryState::FilteredOut,
        EntryState::Passed,
        EntryState::FetchFailed,
        EntryState::Fetched,
        EntryState::Extracted,
        EntryState::Duplicate,
        EntryState::Accepted,
    ];
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryState::Discovered => "DISCOVERED",
            EntryState::FilteredOut => "FILTERED-OUT",
            EntryState::Passed => "PASSED",
            EntryState::FetchFailed => "FETCH-FAILED",
            EntryState::Fetched => "FETCHED",
            EntryState::Extracted => "EXTRACTED",
            EntryState::Duplicate => "DUPLICATE",
            EntryState::Accepted => "ACCEPTED",
        };
        write!(f, "{}", s)
    }
}

/// The persisted unit. Built once from an extracted page; merges replace
/// whole records rather than editing them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    pub id: String,
    pub incident_key: String,
    pub title: String,
    pub source: String,
    pub source_kind: SourceKind,
    pub article_url: String,
    pub published: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub summary: String,
    pub article_text: String,
    pub nested_links: Vec<NestedLink>,
    pub cves: Vec<String>,
    pub status: EntryState,
}

/// Inputs for building an article
pub struct ArticleParts<'a> {
    pub entry: &'a RawEntry,
    pub canonical_url: String,
    /// Page title, used when the entry has none
    pub page_title: Option<String>,
    pub text: String,
    pub nested_links: Vec<NestedLink>,
    pub cves: Vec<String>,
    pub summary_len: usize,
}

impl RawArticle {
    /// Build an article in the EXTRACTED state
    pub fn extracted(parts: ArticleParts<'_>) -> Self {
        let ArticleParts {
            entry,
            canonical_url,
            page_title,
            text,
            nested_links,
            mut cves,
            summary_len,
        } = parts;

        let title = match entry.title.trim() {
            "" => page_title.unwrap_or_default(),
            t => t.to_string(),
        };

        let summary_source = if entry.summary.trim().is_empty() {
            text.as_str()
        } else {
            entry.summary.as_str()
        };
        let summary =
            truncate_chars(&normalize_whitespace(summary_source), summary_len).to_string();

        cves.sort();
        cves.dedup();

        Self {
            id: article_id(&canonical_url),
            incident_key: incident_key(&cves, &title, &summary),
            title,
            source: entry.source.clone(),
            source_kind: entry.source_kind,
            article_url: canonical_url,
            published: entry.published,
            fetched_at: Utc::now(),
            summary,
            article_text: text,
            nested_links,
            cves,
            status: EntryState::Extracted,
        }
    }

    /// The accepted copy of this article
    pub fn accepted(self) -> Self {
        Self {
            status: EntryState::Accepted,
            ..self
        }
    }

    pub fn identity(&self) -> ArticleIdentity {
        ArticleIdentity {
            url_hash: self.id.clone(),
            incident_key: self.incident_key.clone(),
            content_fingerprint: content_fingerprint(&self.article_text),
        }
    }

    pub fn text_len(&self) -> usize {
        self.article_text.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, summary: &str) -> RawEntry {
        RawEntry {
            title: title.to_string(),
            link: "https://news.test/a".to_string(),
            summary: summary.to_string(),
            published: Utc::now(),
            source: "Test Feed".to_string(),
            source_kind: SourceKind::Feed,
        }
    }

    fn parts<'a>(entry: &'a RawEntry, text: &str, cves: Vec<String>) -> ArticleParts<'a> {
        ArticleParts {
            entry,
            canonical_url: "https://news.test/a".to_string(),
            page_title: Some("Page Title".to_string()),
            text: text.to_string(),
            nested_links: vec![],
            cves,
            summary_len: 20,
        }
    }

    #[test]
    fn test_state_transitions() {
        use EntryState::*;
        assert!(Discovered.can_transition(Passed));
        assert!(Fetched.can_transition(FilteredOut));
        assert!(Extracted.can_transition(Accepted));
        assert!(!Discovered.can_transition(Accepted));
        assert!(!Accepted.can_transition(Duplicate));
        assert!(Passed.can_transition(Duplicate));
        assert!(Duplicate.is_terminal());
        assert!(!Extracted.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(serde_json::to_string(&EntryState::FilteredOut).unwrap(), "\"FILTERED-OUT\"");
        assert_eq!(EntryState::FetchFailed.to_string(), "FETCH-FAILED");
    }

    #[test]
    fn test_extracted_article_keys() {
        let e = entry("Flaw in router", "Summary text that is long enough to be truncated");
        let article = RawArticle::extracted(parts(
            &e,
            "body",
            vec!["CVE-2024-0002".into(), "CVE-2024-0001".into(), "CVE-2024-0002".into()],
        ));

        assert_eq!(article.status, EntryState::Extracted);
        assert_eq!(article.cves, vec!["CVE-2024-0001", "CVE-2024-0002"]);
        assert_eq!(article.incident_key, "cve|CVE-2024-0001|CVE-2024-0002");
        assert_eq!(article.id, article_id("https://news.test/a"));
        assert_eq!(article.summary.chars().count(), 20);
    }

    #[test]
    fn test_page_title_and_text_summary_fallback() {
        let e = entry("  ", "");
        let article = RawArticle::extracted(parts(&e, "Extracted   body text", vec![]));
        assert_eq!(article.title, "Page Title");
        assert_eq!(article.summary, "Extracted body text");
        assert!(article.incident_key.starts_with("topic|"));
    }

    #[test]
    fn test_accepted_preserves_fields() {
        let e = entry("t", "s");
        let article = RawArticle::extracted(parts(&e, "body", vec![]));
        let id = article.id.clone();
        let accepted = article.accepted();
        assert_eq!(accepted.status, EntryState::Accepted);
        assert_eq!(accepted.id, id);
    }
}
