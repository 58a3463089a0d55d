//! Common traits for source adapters

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use intelfeed_core::{RawEntry, SourceKind};
use intelfeed_net::FetchError;

/// Errors from source adapters. Both degrade one source to an empty result.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Transient fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Malformed payload from {origin}: {reason}")]
    Malformed { origin: String, reason: String },
}

impl SourceError {
    pub fn malformed(origin: &str, reason: impl ToString) -> Self {
        SourceError::Malformed {
            origin: origin.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Per-source item cap and recency window
#[derive(Debug, Clone, Copy)]
pub struct SourceLimits {
    pub per_source_cap: usize,
    pub recency_days: i64,
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            per_source_cap: 25,
            recency_days: 7,
        }
    }
}

impl SourceLimits {
    pub fn is_recent(&self, published: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        published >= now - Duration::days(self.recency_days)
    }

    /// Drop stale entries, then keep the newest `per_source_cap`
    pub fn apply(&self, mut entries: Vec<RawEntry>) -> Vec<RawEntry> {
        let now = Utc::now();
        entries.retain(|e| self.is_recent(e.published, now));
        entries.sort_by(|a, b| b.published.cmp(&a.published));
        entries.truncate(self.per_source_cap);
        entries
    }
}

/// One adapter per source kind. `target` is a feed URL, subreddit or
/// channel name depending on the kind.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn fetch(
        &self,
        target: &str,
        limits: &SourceLimits,
    ) -> Result<Vec<RawEntry>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(days_old: i64) -> RawEntry {
        RawEntry {
            title: format!("{} days", days_old),
            link: format!("https://a.test/{}", days_old),
            summary: String::new(),
            published: Utc::now() - Duration::days(days_old),
            source: "test".into(),
            source_kind: SourceKind::Feed,
        }
    }

    #[test]
    fn test_limits_apply() {
        let limits = SourceLimits {
            per_source_cap: 2,
            recency_days: 5,
        };
        let kept = limits.apply(vec![entry(3), entry(10), entry(1), entry(2)]);
        let titles: Vec<&str> = kept.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["1 days", "2 days"]);
    }

    #[test]
    fn test_malformed_display() {
        let err = SourceError::malformed("https://feed.test", "not xml");
        assert_eq!(err.to_string(), "Malformed payload from https://feed.test: not xml");
    }
}
