//! Article sink
//!
//! Accepted articles are keyed by incident; a `put` for a known incident
//! replaces the previous record whole only when its text is longer.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use intelfeed_core::RawArticle;

use crate::store::write_atomic;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Article sink I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt article file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize articles: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait ArticleSink: Send + Sync {
    /// Store an article, replacing a shorter record with the same incident key
    async fn put(&self, article: RawArticle) -> Result<(), SinkError>;

    async fn flush(&self) -> Result<(), SinkError>;

    /// All records, newest first
    async fn articles(&self) -> Result<Vec<RawArticle>, SinkError>;
}

/// Insert unless the incident already holds a text at least as long
fn keep_longer(records: &mut BTreeMap<String, RawArticle>, article: RawArticle) {
    match records.get(&article.incident_key) {
        Some(existing) if existing.text_len() >= article.text_len() => {
            debug!(
                "Kept longer record for {} ({} >= {} chars)",
                article.incident_key,
                existing.text_len(),
                article.text_len()
            );
        }
        _ => {
            records.insert(article.incident_key.clone(), article);
        }
    }
}

fn newest_first(records: &BTreeMap<String, RawArticle>) -> Vec<RawArticle> {
    let mut articles: Vec<RawArticle> = records.values().cloned().collect();
    articles.sort_by(|a, b| b.published.cmp(&a.published).then_with(|| a.id.cmp(&b.id)));
    articles
}

#[derive(Default)]
pub struct MemorySink {
    records: Mutex<BTreeMap<String, RawArticle>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArticleSink for MemorySink {
    async fn put(&self, article: RawArticle) -> Result<(), SinkError> {
        keep_longer(&mut self.records.lock(), article);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn articles(&self) -> Result<Vec<RawArticle>, SinkError> {
        Ok(newest_first(&self.records.lock()))
    }
}

/// `raw_articles.json`: a JSON array of records, rewritten on flush
pub struct JsonFileSink {
    path: PathBuf,
    records: Mutex<BTreeMap<String, RawArticle>>,
}

impl JsonFileSink {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let existing: Vec<RawArticle> = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|source| SinkError::Corrupt {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(SinkError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        debug!("Loaded {} articles from {}", existing.len(), path.display());
        let records = existing
            .into_iter()
            .map(|a| (a.incident_key.clone(), a))
            .collect();

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }
}

#[async_trait]
impl ArticleSink for JsonFileSink {
    async fn put(&self, article: RawArticle) -> Result<(), SinkError> {
        keep_longer(&mut self.records.lock(), article);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let json = serde_json::to_string_pretty(&newest_first(&self.records.lock()))?;
        write_atomic(&self.path, json.as_bytes())
            .await
            .map_err(|source| SinkError::Io {
                path: self.path.display().to_string(),
                source,
            })
    }

    async fn articles(&self) -> Result<Vec<RawArticle>, SinkError> {
        Ok(newest_first(&self.records.lock()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use intelfeed_core::{EntryState, SourceKind};

    fn article(id: &str, incident: &str, text: &str, hours_old: i64) -> RawArticle {
        RawArticle {
            id: id.to_string(),
            incident_key: incident.to_string(),
            title: format!("Story {}", id),
            source: "test".into(),
            source_kind: SourceKind::Feed,
            article_url: format!("https://news.test/{}", id),
            published: Utc::now() - Duration::hours(hours_old),
            fetched_at: Utc::now(),
            summary: String::new(),
            article_text: text.to_string(),
            nested_links: Vec::new(),
            cves: Vec::new(),
            status: EntryState::Accepted,
        }
    }

    #[tokio::test]
    async fn test_put_replaces_by_incident() {
        let sink = MemorySink::new();
        sink.put(article("a", "CVE-2024-1", "short", 2)).await.unwrap();
        sink.put(article("b", "CVE-2024-2", "other", 1)).await.unwrap();
        sink.put(article("c", "CVE-2024-1", "much longer text", 3)).await.unwrap();

        let articles = sink.articles().await.unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].id, "b");
        assert_eq!(articles[1].article_text, "much longer text");
    }

    #[tokio::test]
    async fn test_late_shorter_put_keeps_longer_record() {
        let sink = MemorySink::new();
        sink.put(article("long", "CVE-2024-1", "the much longer report", 1)).await.unwrap();
        sink.put(article("short", "CVE-2024-1", "brief", 1)).await.unwrap();
        sink.put(article("same", "CVE-2024-1", "equally long report!!!", 1)).await.unwrap();

        let articles = sink.articles().await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].id, "long");
    }

    #[tokio::test]
    async fn test_json_sink_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw_articles.json");

        let sink = JsonFileSink::open(&path).await.unwrap();
        sink.put(article("a", "k1", "text", 1)).await.unwrap();
        sink.flush().await.unwrap();

        let reopened = JsonFileSink::open(&path).await.unwrap();
        let articles = reopened.articles().await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].status, EntryState::Accepted);

        // Output records are bare article objects
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[0]["status"], "ACCEPTED");
        assert_eq!(raw[0]["incident_key"], "k1");
    }

    #[tokio::test]
    async fn test_corrupt_article_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw_articles.json");
        std::fs::write(&path, "[{]").unwrap();
        assert!(matches!(JsonFileSink::open(&path).await, Err(SinkError::Corrupt { .. })));
    }
}
