//! Per-run state
//!
//! A `PipelineSession` owns everything one collection run shares: the
//! configuration, the rule table, the HTTP fetcher, the dedup store and the
//! article sink. Components receive it explicitly rather than reaching for
//! globals.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use intelfeed_core::RuleTable;
use intelfeed_net::{HttpFetcher, PageFetcher};

use crate::config::{DedupBackend, PipelineConfig};
use crate::pipeline::PipelineError;
use crate::sink::{ArticleSink, JsonFileSink, MemorySink};
use crate::store::{DedupStore, JsonFileDedupStore, MemoryDedupStore};

pub struct PipelineSession {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub config: PipelineConfig,
    pub rules: Arc<RuleTable>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub store: Arc<dyn DedupStore>,
    pub sink: Arc<dyn ArticleSink>,
}

impl PipelineSession {
    /// Build a session from configuration: load rules, build the HTTP
    /// client, and open the configured store and sink
    pub async fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        let rules = Arc::new(config.rule_table()?);
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(config.http.http_config())?);

        let growth = config.dedup.material_growth;
        let store: Arc<dyn DedupStore>;
        let sink: Arc<dyn ArticleSink>;
        match config.dedup.backend {
            DedupBackend::Memory => {
                store = Arc::new(MemoryDedupStore::new(growth));
                sink = Arc::new(MemorySink::new());
            }
            DedupBackend::Json => {
                store = Arc::new(JsonFileDedupStore::open(config.store_path(), growth).await?);
                sink = Arc::new(JsonFileSink::open(config.articles_path()).await?);
            }
        }

        Ok(Self::new(config, rules, fetcher, store, sink))
    }

    /// Assemble a session from prepared parts
    pub fn new(
        config: PipelineConfig,
        rules: Arc<RuleTable>,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn DedupStore>,
        sink: Arc<dyn ArticleSink>,
    ) -> Self {
        let run_id = Uuid::new_v4();
        info!("Session {} ready ({} sources configured)", run_id, config.source_count());
        Self {
            run_id,
            started_at: Utc::now(),
            config,
            rules,
            fetcher,
            store,
            sink,
        }
    }

    /// Overall run deadline, if configured
    pub fn deadline(&self) -> Option<Duration> {
        self.config
            .limits
            .run_deadline_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelfeed_core::KeyKind;

    #[tokio::test]
    async fn test_open_json_backend_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.workspace = dir.path().to_path_buf();

        let session = PipelineSession::open(config).await.unwrap();
        session.store.add("abc", KeyKind::Url).await.unwrap();
        session.store.flush().await.unwrap();
        session.sink.flush().await.unwrap();

        assert!(dir.path().join("dedup_store.json").exists());
        assert!(dir.path().join("raw_articles.json").exists());
    }

    #[tokio::test]
    async fn test_deadline() {
        let mut config = PipelineConfig::default();
        config.dedup.backend = DedupBackend::Memory;
        assert!(PipelineSession::open(config.clone()).await.unwrap().deadline().is_none());

        config.limits.run_deadline_secs = Some(30);
        let session = PipelineSession::open(config).await.unwrap();
        assert_eq!(session.deadline(), Some(Duration::from_secs(30)));
    }
}
