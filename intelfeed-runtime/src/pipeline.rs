//! Pipeline orchestrator
//!
//! One run:
//! 1. Every configured source is read concurrently; a failing source is
//!    logged and skipped
//! 2. Entry links are canonicalized and the relevance filter picks the batch
//! 3. Each passed entry is fetched, extracted and offered to the dedup store
//!    on a bounded worker pool
//! 4. The store and the article sink are flushed
//!
//! Per-entry failures end that entry only. Store and sink failures abort the run.
//! The admit-and-put step of an entry runs on its own task, so an entry
//! abandoned at the deadline still finishes a commit it has started.

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use intelfeed_core::{
    article_id, canonicalize_url, extract_cves, ArticleParts, EntryState, IndicatorSet, KeyKind,
    RawArticle, RawEntry,
};
use intelfeed_net::{
    ensure_min_length, extract_main_content, extract_nested_links, rank_links, ExtractOptions,
    FetchError,
};
use intelfeed_sources::{
    harvest_nested_cves, passes_content_gate, FeedAdapter, IndicatorHarvester, RedditAdapter,
    RelevanceFilter, ScoredEntry, SourceAdapter, TelegramAdapter,
};

use crate::config::ConfigError;
use crate::session::PipelineSession;
use crate::sink::{ArticleSink, SinkError};
use crate::store::{Admission, DedupStore, StoreError};

/// Run-fatal errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Dedup store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Article sink failure: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Client(#[from] FetchError),

    #[error("Commit of {0} ended without a result")]
    CommitLost(String),
}

/// One source to read during a run
#[derive(Clone)]
pub struct SourceJob {
    pub adapter: Arc<dyn SourceAdapter>,
    pub target: String,
}

impl SourceJob {
    pub fn new(adapter: Arc<dyn SourceAdapter>, target: impl Into<String>) -> Self {
        Self {
            adapter,
            target: target.into(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.adapter.kind(), self.target)
    }
}

/// An article accepted in this run
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedArticle {
    pub article: RawArticle,
    pub score: f64,
    pub indicators: IndicatorSet,
    /// Replaced a shorter record of the same incident
    pub replaced: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub sources_ok: usize,
    pub sources_failed: usize,
    /// Entries discovered after canonicalization
    pub discovered: usize,
    pub filtered_out: usize,
    pub fetch_failed: usize,
    pub duplicates: usize,
    pub accepted: Vec<AcceptedArticle>,
    /// Entries left unfinished at the deadline
    pub abandoned: usize,
    pub deadline_hit: bool,
}

impl RunReport {
    /// Number of entries that ended in `state`
    pub fn count(&self, state: EntryState) -> usize {
        match state {
            EntryState::Discovered => self.discovered,
            EntryState::FilteredOut => self.filtered_out,
            EntryState::FetchFailed => self.fetch_failed,
            EntryState::Duplicate => self.duplicates,
            EntryState::Accepted => self.accepted.len(),
            EntryState::Passed | EntryState::Fetched | EntryState::Extracted => 0,
        }
    }

    fn record(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::FilteredOut => self.filtered_out += 1,
            EntryOutcome::FetchFailed => self.fetch_failed += 1,
            EntryOutcome::Duplicate(kind) => {
                debug!("Duplicate by {} key", kind);
                self.duplicates += 1;
            }
            EntryOutcome::Accepted(accepted) => self.accepted.push(*accepted),
        }
    }
}

/// Terminal state of one entry
enum EntryOutcome {
    FilteredOut,
    FetchFailed,
    Duplicate(KeyKind),
    Accepted(Box<AcceptedArticle>),
}

pub struct Pipeline {
    session: PipelineSession,
    jobs: Vec<SourceJob>,
    filter: RelevanceFilter,
    harvester: IndicatorHarvester,
    extract: ExtractOptions,
    commits: Mutex<JoinSet<()>>,
}

impl Pipeline {
    /// Pipeline over the sources named in the session's configuration
    pub fn new(session: PipelineSession) -> Self {
        let jobs = default_jobs(&session);
        Self::with_jobs(session, jobs)
    }

    pub fn with_jobs(session: PipelineSession, jobs: Vec<SourceJob>) -> Self {
        let config = &session.config;
        let filter = RelevanceFilter::new(config.relevance.policy, Arc::clone(&session.rules));
        let harvester = IndicatorHarvester::new(
            Arc::clone(&session.fetcher),
            Arc::clone(&session.rules),
            config.indicators.harvest.clone(),
        );
        let extract = config.extraction.extract_options();

        Self {
            session,
            jobs,
            filter,
            harvester,
            extract,
            commits: Mutex::new(JoinSet::new()),
        }
    }

    pub fn session(&self) -> &PipelineSession {
        &self.session
    }

    /// Execute one collection run
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let mut report = RunReport {
            run_id: self.session.run_id.to_string(),
            ..Default::default()
        };

        info!("Run {} starting with {} sources", report.run_id, self.jobs.len());

        let entries = self.collect(&mut report).await;
        report.discovered = entries.len();

        let (passed, rejected) = self.filter.select(entries);
        report.filtered_out += rejected.len();
        info!(
            "Relevance filter: {} passed, {} filtered out",
            passed.len(),
            rejected.len()
        );

        let selected = passed.len();
        let workers = self.session.config.limits.max_workers.min(selected).max(1);
        let deadline = self
            .session
            .deadline()
            .map(|d| tokio::time::Instant::now() + d);

        let work = stream::iter(passed)
            .map(|scored| self.process(scored))
            .buffer_unordered(workers);
        let mut work = std::pin::pin!(work);
        let mut finished = 0;

        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, work.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let unfinished = selected - finished;
                        warn!("Run deadline reached with {} entries unfinished", unfinished);
                        report.deadline_hit = true;
                        break;
                    }
                },
                None => work.next().await,
            };
            let Some(outcome) = next else {
                break;
            };

            let outcome =
                outcome.inspect_err(|e| error!("Run {} aborted: {}", report.run_id, e))?;
            report.record(outcome);
            finished += 1;
        }
        report.abandoned = selected - finished;
        self.drain_commits().await;

        self.session.store.flush().await?;
        self.session.sink.flush().await?;

        info!(
            "Run {} complete: {} accepted, {} duplicates, {} fetch failures, {} filtered out",
            report.run_id,
            report.accepted.len(),
            report.duplicates,
            report.fetch_failed,
            report.filtered_out
        );

        Ok(report)
    }

    /// Read every source, canonicalize links and drop in-batch repeats
    async fn collect(&self, report: &mut RunReport) -> Vec<RawEntry> {
        let limits = self.session.config.limits.source_limits();
        let workers = self.session.config.limits.max_workers.max(1);

        let results: Vec<_> = stream::iter(self.jobs.iter().cloned())
            .map(|job| async move {
                let result = job.adapter.fetch(&job.target, &limits).await;
                (job.label(), result)
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for (label, result) in results {
            match result {
                Ok(batch) => {
                    report.sources_ok += 1;
                    debug!("Source {} yielded {} entries", label, batch.len());
                    for mut entry in batch {
                        match canonicalize_url(&entry.link, &self.session.rules) {
                            Ok(canonical) => entry.link = canonical,
                            Err(e) => {
                                debug!("Dropping entry from {}: {}", label, e);
                                continue;
                            }
                        }
                        if seen.insert(entry.link.clone()) {
                            entries.push(entry);
                        }
                    }
                }
                Err(e) => {
                    report.sources_failed += 1;
                    warn!("Source {} failed: {}", label, e);
                }
            }
        }

        entries
    }

    /// Carry one passed entry to a terminal state
    async fn process(&self, scored: ScoredEntry) -> Result<EntryOutcome, PipelineError> {
        let ScoredEntry { entry, score } = scored;
        let session = &self.session;
        let config = &session.config;
        let url = entry.link.as_str();

        if session.store.exists(&article_id(url), KeyKind::Url).await? {
            debug!("[dedup] {} already stored", url);
            return Ok(EntryOutcome::Duplicate(KeyKind::Url));
        }

        let page = match session
            .fetcher
            .get(url)
            .await
            .and_then(|page| ensure_min_length(page, config.http.min_body_bytes))
        {
            Ok(page) => page,
            Err(e) => {
                warn!("[fetch] {}: {}", url, e);
                return Ok(EntryOutcome::FetchFailed);
            }
        };

        let Some(content) = extract_main_content(&page.body, &self.extract) else {
            info!("[extract] {}: content below {} chars", url, config.extraction.min_chars);
            return Ok(EntryOutcome::FilteredOut);
        };

        if !passes_content_gate(
            &content.text,
            &session.rules,
            config.relevance.content_min_security_terms,
        ) {
            info!("[content-gate] {}: no security context", url);
            return Ok(EntryOutcome::FilteredOut);
        }

        let mut cves = extract_cves(&content.text, &session.rules);
        let nested_links =
            extract_nested_links(&content.html, url, &config.links.scope, config.links.max_links);

        if config.links.harvest_nested_cves {
            let nested_cves = harvest_nested_cves(
                session.fetcher.as_ref(),
                &session.rules,
                &nested_links,
                config.indicators.harvest.nested_text_limit,
            )
            .await;
            cves.extend(nested_cves);
        }

        let indicators = if config.indicators.enabled {
            let ranked = rank_links(&nested_links, &session.rules);
            self.harvester.harvest(&content.text, &ranked).await.indicators
        } else {
            IndicatorSet::default()
        };

        let article = RawArticle::extracted(ArticleParts {
            entry: &entry,
            canonical_url: entry.link.clone(),
            page_title: content.title,
            text: content.text,
            nested_links,
            cves,
            summary_len: config.extraction.summary_chars,
        });

        let article = article.accepted();
        let admission = self
            .spawn_commit(article.clone())
            .await
            .map_err(|_| PipelineError::CommitLost(article.article_url.clone()))??;

        let replaced = match admission {
            Admission::Duplicate(kind) => {
                info!("[dedup] {}: duplicate {} key", url, kind);
                return Ok(EntryOutcome::Duplicate(kind));
            }
            Admission::Replaced { previous_len } => {
                info!(
                    "[dedup] {}: replaces incident {} ({} -> {} chars)",
                    url,
                    article.incident_key,
                    previous_len,
                    article.text_len()
                );
                true
            }
            Admission::Admitted => false,
        };
        info!("[accept] {} ({})", article.title, article.incident_key);

        Ok(EntryOutcome::Accepted(Box::new(AcceptedArticle {
            article,
            score,
            indicators,
            replaced,
        })))
    }
}

impl Pipeline {
    /// Admit and store one article on a detached task
    fn spawn_commit(
        &self,
        article: RawArticle,
    ) -> oneshot::Receiver<Result<Admission, PipelineError>> {
        let store = Arc::clone(&self.session.store);
        let sink = Arc::clone(&self.session.sink);
        let (tx, rx) = oneshot::channel();

        self.commits.lock().spawn(async move {
            let url = article.article_url.clone();
            let result = commit(store.as_ref(), sink.as_ref(), article).await;
            if let Err(result) = tx.send(result) {
                match result {
                    Ok(admission) => info!("[commit] {}: {:?} after abandonment", url, admission),
                    Err(e) => error!("[commit] {}: failed after abandonment: {}", url, e),
                }
            }
        });
        rx
    }

    /// Wait for every commit still in flight
    async fn drain_commits(&self) {
        let mut commits = std::mem::take(&mut *self.commits.lock());
        while let Some(joined) = commits.join_next().await {
            if let Err(e) = joined {
                error!("Commit task failed: {}", e);
            }
        }
    }
}

/// Check-and-insert in the store, then hand the article to the sink
async fn commit(
    store: &dyn DedupStore,
    sink: &dyn ArticleSink,
    article: RawArticle,
) -> Result<Admission, PipelineError> {
    let admission = store.admit(&article.identity(), article.text_len()).await?;
    if !matches!(admission, Admission::Duplicate(_)) {
        sink.put(article).await?;
    }
    Ok(admission)
}

/// Source jobs for every feed, subreddit and channel in the configuration
pub fn default_jobs(session: &PipelineSession) -> Vec<SourceJob> {
    let sources = &session.config.sources;
    let fetcher = &session.fetcher;

    let feed: Arc<dyn SourceAdapter> = Arc::new(FeedAdapter::new(Arc::clone(fetcher)));
    let reddit: Arc<dyn SourceAdapter> = Arc::new(RedditAdapter::with_base(
        Arc::clone(fetcher),
        &sources.reddit_base,
    ));
    let telegram: Arc<dyn SourceAdapter> = Arc::new(TelegramAdapter::with_base(
        Arc::clone(fetcher),
        &sources.telegram_base,
    ));

    let mut jobs = Vec::new();
    jobs.extend(sources.feeds.iter().map(|t| SourceJob::new(Arc::clone(&feed), t)));
    jobs.extend(sources.subreddits.iter().map(|t| SourceJob::new(Arc::clone(&reddit), t)));
    jobs.extend(sources.channels.iter().map(|t| SourceJob::new(Arc::clone(&telegram), t)));
    jobs
}
