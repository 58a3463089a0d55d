//! Indicator harvester
//!
//! Extracts indicators from article text. When the article itself has none,
//! nested links that look like IOC material are fetched through a
//! cancellable task group; the first page yielding anything wins and every
//! other fetch is cancelled.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use intelfeed_core::{
    extract_cves, extract_indicators, IndicatorMode, IndicatorSet, KeywordCategory, NestedLink,
    RuleTable,
};
use intelfeed_net::{classify_link, page_text, LinkClass, PageFetcher};

/// Harvester tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestOptions {
    pub mode: IndicatorMode,
    /// Fallback fetches in flight at once
    pub fallback_concurrency: usize,
    pub max_fallback_links: usize,
    /// Characters of nested page text inspected
    pub nested_text_limit: usize,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            mode: IndicatorMode::All,
            fallback_concurrency: 1,
            max_fallback_links: 5,
            nested_text_limit: 5000,
        }
    }
}

/// Where a harvest's indicators came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestSource {
    Article,
    NestedLink(String),
    Nothing,
}

#[derive(Debug, Clone)]
pub struct Harvest {
    pub indicators: IndicatorSet,
    pub source: HarvestSource,
    /// Fallback fetches issued
    pub fetches: usize,
}

pub struct IndicatorHarvester {
    fetcher: Arc<dyn PageFetcher>,
    rules: Arc<RuleTable>,
    opts: HarvestOptions,
}

impl IndicatorHarvester {
    pub fn new(fetcher: Arc<dyn PageFetcher>, rules: Arc<RuleTable>, opts: HarvestOptions) -> Self {
        Self { fetcher, rules, opts }
    }

    /// Nested links whose URL or anchor suggests indicator material
    pub fn fallback_candidates(&self, links: &[NestedLink]) -> Vec<NestedLink> {
        links
            .iter()
            .filter(|link| {
                let url = link.url.to_lowercase();
                let haystack = format!("{} {}", url, link.anchor_text.to_lowercase());
                self.rules.mentions(KeywordCategory::IocLink, &haystack)
                    || self.rules.ioc_paths().iter().any(|p| url.contains(p.as_str()))
            })
            .take(self.opts.max_fallback_links)
            .cloned()
            .collect()
    }

    pub async fn harvest(&self, text: &str, links: &[NestedLink]) -> Harvest {
        let primary = extract_indicators(text, &self.rules, self.opts.mode);
        if !primary.is_empty() {
            return Harvest {
                indicators: primary,
                source: HarvestSource::Article,
                fetches: 0,
            };
        }

        let candidates = self.fallback_candidates(links);
        if candidates.is_empty() {
            return Harvest {
                indicators: IndicatorSet::default(),
                source: HarvestSource::Nothing,
                fetches: 0,
            };
        }

        debug!("No article indicators, trying {} nested links", candidates.len());
        self.fallback(candidates).await
    }

    async fn fallback(&self, candidates: Vec<NestedLink>) -> Harvest {
        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut pending = candidates.into_iter();
        let window = self.opts.fallback_concurrency.max(1);
        let mut fetches = 0;

        for link in pending.by_ref().take(window) {
            self.spawn_fetch(&mut tasks, &token, link);
            fetches += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some((url, indicators))) if !indicators.is_empty() => {
                    token.cancel();
                    tasks.abort_all();
                    info!("Fallback found {} indicators at {}", indicators.len(), url);
                    return Harvest {
                        indicators,
                        source: HarvestSource::NestedLink(url),
                        fetches,
                    };
                }
                Ok(_) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!("Fallback task failed: {}", e),
            }

            if let Some(link) = pending.next() {
                self.spawn_fetch(&mut tasks, &token, link);
                fetches += 1;
            }
        }

        Harvest {
            indicators: IndicatorSet::default(),
            source: HarvestSource::Nothing,
            fetches,
        }
    }

    fn spawn_fetch(
        &self,
        tasks: &mut JoinSet<Option<(String, IndicatorSet)>>,
        token: &CancellationToken,
        link: NestedLink,
    ) {
        let fetcher = Arc::clone(&self.fetcher);
        let rules = Arc::clone(&self.rules);
        let token = token.clone();
        let mode = self.opts.mode;
        let limit = self.opts.nested_text_limit;

        tasks.spawn(async move {
            let url = link.url.clone();
            tokio::select! {
                _ = token.cancelled() => None,
                result = fetcher.get(&url) => match result {
                    Ok(page) => {
                        let text = page_text(&page.body, limit);
                        Some((link.url, extract_indicators(&text, &rules, mode)))
                    }
                    Err(e) => {
                        debug!("Fallback fetch of {} failed: {}", link.url, e);
                        None
                    }
                },
            }
        });
    }
}

/// Fetch CVE and vendor links one at a time and return the context-validated
/// CVEs found on them
pub async fn harvest_nested_cves(
    fetcher: &dyn PageFetcher,
    rules: &RuleTable,
    links: &[NestedLink],
    text_limit: usize,
) -> Vec<String> {
    let mut found = Vec::new();

    for link in links {
        if !matches!(classify_link(&link.url), LinkClass::Cve | LinkClass::Vendor) {
            continue;
        }
        match fetcher.get(&link.url).await {
            Ok(page) => {
                let text = page_text(&page.body, text_limit);
                found.extend(extract_cves(&text, rules));
            }
            Err(e) => debug!("Nested CVE fetch of {} failed: {}", link.url, e),
        }
    }

    found.sort();
    found.dedup();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use intelfeed_core::IndicatorType;
    use intelfeed_net::{FetchError, FetchedPage, StaticFetcher};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn rules() -> Arc<RuleTable> {
        Arc::new(RuleTable::embedded().unwrap())
    }

    fn link(url: &str, anchor: &str) -> NestedLink {
        NestedLink {
            url: url.to_string(),
            anchor_text: anchor.to_string(),
        }
    }

    fn page(body: &str) -> String {
        format!("<html><body><p>{}</p></body></html>", body)
    }

    #[tokio::test]
    async fn test_primary_indicators_skip_fallback() {
        let fetcher = Arc::new(StaticFetcher::new());
        let harvester =
            IndicatorHarvester::new(fetcher.clone(), rules(), HarvestOptions::default());

        let harvest = harvester
            .harvest("beacon to 45.77.12.9", &[link("https://a.test/iocs", "IOC list")])
            .await;

        assert_eq!(harvest.source, HarvestSource::Article);
        assert_eq!(harvest.indicators.values(IndicatorType::Ipv4), vec!["45.77.12.9"]);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_stops_at_first_hit() {
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with_page("https://a.test/ioc-1", page("nothing to see here"))
                .with_page("https://a.test/ioc-2", page("C2 server 198.51.100.23 observed"))
                .with_page("https://a.test/ioc-3", page("hash d41d8cd98f00b204e9800998ecf8427e")),
        );
        let harvester =
            IndicatorHarvester::new(fetcher.clone(), rules(), HarvestOptions::default());
        let links = vec![
            link("https://a.test/ioc-1", "indicators part 1"),
            link("https://a.test/ioc-2", "indicators part 2"),
            link("https://a.test/ioc-3", "indicators part 3"),
        ];

        let harvest = harvester.harvest("no indicators in this text", &links).await;

        assert_eq!(harvest.source, HarvestSource::NestedLink("https://a.test/ioc-2".into()));
        assert_eq!(harvest.indicators.values(IndicatorType::Ipv4), vec!["198.51.100.23"]);
        assert_eq!(harvest.fetches, 2);
        assert_eq!(fetcher.calls(), 2);
        assert!(!fetcher.requested().contains(&"https://a.test/ioc-3".to_string()));
    }

    /// Sets its flag when dropped
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Static pages, except one URL that never answers
    struct StallingFetcher {
        inner: StaticFetcher,
        stalled_url: String,
        released: Arc<AtomicBool>,
        completed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PageFetcher for StallingFetcher {
        async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
            if url == self.stalled_url {
                let _released = DropFlag(Arc::clone(&self.released));
                tokio::time::sleep(Duration::from_secs(30)).await;
                self.completed.store(true, Ordering::SeqCst);
                return Err(FetchError::Timeout(30));
            }
            self.inner.get(url).await
        }
    }

    #[tokio::test]
    async fn test_stalled_fetch_cancelled_after_hit() {
        let released = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicBool::new(false));
        let fetcher = Arc::new(StallingFetcher {
            inner: StaticFetcher::new()
                .with_page("https://a.test/ioc-1", page("nothing"))
                .with_page("https://a.test/ioc-2", page("C2 server 198.51.100.23")),
            stalled_url: "https://a.test/ioc-3".into(),
            released: Arc::clone(&released),
            completed: Arc::clone(&completed),
        });
        let opts = HarvestOptions {
            fallback_concurrency: 3,
            ..Default::default()
        };
        let harvester = IndicatorHarvester::new(fetcher, rules(), opts);
        let links = vec![
            link("https://a.test/ioc-1", "iocs"),
            link("https://a.test/ioc-2", "iocs"),
            link("https://a.test/ioc-3", "iocs"),
        ];

        let harvest = tokio::time::timeout(
            Duration::from_secs(5),
            harvester.harvest("plain text", &links),
        )
        .await
        .expect("harvest waited on the stalled fetch");

        assert_eq!(harvest.source, HarvestSource::NestedLink("https://a.test/ioc-2".into()));
        assert_eq!(harvest.fetches, 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(released.load(Ordering::SeqCst));
        assert!(!completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_fallback_empty_when_nothing_yields() {
        let fetcher = Arc::new(StaticFetcher::new());
        let harvester =
            IndicatorHarvester::new(fetcher.clone(), rules(), HarvestOptions::default());
        let links = vec![
            link("https://a.test/download/1", "file"),
            link("https://a.test/about", "about us"),
        ];

        let harvest = harvester.harvest("plain text", &links).await;
        assert_eq!(harvest.source, HarvestSource::Nothing);
        assert!(harvest.indicators.is_empty());
        // Only the /download link is a candidate
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_fallback_candidates_capped() {
        let harvester = IndicatorHarvester::new(
            Arc::new(StaticFetcher::new()),
            rules(),
            HarvestOptions {
                max_fallback_links: 2,
                ..Default::default()
            },
        );
        let links: Vec<NestedLink> = (0..4)
            .map(|i| link(&format!("https://a.test/malware-sample-{}", i), "sample"))
            .collect();
        assert_eq!(harvester.fallback_candidates(&links).len(), 2);
    }

    #[tokio::test]
    async fn test_harvest_nested_cves() {
        let fetcher = StaticFetcher::new()
            .with_page(
                "https://nvd.nist.gov/vuln/detail/CVE-2024-0002",
                page("CVE-2024-0002 remote code execution vulnerability"),
            )
            .with_page("https://news.test/other", page("CVE-2024-0009 vulnerability"));
        let links = vec![
            link("https://nvd.nist.gov/vuln/detail/CVE-2024-0002", "NVD"),
            link("https://news.test/other", "related story"),
        ];

        let cves = harvest_nested_cves(&fetcher, &rules(), &links, 5000).await;
        assert_eq!(cves, vec!["CVE-2024-0002"]);
        assert_eq!(fetcher.calls(), 1);
    }
}
