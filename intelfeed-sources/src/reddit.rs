//! Reddit listing adapter
//!
//! Reads `/r/{subreddit}/new.json` and keeps link posts that point off-site.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use intelfeed_core::{host_of, normalize_whitespace, truncate_chars, RawEntry, SourceKind};
use intelfeed_net::PageFetcher;

use crate::feed::MAX_SUMMARY_CHARS;
use crate::{SourceAdapter, SourceError, SourceLimits};

pub const DEFAULT_REDDIT_BASE: &str = "https://www.reddit.com";

/// Link hosts that are never articles
const BLOCKED_HOSTS: &[&str] = &[
    "reddit.com", "redd.it", "imgur.com", "youtube.com", "youtu.be", "gfycat.com", "streamable.com",
];

const BLOCKED_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".gifv", ".webp", ".mp4"];

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    selftext: String,
    created_utc: f64,
    #[serde(default)]
    is_self: bool,
}

pub struct RedditAdapter {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
}

impl RedditAdapter {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self::with_base(fetcher, DEFAULT_REDDIT_BASE)
    }

    pub fn with_base(fetcher: Arc<dyn PageFetcher>, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn listing_url(&self, subreddit: &str, limit: usize) -> String {
        let name = subreddit.trim().trim_start_matches("r/");
        format!(
            "{}/r/{}/new.json?limit={}",
            self.base_url,
            urlencoding::encode(name),
            limit.clamp(1, 100)
        )
    }
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Reddit
    }

    async fn fetch(
        &self,
        target: &str,
        limits: &SourceLimits,
    ) -> Result<Vec<RawEntry>, SourceError> {
        let url = self.listing_url(target, limits.per_source_cap);
        let page = self.fetcher.get(&url).await?;
        let entries = parse_listing(&page.body, target)?;
        Ok(limits.apply(entries))
    }
}

/// Parse a listing payload into entries
pub fn parse_listing(body: &str, subreddit: &str) -> Result<Vec<RawEntry>, SourceError> {
    let name = subreddit.trim().trim_start_matches("r/");
    let source = format!("Reddit:r/{}", name);
    let listing: Listing =
        serde_json::from_str(body).map_err(|e| SourceError::malformed(&source, e))?;

    let entries: Vec<RawEntry> = listing
        .data
        .children
        .into_iter()
        .filter_map(|child| {
            let post = child.data;
            if post.is_self {
                return None;
            }
            let link = post.url?;
            if !is_article_link(&link) {
                debug!("{} skipping non-article link {}", source, link);
                return None;
            }
            let published = DateTime::<Utc>::from_timestamp(post.created_utc as i64, 0)?;
            Some(RawEntry {
                title: normalize_whitespace(&post.title),
                link,
                summary: truncate_chars(&normalize_whitespace(&post.selftext), MAX_SUMMARY_CHARS)
                    .to_string(),
                published,
                source: source.clone(),
                source_kind: SourceKind::Reddit,
            })
        })
        .collect();

    Ok(entries)
}

fn is_article_link(link: &str) -> bool {
    let Some(host) = host_of(link) else {
        return false;
    };
    if BLOCKED_HOSTS
        .iter()
        .any(|b| host == *b || host.ends_with(&format!(".{}", b)))
    {
        return false;
    }
    let lowered = link.to_lowercase();
    let path = lowered.split(['?', '#']).next().unwrap_or_default();
    !BLOCKED_EXTENSIONS.iter().any(|e| path.ends_with(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelfeed_net::StaticFetcher;

    fn listing(now: i64) -> String {
        serde_json::json!({
            "kind": "Listing",
            "data": {
                "children": [
                    {"kind": "t3", "data": {
                        "title": "Exploit chain for   CVE-2024-1234",
                        "url": "https://research.test/chain",
                        "selftext": "",
                        "created_utc": now as f64,
                        "is_self": false
                    }},
                    {"kind": "t3", "data": {
                        "title": "Ask: which EDR?",
                        "url": "https://www.reddit.com/r/netsec/comments/abc/ask",
                        "selftext": "discussion",
                        "created_utc": now as f64,
                        "is_self": true
                    }},
                    {"kind": "t3", "data": {
                        "title": "screenshot",
                        "url": "https://i.redd.it/xyz.png",
                        "created_utc": now as f64
                    }},
                    {"kind": "t3", "data": {
                        "title": "video",
                        "url": "https://www.youtube.com/watch?v=1",
                        "created_utc": now as f64
                    }}
                ]
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_listing() {
        let entries = parse_listing(&listing(1_700_000_000), "netsec").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Exploit chain for CVE-2024-1234");
        assert_eq!(entries[0].source, "Reddit:r/netsec");
        assert_eq!(entries[0].published.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_malformed_listing() {
        assert!(matches!(
            parse_listing("{\"error\": 429}", "netsec"),
            Err(SourceError::Malformed { .. })
        ));
    }

    #[test]
    fn test_listing_url() {
        let adapter = RedditAdapter::with_base(Arc::new(StaticFetcher::new()), "http://mock.test/");
        assert_eq!(
            adapter.listing_url("r/netsec", 500),
            "http://mock.test/r/netsec/new.json?limit=100"
        );
    }

    #[tokio::test]
    async fn test_adapter_fetch() {
        let now = Utc::now().timestamp();
        let fetcher = StaticFetcher::new()
            .with_page("http://mock.test/r/netsec/new.json?limit=25", listing(now));
        let adapter = RedditAdapter::with_base(Arc::new(fetcher), "http://mock.test");

        let entries = adapter.fetch("netsec", &SourceLimits::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_kind, SourceKind::Reddit);
    }
}
