//! RSS / Atom / JSON feed adapter

use async_trait::async_trait;
use scraper::Html;
use std::sync::Arc;
use tracing::debug;

use intelfeed_core::{normalize_whitespace, truncate_chars, RawEntry, SourceKind};
use intelfeed_net::PageFetcher;

use crate::{SourceAdapter, SourceError, SourceLimits};

/// Maximum summary length kept from a feed entry
pub const MAX_SUMMARY_CHARS: usize = 1200;

pub struct FeedAdapter {
    fetcher: Arc<dyn PageFetcher>,
}

impl FeedAdapter {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    async fn fetch(
        &self,
        target: &str,
        limits: &SourceLimits,
    ) -> Result<Vec<RawEntry>, SourceError> {
        let page = self.fetcher.get(target).await?;
        let entries = parse_feed(&page.body, target)?;
        Ok(limits.apply(entries))
    }
}

/// Parse a feed document into entries. Entries without a link or a date
/// are skipped.
pub fn parse_feed(body: &str, feed_url: &str) -> Result<Vec<RawEntry>, SourceError> {
    let feed = feed_rs::parser::parse(body.as_bytes())
        .map_err(|e| SourceError::malformed(feed_url, e))?;

    let source = feed
        .title
        .map(|t| html_to_text(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| feed_url.to_string());

    let mut entries = Vec::new();

    for entry in feed.entries {
        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()));
        let Some(link) = link else {
            debug!("Feed {} entry without link skipped", feed_url);
            continue;
        };

        let Some(published) = entry.published.or(entry.updated) else {
            debug!("Feed {} entry {} has no date", feed_url, link);
            continue;
        };

        let title = entry
            .title
            .map(|t| html_to_text(&t.content))
            .unwrap_or_default();

        let summary_html = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();
        let summary = truncate_chars(&html_to_text(&summary_html), MAX_SUMMARY_CHARS).to_string();

        entries.push(RawEntry {
            title,
            link,
            summary,
            published,
            source: source.clone(),
            source_kind: SourceKind::Feed,
        });
    }

    debug!("Feed {} yielded {} entries", feed_url, entries.len());
    Ok(entries)
}

/// Strip markup from a feed text field
pub fn html_to_text(html: &str) -> String {
    if !html.contains('<') {
        return normalize_whitespace(html);
    }
    let fragment = Html::parse_fragment(html);
    normalize_whitespace(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use intelfeed_net::StaticFetcher;

    fn rss(items: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <rss version="2.0"><channel>
              <title>Security Wire</title>
              <link>https://wire.test/</link>
              <description>news</description>
              {}
            </channel></rss>"#,
            items
        )
    }

    fn item(title: &str, link: &str, pub_date: &str) -> String {
        format!(
            "<item><title>{}</title><link>{}</link><description>&lt;p&gt;Attackers &lt;b&gt;exploited&lt;/b&gt; the flaw.&lt;/p&gt;</description><pubDate>{}</pubDate></item>",
            title, link, pub_date
        )
    }

    #[test]
    fn test_parse_rss() {
        let body = rss(&format!(
            "{}{}",
            item("Router flaw", "https://wire.test/a", "Mon, 01 Jan 2024 10:00:00 GMT"),
            "<item><title>No date</title><link>https://wire.test/b</link></item>"
        ));
        let entries = parse_feed(&body, "https://wire.test/feed").unwrap();

        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.title, "Router flaw");
        assert_eq!(e.link, "https://wire.test/a");
        assert_eq!(e.summary, "Attackers exploited the flaw.");
        assert_eq!(e.source, "Security Wire");
        assert_eq!(e.source_kind, SourceKind::Feed);
    }

    #[test]
    fn test_parse_atom() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
            <feed xmlns="http://www.w3.org/2005/Atom">
              <title>Vendor PSIRT</title>
              <id>urn:psirt</id>
              <updated>2024-03-01T00:00:00Z</updated>
              <entry>
                <title>Advisory 42</title>
                <id>https://psirt.test/42</id>
                <updated>2024-03-01T00:00:00Z</updated>
                <summary>Patch now</summary>
              </entry>
            </feed>"#;
        let entries = parse_feed(body, "https://psirt.test/atom").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link, "https://psirt.test/42");
        assert_eq!(entries[0].summary, "Patch now");
    }

    #[test]
    fn test_malformed_feed() {
        assert!(matches!(
            parse_feed("this is not a feed", "https://x.test/feed"),
            Err(SourceError::Malformed { .. })
        ));
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(html_to_text("plain   text"), "plain text");
        assert_eq!(html_to_text("<p>a <i>b</i></p><p>c</p>"), "a b c");
    }

    #[tokio::test]
    async fn test_adapter_applies_limits() {
        let now = Utc::now();
        let fresh = (now - Duration::hours(1)).to_rfc2822();
        let stale = (now - Duration::days(30)).to_rfc2822();
        let body = rss(&format!(
            "{}{}",
            item("Fresh", "https://wire.test/fresh", &fresh),
            item("Stale", "https://wire.test/stale", &stale)
        ));
        let fetcher = Arc::new(StaticFetcher::new().with_page("https://wire.test/feed", body));
        let adapter = FeedAdapter::new(fetcher);

        let entries = adapter
            .fetch("https://wire.test/feed", &SourceLimits::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Fresh");
    }

    #[tokio::test]
    async fn test_adapter_transport_error() {
        let adapter = FeedAdapter::new(Arc::new(StaticFetcher::new()));
        let result = adapter.fetch("https://gone.test/feed", &SourceLimits::default()).await;
        assert!(matches!(result, Err(SourceError::Fetch(_))));
    }
}
