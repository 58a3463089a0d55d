//! Telegram public channel adapter
//!
//! Reads the channel web preview (`/s/{channel}`), which needs no session.
//! Each message contributes one entry per outbound article link.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use intelfeed_core::{host_of, normalize_whitespace, truncate_chars, RawEntry, SourceKind};
use intelfeed_net::PageFetcher;

use crate::feed::MAX_SUMMARY_CHARS;
use crate::{SourceAdapter, SourceError, SourceLimits};

pub const DEFAULT_TELEGRAM_BASE: &str = "https://t.me";

const MAX_TITLE_CHARS: usize = 200;

const BLOCKED_HOSTS: &[&str] = &[
    "t.me", "telegram.me", "telegram.org", "youtube.com", "youtu.be", "reddit.com", "redd.it",
];

const BLOCKED_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".mp4", ".pdf", ".zip", ".exe", ".dmg",
];

static MESSAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".tgme_widget_message").unwrap());
static MESSAGE_TEXT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".tgme_widget_message_text").unwrap());
static MESSAGE_TIME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("time[datetime]").unwrap());
static LINKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static CHANNEL_INFO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".tgme_channel_info").unwrap());

static URL_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).unwrap());

pub struct TelegramAdapter {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
}

impl TelegramAdapter {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self::with_base(fetcher, DEFAULT_TELEGRAM_BASE)
    }

    pub fn with_base(fetcher: Arc<dyn PageFetcher>, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn preview_url(&self, channel: &str) -> String {
        format!(
            "{}/s/{}",
            self.base_url,
            urlencoding::encode(channel.trim().trim_start_matches('@'))
        )
    }
}

#[async_trait]
impl SourceAdapter for TelegramAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Telegram
    }

    async fn fetch(
        &self,
        target: &str,
        limits: &SourceLimits,
    ) -> Result<Vec<RawEntry>, SourceError> {
        let page = self.fetcher.get(&self.preview_url(target)).await?;
        let entries = parse_channel(&page.body, target)?;
        Ok(limits.apply(entries))
    }
}

/// Parse a channel preview page into entries
pub fn parse_channel(html: &str, channel: &str) -> Result<Vec<RawEntry>, SourceError> {
    let channel = channel.trim().trim_start_matches('@');
    let source = format!("Telegram:{}", channel);
    let document = Html::parse_document(html);

    let messages: Vec<_> = document.select(&MESSAGE).collect();
    if messages.is_empty() && document.select(&CHANNEL_INFO).next().is_none() {
        return Err(SourceError::malformed(&source, "not a channel preview page"));
    }

    let mut entries = Vec::new();

    for message in messages {
        let Some(body) = message.select(&MESSAGE_TEXT).next() else {
            continue;
        };
        let Some(published) = message
            .select(&MESSAGE_TIME)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc))
        else {
            debug!("{} message without timestamp skipped", source);
            continue;
        };

        let text = normalize_whitespace(&body.text().collect::<Vec<_>>().join(" "));
        let first_line = body
            .text()
            .map(str::trim)
            .find(|t| !t.is_empty())
            .unwrap_or_default();
        let title = truncate_chars(first_line, MAX_TITLE_CHARS).to_string();
        let summary = truncate_chars(&text, MAX_SUMMARY_CHARS).to_string();

        let hrefs = body.select(&LINKS).filter_map(|a| a.value().attr("href"));
        let inline = URL_IN_TEXT.find_iter(&text).map(|m| m.as_str());

        let mut seen = HashSet::new();
        for link in hrefs.chain(inline) {
            let link = link.trim_end_matches(['.', ',', ')', ';']);
            if !is_article_link(link) || !seen.insert(link.to_string()) {
                continue;
            }
            entries.push(RawEntry {
                title: title.clone(),
                link: link.to_string(),
                summary: summary.clone(),
                published,
                source: source.clone(),
                source_kind: SourceKind::Telegram,
            });
        }
    }

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
