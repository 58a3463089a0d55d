//! Nested link extraction
//!
//! Only anchors inside running text of the isolated content count; menus,
//! tag clouds and share buttons are filtered by parent tag, path and scope.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

use intelfeed_core::{
    contains_cve_id, host_of, normalize_whitespace, truncate_chars, KeywordCategory, NestedLink,
    RuleTable,
};

/// Parents an anchor must sit directly under
const INLINE_PARENTS: &[&str] = &["p", "li", "blockquote", "h1", "h2", "h3", "h4"];

const BLOCKED_PATH_PREFIXES: &[&str] =
    &["/tag/", "/author/", "/category/", "/newsletter", "/gsearch"];

const BLOCKED_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".mp4", ".mp3", ".pdf", ".zip", ".exe",
    ".dmg",
];

const MIN_ANCHOR_CHARS: usize = 2;
const MAX_ANCHOR_CHARS: usize = 300;

static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Which hosts nested links may point to. The deny list always wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkScope {
    pub same_host: bool,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Default for LinkScope {
    fn default() -> Self {
        Self {
            same_host: true,
            allow: vec![
                "nvd.nist.gov".to_string(),
                "cve.org".to_string(),
                "cve.mitre.org".to_string(),
            ],
            deny: Vec::new(),
        }
    }
}

impl LinkScope {
    pub fn permits(&self, host: &str, article_host: &str) -> bool {
        if self.deny.iter().any(|d| domain_matches(host, d)) {
            return false;
        }
        (self.same_host && host == article_host)
            || self.allow.iter().any(|a| domain_matches(host, a))
    }
}

fn domain_matches(host: &str, pattern: &str) -> bool {
    let pattern = pattern.trim().trim_start_matches('.').to_lowercase();
    host == pattern || host.ends_with(&format!(".{}", pattern))
}

/// Extract in-content links from an isolated HTML fragment, in document order
pub fn extract_nested_links(
    fragment_html: &str,
    article_url: &str,
    scope: &LinkScope,
    max_links: usize,
) -> Vec<NestedLink> {
    let Ok(mut base) = Url::parse(article_url) else {
        return Vec::new();
    };
    base.set_fragment(None);
    let Some(article_host) = host_of(article_url) else {
        return Vec::new();
    };

    let fragment = Html::parse_fragment(fragment_html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in fragment.select(&ANCHORS) {
        if links.len() >= max_links {
            break;
        }

        let parent_ok = anchor
            .parent()
            .and_then(ElementRef::wrap)
            .is_some_and(|p| INLINE_PARENTS.contains(&p.value().name()));
        if !parent_ok {
            continue;
        }

        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(mut url) = base.join(href.trim()) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        url.set_fragment(None);

        let Some(host) = host_of(url.as_str()) else {
            continue;
        };
        if !scope.permits(&host, &article_host) {
            continue;
        }

        let path = url.path().to_lowercase();
        if BLOCKED_PATH_PREFIXES.iter().any(|p| path.starts_with(p))
            || BLOCKED_EXTENSIONS.iter().any(|e| path.ends_with(e))
        {
            continue;
        }

        if url == base || !seen.insert(url.to_string()) {
            continue;
        }

        let anchor_text = normalize_whitespace(&anchor.text().collect::<String>());
        if anchor_text.chars().count() < MIN_ANCHOR_CHARS {
            continue;
        }

        links.push(NestedLink {
            url: url.to_string(),
            anchor_text: truncate_chars(&anchor_text, MAX_ANCHOR_CHARS).to_string(),
        });
    }

    links
}

/// Anchor-signal score of a link
pub fn anchor_score(link: &NestedLink, rules: &RuleTable) -> f64 {
    let anchor = link.anchor_text.to_lowercase();
    rules
        .matches(KeywordCategory::AnchorSignal, &anchor)
        .map(|r| r.weight)
        .sum()
}

/// Order links by anchor-signal score, keeping document order on ties
pub fn rank_links(links: &[NestedLink], rules: &RuleTable) -> Vec<NestedLink> {
    let mut scored: Vec<(f64, &NestedLink)> =
        links.iter().map(|l| (anchor_score(l, rules), l)).collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, l)| l.clone()).collect()
}

/// Coarse destination class of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkClass {
    Cve,
    Github,
    Vendor,
    Other,
}

const CVE_HOSTS: &[&str] = &["nvd.nist.gov", "cve.org", "cve.mitre.org"];
const VENDOR_MARKERS: &[&str] = &["advisor", "security", "psirt", "bulletin", "msrc", "vulnerab"];

pub fn classify_link(url: &str) -> LinkClass {
    let Some(host) = host_of(url) else {
        return LinkClass::Other;
    };
    if CVE_HOSTS.iter().any(|h| domain_matches(&host, h)) || contains_cve_id(url) {
        return LinkClass::Cve;
    }
    if domain_matches(&host, "github.com") {
        return LinkClass::Github;
    }
    let lowered = url.to_lowercase();
    if VENDOR_MARKERS.iter().any(|m| lowered.contains(m)) {
        return LinkClass::Vendor;
    }
    LinkClass::Other
}
