//! Main-content extraction
//!
//! A readability-style pass scores paragraph containers and keeps the best
//! one together with related siblings. When that yields too little text the
//! known content-container selectors are tried instead.

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

use intelfeed_core::{normalize_whitespace, truncate_chars};

/// Subtrees whose text never counts as content
const EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "aside", "noscript", "form", "header",
];

/// Paragraphs shorter than this are not scored
const MIN_PARAGRAPH_CHARS: usize = 25;

static PARAGRAPHS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p, pre, td").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

static POSITIVE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)article|body|content|entry|main|page|post|text|blog|story").unwrap()
});

static NEGATIVE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)comment|meta|footer|footnote|sidebar|sponsor|share|social|nav|menu|promo|related|widget|advert|banner|cookie",
    )
    .unwrap()
});

/// Extraction tunables
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub min_chars: usize,
    pub max_chars: usize,
    pub fallback_selectors: Vec<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            min_chars: intelfeed_core::MIN_ARTICLE_CHARS,
            max_chars: intelfeed_core::MAX_ARTICLE_CHARS,
            fallback_selectors: default_fallback_selectors(),
        }
    }
}

pub fn default_fallback_selectors() -> Vec<String> {
    ["article", "main", "div.post", "div.entry-content"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Isolated main content of a page
#[derive(Debug, Clone, PartialEq)]
pub struct MainContent {
    pub title: Option<String>,
    /// Collapsed, truncated text
    pub text: String,
    /// The isolated content fragment as HTML
    pub html: String,
}

/// Extract the main content of a page, `None` when nothing reaches the
/// minimum length
pub fn extract_main_content(html: &str, opts: &ExtractOptions) -> Option<MainContent> {
    let document = Html::parse_document(html);
    let title = page_title(&document);
    let long_enough = |text: &str| text.chars().count() >= opts.min_chars;

    let mut best = readability(&document);

    if !best.as_ref().is_some_and(|(text, _)| long_enough(text)) {
        debug!("Readability pass too short, trying fallback selectors");
        for raw in &opts.fallback_selectors {
            let selector = match Selector::parse(raw) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Invalid fallback selector '{}': {:?}", raw, e);
                    continue;
                }
            };
            let candidate = document
                .select(&selector)
                .map(|el| (collect_text(el), el.html()))
                .max_by_key(|(text, _)| text.len());
            if let Some(candidate) = candidate.filter(|(text, _)| long_enough(text)) {
                best = Some(candidate);
                break;
            }
        }
    }

    let (text, html) = best.filter(|(text, _)| long_enough(text))?;

    Some(MainContent {
        title,
        text: truncate_chars(&text, opts.max_chars).to_string(),
        html,
    })
}

/// Whole-page visible text, truncated
pub fn page_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let text = collect_text(document.root_element());
    truncate_chars(&text, max_chars).to_string()
}

/// `og:title`, else `<title>`
fn page_title(document: &Html) -> Option<String> {
    let og = document
        .select(&OG_TITLE)
        .find_map(|el| el.value().attr("content"))
        .map(normalize_whitespace)
        .filter(|t| !t.is_empty());

    og.or_else(|| {
        document
            .select(&TITLE)
            .next()
            .map(|el| normalize_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    })
}

/// Score containers by the paragraphs they hold and return the text and HTML
/// of the winner plus qualifying siblings
fn readability(document: &Html) -> Option<(String, String)> {
    let mut scores = HashMap::new();

    for p in document.select(&PARAGRAPHS) {
        if in_excluded(p) {
            continue;
        }
        let text = collect_text(p);
        let len = text.chars().count();
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }
        let score = 1.0 + text.matches(',').count() as f64 + (len / 100).min(3) as f64;

        let Some(parent) = p.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        *scores.entry(parent.id()).or_insert_with(|| base_weight(parent)) += score;

        if let Some(grand) = parent.parent().and_then(ElementRef::wrap) {
            *scores.entry(grand.id()).or_insert_with(|| base_weight(grand)) += score / 2.0;
        }
    }

    let mut ranked: Vec<(ElementRef<'_>, f64)> = scores
        .iter()
        .filter_map(|(id, score)| {
            let el = document.tree.get(*id).and_then(ElementRef::wrap)?;
            Some((el, score * (1.0 - link_density(el))))
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let (top, top_score) = ranked.first().copied()?;

    let threshold = (top_score * 0.2).max(10.0);
    let siblings: Vec<ElementRef<'_>> = match top.parent() {
        Some(parent) => parent.children().filter_map(ElementRef::wrap).collect(),
        None => vec![top],
    };

    let mut texts = Vec::new();
    let mut fragments = Vec::new();
    for sibling in siblings {
        let keep = if sibling.id() == top.id() {
            true
        } else if scores.get(&sibling.id()).is_some_and(|s| *s >= threshold) {
            true
        } else if sibling.value().name() == "p" {
            let text = collect_text(sibling);
            text.chars().count() > 80 && link_density(sibling) < 0.25
        } else {
            false
        };
        if keep {
            let text = collect_text(sibling);
            if !text.is_empty() {
                texts.push(text);
                fragments.push(sibling.html());
            }
        }
    }

    Some((normalize_whitespace(&texts.join(" ")), fragments.concat()))
}

fn base_weight(el: ElementRef<'_>) -> f64 {
    let tag_weight = match el.value().name() {
        "div" | "article" | "section" => 5.0,
        "blockquote" | "pre" | "td" => 3.0,
        "form" | "ul" | "ol" | "dl" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    };

    let hints = format!(
        "{} {}",
        el.value().attr("class").unwrap_or_default(),
        el.value().attr("id").unwrap_or_default()
    );
    let mut class_weight = 0.0;
    if NEGATIVE_HINT.is_match(&hints) {
        class_weight -= 25.0;
    }
    if POSITIVE_HINT.is_match(&hints) {
        class_weight += 25.0;
    }

    tag_weight + class_weight
}

/// Share of an element's text that sits inside links
fn link_density(el: ElementRef<'_>) -> f64 {
    let total = collect_text(el).chars().count();
    if total == 0 {
        return 0.0;
    }
    let linked: usize = el
        .select(&ANCHORS)
        .map(|a| collect_text(a).chars().count())
        .sum();
    (linked as f64 / total as f64).min(1.0)
}

fn is_excluded_tag(node: &Node) -> bool {
    node.as_element()
        .is_some_and(|el| EXCLUDED_TAGS.contains(&el.name()))
}

fn in_excluded(el: ElementRef<'_>) -> bool {
    el.ancestors().any(|a| is_excluded_tag(a.value()))
}

/// Visible text under `root`, skipping excluded subtrees
fn collect_text(root: ElementRef<'_>) -> String {
    let mut parts = Vec::new();

    for node in root.descendants() {
        if let Node::Text(text) = node.value() {
            let excluded = node
                .ancestors()
                .take_while(|a| a.id() != root.id())
                .any(|a| is_excluded_tag(a.value()));
            if !excluded {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed);
                }
            }
        }
    }

    normalize_whitespace(&parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTENCE: &str = "The vulnerability allows remote attackers to execute code, and the vendor has issued a patch for affected builds. ";

    fn article_page(paragraphs: usize) -> String {
        let body: String = (0..paragraphs)
            .map(|i| format!("<p>{} Paragraph {}.</p>", SENTENCE, i))
            .collect();
        format!(
            r#"<html><head><title>Plain Title</title>
            <meta property="og:title" content="Router flaw exploited">
            <script>var tracking = 1;</script></head>
            <body>
              <nav><ul><li><a href="/">Home</a></li><li><a href="/news">News</a></li></ul></nav>
              <div class="article-body">{}</div>
              <aside class="sidebar"><p>Subscribe to our newsletter for weekly updates and offers from partners.</p></aside>
              <footer><p>Copyright notice with plenty of boilerplate text in the footer.</p></footer>
            </body></html>"#,
            body
        )
    }

    #[test]
    fn test_extracts_article_body() {
        let content = extract_main_content(&article_page(10), &ExtractOptions::default()).unwrap();

        assert_eq!(content.title.as_deref(), Some("Router flaw exploited"));
        assert!(content.text.contains("Paragraph 0."));
        assert!(content.text.contains("Paragraph 9."));
        assert!(!content.text.contains("newsletter"));
        assert!(!content.text.contains("Copyright"));
        assert!(!content.text.contains("tracking"));
        assert!(content.html.contains("article-body"));
        assert!(content.text.chars().count() >= 800);
    }

    #[test]
    fn test_truncates_to_max() {
        let opts = ExtractOptions {
            max_chars: 900,
            ..Default::default()
        };
        let content = extract_main_content(&article_page(20), &opts).unwrap();
        assert_eq!(content.text.chars().count(), 900);
    }

    #[test]
    fn test_short_page_is_no_content() {
        assert!(extract_main_content(&article_page(2), &ExtractOptions::default()).is_none());
    }

    #[test]
    fn test_fallback_selector() {
        // Content split into short fragments defeats paragraph scoring
        let spans: String = (0..60)
            .map(|i| format!("<span>security update item {} for affected systems</span> ", i))
            .collect();
        let html = format!(
            "<html><head><title>Bulletin</title></head><body><main>{}</main></body></html>",
            spans
        );
        let content = extract_main_content(&html, &ExtractOptions::default()).unwrap();
        assert_eq!(content.title.as_deref(), Some("Bulletin"));
        assert!(content.text.contains("item 59"));
        assert!(content.html.starts_with("<main>"));
    }

    #[test]
    fn test_page_text() {
        let html =
            "<html><body><script>x()</script><p>Hash  e3b0c442</p><footer>f</footer></body></html>";
        assert_eq!(page_text(html, 100), "Hash e3b0c442");
        assert_eq!(page_text(html, 4), "Hash");
    }
}
