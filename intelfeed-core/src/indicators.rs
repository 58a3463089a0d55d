//! Indicator of compromise extraction
//!
//! Text goes through four steps:
//! - deobfuscation of defanged notation (`1.2.3[.]4`, `hxxp://`)
//! - typed pattern matching (IPs, domains, URLs, hashes, emails, wallets)
//! - validation and noise suppression driven by the rule table
//! - overlap resolution so a host is not reported both bare and inside a URL

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;
use url::Url;

use crate::cve::context_window;
use crate::{KeywordCategory, RuleTable};

/// Types of indicators the extractor emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorType {
    Ipv4,
    Ipv6,
    Domain,
    Url,
    Md5,
    Sha1,
    Sha256,
    Email,
    CryptoAddress,
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndicatorType::Ipv4 => "ipv4",
            IndicatorType::Ipv6 => "ipv6",
            IndicatorType::Domain => "domain",
            IndicatorType::Url => "url",
            IndicatorType::Md5 => "md5",
            IndicatorType::Sha1 => "sha1",
            IndicatorType::Sha256 => "sha256",
            IndicatorType::Email => "email",
            IndicatorType::CryptoAddress => "crypto",
        };
        write!(f, "{}", s)
    }
}

/// A typed indicator value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Indicator {
    #[serde(rename = "type")]
    pub indicator_type: IndicatorType,
    pub value: String,
    /// Whether a suspicion heuristic fired for this value
    #[serde(default)]
    pub suspicious: bool,
}

/// Which domains and URLs survive validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorMode {
    /// Everything that passes the noise filters
    #[default]
    All,
    /// Only domains and URLs flagged by the suspicion heuristics
    SuspiciousOnly,
}

/// Deduplicated, sorted indicators from one piece of text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    indicators: Vec<Indicator>,
}

impl IndicatorSet {
    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Indicator> {
        self.indicators.iter()
    }

    /// Values of one indicator type
    pub fn values(&self, indicator_type: IndicatorType) -> Vec<&str> {
        self.indicators
            .iter()
            .filter(|i| i.indicator_type == indicator_type)
            .map(|i| i.value.as_str())
            .collect()
    }

    pub fn get(&self, indicator_type: IndicatorType, value: &str) -> Option<&Indicator> {
        self.indicators
            .iter()
            .find(|i| i.indicator_type == indicator_type && i.value == value)
    }

    /// Values grouped by type
    pub fn grouped(&self) -> BTreeMap<IndicatorType, Vec<String>> {
        let mut out: BTreeMap<IndicatorType, Vec<String>> = BTreeMap::new();
        for i in &self.indicators {
            out.entry(i.indicator_type).or_default().push(i.value.clone());
        }
        out
    }

    pub fn into_vec(self) -> Vec<Indicator> {
        self.indicators
    }
}

static OBFUSCATED_DOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*\.\s*\]|\(\s*\.\s*\)|\{\s*\.\s*\}|\[dot\]|\(dot\)").unwrap()
});

static OBFUSCATED_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bh(?:xx|\*\*)p(s?)\b").unwrap()
});

static OBFUSCATED_AT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*@\s*\]|\(\s*@\s*\)|\[at\]|\(at\)").unwrap()
});

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhttps?://[^\s<>"'`]+"#).unwrap()
});

static IPV4_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b((?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d))(?::\d{1,5})?\b",
    )
    .unwrap()
});

static IPV6_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[^0-9a-z:])((?:[0-9a-f]{0,4}:){2,7}[0-9a-f]{0,4})").unwrap()
});

static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,24}\b").unwrap()
});

static HASH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[0-9a-fA-F]{64}|[0-9a-fA-F]{40}|[0-9a-fA-F]{32})\b").unwrap()
});

static LONG_HEX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{32,}").unwrap()
});

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@((?:[a-z0-9-]+\.)+[a-z]{2,24})\b").unwrap()
});

static BTC_LEGACY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[13][a-km-zA-HJ-NP-Z1-9]{25,34}\b").unwrap()
});

static BTC_BECH32_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bbc1[ac-hj-np-z02-9]{11,71}\b").unwrap()
});

static ETH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b0x[a-fA-F0-9]{40}\b").unwrap()
});

/// Reverse common defanging notations
pub fn deobfuscate(text: &str) -> String {
    let text = text.replace("[://]", "://").replace("[:]", ":");
    let text = OBFUSCATED_DOT.replace_all(&text, ".");
    let text = OBFUSCATED_SCHEME.replace_all(&text, "http$1");
    OBFUSCATED_AT.replace_all(&text, "@").into_owned()
}

/// Collects indicators keyed by (type, value)
#[derive(Default)]
struct Collector {
    found: HashMap<(IndicatorType, String), bool>,
}

impl Collector {
    fn add(&mut self, indicator_type: IndicatorType, value: String, suspicious: bool) {
        let entry = self.found.entry((indicator_type, value)).or_insert(false);
        *entry |= suspicious;
    }

    fn urls(&self) -> Vec<String> {
        self.found
            .keys()
            .filter(|(t, _)| *t == IndicatorType::Url)
            .map(|(_, v)| v.to_lowercase())
            .collect()
    }

    fn finish(self) -> IndicatorSet {
        let mut indicators: Vec<Indicator> = self
            .found
            .into_iter()
            .map(|((indicator_type, value), suspicious)| Indicator {
                indicator_type,
                value,
                suspicious,
            })
            .collect();
        indicators.sort();
        IndicatorSet { indicators }
    }
}

/// Extract validated indicators from free text
pub fn extract_indicators(text: &str, rules: &RuleTable, mode: IndicatorMode) -> IndicatorSet {
    let text = deobfuscate(text);
    let mut collector = Collector::default();

    for m in URL_REGEX.find_iter(&text) {
        let url = trim_url(m.as_str());
        if let Some(flagged) = assess_url(url, rules, mode) {
            collector.add(IndicatorType::Url, url.to_string(), flagged);
        }
    }

    for caps in IPV4_REGEX.captures_iter(&text) {
        let Some(ip_match) = caps.get(1) else { continue };
        if !is_standalone_ipv4(&text, ip_match.start(), ip_match.end()) {
            continue;
        }
        if let Ok(ip) = ip_match.as_str().parse::<Ipv4Addr>() {
            if is_public_ipv4(ip) {
                collector.add(IndicatorType::Ipv4, ip.to_string(), false);
            }
        }
    }

    for caps in IPV6_REGEX.captures_iter(&text) {
        let Some(candidate) = caps.get(1).map(|m| m.as_str()) else { continue };
        let groups = candidate.split(':').filter(|g| !g.is_empty()).count();
        if groups < 3 {
            continue;
        }
        if let Ok(ip) = candidate.parse::<Ipv6Addr>() {
            if is_public_ipv6(ip) {
                collector.add(IndicatorType::Ipv6, ip.to_string(), false);
            }
        }
    }

    for m in HASH_REGEX.find_iter(&text) {
        let value = m.as_str().to_lowercase();
        if is_degenerate_hex(&value) {
            continue;
        }
        let hash_type = match value.len() {
            32 => IndicatorType::Md5,
            40 => IndicatorType::Sha1,
            _ => IndicatorType::Sha256,
        };
        collector.add(hash_type, value, false);
    }

    for caps in EMAIL_REGEX.captures_iter(&text) {
        let (Some(full), Some(domain)) = (caps.get(0), caps.get(1)) else { continue };
        let domain = domain.as_str().to_lowercase();
        if rules.is_benign_domain(&domain) {
            continue;
        }
        if is_suspicious_domain(&domain, rules) {
            collector.add(IndicatorType::Email, full.as_str().to_lowercase(), true);
        }
    }

    extract_crypto(&text, rules, &mut collector);

    for m in DOMAIN_REGEX.find_iter(&text) {
        let domain = m.as_str().to_lowercase();
        if let Some(suspicious) = assess_domain(&domain, rules, mode) {
            collector.add(IndicatorType::Domain, domain, suspicious);
        }
    }

    resolve_overlaps(&mut collector);
    collector.finish()
}

fn extract_crypto(text: &str, rules: &RuleTable, collector: &mut Collector) {
    let in_payment_context = |start: usize, end: usize| {
        let window = context_window(text, start, end, crate::cve::CONTEXT_WINDOW).to_lowercase();
        rules.mentions(KeywordCategory::CryptoContext, &window)
    };

    for m in BTC_LEGACY_REGEX.find_iter(text) {
        if is_valid_base58check(m.as_str()) && in_payment_context(m.start(), m.end()) {
            collector.add(IndicatorType::CryptoAddress, m.as_str().to_string(), true);
        }
    }
    for m in BTC_BECH32_REGEX.find_iter(text) {
        if in_payment_context(m.start(), m.end()) {
            collector.add(IndicatorType::CryptoAddress, m.as_str().to_string(), true);
        }
    }
    for m in ETH_REGEX.find_iter(text) {
        let body = &m.as_str()[2..];
        if !is_degenerate_hex(body) && in_payment_context(m.start(), m.end()) {
            collector.add(IndicatorType::CryptoAddress, m.as_str().to_lowercase(), true);
        }
    }
}

/// Drop hosts already reported as part of a URL
fn resolve_overlaps(collector: &mut Collector) {
    let urls = collector.urls();
    if urls.is_empty() {
        return;
    }
    collector.found.retain(|(t, value), _| match t {
        IndicatorType::Ipv4 | IndicatorType::Ipv6 | IndicatorType::Domain => {
            let needle = value.to_lowercase();
            !urls.iter().any(|u| u.contains(&needle))
        }
        _ => true,
    });
}

fn trim_url(raw: &str) -> &str {
    raw.trim_end_matches(|c: char| {
        matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | ']' | '}' | '\'' | '"')
    })
}

/// `Some(flagged)` when the URL is kept
fn assess_url(url: &str, rules: &RuleTable, mode: IndicatorMode) -> Option<bool> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let path = parsed.path();

    if rules.has_executable_extension(path) || LONG_HEX_REGEX.is_match(url) {
        return Some(true);
    }
    if mode == IndicatorMode::SuspiciousOnly || rules.is_benign_domain(host) {
        return None;
    }

    // Shallow pages are references, not delivery points
    let depth = path.split('/').filter(|s| !s.is_empty()).count();
    (depth >= 2).then_some(false)
}

/// `Some(suspicious)` when the domain is kept
fn assess_domain(domain: &str, rules: &RuleTable, mode: IndicatorMode) -> Option<bool> {
    let tld = domain.rsplit('.').next()?;
    if rules.is_file_extension(tld) || rules.is_benign_domain(domain) {
        return None;
    }
    let suspicious = is_suspicious_domain(domain, rules);
    match mode {
        IndicatorMode::All => Some(suspicious),
        IndicatorMode::SuspiciousOnly => suspicious.then_some(true),
    }
}

/// Number of suspicion heuristics a domain trips
pub fn domain_suspicion(domain: &str, rules: &RuleTable) -> u32 {
    let domain = domain.trim_end_matches('.').to_lowercase();
    let labels: Vec<&str> = domain.split('.').collect();
    let Some((tld, rest)) = labels.split_last() else {
        return 0;
    };

    let mut score = 0;

    if rules.is_suspicious_tld(tld) {
        score += 1;
    }

    if rest.iter().any(|l| l.len() >= 12 && shannon_entropy(l) >= 3.8) {
        score += 1;
    }

    let body: String = rest.concat();
    if !body.is_empty() {
        let digits = body.chars().filter(|c| c.is_ascii_digit()).count();
        let hyphens = body.chars().filter(|c| *c == '-').count();
        if digits as f64 / body.len() as f64 > 0.3 || hyphens >= 3 {
            score += 1;
        }
    }

    if rest.iter().any(|l| l.len() > 25) {
        score += 1;
    }

    score
}

pub fn is_suspicious_domain(domain: &str, rules: &RuleTable) -> bool {
    domain_suspicion(domain, rules) > 0
}

/// Shannon entropy of a string in bits per character
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_default() += 1;
    }
    let len = s.chars().count() as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Public, routable IPv4
pub fn is_public_ipv4(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    let shared = o[0] == 100 && (o[1] & 0xc0) == 64;
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || o[0] == 0
        || o[0] >= 240
        || shared)
}

/// Public, routable IPv6
pub fn is_public_ipv6(ip: Ipv6Addr) -> bool {
    let s = ip.segments();
    let unique_local = (s[0] & 0xfe00) == 0xfc00;
    let link_local = (s[0] & 0xffc0) == 0xfe80;
    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || unique_local
        || link_local
        || ip.to_ipv4_mapped().is_some())
}

/// Reject dotted quads that are really part of a longer version string
fn is_standalone_ipv4(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let mut after = text[end..].chars();
    let dotted_before = before == Some('.')
        && text[..start - 1]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_digit());
    let dotted_after =
        after.next() == Some('.') && after.next().is_some_and(|c| c.is_ascii_digit());
    !(dotted_before || dotted_after)
}

fn is_degenerate_hex(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => true,
    }
}

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn base58_decode(s: &str) -> Option<Vec<u8>> {
    // Little-endian accumulator
    let mut bytes: Vec<u8> = Vec::new();
    for c in s.bytes() {
        let mut carry = BASE58_ALPHABET.iter().position(|&a| a == c)? as u32;
        for b in bytes.iter_mut() {
            carry += (*b as u32) * 58;
            *b = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let leading = s.bytes().take_while(|&c| c == b'1').count();
    let mut out = vec![0u8; leading];
    out.extend(bytes.iter().rev());
    Some(out)
}

/// Legacy Bitcoin address with a valid double-SHA-256 checksum
pub fn is_valid_base58check(address: &str) -> bool {
    let Some(decoded) = base58_decode(address) else {
        return false;
    };
    if decoded.len() != 25 {
        return false;
    }
    let first = Sha256::digest(&decoded[..21]);
    let second = Sha256::digest(first);
    second[..4] == decoded[21..]
}
