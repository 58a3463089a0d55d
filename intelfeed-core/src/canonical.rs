//! URL canonicalization and content hashing
//!
//! Every identity in the pipeline is a hash of a canonical string, so two
//! spellings of the same link must collapse to the same text here.

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::RuleTable;

/// Errors canonicalizing a URL
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Invalid URL {url}: {reason}")]
    Invalid { url: String, reason: String },

    #[error("Unsupported scheme in {0}")]
    UnsupportedScheme(String),
}

/// Canonicalize an article URL.
///
/// Drops tracking parameters and the fragment, sorts the remaining query
/// parameters by key, and lower-cases scheme and host.
pub fn canonicalize_url(raw: &str, rules: &RuleTable) -> Result<String, UrlError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| UrlError::Invalid {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(raw.to_string()));
    }

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !rules.is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));

    url.set_fragment(None);
    if params.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(params);
    }

    Ok(url.to_string())
}

/// Host of a URL, lower-cased, without a leading `www.`
pub fn host_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Hex-encoded SHA-256 of a string
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collapse runs of whitespace into single spaces
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
