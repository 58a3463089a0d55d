//! Keyword rule table
//!
//! One table drives every lexical decision in the pipeline:
//! - relevance scoring (hard/soft negatives, strong/weak positives)
//! - CVE context validation and the post-fetch content gate
//! - nested-link ranking and IOC-link selection
//! - indicator noise lists and suspicion heuristics
//!
//! The default table is embedded; a replacement can be loaded from TOML.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Embedded default rule file
pub const DEFAULT_RULES: &str = include_str!("../rules/default.toml");

/// Errors loading a rule table
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Failed to read rule file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rule file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid rule: {0}")]
    Invalid(String),
}

/// Category a keyword belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeywordCategory {
    /// Unconditional relevance veto
    HardNegative,
    /// Large relevance bonus
    StrongPositive,
    /// Small relevance bonus
    WeakPositive,
    /// Relevance penalty
    SoftNegative,
    /// Validates CVE mentions and extracted article text
    SecurityContext,
    /// Marks a nested link as likely to carry indicators
    IocLink,
    /// Scores anchor text when ranking nested links
    AnchorSignal,
    /// Payment context required around crypto addresses
    CryptoContext,
}

/// A single keyword rule
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordRule {
    pub keyword: String,
    pub category: KeywordCategory,
    pub weight: f64,
}

/// Scoring constants for the scored relevance policy
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringRules {
    #[serde(default = "default_cve_bonus")]
    pub cve_bonus: f64,
    #[serde(default)]
    pub min_score: f64,
}

fn default_cve_bonus() -> f64 {
    3.0
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            cve_bonus: default_cve_bonus(),
            min_score: 0.0,
        }
    }
}

/// On-disk shape of a rule file
#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    scoring: ScoringRules,
    #[serde(default)]
    hard_negative: Vec<String>,
    #[serde(default)]
    strong_positive: BTreeMap<String, f64>,
    #[serde(default)]
    weak_positive: BTreeMap<String, f64>,
    #[serde(default)]
    soft_negative: BTreeMap<String, f64>,
    #[serde(default)]
    anchor_signal: BTreeMap<String, f64>,
    #[serde(default)]
    security_context: Vec<String>,
    #[serde(default)]
    ioc_link: Vec<String>,
    #[serde(default)]
    ioc_path: Vec<String>,
    #[serde(default)]
    crypto_context: Vec<String>,
    #[serde(default)]
    benign_domains: Vec<String>,
    #[serde(default)]
    suspicious_tlds: Vec<String>,
    #[serde(default)]
    executable_extensions: Vec<String>,
    #[serde(default)]
    file_extensions: Vec<String>,
    #[serde(default)]
    tracking_params: Vec<String>,
}

/// The unified keyword rule table
#[derive(Debug, Clone)]
pub struct RuleTable {
    pub scoring: ScoringRules,
    rules: Vec<KeywordRule>,
    ioc_paths: Vec<String>,
    benign_domains: HashSet<String>,
    suspicious_tlds: HashSet<String>,
    executable_extensions: Vec<String>,
    file_extensions: HashSet<String>,
    tracking_params: HashSet<String>,
}

impl RuleTable {
    /// Parse a rule table from TOML text
    pub fn from_toml(text: &str) -> Result<Self, RuleError> {
        let file: RuleFile = toml::from_str(text)?;
        Self::from_file(file)
    }

    /// Load a rule table from a TOML file on disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// The embedded default table
    pub fn embedded() -> Result<Self, RuleError> {
        Self::from_toml(DEFAULT_RULES)
    }

    fn from_file(file: RuleFile) -> Result<Self, RuleError> {
        let mut rules = Vec::new();

        let mut push = |keyword: &str, category: KeywordCategory, weight: f64| {
            rules.push(KeywordRule {
                keyword: keyword.trim().to_lowercase(),
                category,
                weight,
            });
        };

        for k in &file.hard_negative {
            push(k, KeywordCategory::HardNegative, 0.0);
        }
        for (k, w) in &file.strong_positive {
            push(k, KeywordCategory::StrongPositive, *w);
        }
        for (k, w) in &file.weak_positive {
            push(k, KeywordCategory::WeakPositive, *w);
        }
        for (k, w) in &file.soft_negative {
            push(k, KeywordCategory::SoftNegative, *w);
        }
        for (k, w) in &file.anchor_signal {
            push(k, KeywordCategory::AnchorSignal, *w);
        }
        for k in &file.security_context {
            push(k, KeywordCategory::SecurityContext, 1.0);
        }
        for k in &file.ioc_link {
            push(k, KeywordCategory::IocLink, 1.0);
        }
        for k in &file.crypto_context {
            push(k, KeywordCategory::CryptoContext, 1.0);
        }

        if let Some(bad) = rules.iter().find(|r| r.keyword.is_empty()) {
            return Err(RuleError::Invalid(format!(
                "empty keyword in {:?}",
                bad.category
            )));
        }
        if let Some(bad) = rules.iter().find(|r| !r.weight.is_finite()) {
            return Err(RuleError::Invalid(format!(
                "non-finite weight for '{}'",
                bad.keyword
            )));
        }

        let lower = |v: Vec<String>| -> Vec<String> {
            v.into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };

        Ok(Self {
            scoring: file.scoring,
            rules,
            ioc_paths: lower(file.ioc_path),
            benign_domains: lower(file.benign_domains).into_iter().collect(),
            suspicious_tlds: lower(file.suspicious_tlds)
                .into_iter()
                .map(|t| t.trim_start_matches('.').to_string())
                .collect(),
            executable_extensions: lower(file.executable_extensions),
            file_extensions: lower(file.file_extensions)
                .into_iter()
                .map(|t| t.trim_start_matches('.').to_string())
                .collect(),
            tracking_params: lower(file.tracking_params).into_iter().collect(),
        })
    }

    /// All rules in a category
    pub fn keywords(&self, category: KeywordCategory) -> impl Iterator<Item = &KeywordRule> {
        self.rules.iter().filter(move |r| r.category == category)
    }

    /// Rules of a category that occur in `text` at a word start.
    ///
    /// `text` must already be lower-cased.
    pub fn matches<'a>(
        &'a self,
        category: KeywordCategory,
        text: &'a str,
    ) -> impl Iterator<Item = &'a KeywordRule> + 'a {
        self.keywords(category)
            .filter(move |r| contains_at_word_start(text, &r.keyword))
    }

    /// Whether any rule of a category starts a word in `text`.
    ///
    /// Inflections still count ("patched"), embedded fragments do not
    /// ("dispatched"). `text` must already be lower-cased.
    pub fn mentions(&self, category: KeywordCategory, text: &str) -> bool {
        self.keywords(category)
            .any(|r| contains_at_word_start(text, &r.keyword))
    }

    /// Number of distinct rules of a category that start a word in `text`
    pub fn count_mentions(&self, category: KeywordCategory, text: &str) -> usize {
        self.keywords(category)
            .filter(|r| contains_at_word_start(text, &r.keyword))
            .count()
    }

    pub fn ioc_paths(&self) -> &[String] {
        &self.ioc_paths
    }

    /// Whether `domain` or any parent of it is on the benign noise list
    pub fn is_benign_domain(&self, domain: &str) -> bool {
        let domain = domain.trim_end_matches('.').to_lowercase();
        let mut candidate = domain.as_str();
        loop {
            if self.benign_domains.contains(candidate) {
                return true;
            }
            match candidate.split_once('.') {
                Some((_, rest)) if !rest.is_empty() => candidate = rest,
                _ => return false,
            }
        }
    }

    pub fn is_suspicious_tld(&self, tld: &str) -> bool {
        self.suspicious_tlds.contains(&tld.to_lowercase())
    }

    /// Whether a path ends in an executable-style extension
    pub fn has_executable_extension(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.executable_extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }

    pub fn is_file_extension(&self, ext: &str) -> bool {
        self.file_extensions.contains(&ext.to_lowercase())
    }

    pub fn is_tracking_param(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.tracking_params.contains(&name)
    }
}

/// Substring search that requires the match to begin at a word boundary.
///
/// The end of the match is unconstrained so "exploit" matches "exploited".
pub fn contains_at_word_start(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(idx, _)| {
        haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}
