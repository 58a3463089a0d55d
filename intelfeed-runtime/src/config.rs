//! Pipeline configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file is a
//! valid (if sourceless) configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use intelfeed_core::{RuleError, RuleTable};
use intelfeed_net::{default_fallback_selectors, ExtractOptions, HttpConfig, LinkScope};
use intelfeed_sources::{
    HarvestOptions, RelevancePolicy, SourceLimits, DEFAULT_REDDIT_BASE, DEFAULT_TELEGRAM_BASE,
};

/// File name of the JSON dedup store inside the workspace
pub const STORE_FILE: &str = "dedup_store.json";

/// File name of the JSON article output inside the workspace
pub const ARTICLES_FILE: &str = "raw_articles.json";

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Rule table error: {0}")]
    Rules(#[from] RuleError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the dedup store and article output
    pub workspace: PathBuf,
    pub sources: SourcesConfig,
    pub limits: LimitsConfig,
    pub http: HttpSection,
    pub extraction: ExtractionConfig,
    pub links: LinksConfig,
    pub relevance: RelevanceConfig,
    pub indicators: IndicatorConfig,
    pub dedup: DedupConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("intelfeed-data"),
            sources: SourcesConfig::default(),
            limits: LimitsConfig::default(),
            http: HttpSection::default(),
            extraction: ExtractionConfig::default(),
            links: LinksConfig::default(),
            relevance: RelevanceConfig::default(),
            indicators: IndicatorConfig::default(),
            dedup: DedupConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub feeds: Vec<String>,
    pub subreddits: Vec<String>,
    pub channels: Vec<String>,
    pub reddit_base: String,
    pub telegram_base: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            subreddits: Vec::new(),
            channels: Vec::new(),
            reddit_base: DEFAULT_REDDIT_BASE.to_string(),
            telegram_base: DEFAULT_TELEGRAM_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub per_source_cap: usize,
    pub recency_days: i64,
    pub max_workers: usize,
    /// Overall run deadline; unfinished entries are abandoned
    pub run_deadline_secs: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            per_source_cap: 25,
            recency_days: 7,
            max_workers: 8,
            run_deadline_secs: None,
        }
    }
}

impl LimitsConfig {
    pub fn source_limits(&self) -> SourceLimits {
        SourceLimits {
            per_source_cap: self.per_source_cap,
            recency_days: self.recency_days,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub timeout_secs: u64,
    pub min_body_bytes: usize,
    pub per_host_delay_ms: u64,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        let http = HttpConfig::default();
        Self {
            timeout_secs: http.timeout_secs,
            min_body_bytes: http.min_body_bytes,
            per_host_delay_ms: http.per_host_delay_ms,
            user_agent: http.user_agent,
            proxy: http.proxy,
        }
    }
}

impl HttpSection {
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout_secs: self.timeout_secs,
            min_body_bytes: self.min_body_bytes,
            per_host_delay_ms: self.per_host_delay_ms,
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub min_chars: usize,
    pub max_chars: usize,
    pub summary_chars: usize,
    pub fallback_selectors: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_chars: intelfeed_core::MIN_ARTICLE_CHARS,
            max_chars: intelfeed_core::MAX_ARTICLE_CHARS,
            summary_chars: intelfeed_core::SUMMARY_CHARS,
            fallback_selectors: default_fallback_selectors(),
        }
    }
}

impl ExtractionConfig {
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            min_chars: self.min_chars,
            max_chars: self.max_chars,
            fallback_selectors: self.fallback_selectors.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    pub max_links: usize,
    #[serde(flatten)]
    pub scope: LinkScope,
    /// Fetch CVE and vendor links and merge their CVEs
    pub harvest_nested_cves: bool,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            max_links: intelfeed_core::MAX_NESTED_LINKS,
            scope: LinkScope::default(),
            harvest_nested_cves: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    pub policy: RelevancePolicy,
    /// Replacement rule table; the embedded one is used when unset
    pub rules_path: Option<PathBuf>,
    pub content_min_security_terms: usize,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            policy: RelevancePolicy::default(),
            rules_path: None,
            content_min_security_terms: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub harvest: HarvestOptions,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            harvest: HarvestOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupBackend {
    Memory,
    #[default]
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub backend: DedupBackend,
    /// Store file; defaults to `dedup_store.json` in the workspace
    pub path: Option<PathBuf>,
    /// Length ratio a same-incident article must exceed to replace a record
    /// from an earlier run. Within a run any longer text replaces.
    pub material_growth: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            backend: DedupBackend::default(),
            path: None,
            material_growth: 1.25,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_workers == 0 {
            return Err(ConfigError::Invalid("limits.max_workers must be at least 1".into()));
        }
        if self.extraction.min_chars > self.extraction.max_chars {
            return Err(ConfigError::Invalid(
                "extraction.min_chars exceeds extraction.max_chars".into(),
            ));
        }
        if !self.dedup.material_growth.is_finite() || self.dedup.material_growth < 1.0 {
            return Err(ConfigError::Invalid("dedup.material_growth must be >= 1.0".into()));
        }
        if self.indicators.harvest.fallback_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "indicators.fallback_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The configured rule table, or the embedded default
    pub fn rule_table(&self) -> Result<RuleTable, ConfigError> {
        let table = match &self.relevance.rules_path {
            Some(path) => RuleTable::load(path)?,
            None => RuleTable::embedded()?,
        };
        Ok(table)
    }

    pub fn store_path(&self) -> PathBuf {
        self.dedup
            .path
            .clone()
            .unwrap_or_else(|| self.workspace.join(STORE_FILE))
    }

    pub fn articles_path(&self) -> PathBuf {
        self.workspace.join(ARTICLES_FILE)
    }

    pub fn source_count(&self) -> usize {
        self.sources.feeds.len() + self.sources.subreddits.len() + self.sources.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelfeed_core::IndicatorMode;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config.limits.per_source_cap, 25);
        assert_eq!(config.extraction.min_chars, 800);
        assert_eq!(config.extraction.max_chars, 20_000);
        assert_eq!(config.dedup.material_growth, 1.25);
        assert_eq!(config.indicators.harvest.fallback_concurrency, 1);
        assert_eq!(config.relevance.policy, RelevancePolicy::Scored);
        assert_eq!(config.store_path(), PathBuf::from("intelfeed-data/dedup_store.json"));
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            workspace = "/var/lib/intelfeed"

            [sources]
            feeds = ["https://feeds.test/rss"]
            subreddits = ["netsec"]
            channels = ["threatfeed"]

            [limits]
            max_workers = 4
            run_deadline_secs = 600

            [http]
            proxy = "socks5h://127.0.0.1:9050"

            [links]
            max_links = 3
            same_host = false
            allow = ["nvd.nist.gov"]
            harvest_nested_cves = true

            [relevance]
            policy = "gate"
            content_min_security_terms = 2

            [indicators]
            mode = "suspicious_only"
            fallback_concurrency = 2

            [dedup]
            backend = "memory"
            material_growth = 1.5
        "#;
        let config = PipelineConfig::from_toml(text).unwrap();

        assert_eq!(config.source_count(), 3);
        assert_eq!(config.limits.run_deadline_secs, Some(600));
        assert_eq!(config.http.http_config().proxy.as_deref(), Some("socks5h://127.0.0.1:9050"));
        assert_eq!(config.links.max_links, 3);
        assert!(!config.links.scope.same_host);
        assert!(config.links.harvest_nested_cves);
        assert_eq!(config.relevance.policy, RelevancePolicy::Gate);
        assert_eq!(config.indicators.harvest.mode, IndicatorMode::SuspiciousOnly);
        assert_eq!(config.indicators.harvest.max_fallback_links, 5);
        assert_eq!(config.dedup.backend, DedupBackend::Memory);
        assert_eq!(config.articles_path(), PathBuf::from("/var/lib/intelfeed/raw_articles.json"));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            PipelineConfig::from_toml("[limits]\nmax_workers = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[dedup]\nmaterial_growth = 0.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[extraction]\nmin_chars = 5000\nmax_chars = 100"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[limits]\nmax_workers = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_rules_file() {
        let text = "[relevance]\nrules_path = \"/nonexistent/rules.toml\"";
        let config = PipelineConfig::from_toml(text).unwrap();
        assert!(matches!(config.rule_table(), Err(ConfigError::Rules(_))));
    }
}
