//! Relevance filter
//!
//! Decides from title and summary alone, before any article fetch, whether an
//! entry is threat-intelligence content. Two policies share the rule table:
//! - **Gate**: hard-negative rejects; a CVE or any positive keyword accepts
//! - **Scored**: hard-negative vetoes; weighted score must reach `min_score`

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use intelfeed_core::{contains_cve_id, KeywordCategory, RawEntry, RuleTable};

/// Which relevance policy to apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelevancePolicy {
    Gate,
    #[default]
    Scored,
}

/// Outcome of evaluating one entry
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted { score: f64 },
    HardNegative { keyword: String },
    NoSignal,
    BelowThreshold { score: f64 },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }
}

/// An accepted entry with its relevance score
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: RawEntry,
    pub score: f64,
}

pub struct RelevanceFilter {
    policy: RelevancePolicy,
    rules: Arc<RuleTable>,
}

impl RelevanceFilter {
    pub fn new(policy: RelevancePolicy, rules: Arc<RuleTable>) -> Self {
        Self { policy, rules }
    }

    pub fn policy(&self) -> RelevancePolicy {
        self.policy
    }

    /// Weighted score of lower-cased text, ignoring hard negatives
    pub fn score(&self, lowered: &str) -> f64 {
        let sum = |category| -> f64 {
            self.rules
                .matches(category, lowered)
                .map(|r| r.weight)
                .sum()
        };

        let cve_bonus = if contains_cve_id(lowered) {
            self.rules.scoring.cve_bonus
        } else {
            0.0
        };

        cve_bonus + sum(KeywordCategory::StrongPositive) + sum(KeywordCategory::WeakPositive)
            - sum(KeywordCategory::SoftNegative)
    }

    pub fn evaluate(&self, entry: &RawEntry) -> Verdict {
        self.evaluate_text(&entry.relevance_text())
    }

    /// Evaluate already lower-cased title + summary text
    pub fn evaluate_text(&self, lowered: &str) -> Verdict {
        if let Some(rule) = self
            .rules
            .matches(KeywordCategory::HardNegative, lowered)
            .next()
        {
            return Verdict::HardNegative {
                keyword: rule.keyword.clone(),
            };
        }

        let score = self.score(lowered);

        match self.policy {
            RelevancePolicy::Gate => {
                let positive = contains_cve_id(lowered)
                    || self
                        .rules
                        .matches(KeywordCategory::StrongPositive, lowered)
                        .next()
                        .is_some()
                    || self
                        .rules
                        .matches(KeywordCategory::WeakPositive, lowered)
                        .next()
                        .is_some();
                if positive {
                    Verdict::Accepted { score }
                } else {
                    Verdict::NoSignal
                }
            }
            RelevancePolicy::Scored => {
                if score >= self.rules.scoring.min_score {
                    Verdict::Accepted { score }
                } else {
                    Verdict::BelowThreshold { score }
                }
            }
        }
    }

    /// Split entries into accepted (ordered by score, then recency) and
    /// rejected with their verdicts
    pub fn select(&self, entries: Vec<RawEntry>) -> (Vec<ScoredEntry>, Vec<(RawEntry, Verdict)>) {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for entry in entries {
            match self.evaluate(&entry) {
                Verdict::Accepted { score } => accepted.push(ScoredEntry { entry, score }),
                verdict => {
                    debug!("Filtered out {}: {:?}", entry.link, verdict);
                    rejected.push((entry, verdict));
                }
            }
        }

        accepted.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.entry.published.cmp(&a.entry.published))
        });

        (accepted, rejected)
    }
}

/// Whether extracted text carries at least `min_terms` distinct
/// security-context keywords
pub fn passes_content_gate(text: &str, rules: &RuleTable, min_terms: usize) -> bool {
    if min_terms == 0 {
        return true;
    }
    rules.count_mentions(KeywordCategory::SecurityContext, &text.to_lowercase()) >= min_terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use intelfeed_core::SourceKind;

    fn rules() -> Arc<RuleTable> {
        Arc::new(RuleTable::embedded().unwrap())
    }

    fn entry(title: &str, summary: &str, hours_old: i64) -> RawEntry {
        RawEntry {
            title: title.to_string(),
            link: format!("https://news.test/{}", title.len()),
            summary: summary.to_string(),
            published: Utc::now() - Duration::hours(hours_old),
            source: "test".into(),
            source_kind: SourceKind::Feed,
        }
    }

    #[test]
    fn test_hard_negative_beats_strong_positive() {
        for policy in [RelevancePolicy::Gate, RelevancePolicy::Scored] {
            let filter = RelevanceFilter::new(policy, rules());
            let verdict = filter.evaluate(&entry(
                "Webinar: ransomware zero-day response",
                "CVE-2024-1111 actively exploited",
                1,
            ));
            assert!(
                matches!(verdict, Verdict::HardNegative { ref keyword } if keyword == "webinar")
            );
        }
    }

    #[test]
    fn test_gate_policy() {
        let filter = RelevanceFilter::new(RelevancePolicy::Gate, rules());
        assert!(filter.evaluate(&entry("Patch Tuesday roundup", "", 1)).is_accepted());
        assert!(filter.evaluate(&entry("Bulletin", "fixes CVE-2024-0001", 1)).is_accepted());
        assert_eq!(filter.evaluate(&entry("Company picnic photos", "", 1)), Verdict::NoSignal);
    }

    #[test]
    fn test_scored_policy() {
        let filter = RelevanceFilter::new(RelevancePolicy::Scored, rules());

        let strong = filter.evaluate(&entry("Ransomware gang exploits VPN flaw", "", 1));
        assert!(matches!(strong, Verdict::Accepted { score } if score > 2.0));

        let negative = filter.evaluate(&entry("Security trends forecast and opinion", "", 1));
        assert!(matches!(negative, Verdict::BelowThreshold { score } if score < 0.0));
    }

    #[test]
    fn test_cve_bonus() {
        let filter = RelevanceFilter::new(RelevancePolicy::Scored, rules());
        let with = filter.score("advisory for cve-2024-0001");
        let without = filter.score("advisory for the product");
        assert_eq!(with - without, 3.0);
    }

    #[test]
    fn test_word_start_matching_in_filter() {
        let filter = RelevanceFilter::new(RelevancePolicy::Gate, rules());
        // "apt" must not match inside "chapter"
        assert_eq!(filter.evaluate(&entry("Chapter one", "", 1)), Verdict::NoSignal);
    }

    #[test]
    fn test_select_orders_by_score_then_recency() {
        let filter = RelevanceFilter::new(RelevancePolicy::Scored, rules());
        let entries = vec![
            entry("Phishing campaign", "", 5),
            entry("Zero-day ransomware exploit", "", 3),
            entry("Phishing campaign!", "", 1),
            entry("Hiring a security engineer", "", 1),
        ];
        let (accepted, rejected) = filter.select(entries);

        let titles: Vec<&str> = accepted.iter().map(|s| s.entry.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Zero-day ransomware exploit", "Phishing campaign!", "Phishing campaign"]
        );
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn test_content_gate() {
        let rules = rules();
        assert!(passes_content_gate("A critical VULNERABILITY was found", &rules, 1));
        assert!(!passes_content_gate("Quarterly earnings were strong", &rules, 1));
        assert!(!passes_content_gate("one vulnerability only", &rules, 2));
        assert!(passes_content_gate("anything", &rules, 0));
        assert!(!passes_content_gate("The resource was dispatched from source control", &rules, 1));
    }
}
