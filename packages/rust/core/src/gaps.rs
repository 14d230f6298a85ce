//! Gap analysis: is the source set too thin, and what should we search next?
//!
//! Topic coverage is a static, ordered table. Adding a topic is a data change.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use sourcebound_shared::{PipelineConfig, Source};

// ---------------------------------------------------------------------------
// Category table
// ---------------------------------------------------------------------------

/// A topical category with canned follow-up searches.
#[derive(Debug)]
pub struct GapCategory {
    pub name: &'static str,
    /// Matched against the lower-cased query.
    pub pattern: &'static str,
    pub templates: &'static [&'static str],
}

pub static CATEGORIES: &[GapCategory] = &[
    GapCategory {
        name: "snap",
        pattern: r"\b(snap|food stamps?|welfare|benefits?)\b",
        templates: &[
            "SNAP benefits cuts 2025 statistics dollar amounts",
            "SNAP benefits economic impact data poverty rates",
            "SNAP benefits Supreme Court ruling congressional vote details",
            "SNAP benefits state-by-state impact analysis",
            "SNAP benefits recipients testimony quotes",
        ],
    },
    GapCategory {
        name: "healthcare",
        pattern: r"\b(healthcare|health care|medicaid|medicare|aca|affordable care)\b",
        templates: &[
            "healthcare subsidies expiration impact statistics",
            "medicaid cuts state budgets data",
            "medicare changes enrollment numbers",
            "ACA marketplace premium increases dollar amounts",
        ],
    },
    GapCategory {
        name: "tax",
        pattern: r"\b(tax|taxes|corporate|corporations?|wealth|wealthy|economy|economic|deficit)\b",
        templates: &[
            "corporate tax cuts revenue impact data",
            "wealth tax proposals congressional analysis",
            "deficit spending breakdown statistics",
            "economic inequality data recent studies",
        ],
    },
    GapCategory {
        name: "labor",
        pattern: r"\b(unions?|labor|labour|workers?|wages?|strikes?)\b",
        templates: &[
            "union organizing statistics 2025 data",
            "minimum wage legislation state breakdown",
            "labor strike outcomes worker testimony",
            "wage theft enforcement statistics",
        ],
    },
    GapCategory {
        name: "climate",
        pattern: r"\b(climate|environment|environmental|fossil fuels?|renewables?|carbon)\b",
        templates: &[
            "climate legislation carbon reduction targets",
            "fossil fuel subsidies dollar amounts",
            "renewable energy investment data",
            "environmental regulation rollback impact studies",
        ],
    },
    GapCategory {
        name: "immigration",
        pattern: r"\b(immigration|immigrants?|border|asylum|deportations?)\b",
        templates: &[
            "immigration policy changes statistics 2025",
            "border enforcement budget breakdown",
            "asylum application processing data",
            "deportation numbers impact analysis",
        ],
    },
];

/// Suffixes appended to the query when only generic policy terms match.
const GENERIC_SUFFIXES: &[&str] = &[
    "statistics data analysis",
    "congressional testimony expert quotes",
    "impact study research findings",
];

static COMPILED: LazyLock<Vec<(&'static GapCategory, Regex)>> = LazyLock::new(|| {
    CATEGORIES
        .iter()
        .map(|c| (c, Regex::new(c.pattern).expect("gap category regex")))
        .collect()
});

static GENERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(budget|legislation|bills?|congress|court|ruling|policy|policies|reform)\b")
        .expect("generic policy regex")
});

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Limits for gap analysis.
#[derive(Debug, Clone, Copy)]
pub struct GapConfig {
    /// Below this many unique sources, coverage is considered thin.
    pub threshold: usize,
    pub max_follow_ups: usize,
    pub templates_per_category: usize,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for GapConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            threshold: config.source_threshold,
            max_follow_ups: config.max_followup_queries,
            templates_per_category: config.templates_per_category,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GapAnalysisResult {
    pub needs_more_data: bool,
    pub follow_up_queries: Vec<String>,
}

impl GapAnalysisResult {
    fn from_queries(follow_up_queries: Vec<String>) -> Self {
        Self {
            needs_more_data: !follow_up_queries.is_empty(),
            follow_up_queries,
        }
    }
}

/// Analyze coverage of `sources` for `query`.
pub fn analyze_gaps(sources: &[Source], query: &str, config: &GapConfig) -> GapAnalysisResult {
    analyze_count(sources.len(), query, config)
}

/// Same as [`analyze_gaps`], given only the number of unique sources.
pub fn analyze_count(source_count: usize, query: &str, config: &GapConfig) -> GapAnalysisResult {
    let query = query.trim();
    if query.is_empty() || source_count >= config.threshold {
        return GapAnalysisResult::default();
    }

    let lowered = query.to_lowercase();
    let mut follow_ups: Vec<String> = Vec::new();
    let mut matched_any = false;

    for (category, re) in COMPILED.iter() {
        if !re.is_match(&lowered) {
            continue;
        }
        matched_any = true;
        follow_ups.extend(
            category
                .templates
                .iter()
                .take(config.templates_per_category)
                .map(|t| (*t).to_string()),
        );
    }

    if !matched_any && GENERIC_RE.is_match(&lowered) {
        follow_ups.extend(GENERIC_SUFFIXES.iter().map(|s| format!("{query} {s}")));
    }

    follow_ups.truncate(config.max_follow_ups);
    GapAnalysisResult::from_queries(follow_ups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(n: usize) -> Vec<Source> {
        (0..n)
            .map(|i| Source::new(format!("https://s{i}.org"), format!("S{i}"), "test"))
            .collect()
    }

    #[test]
    fn snap_with_three_sources() {
        let result = analyze_gaps(&sources(3), "SNAP benefits cuts 2025", &GapConfig::default());
        assert!(result.needs_more_data);
        assert!(
            result
                .follow_up_queries
                .contains(&"SNAP benefits cuts 2025 statistics dollar amounts".to_string())
        );
        assert_eq!(result.follow_up_queries.len(), 5);
    }

    #[test]
    fn threshold_reached_means_no_gaps() {
        let config = GapConfig::default();
        for query in ["SNAP benefits cuts", "medicaid", "budget reform", "anything"] {
            let result = analyze_gaps(&sources(12), query, &config);
            assert!(!result.needs_more_data, "{query}");
            assert!(result.follow_up_queries.is_empty());
        }
        assert!(!analyze_count(40, "SNAP", &config).needs_more_data);
    }

    #[test]
    fn empty_query() {
        let result = analyze_gaps(&[], "   ", &GapConfig::default());
        assert_eq!(result, GapAnalysisResult::default());
    }

    #[test]
    fn capped_at_max_follow_ups() {
        let config = GapConfig::default();
        let result = analyze_count(0, "snap, medicaid, tax, union, climate and border", &config);
        assert_eq!(result.follow_up_queries.len(), 5);
        // First category wins the budget.
        assert!(result.follow_up_queries.iter().all(|q| q.starts_with("SNAP")));
    }

    #[test]
    fn categories_in_table_order() {
        let config = GapConfig {
            templates_per_category: 2,
            ..GapConfig::default()
        };
        let result = analyze_count(0, "medicaid and deportation", &config);
        assert_eq!(
            result.follow_up_queries,
            vec![
                "healthcare subsidies expiration impact statistics",
                "medicaid cuts state budgets data",
                "immigration policy changes statistics 2025",
                "border enforcement budget breakdown",
            ]
        );
    }

    #[test]
    fn generic_policy_fallback() {
        let result = analyze_count(2, "Infrastructure budget reform", &GapConfig::default());
        assert_eq!(
            result.follow_up_queries,
            vec![
                "Infrastructure budget reform statistics data analysis",
                "Infrastructure budget reform congressional testimony expert quotes",
                "Infrastructure budget reform impact study research findings",
            ]
        );
    }

    #[test]
    fn generic_fallback_skipped_when_category_matched() {
        let result = analyze_count(0, "climate policy", &GapConfig::default());
        assert!(result.follow_up_queries.iter().all(|q| !q.contains("climate policy")));
    }

    #[test]
    fn unrelated_query_has_no_gaps() {
        let result = analyze_count(0, "history of the printing press", &GapConfig::default());
        assert!(!result.needs_more_data);
    }

    #[test]
    fn aca_needs_word_boundary() {
        let result = analyze_count(0, "vacation days", &GapConfig::default());
        assert!(result.follow_up_queries.is_empty());
    }
}
