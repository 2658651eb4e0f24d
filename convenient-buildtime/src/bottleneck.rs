//! Bottleneck analysis over stage durations
//!
//! Stages are ranked by time spent, and a fixed list of recommendation rules
//! is evaluated against the slowest stage and the overall build time. Each
//! rule is a [`Recommendation`] variant, so the rule set can be inspected and
//! tested without looking at message text.

use crate::build_metrics::DurationMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Kind of work a stage name suggests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageCategory {
    /// Compilation (`compile`, `do_compile`, `test-compile`)
    Compile,
    /// Test execution
    Test,
    /// Packaging or installation
    Package,
    /// Anything else
    Other,
}

impl StageCategory {
    /// Classify a stage by name
    ///
    /// Compilation wins over test so that `test-compile` counts as a compile.
    pub fn classify(stage: &str) -> Self {
        let name = stage.to_ascii_lowercase();
        if name.contains("compile") {
            Self::Compile
        } else if name.contains("test") {
            Self::Test
        } else if name.contains("package") || name.contains("install") {
            Self::Package
        } else {
            Self::Other
        }
    }
}

/// Tunable limits for the recommendation rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BottleneckThresholds {
    /// A compile stage above this is slow
    pub compile_millis: u64,
    /// A test stage above this is slow
    pub test_millis: u64,
    /// A packaging stage above this is slow
    pub package_millis: u64,
    /// Share above which the slowest stage dominates
    pub dominant_percentage: f64,
    /// Share each of the top three must reach to count as evenly spread
    pub spread_floor_percentage: f64,
    /// Whole build above this gets generic caching advice
    pub long_build_millis: u64,
}

impl Default for BottleneckThresholds {
    fn default() -> Self {
        Self {
            compile_millis: 30_000,
            test_millis: 60_000,
            package_millis: 10_000,
            dominant_percentage: 40.0,
            spread_floor_percentage: 20.0,
            long_build_millis: 300_000,
        }
    }
}

/// One stage in the ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStage {
    /// Stage name
    pub name: String,
    /// Time spent
    pub millis: u64,
    /// Share of all stage time, 0..=100
    pub percentage: f64,
}

/// Recommendation rules, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    /// Slow compile stage on top
    IncrementalCompilation,
    /// Slow test stage on top
    ParallelTests,
    /// Slow packaging stage on top
    PackagingOverhead,
    /// Top stage takes a dominant share
    FocusDominantStage,
    /// Time is spread over the top three stages
    ParallelizeTopStages,
    /// The whole build is long
    BuildCaching,
    /// Nothing else fired
    MonitorTrends,
}

impl Recommendation {
    /// Rules checked for every report; `MonitorTrends` is the fallback
    pub const RULES: [Recommendation; 6] = [
        Self::IncrementalCompilation,
        Self::ParallelTests,
        Self::PackagingOverhead,
        Self::FocusDominantStage,
        Self::ParallelizeTopStages,
        Self::BuildCaching,
    ];

    fn applies(self, ranked: &[RankedStage], stage_millis: u64, t: &BottleneckThresholds) -> bool {
        let Some(top) = ranked.first() else {
            return false;
        };
        let category = StageCategory::classify(&top.name);
        match self {
            Self::IncrementalCompilation => {
                category == StageCategory::Compile && top.millis > t.compile_millis
            }
            Self::ParallelTests => category == StageCategory::Test && top.millis > t.test_millis,
            Self::PackagingOverhead => {
                category == StageCategory::Package && top.millis > t.package_millis
            }
            Self::FocusDominantStage => top.percentage > t.dominant_percentage,
            Self::ParallelizeTopStages => {
                ranked.len() >= 3
                    && ranked[..3]
                        .iter()
                        .all(|s| s.percentage >= t.spread_floor_percentage)
            }
            Self::BuildCaching => stage_millis > t.long_build_millis,
            Self::MonitorTrends => false,
        }
    }

    fn message(self, ranked: &[RankedStage]) -> String {
        match self {
            Self::IncrementalCompilation => {
                "Enable incremental compilation and consider splitting large modules".to_string()
            }
            Self::ParallelTests => {
                "Run tests in parallel and profile the slowest test suites".to_string()
            }
            Self::PackagingOverhead => {
                "Reduce packaging overhead: reuse a build daemon and trim artifact contents"
                    .to_string()
            }
            Self::FocusDominantStage => match ranked.first() {
                Some(top) => format!(
                    "Focus optimization on '{}' ({:.1}% of build time)",
                    top.name, top.percentage
                ),
                None => String::new(),
            },
            Self::ParallelizeTopStages => {
                let names: Vec<_> = ranked.iter().take(3).map(|s| s.name.as_str()).collect();
                format!("Time is spread evenly; parallelize {}", names.join(", "))
            }
            Self::BuildCaching => {
                "Long build: enable build caching and parallel builds".to_string()
            }
            Self::MonitorTrends => {
                "Monitor build trends to catch regressions early; consider parallel builds"
                    .to_string()
            }
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IncrementalCompilation => "incremental-compilation",
            Self::ParallelTests => "parallel-tests",
            Self::PackagingOverhead => "packaging-overhead",
            Self::FocusDominantStage => "focus-dominant-stage",
            Self::ParallelizeTopStages => "parallelize-top-stages",
            Self::BuildCaching => "build-caching",
            Self::MonitorTrends => "monitor-trends",
        };
        write!(f, "{name}")
    }
}

/// Result of a bottleneck analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BottleneckReport {
    /// Slowest stage, empty when there is nothing to rank
    pub primary_stage: String,
    /// Time spent in the slowest stage
    pub primary_millis: u64,
    /// Share of the slowest stage
    pub primary_percentage: f64,
    /// All stages, slowest first
    pub ranked_stages: Vec<RankedStage>,
    /// Rules that fired, in evaluation order
    pub rules: Vec<Recommendation>,
    /// Human-readable advice, one per fired rule
    pub recommendations: Vec<String>,
}

impl BottleneckReport {
    /// Whether the report carries a ranking
    pub fn has_data(&self) -> bool {
        !self.ranked_stages.is_empty()
    }

    /// The `n` slowest stages
    pub fn top(&self, n: usize) -> &[RankedStage] {
        &self.ranked_stages[..n.min(self.ranked_stages.len())]
    }
}

/// Ranks stages and derives recommendations
#[derive(Debug, Clone, Default)]
pub struct BottleneckAnalyzer {
    thresholds: BottleneckThresholds,
}

impl BottleneckAnalyzer {
    /// Analyzer with default thresholds
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyzer with custom thresholds
    pub fn with_thresholds(thresholds: BottleneckThresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in use
    pub fn thresholds(&self) -> &BottleneckThresholds {
        &self.thresholds
    }

    /// Rank `durations` and evaluate the recommendation rules
    pub fn analyze(&self, durations: &DurationMap) -> BottleneckReport {
        let stage_millis = durations.stage_millis();
        if stage_millis == 0 {
            debug!(stages = durations.len(), "No stage time to analyze");
            return BottleneckReport::default();
        }

        let mut ranked: Vec<RankedStage> = durations
            .stages()
            .map(|s| RankedStage {
                name: s.name.clone(),
                millis: s.millis,
                percentage: s.millis as f64 * 100.0 / stage_millis as f64,
            })
            .collect();
        // stable: ties keep completion order
        ranked.sort_by(|a, b| b.millis.cmp(&a.millis));

        let rules = self.fired_rules(&ranked, stage_millis);
        let recommendations = rules.iter().map(|r| r.message(&ranked)).collect();

        let top = &ranked[0];
        debug!(
            stage = %top.name,
            duration_ms = top.millis,
            percentage = top.percentage,
            "Primary bottleneck"
        );
        BottleneckReport {
            primary_stage: top.name.clone(),
            primary_millis: top.millis,
            primary_percentage: top.percentage,
            rules,
            recommendations,
            ranked_stages: ranked,
        }
    }

    /// Rules that fire for a ranking; never empty for a non-empty ranking
    pub fn fired_rules(&self, ranked: &[RankedStage], stage_millis: u64) -> Vec<Recommendation> {
        if ranked.is_empty() {
            return Vec::new();
        }
        let mut fired: Vec<_> = Recommendation::RULES
            .into_iter()
            .filter(|rule| rule.applies(ranked, stage_millis, &self.thresholds))
            .collect();
        if fired.is_empty() {
            fired.push(Recommendation::MonitorTrends);
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_metrics::TOTAL_STAGE;

    fn map(entries: &[(&str, u64)]) -> DurationMap {
        entries.iter().map(|&(n, ms)| (n, ms)).collect()
    }

    #[test]
    fn test_empty_map_gives_empty_report() {
        let report = BottleneckAnalyzer::new().analyze(&DurationMap::new());
        assert_eq!(report.primary_stage, "");
        assert!(report.ranked_stages.is_empty());
        assert!(report.recommendations.is_empty());
        assert!(!report.has_data());
    }

    #[test]
    fn test_only_total_gives_empty_report() {
        let report = BottleneckAnalyzer::new().analyze(&map(&[(TOTAL_STAGE, 5000)]));
        assert!(!report.has_data());
    }

    #[test]
    fn test_zero_time_stages_give_empty_report() {
        let report = BottleneckAnalyzer::new().analyze(&map(&[("a", 0), ("b", 0)]));
        assert!(!report.has_data());
    }

    #[test]
    fn test_ranking_excludes_total_and_sorts() {
        let report = BottleneckAnalyzer::new().analyze(&map(&[
            ("validate", 200),
            ("compile", 3200),
            (TOTAL_STAGE, 99_999),
            ("test", 8400),
            ("package", 600),
        ]));

        let names: Vec<_> = report.ranked_stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["test", "compile", "package", "validate"]);
        assert_eq!(report.primary_stage, "test");
        assert_eq!(report.primary_millis, 8400);
        assert!((report.primary_percentage - 8400.0 * 100.0 / 12400.0).abs() < 1e-9);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let report = BottleneckAnalyzer::new().analyze(&map(&[("b", 100), ("a", 100), ("c", 50)]));
        let names: Vec<_> = report.ranked_stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_slow_compile_recommends_incremental() {
        let report = BottleneckAnalyzer::new().analyze(&map(&[("compile", 45_000), ("test", 5_000)]));
        assert_eq!(
            report.rules,
            vec![
                Recommendation::IncrementalCompilation,
                Recommendation::FocusDominantStage
            ]
        );
        assert!(report.recommendations[1].contains("'compile'"));
    }

    #[test]
    fn test_slow_tests_recommend_parallel_tests() {
        let report = BottleneckAnalyzer::new().analyze(&map(&[("integration-test", 90_000), ("compile", 10_000)]));
        assert!(report.rules.contains(&Recommendation::ParallelTests));
    }

    #[test]
    fn test_test_compile_counts_as_compile() {
        assert_eq!(StageCategory::classify("test-compile"), StageCategory::Compile);
        assert_eq!(StageCategory::classify("do_install"), StageCategory::Package);
        assert_eq!(StageCategory::classify("Unit-Tests"), StageCategory::Test);
        assert_eq!(StageCategory::classify("validate"), StageCategory::Other);
    }

    #[test]
    fn test_even_spread_recommends_parallelizing_top_three() {
        let report = BottleneckAnalyzer::new().analyze(&map(&[("a", 300), ("b", 300), ("c", 300), ("d", 100)]));
        assert_eq!(report.rules, vec![Recommendation::ParallelizeTopStages]);
        assert!(report.recommendations[0].contains("a, b, c"));
    }

    #[test]
    fn test_long_build_gets_caching_advice() {
        let report = BottleneckAnalyzer::new().analyze(&map(&[("a", 110_000), ("b", 100_000), ("c", 100_000)]));
        assert!(report.rules.contains(&Recommendation::BuildCaching));
    }

    #[test]
    fn test_fallback_when_nothing_fires() {
        let report = BottleneckAnalyzer::new().analyze(&map(&[("a", 350), ("b", 350), ("c", 150), ("d", 150)]));
        assert_eq!(report.rules, vec![Recommendation::MonitorTrends]);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn test_custom_thresholds() {
        let analyzer = BottleneckAnalyzer::with_thresholds(BottleneckThresholds {
            compile_millis: 1_000,
            ..BottleneckThresholds::default()
        });
        let report = analyzer.analyze(&map(&[("compile", 2_000), ("a", 2_000), ("b", 2_000)]));
        assert!(report.rules.contains(&Recommendation::IncrementalCompilation));
    }
}
