//! Report set handed to formatters

use crate::alerts::ResourceAlert;
use crate::bottleneck::BottleneckReport;
use crate::build_metrics::RunSummary;
use crate::efficiency::EfficiencyReport;
use crate::error::BuildTimeResult;
use crate::failure::StageFailure;
use crate::regression::RegressionReport;
use serde::Serialize;
use std::fmt::Write;

/// Everything computed for one run
///
/// Disabled analyzers leave their slot `None`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSet {
    /// The measured run
    pub summary: RunSummary,
    /// Stage ranking and recommendations
    pub bottleneck: Option<BottleneckReport>,
    /// Comparison with history
    pub regression: Option<RegressionReport>,
    /// Composite score
    pub efficiency: Option<EfficiencyReport>,
    /// Resource warnings
    pub alerts: Vec<ResourceAlert>,
    /// Diagnosed stage failures
    pub failures: Vec<StageFailure>,
}

impl ReportSet {
    /// Whether any stage failed
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Pretty JSON for external formatters
    pub fn to_json(&self) -> BuildTimeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Markdown summary
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let summary = &self.summary;
        let resources = summary.resources();

        let _ = writeln!(out, "# Build Time Report\n");
        let _ = writeln!(out, "- **Run**: {}", summary.id());
        let _ = writeln!(out, "- **Finished**: {}", summary.timestamp().to_rfc3339());
        let _ = writeln!(
            out,
            "- **Duration**: {:.2}s",
            summary.total_millis() as f64 / 1000.0
        );
        if resources.has_data() {
            let _ = writeln!(
                out,
                "- **Peak Memory**: {} MB",
                resources.peak_memory_bytes / (1024 * 1024)
            );
            let _ = writeln!(
                out,
                "- **Average CPU**: {:.1}%",
                resources.avg_cpu_fraction * 100.0
            );
        }

        if let Some(bottleneck) = self.bottleneck.as_ref().filter(|b| b.has_data()) {
            let _ = writeln!(out, "\n## Stages\n");
            let _ = writeln!(out, "| Stage | Duration | Share |");
            let _ = writeln!(out, "|-------|----------|-------|");
            for stage in &bottleneck.ranked_stages {
                let _ = writeln!(
                    out,
                    "| {} | {}ms | {:.1}% |",
                    stage.name, stage.millis, stage.percentage
                );
            }
            let _ = writeln!(out, "\n## Recommendations\n");
            for recommendation in &bottleneck.recommendations {
                let _ = writeln!(out, "- {recommendation}");
            }
        }

        if let Some(regression) = &self.regression {
            let _ = writeln!(out, "\n## History\n");
            let verdict = if regression.is_regression {
                "regression"
            } else if regression.is_improvement {
                "improvement"
            } else {
                "stable"
            };
            let _ = writeln!(
                out,
                "- **Verdict**: {verdict} (x{:.2} vs {:.0}ms average of {} runs)",
                regression.factor, regression.average_millis, regression.samples_considered
            );
            let _ = writeln!(out, "- **Trend**: {}", regression.trend);
        }

        if let Some(efficiency) = &self.efficiency {
            let _ = writeln!(out, "\n## Efficiency\n");
            let _ = writeln!(
                out,
                "- **Score**: {:.0}/100 ({}) {}",
                efficiency.total_score,
                efficiency.letter_grade,
                efficiency.description()
            );
            let _ = writeln!(
                out,
                "- Time {:.0}/30, Memory {:.0}/25, CPU {:.0}/25, Consistency {:.0}/20",
                efficiency.time_score,
                efficiency.memory_score,
                efficiency.cpu_score,
                efficiency.consistency_score
            );
            for suggestion in &efficiency.suggestions {
                let _ = writeln!(out, "- {suggestion}");
            }
        }

        if !self.alerts.is_empty() {
            let _ = writeln!(out, "\n## Alerts\n");
            for alert in &self.alerts {
                let _ = writeln!(out, "- {alert}");
            }
        }

        if !self.failures.is_empty() {
            let _ = writeln!(out, "\n## Failures\n");
            for failure in &self.failures {
                let _ = writeln!(out, "- {failure}");
                for fix in &failure.suggested_fixes {
                    let _ = writeln!(out, "  - {fix}");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bottleneck::BottleneckAnalyzer;
    use crate::build_metrics::DurationMap;
    use crate::efficiency::EfficiencyScorer;
    use crate::failure::FailureAnalyzer;
    use crate::resource_monitor::ResourceAggregate;
    use chrono::Utc;

    fn report_set() -> ReportSet {
        let durations: DurationMap = [("compile", 3200), ("test", 8400)].into_iter().collect();
        let bottleneck = BottleneckAnalyzer::new().analyze(&durations);
        let summary = RunSummary::new(Utc::now(), 11600, durations, ResourceAggregate::default());
        let efficiency = EfficiencyScorer::new().score(&summary, &[]);
        ReportSet {
            summary,
            bottleneck: Some(bottleneck),
            regression: None,
            efficiency: Some(efficiency),
            alerts: Vec::new(),
            failures: vec![FailureAnalyzer::new().analyze("test", "TestFailure", "1 failed")],
        }
    }

    #[test]
    fn test_json_generation() {
        let json = report_set().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["totalMillis"], 11600);
        assert_eq!(value["summary"]["stageDurations"]["test"], 8400);
        assert_eq!(value["bottleneck"]["primaryStage"], "test");
        assert_eq!(value["efficiency"]["letterGrade"], "B+");
        assert!(value["regression"].is_null());
        assert_eq!(value["failures"][0]["category"], "TestFailure");
    }

    #[test]
    fn test_markdown_generation() {
        let set = report_set();
        assert!(set.has_failures());
        let md = set.to_markdown();
        assert!(md.contains("# Build Time Report"));
        assert!(md.contains("| test | 8400ms | 72.4% |"));
        assert!(md.contains("## Efficiency"));
        assert!(!md.contains("## History"));
        assert!(!md.contains("Peak Memory"));
        assert!(md.contains("Run tests individually"));
    }
}
