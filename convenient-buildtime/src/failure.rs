//! Stage failure classification
//!
//! Keyword rules over the error type and message sort a failure into one or
//! more categories, each contributing fixed suggested fixes. Rules are
//! checked in a fixed order; the first match is the primary category.

use crate::build_metrics::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Kind of stage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCategory {
    /// Source did not compile
    Compilation,
    /// Dependencies could not be resolved or downloaded
    DependencyResolution,
    /// Tests failed in a test stage
    TestFailure,
    /// The build ran out of memory
    OutOfMemory,
    /// A build plugin misbehaved
    Plugin,
    /// Nothing matched
    Unknown,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compilation => write!(f, "Compilation Error"),
            Self::DependencyResolution => write!(f, "Dependency Resolution"),
            Self::TestFailure => write!(f, "Test Failure"),
            Self::OutOfMemory => write!(f, "Out of Memory"),
            Self::Plugin => write!(f, "Plugin Error"),
            Self::Unknown => write!(f, "Unknown Error"),
        }
    }
}

impl FailureCategory {
    const RULES: [FailureCategory; 5] = [
        Self::Compilation,
        Self::DependencyResolution,
        Self::TestFailure,
        Self::OutOfMemory,
        Self::Plugin,
    ];

    /// Whether this rule fires; inputs are lowercase
    fn matches(self, stage: &str, error_type: &str, message: &str) -> bool {
        match self {
            Self::Compilation => {
                error_type.contains("compilation") || message.contains("cannot find symbol")
            }
            Self::DependencyResolution => {
                message.contains("could not resolve dependencies")
                    || message.contains("artifact not found")
            }
            Self::TestFailure => stage.contains("test") && error_type.contains("test"),
            Self::OutOfMemory => {
                message.contains("outofmemory")
                    || message.contains("out of memory")
                    || message.contains("heap space")
            }
            Self::Plugin => message.contains("plugin") || message.contains("mojo"),
            Self::Unknown => false,
        }
    }

    /// Fixed fixes for this category
    pub fn suggested_fixes(self) -> &'static [&'static str] {
        match self {
            Self::Compilation => &[
                "Check that all required dependencies are declared",
                "Verify import statements and type names",
                "Ensure the referenced item is on the build path",
            ],
            Self::DependencyResolution => &[
                "Check package repository availability",
                "Verify dependency coordinates and versions",
                "Try clearing the local dependency cache",
            ],
            Self::TestFailure => &[
                "Run tests individually to isolate the issue",
                "Check test data and mock configurations",
                "Verify test environment setup",
            ],
            Self::OutOfMemory => &[
                "Increase the memory limit of the build process",
                "Enable garbage collection logging",
                "Reduce build parallelism to lower peak memory",
            ],
            Self::Plugin => &[
                "Update the plugin to its latest version",
                "Check the plugin configuration",
                "Re-run with verbose output for details",
            ],
            Self::Unknown => &[],
        }
    }
}

/// A failed stage with its diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailure {
    /// Stage that failed
    pub stage: String,
    /// Short error type, e.g. an exception class or exit status kind
    pub error_type: String,
    /// Error message as reported by the host
    pub message: String,
    /// Primary category
    pub category: FailureCategory,
    /// All categories that matched, in rule order
    pub matched_categories: Vec<FailureCategory>,
    /// Fixes from every matched category
    pub suggested_fixes: Vec<String>,
    /// When the failure was reported
    pub reported_at: Option<Timestamp>,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "❌ {} failed ({}): {}: {}",
            self.stage, self.category, self.error_type, self.message
        )
    }
}

/// Classifies stage failures by keyword rules
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureAnalyzer;

impl FailureAnalyzer {
    /// Create an analyzer
    pub fn new() -> Self {
        Self
    }

    /// Diagnose a failure of `stage`
    pub fn analyze(&self, stage: &str, error_type: &str, message: &str) -> StageFailure {
        let stage_lower = stage.to_lowercase();
        let type_lower = error_type.to_lowercase();
        let message_lower = message.to_lowercase();

        let matched: Vec<FailureCategory> = FailureCategory::RULES
            .iter()
            .copied()
            .filter(|rule| rule.matches(&stage_lower, &type_lower, &message_lower))
            .collect();
        let category = matched.first().copied().unwrap_or(FailureCategory::Unknown);
        let suggested_fixes = matched
            .iter()
            .flat_map(|c| c.suggested_fixes().iter().map(|s| s.to_string()))
            .collect();

        info!(stage = %stage, category = %category, "Stage failure analyzed");

        StageFailure {
            stage: stage.to_string(),
            error_type: error_type.to_string(),
            message: if message.is_empty() {
                "Unknown error".to_string()
            } else {
                message.to_string()
            },
            category,
            matched_categories: matched,
            suggested_fixes,
            reported_at: None,
        }
    }
}
