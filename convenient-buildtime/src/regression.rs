//! Regression detection against run history
//!
//! Two independent signals come out of a detection:
//!
//! - the **verdict**: current total time divided by the average of prior runs,
//!   compared against a threshold factor;
//! - the **trend**: whether the last three prior runs got monotonically
//!   slower or faster.
//!
//! Both are always reported, even when they disagree.

use crate::build_metrics::RunSummary;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Factor used when the configured one is unusable
pub const DEFAULT_REGRESSION_THRESHOLD: f64 = 1.5;

/// Relative spread under which a non-monotonic trend window is stable
pub const DEFAULT_STABLE_TOLERANCE: f64 = 0.05;

/// Prior runs needed before a verdict is given
pub const MIN_PRIOR_RUNS: usize = 2;

/// Direction of recent runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trend {
    /// Fewer than three prior runs
    InsufficientData,
    /// Each recent run faster than the one before
    Improving,
    /// Each recent run slower than the one before
    Degrading,
    /// Not monotonic, but within the stable tolerance
    Stable,
    /// Not monotonic and spread out
    Variable,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data"),
            Self::Improving => write!(f, "📉 improving"),
            Self::Degrading => write!(f, "📈 degrading"),
            Self::Stable => write!(f, "➡️  stable"),
            Self::Variable => write!(f, "〰️  variable"),
        }
    }
}

/// Result of comparing one run against history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionReport {
    /// Current run is slower than the threshold allows
    pub is_regression: bool,
    /// Current run is faster by at least the inverse threshold
    pub is_improvement: bool,
    /// Current total divided by the prior average
    pub factor: f64,
    /// Current run total
    pub current_millis: u64,
    /// Average total of the prior runs
    pub average_millis: f64,
    /// Direction of the most recent prior runs
    pub trend: Trend,
    /// Prior runs that went into the average
    pub samples_considered: usize,
}

impl RegressionReport {
    fn insufficient(current_millis: u64, samples_considered: usize) -> Self {
        Self {
            is_regression: false,
            is_improvement: false,
            factor: 1.0,
            current_millis,
            average_millis: current_millis as f64,
            trend: Trend::InsufficientData,
            samples_considered,
        }
    }

    /// Neither a regression nor an improvement
    pub fn is_stable(&self) -> bool {
        !self.is_regression && !self.is_improvement
    }

    /// Signed difference to the average, in milliseconds
    pub fn difference_millis(&self) -> f64 {
        self.current_millis as f64 - self.average_millis
    }
}

/// Compares a run with the runs before it
#[derive(Debug, Clone)]
pub struct RegressionDetector {
    trend_window: usize,
    stable_tolerance: f64,
}

impl Default for RegressionDetector {
    fn default() -> Self {
        Self {
            trend_window: 3,
            stable_tolerance: DEFAULT_STABLE_TOLERANCE,
        }
    }
}

impl RegressionDetector {
    /// Detector with a three-run trend window
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative spread (max - min) / mean under which a non-monotonic
    /// window counts as stable instead of variable
    pub fn with_stable_tolerance(mut self, tolerance: f64) -> Self {
        self.stable_tolerance = tolerance.max(0.0);
        self
    }

    /// Compare `current` with `history`
    ///
    /// `current` is excluded from `history` by identity if present, so the
    /// history may be passed either before or after appending the run.
    pub fn detect(&self, current: &RunSummary, history: &[RunSummary], threshold: f64) -> RegressionReport {
        let threshold = if threshold.is_finite() && threshold > 1.0 {
            threshold
        } else {
            warn!(threshold, "Regression threshold must be > 1.0, using default");
            DEFAULT_REGRESSION_THRESHOLD
        };

        let prior: Vec<u64> = history
            .iter()
            .filter(|run| run.id() != current.id())
            .map(RunSummary::total_millis)
            .collect();
        let current_millis = current.total_millis();

        if prior.len() < MIN_PRIOR_RUNS {
            return RegressionReport::insufficient(current_millis, prior.len());
        }

        let average = prior.iter().map(|&ms| ms as f64).sum::<f64>() / prior.len() as f64;
        let trend = self.trend(&prior);
        if average <= 0.0 {
            return RegressionReport {
                trend,
                ..RegressionReport::insufficient(current_millis, prior.len())
            };
        }

        let factor = current_millis as f64 / average;
        let report = RegressionReport {
            is_regression: factor >= threshold,
            is_improvement: factor <= 1.0 / threshold,
            factor,
            current_millis,
            average_millis: average,
            trend,
            samples_considered: prior.len(),
        };

        if report.is_regression {
            warn!(factor, current_ms = current_millis, average_ms = average, "Build time regression detected");
        } else {
            info!(factor, trend = ?trend, "Build time compared with history");
        }
        report
    }

    fn trend(&self, prior: &[u64]) -> Trend {
        if prior.len() < self.trend_window {
            return Trend::InsufficientData;
        }
        let window = &prior[prior.len() - self.trend_window..];

        if window.windows(2).all(|w| w[1] > w[0]) {
            return Trend::Degrading;
        }
        if window.windows(2).all(|w| w[1] < w[0]) {
            return Trend::Improving;
        }

        let min = window.iter().copied().min().unwrap_or(0) as f64;
        let max = window.iter().copied().max().unwrap_or(0) as f64;
        let mean = window.iter().map(|&ms| ms as f64).sum::<f64>() / window.len() as f64;
        if mean <= 0.0 || (max - min) / mean <= self.stable_tolerance {
            Trend::Stable
        } else {
            Trend::Variable
        }
    }
}
