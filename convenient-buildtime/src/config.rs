//! Tracker configuration
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration:
//!
//! ```yaml
//! fast_threshold_ms: 1000
//! warn_threshold_ms: 5000
//! sampling_interval_ms: 1000
//! regression_threshold: 1.5
//! trend_stable_tolerance: 0.05
//! history_capacity: 20
//! history_file: target/build-history.json
//! enable_system_monitoring: true
//! alerts:
//!   peak_memory_bytes: 2147483648
//! ```

use crate::alerts::AlertThresholds;
use crate::bottleneck::BottleneckThresholds;
use crate::error::{BuildTimeError, BuildTimeResult};
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::regression::{DEFAULT_REGRESSION_THRESHOLD, DEFAULT_STABLE_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// How a stage duration compares with the configured thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageSpeed {
    /// Below the fast threshold
    Fast,
    /// Between the fast and warn thresholds
    Warn,
    /// At or above the warn threshold
    Slow,
}

impl fmt::Display for StageSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "🟢"),
            Self::Warn => write!(f, "🟡"),
            Self::Slow => write!(f, "🔴"),
        }
    }
}

/// Values consumed by the run coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Stages faster than this are fast
    pub fast_threshold_ms: u64,
    /// Stages at or above this are slow
    pub warn_threshold_ms: u64,
    /// Resource sampling period
    pub sampling_interval_ms: u64,
    /// Slowdown factor that counts as a regression, > 1.0
    pub regression_threshold: f64,
    /// Relative spread (max - min) / mean of the last three runs that still
    /// reads as a stable trend
    pub trend_stable_tolerance: f64,
    /// Runs kept in the history file
    pub history_capacity: usize,
    /// Where history is persisted
    pub history_file: PathBuf,
    /// Sample memory and CPU during the run
    pub enable_system_monitoring: bool,
    /// Produce a bottleneck report
    pub enable_bottleneck_analysis: bool,
    /// Compare against history
    pub enable_regression_detection: bool,
    /// Produce an efficiency score
    pub enable_efficiency_scoring: bool,
    /// Diagnose failed stages
    pub enable_failure_analysis: bool,
    /// Resource alert limits
    pub alerts: AlertThresholds,
    /// Bottleneck recommendation limits
    pub bottleneck: BottleneckThresholds,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            fast_threshold_ms: 1000,
            warn_threshold_ms: 5000,
            sampling_interval_ms: 1000,
            regression_threshold: DEFAULT_REGRESSION_THRESHOLD,
            trend_stable_tolerance: DEFAULT_STABLE_TOLERANCE,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_file: PathBuf::from("target/build-history.json"),
            enable_system_monitoring: true,
            enable_bottleneck_analysis: true,
            enable_regression_detection: true,
            enable_efficiency_scoring: true,
            enable_failure_analysis: true,
            alerts: AlertThresholds::default(),
            bottleneck: BottleneckThresholds::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> BuildTimeResult<Self> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: &Path) -> BuildTimeResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&content)?;
        info!(path = %path.display(), "Loaded tracker configuration");
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> BuildTimeResult<()> {
        if !self.regression_threshold.is_finite() || self.regression_threshold <= 1.0 {
            return Err(BuildTimeError::InvalidConfig(format!(
                "regression_threshold must be greater than 1.0, got {}",
                self.regression_threshold
            )));
        }
        if !self.trend_stable_tolerance.is_finite() || self.trend_stable_tolerance < 0.0 {
            return Err(BuildTimeError::InvalidConfig(format!(
                "trend_stable_tolerance must be a non-negative number, got {}",
                self.trend_stable_tolerance
            )));
        }
        if self.sampling_interval_ms == 0 {
            return Err(BuildTimeError::InvalidConfig(
                "sampling_interval_ms must be positive".to_string(),
            ));
        }
        if self.warn_threshold_ms < self.fast_threshold_ms {
            return Err(BuildTimeError::InvalidConfig(format!(
                "warn_threshold_ms ({}) is below fast_threshold_ms ({})",
                self.warn_threshold_ms, self.fast_threshold_ms
            )));
        }
        if self.history_capacity == 0 {
            return Err(BuildTimeError::InvalidConfig(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Place a stage duration on the fast/warn/slow scale
    pub fn classify(&self, duration_ms: u64) -> StageSpeed {
        if duration_ms < self.fast_threshold_ms {
            StageSpeed::Fast
        } else if duration_ms < self.warn_threshold_ms {
            StageSpeed::Warn
        } else {
            StageSpeed::Slow
        }
    }

    /// Sampling period as a duration
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history_capacity, 20);
        assert_eq!(config.sampling_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(TrackerConfig::from_yaml_str("").unwrap(), TrackerConfig::default());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
regression_threshold: 2.0
trend_stable_tolerance: 0.2
history_capacity: 5
enable_system_monitoring: false
alerts:
  avg_cpu_fraction: 0.9
"#;
        let config = TrackerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.regression_threshold, 2.0);
        assert_eq!(config.trend_stable_tolerance, 0.2);
        assert_eq!(config.history_capacity, 5);
        assert!(!config.enable_system_monitoring);
        assert!(config.enable_bottleneck_analysis);
        assert_eq!(config.alerts.avg_cpu_fraction, 0.9);
        assert_eq!(config.alerts.gc_millis, 5000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for yaml in [
            "regression_threshold: 1.0",
            "trend_stable_tolerance: -0.1",
            "sampling_interval_ms: 0",
            "fast_threshold_ms: 9000",
            "history_capacity: 0",
        ] {
            let err = TrackerConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, BuildTimeError::InvalidConfig(_)), "{yaml}");
        }
    }

    #[test]
    fn test_malformed_yaml() {
        let err = TrackerConfig::from_yaml_str("history_capacity: [").unwrap_err();
        assert!(matches!(err, BuildTimeError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "warn_threshold_ms: 8000\n").unwrap();
        let config = TrackerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.warn_threshold_ms, 8000);
    }

    #[test]
    fn test_classify() {
        let config = TrackerConfig::default();
        assert_eq!(config.classify(200), StageSpeed::Fast);
        assert_eq!(config.classify(1000), StageSpeed::Warn);
        assert_eq!(config.classify(4999), StageSpeed::Warn);
        assert_eq!(config.classify(5000), StageSpeed::Slow);
    }
}
