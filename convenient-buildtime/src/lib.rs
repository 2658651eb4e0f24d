//! Build-time analytics for staged builds.
//!
//! This crate observes a multi-stage build (or any staged pipeline) and turns
//! stage timings and sampled resource usage into:
//! - a bottleneck report ranking stages by their share of build time
//! - a regression verdict and trend against previous runs
//! - a composite efficiency score with a letter grade
//! - resource alerts and diagnoses of failed stages
//!
//! # Architecture
//!
//! ```text
//! StageTimer ─┐
//!             ├─> RunSummary ─> BottleneckAnalyzer  ─┐
//! Sampler ────┘        │        RegressionDetector  ─┼─> ReportSet
//!                      │        EfficiencyScorer    ─┘
//!                      └─> HistoryStore (JSON file, bounded)
//! ```
//!
//! [`RunCoordinator`] owns one run. The host build tool drives it through the
//! [`StageListener`] interface and calls [`RunCoordinator::finish`] at the end.
//! The engine never fails the build it observes: missing data, unreadable
//! history and failed samples all degrade to "no signal" values.
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use convenient_buildtime::{RunCoordinator, StageListener, TrackerConfig};
//!
//! let run = RunCoordinator::start(TrackerConfig::default(), Utc::now());
//! run.on_stage_start("compile", Utc::now());
//! // ... compile ...
//! run.on_stage_end("compile", Utc::now());
//! run.on_run_end(Utc::now());
//!
//! let reports = run.finish();
//! println!("{}", reports.to_markdown());
//! ```

pub mod alerts;
pub mod bottleneck;
pub mod build_metrics;
pub mod config;
pub mod coordinator;
pub mod efficiency;
pub mod error;
pub mod failure;
pub mod history;
pub mod regression;
pub mod reports;
pub mod resource_monitor;
pub mod stage_timer;

pub use alerts::{AlertThresholds, ResourceAlert};
pub use bottleneck::{
    BottleneckAnalyzer, BottleneckReport, BottleneckThresholds, RankedStage, Recommendation,
    StageCategory,
};
pub use build_metrics::{DurationMap, RunId, RunSummary, StageDuration, TOTAL_STAGE, Timestamp};
pub use config::{StageSpeed, TrackerConfig};
pub use coordinator::{RunCoordinator, StageListener};
pub use efficiency::{EfficiencyReport, EfficiencyScorer, LetterGrade, Suggestion};
pub use error::{BuildTimeError, BuildTimeResult};
pub use failure::{FailureAnalyzer, FailureCategory, StageFailure};
pub use history::{DEFAULT_HISTORY_CAPACITY, HistoryRecord, HistoryStore};
pub use regression::{RegressionDetector, RegressionReport, Trend};
pub use reports::ReportSet;
pub use resource_monitor::{
    CollectorCounters, ProbeReading, ResourceAggregate, ResourceProbe, ResourceSample,
    SampleStore, Sampler, SysinfoProbe,
};
pub use stage_timer::StageTimer;
