//! Run lifecycle
//!
//! A [`RunCoordinator`] lives for exactly one run. The host drives it through
//! the narrow [`StageListener`] interface from any number of callback
//! threads, then calls [`RunCoordinator::finish`] once to stop sampling,
//! build the [`RunSummary`], run the enabled analyzers and persist history.
//!
//! Nothing here returns an error to the host. Problems with the probe or the
//! history file are logged and degrade to "no data".

use crate::bottleneck::BottleneckAnalyzer;
use crate::build_metrics::{RunSummary, TOTAL_STAGE, Timestamp};
use crate::config::TrackerConfig;
use crate::efficiency::EfficiencyScorer;
use crate::failure::{FailureAnalyzer, StageFailure};
use crate::history::HistoryStore;
use crate::regression::RegressionDetector;
use crate::reports::ReportSet;
use crate::resource_monitor::{ResourceProbe, Sampler, SysinfoProbe};
use crate::stage_timer::StageTimer;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Lifecycle events the engine consumes from a host build tool
pub trait StageListener: Send + Sync {
    /// A stage began
    fn on_stage_start(&self, stage: &str, at: Timestamp);

    /// A stage completed, successfully or not
    fn on_stage_end(&self, stage: &str, at: Timestamp);

    /// A stage failed; the host still reports its end separately
    fn on_stage_failure(&self, _stage: &str, _error_type: &str, _message: &str, _at: Timestamp) {}

    /// The whole run finished
    fn on_run_end(&self, at: Timestamp);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run-scoped state, dropped once the summary is built
struct RunState {
    started_at: Timestamp,
    ended_at: Mutex<Option<Timestamp>>,
    timer: StageTimer,
    sampler: Sampler,
    failures: Mutex<Vec<StageFailure>>,
}

/// Orchestrates one run from start to report set
pub struct RunCoordinator {
    config: TrackerConfig,
    history: HistoryStore,
    state: RunState,
}

impl RunCoordinator {
    /// Start a run sampling the current process
    pub fn start(config: TrackerConfig, started_at: Timestamp) -> Self {
        let probe: Option<Box<dyn ResourceProbe>> = if config.enable_system_monitoring {
            match SysinfoProbe::current() {
                Ok(probe) => Some(Box::new(probe)),
                Err(e) => {
                    warn!(error = %e, "System monitoring unavailable");
                    None
                }
            }
        } else {
            None
        };
        Self::start_inner(config, started_at, probe)
    }

    /// Start a run with a caller-supplied probe, e.g. one that watches a child process
    pub fn start_with_probe(
        config: TrackerConfig,
        started_at: Timestamp,
        probe: Box<dyn ResourceProbe>,
    ) -> Self {
        let probe = config.enable_system_monitoring.then_some(probe);
        Self::start_inner(config, started_at, probe)
    }

    fn start_inner(
        config: TrackerConfig,
        started_at: Timestamp,
        probe: Option<Box<dyn ResourceProbe>>,
    ) -> Self {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Questionable tracker configuration, continuing");
        }

        let history = HistoryStore::load(&config.history_file);
        let sampler = match probe {
            Some(probe) => Sampler::start(config.sampling_interval(), probe),
            None => Sampler::disabled(),
        };
        info!(history_runs = history.len(), sampling = sampler.is_running(), "Build run started");

        Self {
            config,
            history,
            state: RunState {
                started_at,
                ended_at: Mutex::new(None),
                timer: StageTimer::new(),
                sampler,
                failures: Mutex::new(Vec::new()),
            },
        }
    }

    /// Configuration of this run
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// History as loaded at the start of the run
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Stop sampling, analyze the run and persist history
    ///
    /// Uses the time passed to [`StageListener::on_run_end`], or now if the
    /// host never reported it.
    pub fn finish(self) -> ReportSet {
        let Self {
            config,
            mut history,
            state,
        } = self;

        let recorded_end = *lock(&state.ended_at);
        let ended_at = recorded_end.unwrap_or_else(Utc::now);
        let resources = state.sampler.stop();

        let unfinished = state.timer.running();
        if !unfinished.is_empty() {
            warn!(stages = ?unfinished, "Stages never reported an end, leaving them out");
        }

        let total_millis =
            u64::try_from((ended_at - state.started_at).num_milliseconds()).unwrap_or(0);
        let mut durations = state.timer.durations();
        let _ = durations.insert(TOTAL_STAGE, total_millis);
        let summary = RunSummary::new(ended_at, total_millis, durations, resources);

        let bottleneck = config.enable_bottleneck_analysis.then(|| {
            BottleneckAnalyzer::with_thresholds(config.bottleneck.clone())
                .analyze(summary.stage_durations())
        });
        let regression = config.enable_regression_detection.then(|| {
            RegressionDetector::new()
                .with_stable_tolerance(config.trend_stable_tolerance)
                .detect(&summary, history.entries(), config.regression_threshold)
        });
        let efficiency = config
            .enable_efficiency_scoring
            .then(|| EfficiencyScorer::new().score(&summary, history.entries()));
        let alerts = if config.enable_system_monitoring {
            config.alerts.evaluate(summary.resources())
        } else {
            Vec::new()
        };
        let failures = if config.enable_failure_analysis {
            std::mem::take(&mut *lock(&state.failures))
        } else {
            Vec::new()
        };

        history.append(summary.clone());
        if let Err(e) = history.save(&config.history_file, config.history_capacity) {
            warn!(
                path = %config.history_file.display(),
                error = %e,
                "Could not save build history, skipping"
            );
        }

        info!(
            run = %summary.id(),
            total_ms = total_millis,
            stages = summary.stage_durations().stages().count(),
            failures = failures.len(),
            "Build run finished"
        );

        ReportSet {
            summary,
            bottleneck,
            regression,
            efficiency,
            alerts,
            failures,
        }
    }
}

impl StageListener for RunCoordinator {
    fn on_stage_start(&self, stage: &str, at: Timestamp) {
        let _ = self.state.timer.record_start(stage, at);
    }

    fn on_stage_end(&self, stage: &str, at: Timestamp) {
        let _ = self.state.timer.record_end(stage, at);
    }

    fn on_stage_failure(&self, stage: &str, error_type: &str, message: &str, at: Timestamp) {
        if !self.config.enable_failure_analysis {
            return;
        }
        let failure = StageFailure {
            reported_at: Some(at),
            ..FailureAnalyzer::new().analyze(stage, error_type, message)
        };
        lock(&self.state.failures).push(failure);
    }

    fn on_run_end(&self, at: Timestamp) {
        let mut ended = lock(&self.state.ended_at);
        if ended.is_none() {
            *ended = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildTimeResult;
    use crate::resource_monitor::ProbeReading;
    use chrono::Duration;
    use tempfile::TempDir;

    struct SteadyProbe;

    impl ResourceProbe for SteadyProbe {
        fn read(&mut self) -> BuildTimeResult<ProbeReading> {
            Ok(ProbeReading {
                memory_used_bytes: 64 * 1024 * 1024,
                cpu_fraction: 0.7,
            })
        }
    }

    fn config(dir: &TempDir) -> TrackerConfig {
        TrackerConfig {
            history_file: dir.path().join("history.json"),
            sampling_interval_ms: 10,
            ..TrackerConfig::default()
        }
    }

    #[test]
    fn test_run_produces_all_reports() {
        let tmp = TempDir::new().unwrap();
        let t0 = Utc::now();
        let run = RunCoordinator::start_with_probe(config(&tmp), t0, Box::new(SteadyProbe));

        run.on_stage_start("compile", t0);
        run.on_stage_end("compile", t0 + Duration::milliseconds(300));
        run.on_stage_start("test", t0 + Duration::milliseconds(300));
        run.on_stage_end("test", t0 + Duration::milliseconds(1000));
        run.on_run_end(t0 + Duration::milliseconds(1100));
        let reports = run.finish();

        assert_eq!(reports.summary.total_millis(), 1100);
        assert_eq!(reports.summary.stage_durations().total(), Some(1100));
        assert!(reports.summary.resources().has_data());
        assert_eq!(reports.bottleneck.unwrap().primary_stage, "test");
        assert!(reports.regression.is_some());
        assert!(reports.efficiency.is_some());
        assert!(reports.alerts.is_empty());
        assert_eq!(HistoryStore::load(&tmp.path().join("history.json")).len(), 1);
    }

    #[test]
    fn test_disabled_analyzers_leave_slots_empty() {
        let tmp = TempDir::new().unwrap();
        let config = TrackerConfig {
            enable_system_monitoring: false,
            enable_bottleneck_analysis: false,
            enable_regression_detection: false,
            enable_efficiency_scoring: false,
            enable_failure_analysis: false,
            ..config(&tmp)
        };
        let run = RunCoordinator::start_with_probe(config, Utc::now(), Box::new(SteadyProbe));
        run.on_stage_failure("compile", "CompilationError", "boom", Utc::now());
        let reports = run.finish();

        assert!(reports.bottleneck.is_none());
        assert!(reports.regression.is_none());
        assert!(reports.efficiency.is_none());
        assert!(reports.failures.is_empty());
        assert!(!reports.summary.resources().has_data());
    }

    #[test]
    fn test_failures_are_recorded_with_time() {
        let tmp = TempDir::new().unwrap();
        let t0 = Utc::now();
        let run = RunCoordinator::start_with_probe(config(&tmp), t0, Box::new(SteadyProbe));
        run.on_stage_start("compile", t0);
        run.on_stage_failure("compile", "CompilationError", "cannot find symbol", t0);
        run.on_stage_end("compile", t0 + Duration::milliseconds(50));
        let reports = run.finish();

        assert_eq!(reports.failures.len(), 1);
        assert_eq!(reports.failures[0].reported_at, Some(t0));
        assert_eq!(reports.summary.stage_durations().get("compile"), Some(50));
    }

    #[test]
    fn test_first_run_end_wins() {
        let tmp = TempDir::new().unwrap();
        let t0 = Utc::now();
        let run = RunCoordinator::start_with_probe(config(&tmp), t0, Box::new(SteadyProbe));
        run.on_run_end(t0 + Duration::milliseconds(500));
        run.on_run_end(t0 + Duration::milliseconds(900));
        assert_eq!(run.finish().summary.total_millis(), 500);
    }

    #[test]
    fn test_unwritable_history_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let config = TrackerConfig {
            history_file: blocker.join("history.json"),
            ..config(&tmp)
        };
        let reports =
            RunCoordinator::start_with_probe(config, Utc::now(), Box::new(SteadyProbe)).finish();
        assert!(reports.efficiency.is_some());
    }
}
