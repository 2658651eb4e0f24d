//! Stage start/end recording
//!
//! The host build tool reports lifecycle events from its own callback
//! threads. [`StageTimer`] turns them into a [`DurationMap`] without ever
//! failing: unknown ends, duplicate starts and the reserved `total` name are
//! ignored with a log line.

use crate::build_metrics::{DurationMap, TOTAL_STAGE, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Thread-safe recorder of stage timestamps for one run
#[derive(Clone, Default)]
pub struct StageTimer {
    inner: Arc<Mutex<TimerInner>>,
}

#[derive(Default)]
struct TimerInner {
    started: HashMap<String, Timestamp>,
    durations: DurationMap,
}

impl StageTimer {
    /// Create an empty timer
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TimerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that `stage` started at `at`
    ///
    /// Returns `false` when the start was ignored: the stage is already
    /// running (first writer wins) or the name is reserved.
    pub fn record_start(&self, stage: &str, at: Timestamp) -> bool {
        if stage == TOTAL_STAGE {
            warn!(stage = %stage, "Ignoring start of reserved stage name");
            return false;
        }

        let mut inner = self.lock();
        if inner.started.contains_key(stage) {
            debug!(stage = %stage, "Stage already running, keeping first start");
            return false;
        }
        let _ = inner.started.insert(stage.to_string(), at);
        info!(stage = %stage, "Stage started");
        true
    }

    /// Record that `stage` ended at `at`
    ///
    /// Returns the stored duration, or `None` when no start was recorded.
    /// An end earlier than its start is stored as zero.
    pub fn record_end(&self, stage: &str, at: Timestamp) -> Option<u64> {
        let mut inner = self.lock();
        let Some(start) = inner.started.remove(stage) else {
            debug!(stage = %stage, "Stage end without start, ignoring");
            return None;
        };

        let millis = u64::try_from((at - start).num_milliseconds()).unwrap_or(0);
        let _ = inner.durations.insert(stage, millis);
        info!(stage = %stage, duration_ms = millis, "Stage completed");
        Some(millis)
    }

    /// Snapshot of all completed stages
    pub fn durations(&self) -> DurationMap {
        self.lock().durations.clone()
    }

    /// Stages started but not yet completed
    pub fn running(&self) -> Vec<String> {
        let inner = self.lock();
        let mut names: Vec<_> = inner.started.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tracing_test::traced_test;

    #[test]
    fn test_start_end_records_duration() {
        let timer = StageTimer::new();
        let t0 = Utc::now();

        assert!(timer.record_start("compile", t0));
        assert_eq!(
            timer.record_end("compile", t0 + Duration::milliseconds(3200)),
            Some(3200)
        );
        assert_eq!(timer.durations().get("compile"), Some(3200));
        assert!(timer.running().is_empty());
    }

    #[traced_test]
    #[test]
    fn test_end_without_start_is_ignored() {
        let timer = StageTimer::new();
        assert_eq!(timer.record_end("deploy", Utc::now()), None);
        assert!(!timer.durations().contains("deploy"));
        assert!(logs_contain("Stage end without start"));
    }

    #[test]
    fn test_first_start_wins() {
        let timer = StageTimer::new();
        let t0 = Utc::now();

        assert!(timer.record_start("test", t0));
        assert!(!timer.record_start("test", t0 + Duration::milliseconds(500)));
        assert_eq!(
            timer.record_end("test", t0 + Duration::milliseconds(1000)),
            Some(1000)
        );
    }

    #[test]
    fn test_restart_after_completion_overwrites() {
        let timer = StageTimer::new();
        let t0 = Utc::now();

        let _ = timer.record_start("test", t0);
        let _ = timer.record_end("test", t0 + Duration::milliseconds(100));
        let _ = timer.record_start("test", t0 + Duration::milliseconds(200));
        let _ = timer.record_end("test", t0 + Duration::milliseconds(900));

        let durations = timer.durations();
        assert_eq!(durations.get("test"), Some(700));
        assert_eq!(durations.len(), 1);
    }

    #[test]
    fn test_reserved_total_is_rejected() {
        let timer = StageTimer::new();
        let t0 = Utc::now();

        assert!(!timer.record_start(TOTAL_STAGE, t0));
        assert_eq!(timer.record_end(TOTAL_STAGE, t0), None);
        assert!(timer.durations().is_empty());
    }

    #[test]
    fn test_end_before_start_clamps_to_zero() {
        let timer = StageTimer::new();
        let t0 = Utc::now();

        let _ = timer.record_start("package", t0);
        assert_eq!(
            timer.record_end("package", t0 - Duration::milliseconds(50)),
            Some(0)
        );
    }

    #[test]
    fn test_concurrent_distinct_stages() {
        let timer = StageTimer::new();
        let t0 = Utc::now();

        std::thread::scope(|s| {
            for i in 0..8 {
                let timer = timer.clone();
                let _ = s.spawn(move || {
                    let name = format!("stage-{i}");
                    let _ = timer.record_start(&name, t0);
                    let _ = timer.record_end(&name, t0 + Duration::milliseconds(i * 10));
                });
            }
        });

        let durations = timer.durations();
        assert_eq!(durations.len(), 8);
        assert_eq!(durations.get("stage-7"), Some(70));
    }
}
