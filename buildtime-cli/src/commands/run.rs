//! Run command: execute stages and report on the build

use super::{OutputFormat, StageCommand, load_config};
use chrono::Utc;
use convenient_buildtime::{
    BuildTimeError, BuildTimeResult, ProbeReading, ReportSet, ResourceProbe, RunCoordinator,
    StageListener, SysinfoProbe, TrackerConfig,
};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

/// Follows whichever stage command is currently running
///
/// One [`SysinfoProbe`] lives for the whole run and is pointed at each new
/// stage shell, so the stage's children are counted and the process table is
/// not reloaded per stage. Between stages there is nothing to sample and
/// reads fail, which the sampler skips.
struct ActiveChildProbe {
    active_pid: Arc<AtomicU32>,
    probe: SysinfoProbe,
    tracked: u32,
}

impl ActiveChildProbe {
    fn new(active_pid: Arc<AtomicU32>) -> Self {
        Self {
            active_pid,
            probe: SysinfoProbe::for_pid(0),
            tracked: 0,
        }
    }
}

impl ResourceProbe for ActiveChildProbe {
    fn read(&mut self) -> BuildTimeResult<ProbeReading> {
        let pid = self.active_pid.load(Ordering::SeqCst);
        if pid == 0 {
            return Err(BuildTimeError::Sampling("No stage running".to_string()));
        }
        if pid != self.tracked {
            self.tracked = pid;
            self.probe.retarget(pid);
        }
        self.probe.read()
    }
}

/// Execute all stages; returns whether every stage succeeded
pub fn execute(
    config_path: Option<&Path>,
    history: Option<PathBuf>,
    stages: &[StageCommand],
    keep_going: bool,
    format: OutputFormat,
) -> Result<bool, Box<dyn std::error::Error>> {
    let config = load_config(config_path, history)?;
    let active_pid = Arc::new(AtomicU32::new(0));
    let run = RunCoordinator::start_with_probe(
        config.clone(),
        Utc::now(),
        Box::new(ActiveChildProbe::new(Arc::clone(&active_pid))),
    );

    let mut succeeded = true;
    for stage in stages {
        if !succeeded && !keep_going {
            info!(stage = %stage.name, "Skipping stage after failure");
            continue;
        }
        if !run_stage(&run, stage, &active_pid) {
            succeeded = false;
        }
    }
    run.on_run_end(Utc::now());

    let reports = run.finish();
    match format {
        OutputFormat::Text => print_summary(&reports, &config),
        OutputFormat::Json => println!("{}", reports.to_json()?),
        OutputFormat::Markdown => println!("{}", reports.to_markdown()),
    }
    Ok(succeeded)
}

fn run_stage(run: &RunCoordinator, stage: &StageCommand, active_pid: &AtomicU32) -> bool {
    eprintln!("▶️  {}: {}", stage.name, stage.command);
    run.on_stage_start(&stage.name, Utc::now());

    let outcome = Command::new("sh")
        .arg("-c")
        .arg(&stage.command)
        .spawn()
        .and_then(|mut child| {
            active_pid.store(child.id(), Ordering::SeqCst);
            let status = child.wait();
            active_pid.store(0, Ordering::SeqCst);
            status
        });

    let ok = match outcome {
        Ok(status) if status.success() => true,
        Ok(status) => {
            let message = match status.code() {
                Some(code) => format!("Command exited with status {code}"),
                None => "Command terminated by signal".to_string(),
            };
            run.on_stage_failure(&stage.name, "ExitStatus", &message, Utc::now());
            false
        }
        Err(e) => {
            warn!(stage = %stage.name, error = %e, "Could not run stage command");
            run.on_stage_failure(&stage.name, "SpawnError", &e.to_string(), Utc::now());
            false
        }
    };
    run.on_stage_end(&stage.name, Utc::now());
    ok
}

fn print_summary(reports: &ReportSet, config: &TrackerConfig) {
    let summary = &reports.summary;

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║                  BUILD TIME SUMMARY                    ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    println!("⏱️  Total: {:.2}s", summary.total_millis() as f64 / 1000.0);
    for stage in summary.stage_durations().stages() {
        println!(
            "  {} {:<24} {:>8}ms",
            config.classify(stage.millis),
            stage.name,
            stage.millis
        );
    }

    let resources = summary.resources();
    if resources.has_data() {
        println!(
            "\n💾 Peak memory: {} MB, average CPU: {:.1}%",
            resources.peak_memory_bytes / (1024 * 1024),
            resources.avg_cpu_fraction * 100.0
        );
    }

    if let Some(bottleneck) = reports.bottleneck.as_ref().filter(|b| b.has_data()) {
        println!(
            "\n🐢 Bottleneck: {} ({:.1}% of stage time)",
            bottleneck.primary_stage, bottleneck.primary_percentage
        );
        for recommendation in &bottleneck.recommendations {
            println!("   • {recommendation}");
        }
    }

    if let Some(regression) = &reports.regression {
        if regression.is_regression {
            println!(
                "\n🚨 Regression: {:.2}x slower than the average of {} runs",
                regression.factor, regression.samples_considered
            );
        } else if regression.is_improvement {
            println!(
                "\n🚀 Improvement: {:.2}x of the average of {} runs",
                regression.factor, regression.samples_considered
            );
        }
        println!("\n📊 Trend: {}", regression.trend);
    }

    if let Some(efficiency) = &reports.efficiency {
        println!(
            "\n🏆 Efficiency: {:.0}/100 ({}) - {}",
            efficiency.total_score,
            efficiency.letter_grade,
            efficiency.description()
        );
        for suggestion in &efficiency.suggestions {
            println!("   • {suggestion}");
        }
    }

    for alert in &reports.alerts {
        println!("\n{alert}");
    }

    for failure in &reports.failures {
        println!("\n{failure}");
        for fix in &failure.suggested_fixes {
            println!("   • {fix}");
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use convenient_buildtime::HistoryStore;
    use tempfile::TempDir;

    fn stage(name: &str, command: &str) -> StageCommand {
        StageCommand {
            name: name.to_string(),
            command: command.to_string(),
        }
    }

    #[test]
    fn test_idle_probe_reports_no_stage() {
        let mut probe = ActiveChildProbe::new(Arc::new(AtomicU32::new(0)));
        assert!(matches!(probe.read(), Err(BuildTimeError::Sampling(_))));
    }

    #[test]
    fn test_probe_follows_busy_stage_children() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("timeout 2 sh -c 'while :; do :; done'; true")
            .spawn()
            .unwrap();
        let active_pid = Arc::new(AtomicU32::new(child.id()));
        let mut probe = ActiveChildProbe::new(Arc::clone(&active_pid));

        // first read of a new stage only primes CPU counters
        assert!(probe.read().is_err());

        let mut readings = Vec::new();
        for _ in 0..4 {
            std::thread::sleep(std::time::Duration::from_millis(250));
            if let Ok(reading) = probe.read() {
                readings.push(reading);
            }
        }
        active_pid.store(0, Ordering::SeqCst);
        let _ = child.wait();

        assert!(!readings.is_empty());
        assert!(readings.iter().any(|r| r.cpu_fraction > 0.0));
        assert!(readings.iter().all(|r| r.memory_used_bytes > 0));
        assert!(matches!(probe.read(), Err(BuildTimeError::Sampling(_))));
    }

    #[test]
    fn test_failed_stage_stops_the_run() {
        let tmp = TempDir::new().unwrap();
        let history = tmp.path().join("history.json");
        let stages = [stage("compile", "exit 3"), stage("test", "true")];

        let ok = execute(None, Some(history.clone()), &stages, false, OutputFormat::Json).unwrap();
        assert!(!ok);

        let runs = HistoryStore::load(&history);
        assert_eq!(runs.len(), 1);
    }

    #[test]
    fn test_successful_run_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let history = tmp.path().join("history.json");
        let stages = [stage("compile", "true"), stage("test", "true")];

        assert!(execute(None, Some(history.clone()), &stages, false, OutputFormat::Text).unwrap());
        assert!(execute(None, Some(history.clone()), &stages, true, OutputFormat::Markdown).unwrap());
        assert_eq!(HistoryStore::load(&history).len(), 2);
    }
}
