//! System resource sampling
//!
//! A [`Sampler`] owns one background thread that reads a [`ResourceProbe`] at
//! a fixed interval and appends to a shared [`SampleStore`]. Failed reads are
//! dropped; stopping the sampler joins the thread, so the aggregate it returns
//! includes the last in-flight sample.

use crate::build_metrics::Timestamp;
use crate::error::{BuildTimeError, BuildTimeResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, System};
use tracing::{debug, info, warn};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// One instantaneous resource reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSample {
    /// When the reading was taken
    pub timestamp: Timestamp,
    /// Memory in use by the observed process
    pub memory_used_bytes: u64,
    /// CPU utilization across all cores, 0.0..=1.0
    pub cpu_fraction: f64,
}

/// Raw values returned by a probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReading {
    /// Memory in use
    pub memory_used_bytes: u64,
    /// CPU utilization; clamped into 0.0..=1.0 by the store
    pub cpu_fraction: f64,
}

/// Cumulative garbage-collector counters of a managed runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorCounters {
    /// Number of collections so far
    pub count: u64,
    /// Time spent collecting so far
    pub millis: u64,
}

impl CollectorCounters {
    fn since(self, baseline: CollectorCounters) -> CollectorCounters {
        CollectorCounters {
            count: self.count.saturating_sub(baseline.count),
            millis: self.millis.saturating_sub(baseline.millis),
        }
    }
}

/// Source of resource readings
///
/// Implementations may fail on any single read; the sampler logs and skips.
pub trait ResourceProbe: Send {
    /// Read current memory and CPU usage
    fn read(&mut self) -> BuildTimeResult<ProbeReading>;

    /// Cumulative collector counters, when the observed process has a GC
    fn collector_counters(&mut self) -> Option<CollectorCounters> {
        None
    }
}

/// Probe backed by `sysinfo`, reading a process and all its descendants
///
/// Build tools do their work in child processes (compilers under `make`,
/// commands under `sh -c`), so memory and CPU are summed over the whole tree
/// rooted at the observed pid. CPU usage needs two refreshes of a process to
/// be meaningful: the first read after construction or [`retarget`] only
/// primes the counters and fails, which the sampler skips.
///
/// [`retarget`]: SysinfoProbe::retarget
pub struct SysinfoProbe {
    system: System,
    root: Pid,
    primed: bool,
    cpu_count: usize,
}

/// Parent links followed before giving up on a process
const MAX_TREE_DEPTH: usize = 64;

impl SysinfoProbe {
    /// Probe the current process
    pub fn current() -> BuildTimeResult<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| BuildTimeError::Sampling(format!("Cannot resolve own pid: {e}")))?;
        Ok(Self::with_pid(pid))
    }

    /// Probe another process, e.g. a spawned build tool
    pub fn for_pid(pid: u32) -> Self {
        Self::with_pid(Pid::from_u32(pid))
    }

    fn with_pid(root: Pid) -> Self {
        Self {
            system: System::new(),
            root,
            primed: false,
            cpu_count: num_cpus::get().max(1),
        }
    }

    /// Root of the observed process tree
    pub fn root_pid(&self) -> u32 {
        self.root.as_u32()
    }

    /// Follow another process tree, keeping the process table already loaded
    pub fn retarget(&mut self, pid: u32) {
        self.root = Pid::from_u32(pid);
        self.primed = false;
    }

    fn in_tree(&self, pid: Pid) -> bool {
        let mut current = Some(pid);
        for _ in 0..MAX_TREE_DEPTH {
            match current {
                Some(p) if p == self.root => return true,
                Some(p) => current = self.system.process(p).and_then(|process| process.parent()),
                None => return false,
            }
        }
        false
    }

    fn tree_usage(&self) -> (u64, f64) {
        self.system
            .processes()
            .iter()
            // threads are listed too and share their owner's memory
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter(|(pid, _)| self.in_tree(**pid))
            .fold((0u64, 0.0f64), |(memory, cpu), (_, process)| {
                (
                    memory.saturating_add(process.memory()),
                    cpu + f64::from(process.cpu_usage()),
                )
            })
    }
}

impl ResourceProbe for SysinfoProbe {
    fn read(&mut self) -> BuildTimeResult<ProbeReading> {
        self.system.refresh_processes_specifics(
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        if self.system.process(self.root).is_none() {
            return Err(BuildTimeError::Sampling(format!(
                "Process {} not found",
                self.root
            )));
        }

        if !self.primed {
            self.primed = true;
            return Err(BuildTimeError::Sampling(format!(
                "Priming CPU counters for process {}",
                self.root
            )));
        }

        let (memory, cpu_percent) = self.tree_usage();

        // sysinfo reports per-core percent, 100% per busy core
        let cpu = cpu_percent / 100.0 / self.cpu_count as f64;
        Ok(ProbeReading {
            memory_used_bytes: memory,
            cpu_fraction: cpu,
        })
    }
}

/// Aggregate over all samples of one run
///
/// All fields are zero when no sample was taken. Check [`has_data`] before
/// acting on the numbers: zero here means "no data", not "no usage".
///
/// [`has_data`]: ResourceAggregate::has_data
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAggregate {
    /// Mean memory in use
    pub avg_memory_bytes: u64,
    /// Highest memory in use
    pub peak_memory_bytes: u64,
    /// Mean CPU utilization
    pub avg_cpu_fraction: f64,
    /// Highest CPU utilization
    pub peak_cpu_fraction: f64,
    /// Collections during the run
    pub gc_count: u64,
    /// Collector time during the run
    pub gc_millis: u64,
    /// Number of samples behind the figures
    pub sample_count: u64,
}

impl ResourceAggregate {
    /// Whether any sample contributed
    pub fn has_data(&self) -> bool {
        self.sample_count > 0
    }
}

/// Thread-safe accumulator of samples for one run
#[derive(Default)]
pub struct SampleStore {
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    samples: Vec<ResourceSample>,
    memory_sum: u128,
    cpu_sum: f64,
    peak_memory: u64,
    peak_cpu: f64,
}

impl SampleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one reading; a non-finite CPU value drops the sample
    pub fn push(&self, timestamp: Timestamp, reading: ProbeReading) -> bool {
        if !reading.cpu_fraction.is_finite() {
            debug!(cpu = reading.cpu_fraction, "Dropping sample with invalid CPU value");
            return false;
        }
        let sample = ResourceSample {
            timestamp,
            memory_used_bytes: reading.memory_used_bytes,
            cpu_fraction: reading.cpu_fraction.clamp(0.0, 1.0),
        };

        let mut inner = self.lock();
        inner.memory_sum += u128::from(sample.memory_used_bytes);
        inner.cpu_sum += sample.cpu_fraction;
        inner.peak_memory = inner.peak_memory.max(sample.memory_used_bytes);
        inner.peak_cpu = inner.peak_cpu.max(sample.cpu_fraction);
        inner.samples.push(sample);
        true
    }

    /// Number of samples taken
    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    /// Whether no sample was taken
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the raw sample timeline
    pub fn samples(&self) -> Vec<ResourceSample> {
        self.lock().samples.clone()
    }

    /// Averages and peaks; collector fields are left at zero
    pub fn aggregate(&self) -> ResourceAggregate {
        let inner = self.lock();
        let count = inner.samples.len();
        if count == 0 {
            return ResourceAggregate::default();
        }
        let avg_memory = inner.memory_sum / count as u128;
        ResourceAggregate {
            avg_memory_bytes: u64::try_from(avg_memory).unwrap_or(u64::MAX),
            peak_memory_bytes: inner.peak_memory,
            avg_cpu_fraction: inner.cpu_sum / count as f64,
            peak_cpu_fraction: inner.peak_cpu,
            gc_count: 0,
            gc_millis: 0,
            sample_count: count as u64,
        }
    }
}

fn take_sample(probe: &mut dyn ResourceProbe, store: &SampleStore) {
    match probe.read() {
        Ok(reading) => {
            let _ = store.push(Utc::now(), reading);
        }
        Err(e) => debug!(error = %e, "Skipping resource sample"),
    }
}

/// Background sampler for one run
pub struct Sampler {
    store: Arc<SampleStore>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<Box<dyn ResourceProbe>>>,
    baseline: Option<CollectorCounters>,
}

impl Sampler {
    /// Start sampling `probe` every `interval`, beginning immediately
    pub fn start(interval: Duration, mut probe: Box<dyn ResourceProbe>) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let baseline = probe.collector_counters();
        let store = Arc::new(SampleStore::new());
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_store = Arc::clone(&store);
        let spawned = thread::Builder::new()
            .name("buildtime-sampler".to_string())
            .spawn(move || {
                loop {
                    take_sample(probe.as_mut(), &thread_store);
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                probe
            });

        let handle = match spawned {
            Ok(handle) => {
                info!(interval_ms = interval.as_millis() as u64, "Resource sampling started");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Could not spawn sampler thread, sampling disabled");
                None
            }
        };

        Self {
            store,
            stop_tx: Some(stop_tx),
            handle,
            baseline,
        }
    }

    /// A sampler that never samples; its aggregate is all zeros
    pub fn disabled() -> Self {
        Self {
            store: Arc::new(SampleStore::new()),
            stop_tx: None,
            handle: None,
            baseline: None,
        }
    }

    /// Whether a sampling thread is running
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop sampling and return the aggregate
    ///
    /// Blocks until the sampling thread has finished its current read.
    pub fn stop(mut self) -> ResourceAggregate {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }

        let mut gc = CollectorCounters::default();
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(mut probe) => {
                    if let (Some(baseline), Some(last)) = (self.baseline, probe.collector_counters()) {
                        gc = last.since(baseline);
                    }
                }
                Err(_) => warn!("Sampler thread panicked, collector counters unavailable"),
            }
        }

        let mut aggregate = self.store.aggregate();
        if aggregate.has_data() {
            aggregate.gc_count = gc.count;
            aggregate.gc_millis = gc.millis;
        }
        info!(
            samples = aggregate.sample_count,
            peak_memory_bytes = aggregate.peak_memory_bytes,
            avg_cpu = aggregate.avg_cpu_fraction,
            "Resource sampling stopped"
        );
        aggregate
    }
}
