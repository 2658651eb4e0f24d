//! Bounded, persisted run history
//!
//! The history file is a small JSON document holding one record per past
//! run, oldest first:
//!
//! ```json
//! { "builds": [ { "timestamp": "...", "totalMillis": 12400,
//!                 "peakMemoryBytes": 536870912, "avgCpuFraction": 0.62 } ] }
//! ```
//!
//! Loading never fails: a missing or unreadable file yields an empty history.
//! Saving trims to capacity and replaces the file through a temp file and a
//! rename, so a crash mid-save leaves the previous file intact.

use crate::build_metrics::{DurationMap, RunSummary, Timestamp};
use crate::error::{BuildTimeError, BuildTimeResult};
use crate::resource_monitor::ResourceAggregate;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default number of runs kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Persisted form of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// When the run finished
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: Timestamp,
    /// Whole-run wall time
    #[serde(alias = "totalTime")]
    pub total_millis: u64,
    /// Peak memory of the run
    #[serde(alias = "memoryUsage", default)]
    pub peak_memory_bytes: u64,
    /// Average CPU utilization of the run
    #[serde(alias = "cpuUsage", default)]
    pub avg_cpu_fraction: f64,
}

impl From<&RunSummary> for HistoryRecord {
    fn from(run: &RunSummary) -> Self {
        Self {
            timestamp: run.timestamp(),
            total_millis: run.total_millis(),
            peak_memory_bytes: run.resources().peak_memory_bytes,
            avg_cpu_fraction: run.resources().avg_cpu_fraction,
        }
    }
}

impl From<HistoryRecord> for RunSummary {
    fn from(record: HistoryRecord) -> Self {
        let resources = ResourceAggregate {
            peak_memory_bytes: record.peak_memory_bytes,
            avg_cpu_fraction: record.avg_cpu_fraction,
            ..ResourceAggregate::default()
        };
        RunSummary::new(
            record.timestamp,
            record.total_millis,
            DurationMap::new(),
            resources,
        )
    }
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    // naive local times, seconds omitted when zero
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M"))
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

#[derive(Serialize)]
struct HistoryFile {
    builds: Vec<HistoryRecord>,
}

/// On-disk shapes accepted on load; records are decoded one by one
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredHistory {
    Envelope { builds: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

impl StoredHistory {
    /// Decode every record, skipping the ones that do not parse
    fn into_records(self, path: &Path) -> Vec<HistoryRecord> {
        let raw = match self {
            Self::Envelope { builds } => builds,
            Self::Bare(records) => records,
        };
        raw.into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(path = %path.display(), index, error = %e, "Skipping unreadable history record");
                    None
                }
            })
            .collect()
    }
}

/// In-memory run history, oldest first
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    entries: Vec<RunSummary>,
}

impl HistoryStore {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Load history from `path`, starting empty on any problem
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(store) => {
                info!(path = %path.display(), runs = store.len(), "Loaded build history");
                store
            }
            Err(BuildTimeError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No build history yet");
                Self::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not load build history, starting empty");
                Self::new()
            }
        }
    }

    fn try_load(path: &Path) -> BuildTimeResult<Self> {
        let content = fs::read_to_string(path)?;
        let stored: StoredHistory = serde_json::from_str(&content)?;
        Ok(Self {
            entries: stored
                .into_records(path)
                .into_iter()
                .map(RunSummary::from)
                .collect(),
        })
    }

    /// Add a finished run as the newest entry
    pub fn append(&mut self, run: RunSummary) {
        self.entries.push(run);
    }

    /// Drop the oldest entries until at most `capacity` remain
    pub fn trim(&mut self, capacity: usize) {
        if self.entries.len() > capacity {
            let excess = self.entries.len() - capacity;
            let _ = self.entries.drain(..excess);
            debug!(evicted = excess, capacity, "Trimmed build history");
        }
    }

    /// Trim to `capacity` and overwrite `path` with the remaining entries
    pub fn save(&mut self, path: &Path, capacity: usize) -> BuildTimeResult<()> {
        self.trim(capacity);
        let file = HistoryFile {
            builds: self.entries.iter().map(HistoryRecord::from).collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        atomic_write(path, json.as_bytes())?;
        info!(path = %path.display(), runs = self.entries.len(), "Saved build history");
        Ok(())
    }

    /// All runs, oldest first
    pub fn entries(&self) -> &[RunSummary] {
        &self.entries
    }

    /// Number of stored runs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no run is stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write-fsync-rename so readers only ever see a complete file
fn atomic_write(path: &Path, data: &[u8]) -> BuildTimeResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let temp = temp_path(path);
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, path).map_err(|e| {
        let _ = fs::remove_file(&temp);
        BuildTimeError::Persist {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all(); // not supported everywhere
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn run(total: u64) -> RunSummary {
        RunSummary::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
            total,
            DurationMap::new(),
            ResourceAggregate {
                peak_memory_bytes: total * 10,
                avg_cpu_fraction: 0.25,
                sample_count: 1,
                ..ResourceAggregate::default()
            },
        )
    }

    #[test]
    fn test_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = HistoryStore::load(&tmp.path().join("nope.json"));
        assert!(store.is_empty());
    }

    #[traced_test]
    #[test]
    fn test_malformed_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.json");
        fs::write(&path, "{ this is not json").unwrap();

        let store = HistoryStore::load(&path);
        assert!(store.is_empty());
        assert!(logs_contain("Could not load build history"));
    }

    #[test]
    fn test_save_then_load_keeps_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/history.json");

        let mut store = HistoryStore::new();
        store.append(run(1000));
        store.append(run(2000));
        store.save(&path, 20).unwrap();

        let loaded = HistoryStore::load(&path);
        assert_eq!(loaded.len(), 2);
        let first = &loaded.entries()[0];
        assert_eq!(first.total_millis(), 1000);
        assert_eq!(first.resources().peak_memory_bytes, 10_000);
        assert_eq!(first.resources().avg_cpu_fraction, 0.25);
        assert_eq!(first.timestamp(), store.entries()[0].timestamp());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_save_evicts_oldest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.json");

        let mut store = HistoryStore::new();
        for total in 1..=5 {
            store.append(run(total * 100));
        }
        store.save(&path, 3).unwrap();
        assert_eq!(store.len(), 3);

        let totals: Vec<_> = HistoryStore::load(&path)
            .entries()
            .iter()
            .map(RunSummary::total_millis)
            .collect();
        assert_eq!(totals, vec![300, 400, 500]);
    }

    #[test]
    fn test_loads_legacy_field_names() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.json");
        fs::write(
            &path,
            r#"{
  "builds": [
    {
      "timestamp": "2024-03-01T10:15:30.123",
      "totalTime": 45000,
      "memoryUsage": 268435456,
      "cpuUsage": 0.5
    }
  ]
}"#,
        )
        .unwrap();

        let store = HistoryStore::load(&path);
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].total_millis(), 45000);
        assert_eq!(store.entries()[0].resources().peak_memory_bytes, 268_435_456);
    }

    #[test]
    fn test_loads_minute_precision_timestamps() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.json");
        fs::write(
            &path,
            r#"{
  "builds": [
    { "timestamp": "2024-03-01T10:15:30.123", "totalTime": 45000 },
    { "timestamp": "2024-03-01T10:16", "totalTime": 47000 }
  ]
}"#,
        )
        .unwrap();

        let store = HistoryStore::load(&path);
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.entries()[1].timestamp(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 16, 0).unwrap()
        );
    }

    #[traced_test]
    #[test]
    fn test_bad_record_does_not_drop_history() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.json");
        fs::write(
            &path,
            r#"{
  "builds": [
    { "timestamp": "2024-03-01T10:15:30Z", "totalMillis": 1000 },
    { "timestamp": "yesterday", "totalMillis": 2000 },
    { "totalMillis": 3000 },
    { "timestamp": "2024-03-02T10:15:30Z", "totalMillis": 4000 }
  ]
}"#,
        )
        .unwrap();

        let totals: Vec<_> = HistoryStore::load(&path)
            .entries()
            .iter()
            .map(RunSummary::total_millis)
            .collect();
        assert_eq!(totals, vec![1000, 4000]);
        assert!(logs_contain("Skipping unreadable history record"));
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.json");

        let mut store = HistoryStore::new();
        store.append(run(1000));
        store.append(run(2000));
        store.save(&path, 20).unwrap();

        // a directory where the temp file goes makes the next save fail
        fs::create_dir(temp_path(&path)).unwrap();
        store.append(run(3000));
        assert!(store.save(&path, 20).is_err());

        let totals: Vec<_> = HistoryStore::load(&path)
            .entries()
            .iter()
            .map(RunSummary::total_millis)
            .collect();
        assert_eq!(totals, vec![1000, 2000]);
    }

    #[test]
    fn test_loads_bare_array() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.json");
        fs::write(
            &path,
            r#"[{"timestamp":"2024-03-01T10:15:30Z","totalMillis":10,"peakMemoryBytes":0,"avgCpuFraction":0.0}]"#,
        )
        .unwrap();

        assert_eq!(HistoryStore::load(&path).len(), 1);
    }
}
