//! Run-level metrics: stage durations and the immutable run summary

use crate::resource_monitor::ResourceAggregate;
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Wall-clock instant used for every event the engine consumes
pub type Timestamp = DateTime<Utc>;

/// Reserved stage name carrying the whole-run duration
pub const TOTAL_STAGE: &str = "total";

/// Identity of one run
///
/// Two runs with identical numbers are still different runs; the regression
/// detector relies on this to exclude the current run from its own baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RunId(uuid::Uuid);

impl RunId {
    /// Allocate a fresh run identity
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = self.0.to_string();
        write!(f, "{}", &full[..8])
    }
}

/// Duration of one named stage
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StageDuration {
    /// Stage name
    pub name: String,
    /// Elapsed milliseconds
    pub millis: u64,
}

/// Stage name to milliseconds, unique keys, in first-completion order
///
/// Re-inserting an existing stage overwrites its value but keeps its
/// position, so ranking ties stay in the order the stages first finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurationMap {
    entries: Vec<StageDuration>,
    index: HashMap<String, usize>,
}

impl DurationMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `millis` under `name`, returning the previous value if any
    pub fn insert(&mut self, name: impl Into<String>, millis: u64) -> Option<u64> {
        let name = name.into();
        if let Some(&pos) = self.index.get(&name) {
            let previous = self.entries[pos].millis;
            self.entries[pos].millis = millis;
            return Some(previous);
        }
        let _ = self.index.insert(name.clone(), self.entries.len());
        self.entries.push(StageDuration { name, millis });
        None
    }

    /// Milliseconds recorded for `name`
    pub fn get(&self, name: &str) -> Option<u64> {
        self.index.get(name).map(|&pos| self.entries[pos].millis)
    }

    /// Whether `name` has a recorded duration
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of entries, including `total` when present
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry has been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &StageDuration> {
        self.entries.iter()
    }

    /// Real stages only, skipping the reserved `total` entry
    pub fn stages(&self) -> impl Iterator<Item = &StageDuration> {
        self.entries.iter().filter(|e| e.name != TOTAL_STAGE)
    }

    /// Sum of all real stage durations
    pub fn stage_millis(&self) -> u64 {
        self.stages().map(|e| e.millis).sum()
    }

    /// The whole-run duration, if recorded
    pub fn total(&self) -> Option<u64> {
        self.get(TOTAL_STAGE)
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for DurationMap {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut map = DurationMap::new();
        for (name, millis) in iter {
            let _ = map.insert(name, millis);
        }
        map
    }
}

impl Serialize for DurationMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.name, &entry.millis)?;
        }
        map.end()
    }
}

/// Everything measured about one run
///
/// Constructed once by the run coordinator and never mutated afterwards.
/// Runs reloaded from the history file carry no stage durations and only the
/// persisted resource figures.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    id: RunId,
    timestamp: Timestamp,
    total_millis: u64,
    stage_durations: DurationMap,
    resources: ResourceAggregate,
}

impl RunSummary {
    /// Build a summary with a fresh identity
    pub fn new(
        timestamp: Timestamp,
        total_millis: u64,
        stage_durations: DurationMap,
        resources: ResourceAggregate,
    ) -> Self {
        Self {
            id: RunId::new(),
            timestamp,
            total_millis,
            stage_durations,
            resources,
        }
    }

    /// Identity of this run
    pub fn id(&self) -> RunId {
        self.id
    }

    /// When the run finished
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Whole-run wall time in milliseconds
    pub fn total_millis(&self) -> u64 {
        self.total_millis
    }

    /// Per-stage durations, including `total`
    pub fn stage_durations(&self) -> &DurationMap {
        &self.stage_durations
    }

    /// Aggregated resource usage
    pub fn resources(&self) -> &ResourceAggregate {
        &self.resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_last_write_wins_keeps_position() {
        let mut map = DurationMap::new();
        assert_eq!(map.insert("compile", 100), None);
        assert_eq!(map.insert("test", 200), None);
        assert_eq!(map.insert("compile", 300), Some(100));

        let names: Vec<_> = map.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["compile", "test"]);
        assert_eq!(map.get("compile"), Some(300));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_stages_skip_total() {
        let map: DurationMap = [("compile", 100), (TOTAL_STAGE, 1000), ("test", 50)]
            .into_iter()
            .collect();

        assert_eq!(map.stage_millis(), 150);
        assert_eq!(map.total(), Some(1000));
        assert_eq!(map.stages().count(), 2);
    }

    #[test]
    fn test_serializes_as_ordered_object() {
        let map: DurationMap = [("b", 2), ("a", 1)].into_iter().collect();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"b":2,"a":1}"#);
    }

    #[test]
    fn test_run_ids_are_distinct() {
        let ts = Utc::now();
        let a = RunSummary::new(ts, 1000, DurationMap::new(), ResourceAggregate::default());
        let b = RunSummary::new(ts, 1000, DurationMap::new(), ResourceAggregate::default());
        assert_ne!(a.id(), b.id());
    }
}
