//! Resource alerts
//!
//! Warnings about heavy resource use, tuned independently of the efficiency
//! score. High CPU here is a warning even though the CPU sub-score rewards
//! utilization; the two answer different questions.

use crate::resource_monitor::ResourceAggregate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

const GIB: u64 = 1024 * 1024 * 1024;

/// Limits above which an alert is raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Peak memory limit
    pub peak_memory_bytes: u64,
    /// Average CPU utilization limit, 0.0..=1.0
    pub avg_cpu_fraction: f64,
    /// Collector time limit
    pub gc_millis: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            peak_memory_bytes: 2 * GIB,
            avg_cpu_fraction: 0.8,
            gc_millis: 5000,
        }
    }
}

/// One triggered alert with the observed value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceAlert {
    /// Peak memory over the limit
    HighMemory {
        /// Observed peak
        peak_memory_bytes: u64,
    },
    /// Average CPU over the limit
    HighCpu {
        /// Observed average
        avg_cpu_fraction: f64,
    },
    /// Collector time over the limit
    ExcessiveGc {
        /// Observed collector time
        gc_millis: u64,
        /// Observed collections
        gc_count: u64,
    },
}

impl fmt::Display for ResourceAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighMemory { peak_memory_bytes } => write!(
                f,
                "⚠️  High memory usage: peak {} MB",
                peak_memory_bytes / (1024 * 1024)
            ),
            Self::HighCpu { avg_cpu_fraction } => write!(
                f,
                "⚠️  High CPU usage: average {:.1}%",
                avg_cpu_fraction * 100.0
            ),
            Self::ExcessiveGc { gc_millis, gc_count } => write!(
                f,
                "⚠️  Excessive garbage collection: {gc_millis} ms over {gc_count} collections"
            ),
        }
    }
}

impl AlertThresholds {
    /// Alerts for `resources`; none when no sample was taken
    pub fn evaluate(&self, resources: &ResourceAggregate) -> Vec<ResourceAlert> {
        let mut alerts = Vec::new();
        if !resources.has_data() {
            return alerts;
        }

        if resources.peak_memory_bytes > self.peak_memory_bytes {
            alerts.push(ResourceAlert::HighMemory {
                peak_memory_bytes: resources.peak_memory_bytes,
            });
        }
        if resources.avg_cpu_fraction > self.avg_cpu_fraction {
            alerts.push(ResourceAlert::HighCpu {
                avg_cpu_fraction: resources.avg_cpu_fraction,
            });
        }
        if resources.gc_millis > self.gc_millis {
            alerts.push(ResourceAlert::ExcessiveGc {
                gc_millis: resources.gc_millis,
                gc_count: resources.gc_count,
            });
        }

        for alert in &alerts {
            warn!(alert = %alert, "Resource alert");
        }
        alerts
    }
}
