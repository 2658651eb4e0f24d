//! Build efficiency scoring
//!
//! The score is the sum of four bounded sub-scores:
//!
//! | Sub-score   | Range  | Input                                         |
//! |-------------|--------|-----------------------------------------------|
//! | time        | 10..30 | absolute duration, or ratio to prior average  |
//! | memory      | 8..25  | peak memory                                   |
//! | cpu         | 10..25 | average utilization, higher is better         |
//! | consistency | 8..20  | coefficient of variation of recent totals     |
//!
//! Every sub-score is a step function over a fixed band table, so the
//! score is monotonic in each input and never leaves its range.

use crate::build_metrics::RunSummary;
use crate::resource_monitor::ResourceAggregate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Maximum time sub-score
pub const TIME_MAX: f64 = 30.0;
/// Maximum memory sub-score
pub const MEMORY_MAX: f64 = 25.0;
/// Maximum CPU sub-score
pub const CPU_MAX: f64 = 25.0;
/// Maximum consistency sub-score
pub const CONSISTENCY_MAX: f64 = 20.0;

// (duration below, score)
const TIME_ABSOLUTE_BANDS: [(u64, f64); 4] =
    [(30_000, 30.0), (60_000, 25.0), (180_000, 20.0), (300_000, 15.0)];
const TIME_ABSOLUTE_FLOOR: f64 = 10.0;

// (ratio at most, score)
const TIME_RATIO_BANDS: [(f64, f64); 5] =
    [(0.8, 30.0), (0.9, 28.0), (1.1, 25.0), (1.3, 20.0), (1.5, 15.0)];
const TIME_RATIO_FLOOR: f64 = 10.0;

const MIB: u64 = 1024 * 1024;
// (peak below, score)
const MEMORY_BANDS: [(u64, f64); 5] = [
    (256 * MIB, 25.0),
    (512 * MIB, 22.0),
    (1024 * MIB, 20.0),
    (2048 * MIB, 17.0),
    (4096 * MIB, 12.0),
];
const MEMORY_FLOOR: f64 = 8.0;
const MEMORY_NO_DATA: f64 = 17.0;

// (average above, score)
const CPU_BANDS: [(f64, f64); 4] = [(0.8, 25.0), (0.6, 22.0), (0.4, 18.0), (0.2, 15.0)];
const CPU_FLOOR: f64 = 10.0;
const CPU_NO_DATA: f64 = 15.0;

// (coefficient of variation below, score)
const CONSISTENCY_BANDS: [(f64, f64); 4] = [(0.1, 20.0), (0.2, 18.0), (0.3, 15.0), (0.5, 12.0)];
const CONSISTENCY_FLOOR: f64 = 8.0;
const CONSISTENCY_DEFAULT: f64 = 15.0;
const CONSISTENCY_MIN_RUNS: usize = 3;
const CONSISTENCY_WINDOW: usize = 10;

/// Letter grade for a total score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LetterGrade {
    /// 90 and above
    #[serde(rename = "A+")]
    APlus,
    /// 85..90
    A,
    /// 80..85
    #[serde(rename = "A-")]
    AMinus,
    /// 75..80
    #[serde(rename = "B+")]
    BPlus,
    /// 70..75
    B,
    /// 65..70
    #[serde(rename = "B-")]
    BMinus,
    /// 60..65
    #[serde(rename = "C+")]
    CPlus,
    /// 55..60
    C,
    /// 50..55
    #[serde(rename = "C-")]
    CMinus,
    /// 45..50
    #[serde(rename = "D+")]
    DPlus,
    /// 40..45
    D,
    /// below 40
    F,
}

impl LetterGrade {
    const STEPS: [(f64, LetterGrade); 11] = [
        (90.0, Self::APlus),
        (85.0, Self::A),
        (80.0, Self::AMinus),
        (75.0, Self::BPlus),
        (70.0, Self::B),
        (65.0, Self::BMinus),
        (60.0, Self::CPlus),
        (55.0, Self::C),
        (50.0, Self::CMinus),
        (45.0, Self::DPlus),
        (40.0, Self::D),
    ];

    /// Grade for a total score
    pub fn from_score(score: f64) -> Self {
        Self::STEPS
            .iter()
            .find(|(min, _)| score >= *min)
            .map_or(Self::F, |&(_, grade)| grade)
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::AMinus => "A-",
            Self::BPlus => "B+",
            Self::B => "B",
            Self::BMinus => "B-",
            Self::CPlus => "C+",
            Self::C => "C",
            Self::CMinus => "C-",
            Self::DPlus => "D+",
            Self::D => "D",
            Self::F => "F",
        };
        write!(f, "{s}")
    }
}

/// Improvement suggestions, one per weak sub-score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suggestion {
    /// Time sub-score below 20
    SpeedUpBuild,
    /// Memory sub-score below 15
    ReduceMemory,
    /// CPU sub-score below 15
    ImproveCpuUtilization,
    /// Consistency sub-score below 12
    StabilizeBuilds,
    /// Nothing to improve
    KeepCurrentPractices,
}

impl Suggestion {
    /// Fixed advice text
    pub fn message(self) -> &'static str {
        match self {
            Self::SpeedUpBuild => {
                "Optimize build time by enabling parallel execution or incremental builds"
            }
            Self::ReduceMemory => {
                "Reduce memory usage by tuning heap limits or trimming dependencies"
            }
            Self::ImproveCpuUtilization => {
                "Improve CPU utilization by enabling parallel builds or reducing I/O bottlenecks"
            }
            Self::StabilizeBuilds => {
                "Improve build consistency by stabilizing test environments and dependencies"
            }
            Self::KeepCurrentPractices => "Build efficiency is good - maintain current practices",
        }
    }
}

impl fmt::Display for Suggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Composite efficiency score of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficiencyReport {
    /// Sum of the four sub-scores, 0..=100
    pub total_score: f64,
    /// 0..=30
    pub time_score: f64,
    /// 0..=25
    pub memory_score: f64,
    /// 0..=25
    pub cpu_score: f64,
    /// 0..=20
    pub consistency_score: f64,
    /// Grade derived from the total
    pub letter_grade: LetterGrade,
    /// Whether memory and CPU were scored from samples or defaulted
    pub resources_sampled: bool,
    /// Rules that produced the suggestions
    pub suggestion_rules: Vec<Suggestion>,
    /// Advice, one line per weak sub-score
    pub suggestions: Vec<String>,
}

impl EfficiencyReport {
    /// One-line verdict for the total score
    pub fn description(&self) -> &'static str {
        match self.total_score {
            s if s >= 85.0 => "Excellent - Highly optimized build",
            s if s >= 70.0 => "Good - Well-performing build",
            s if s >= 55.0 => "Average - Room for improvement",
            s if s >= 40.0 => "Below Average - Needs optimization",
            _ => "Poor - Significant optimization required",
        }
    }
}

/// Scores runs against fixed bands and their history
#[derive(Debug, Clone, Copy, Default)]
pub struct EfficiencyScorer;

impl EfficiencyScorer {
    /// Create a scorer
    pub fn new() -> Self {
        Self
    }

    /// Score `current`; `history` may or may not already contain it
    pub fn score(&self, current: &RunSummary, history: &[RunSummary]) -> EfficiencyReport {
        let prior: Vec<u64> = history
            .iter()
            .filter(|run| run.id() != current.id())
            .map(RunSummary::total_millis)
            .collect();
        let resources = current.resources();

        let time_score = time_score(current.total_millis(), &prior);
        let memory_score = memory_score(resources);
        let cpu_score = cpu_score(resources);
        let consistency_score = consistency_score(&prior);
        let total_score = time_score + memory_score + cpu_score + consistency_score;

        let mut suggestion_rules = Vec::new();
        if time_score < 20.0 {
            suggestion_rules.push(Suggestion::SpeedUpBuild);
        }
        if resources.has_data() && memory_score < 15.0 {
            suggestion_rules.push(Suggestion::ReduceMemory);
        }
        if resources.has_data() && cpu_score < 15.0 {
            suggestion_rules.push(Suggestion::ImproveCpuUtilization);
        }
        if consistency_score < 12.0 {
            suggestion_rules.push(Suggestion::StabilizeBuilds);
        }
        if suggestion_rules.is_empty() {
            suggestion_rules.push(Suggestion::KeepCurrentPractices);
        }

        debug!(
            total = total_score,
            time = time_score,
            memory = memory_score,
            cpu = cpu_score,
            consistency = consistency_score,
            "Efficiency scored"
        );

        EfficiencyReport {
            total_score,
            time_score,
            memory_score,
            cpu_score,
            consistency_score,
            letter_grade: LetterGrade::from_score(total_score),
            resources_sampled: resources.has_data(),
            suggestions: suggestion_rules.iter().map(|s| s.message().to_string()).collect(),
            suggestion_rules,
        }
    }
}

fn time_score(total_millis: u64, prior: &[u64]) -> f64 {
    let average = if prior.is_empty() {
        0.0
    } else {
        prior.iter().map(|&ms| ms as f64).sum::<f64>() / prior.len() as f64
    };

    if average <= 0.0 {
        return TIME_ABSOLUTE_BANDS
            .iter()
            .find(|&&(below, _)| total_millis < below)
            .map_or(TIME_ABSOLUTE_FLOOR, |&(_, score)| score);
    }

    let ratio = total_millis as f64 / average;
    TIME_RATIO_BANDS
        .iter()
        .find(|&&(at_most, _)| ratio <= at_most)
        .map_or(TIME_RATIO_FLOOR, |&(_, score)| score)
        .clamp(0.0, TIME_MAX)
}

fn memory_score(resources: &ResourceAggregate) -> f64 {
    if !resources.has_data() {
        return MEMORY_NO_DATA;
    }
    MEMORY_BANDS
        .iter()
        .find(|&&(below, _)| resources.peak_memory_bytes < below)
        .map_or(MEMORY_FLOOR, |&(_, score)| score)
}

fn cpu_score(resources: &ResourceAggregate) -> f64 {
    if !resources.has_data() {
        return CPU_NO_DATA;
    }
    CPU_BANDS
        .iter()
        .find(|&&(above, _)| resources.avg_cpu_fraction > above)
        .map_or(CPU_FLOOR, |&(_, score)| score)
}

/// Population coefficient of variation; `None` for an empty or zero-mean slice
pub fn coefficient_of_variation(values: &[u64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    if mean <= 0.0 {
        return None;
    }
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    Some(variance.sqrt() / mean)
}

fn consistency_score(prior: &[u64]) -> f64 {
    if prior.len() < CONSISTENCY_MIN_RUNS {
        return CONSISTENCY_DEFAULT;
    }
    let recent = &prior[prior.len().saturating_sub(CONSISTENCY_WINDOW)..];
    let cv = coefficient_of_variation(recent).unwrap_or(0.0);
    CONSISTENCY_BANDS
        .iter()
        .find(|&&(below, _)| cv < below)
        .map_or(CONSISTENCY_FLOOR, |&(_, score)| score)
}
