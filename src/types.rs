//! Core types for the Synheart Vitals engine
//!
//! This module defines the data structures that flow through each stage of a
//! reconciliation pass: provider records, reconciled metrics, the energy
//! breakdown and the final snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::provenance::ProvenanceTier;

/// Metric kinds tracked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Steps,
    ActiveCalories,
    TotalCalories,
    Distance,
    Hydration,
    HeartRate,
    RestingHeartRate,
    Weight,
    OxygenSaturation,
    BloodPressure,
    Sleep,
    Exercise,
}

/// How records of one tier are folded into a single value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldPolicy {
    /// Sum of all values in the bucket
    Sum,
    /// Value of the record with the greatest end time
    Latest,
    /// Provider-supplied resting value, else the lowest observed value
    Minimum,
    /// Sum of durations of every session in the bucket
    AccumulateSessions,
}

impl MetricKind {
    /// Every kind, in snapshot order
    pub const ALL: [MetricKind; 12] = [
        MetricKind::Steps,
        MetricKind::ActiveCalories,
        MetricKind::TotalCalories,
        MetricKind::Distance,
        MetricKind::Hydration,
        MetricKind::HeartRate,
        MetricKind::RestingHeartRate,
        MetricKind::Weight,
        MetricKind::OxygenSaturation,
        MetricKind::BloodPressure,
        MetricKind::Sleep,
        MetricKind::Exercise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Steps => "steps",
            MetricKind::ActiveCalories => "active_calories",
            MetricKind::TotalCalories => "total_calories",
            MetricKind::Distance => "distance",
            MetricKind::Hydration => "hydration",
            MetricKind::HeartRate => "heart_rate",
            MetricKind::RestingHeartRate => "resting_heart_rate",
            MetricKind::Weight => "weight",
            MetricKind::OxygenSaturation => "oxygen_saturation",
            MetricKind::BloodPressure => "blood_pressure",
            MetricKind::Sleep => "sleep",
            MetricKind::Exercise => "exercise",
        }
    }

    pub fn fold_policy(&self) -> FoldPolicy {
        match self {
            MetricKind::Steps
            | MetricKind::ActiveCalories
            | MetricKind::TotalCalories
            | MetricKind::Distance
            | MetricKind::Hydration => FoldPolicy::Sum,
            MetricKind::HeartRate
            | MetricKind::Weight
            | MetricKind::OxygenSaturation
            | MetricKind::BloodPressure => FoldPolicy::Latest,
            MetricKind::RestingHeartRate => FoldPolicy::Minimum,
            MetricKind::Sleep | MetricKind::Exercise => FoldPolicy::AccumulateSessions,
        }
    }

    /// Value reported when no tier produced data
    pub fn identity(&self) -> MetricValue {
        match self {
            MetricKind::Steps => MetricValue::Count(0),
            MetricKind::ActiveCalories
            | MetricKind::TotalCalories
            | MetricKind::Distance
            | MetricKind::Hydration => MetricValue::Scalar(0.0),
            MetricKind::Sleep | MetricKind::Exercise => MetricValue::Sessions {
                count: 0,
                minutes: 0.0,
            },
            MetricKind::HeartRate
            | MetricKind::RestingHeartRate
            | MetricKind::Weight
            | MetricKind::OxygenSaturation
            | MetricKind::BloodPressure => MetricValue::Empty,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exercise classification used by the energy model
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseType {
    Running,
    Walking,
    Cycling,
    Swimming,
    Hiking,
    StrengthTraining,
    Hiit,
    Rowing,
    Elliptical,
    Yoga,
    Dancing,
    /// For unrecognized activity names
    #[serde(untagged)]
    Other(String),
}

impl ExerciseType {
    /// Running and walking are covered by the step counter as well
    pub fn is_ambulatory(&self) -> bool {
        matches!(self, ExerciseType::Running | ExerciseType::Walking)
    }
}

/// A single beat-rate reading inside a heart rate record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub time: DateTime<Utc>,
    pub bpm: u32,
}

/// Observation payload, one variant per metric kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordValue {
    Steps {
        count: u64,
    },
    ActiveCalories {
        kcal: f64,
    },
    TotalCalories {
        kcal: f64,
    },
    Distance {
        meters: f64,
    },
    Hydration {
        milliliters: f64,
    },
    HeartRate {
        bpm: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        samples: Vec<HeartRateSample>,
    },
    RestingHeartRate {
        bpm: u32,
    },
    Weight {
        kg: f64,
    },
    OxygenSaturation {
        percent: f64,
    },
    BloodPressure {
        systolic: f64,
        diastolic: f64,
    },
    Sleep {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    Exercise {
        exercise_type: ExerciseType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

impl RecordValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            RecordValue::Steps { .. } => MetricKind::Steps,
            RecordValue::ActiveCalories { .. } => MetricKind::ActiveCalories,
            RecordValue::TotalCalories { .. } => MetricKind::TotalCalories,
            RecordValue::Distance { .. } => MetricKind::Distance,
            RecordValue::Hydration { .. } => MetricKind::Hydration,
            RecordValue::HeartRate { .. } => MetricKind::HeartRate,
            RecordValue::RestingHeartRate { .. } => MetricKind::RestingHeartRate,
            RecordValue::Weight { .. } => MetricKind::Weight,
            RecordValue::OxygenSaturation { .. } => MetricKind::OxygenSaturation,
            RecordValue::BloodPressure { .. } => MetricKind::BloodPressure,
            RecordValue::Sleep { .. } => MetricKind::Sleep,
            RecordValue::Exercise { .. } => MetricKind::Exercise,
        }
    }
}

/// One observation from one data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque identifier of the reporting app or device (e.g. a package name)
    pub source_id: String,
    /// Observation start (UTC)
    pub start_time: DateTime<Utc>,
    /// Observation end (UTC); equals `start_time` for point samples
    pub end_time: DateTime<Utc>,
    pub value: RecordValue,
}

impl Record {
    pub fn new(
        source_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        value: RecordValue,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            start_time,
            end_time,
            value,
        }
    }

    /// Point sample where start and end coincide
    pub fn point(source_id: impl Into<String>, time: DateTime<Utc>, value: RecordValue) -> Self {
        Self::new(source_id, time, time, value)
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Whole-and-fractional minutes covered by the record (never negative)
    pub fn duration_minutes(&self) -> f64 {
        let secs = (self.end_time - self.start_time).num_seconds().max(0);
        secs as f64 / 60.0
    }
}

/// Reconciled value of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Empty,
    Count(u64),
    Scalar(f64),
    Bpm(u32),
    BloodPressure { systolic: f64, diastolic: f64 },
    Sessions { count: u32, minutes: f64 },
}

impl MetricValue {
    /// Whether the value carries data (a tier with a zero result does not win)
    pub fn is_nonzero(&self) -> bool {
        match self {
            MetricValue::Empty => false,
            MetricValue::Count(n) => *n > 0,
            MetricValue::Scalar(v) => *v > 0.0,
            MetricValue::Bpm(b) => *b > 0,
            MetricValue::BloodPressure { systolic, diastolic } => {
                *systolic > 0.0 || *diastolic > 0.0
            }
            // Zero-length sessions carry no duration
            MetricValue::Sessions { minutes, .. } => *minutes > 0.0,
        }
    }

    /// Numeric view; blood pressure maps to systolic, sessions to minutes
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Empty => None,
            MetricValue::Count(n) => Some(*n as f64),
            MetricValue::Scalar(v) => Some(*v),
            MetricValue::Bpm(b) => Some(f64::from(*b)),
            MetricValue::BloodPressure { systolic, .. } => Some(*systolic),
            MetricValue::Sessions { minutes, .. } => Some(*minutes),
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            MetricValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bpm(&self) -> Option<u32> {
        match self {
            MetricValue::Bpm(b) => Some(*b),
            _ => None,
        }
    }
}

/// Output of one reconciler invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledMetric {
    pub kind: MetricKind,
    pub final_value: MetricValue,
    /// Tier whose bucket supplied the value; `None` when no tier had data
    pub winning_tier: Option<ProvenanceTier>,
    /// Records of the winning tier, ordered by start time
    pub contributing_records: Vec<Record>,
    /// Number of records fetched for this metric across all tiers
    pub record_count: usize,
    /// Fold result of every tier that had records
    #[serde(default)]
    pub tier_totals: BTreeMap<ProvenanceTier, MetricValue>,
    /// Source ids present in the fetched records
    #[serde(default)]
    pub sources: BTreeSet<String>,
}

impl ReconciledMetric {
    /// Identity result for a metric with no usable data
    pub fn empty(kind: MetricKind) -> Self {
        Self {
            kind,
            final_value: kind.identity(),
            winning_tier: None,
            contributing_records: Vec::new(),
            record_count: 0,
            tier_totals: BTreeMap::new(),
            sources: BTreeSet::new(),
        }
    }

    /// Human-readable name of the winning data source
    pub fn data_source_label(&self) -> &'static str {
        self.winning_tier.map(|t| t.label()).unwrap_or("None")
    }
}

/// Biological sex used by the Mifflin-St Jeor equation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

/// User profile as entered by the user; any field may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Age in years
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
}

impl UserProfile {
    pub fn new(age: u32, gender: Gender, height_cm: f64, weight_kg: f64) -> Self {
        Self {
            age: Some(age),
            gender: Some(gender),
            height_cm: Some(height_cm),
            weight_kg: Some(weight_kg),
        }
    }

    /// Load profile from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// How a session's calories were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMethod {
    /// Active-calorie records covering the session
    MeasuredCalories,
    /// Duration times the per-type constant
    DurationEstimate,
    /// Steps during the session times the per-step constant
    StepEstimate,
}

/// Energy attributed to one exercise session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnergy {
    pub exercise_type: ExerciseType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub minutes: f64,
    pub calories: f64,
    pub method: EstimateMethod,
}

/// Daily energy expenditure estimate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyBreakdown {
    pub step_calories: f64,
    pub exercise_calories: f64,
    /// max(step_calories, exercise_calories)
    pub active_calories: f64,
    /// Full-day basal metabolic rate
    pub daily_bmr: f64,
    /// Basal calories pro-rated to the elapsed part of the day
    pub bmr_calories_so_far: f64,
    pub total_calories: f64,
    #[serde(default)]
    pub sessions: Vec<SessionEnergy>,
    /// True when any profile field fell back to its default
    #[serde(default)]
    pub profile_defaults_used: bool,
}

/// A metric whose fetch failed or timed out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedMetric {
    pub kind: MetricKind,
    pub reason: String,
}

/// Complete result of one aggregation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub metrics: BTreeMap<MetricKind, ReconciledMetric>,
    pub energy: EnergyBreakdown,
    pub data_sources_seen: BTreeSet<String>,
    pub high_priority_source_present: bool,
    /// Local midnight of the day being reported
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub degraded: Vec<DegradedMetric>,
}

impl Snapshot {
    pub fn metric(&self, kind: MetricKind) -> Option<&ReconciledMetric> {
        self.metrics.get(&kind)
    }

    pub fn steps(&self) -> u64 {
        self.metric(MetricKind::Steps)
            .and_then(|m| m.final_value.as_count())
            .unwrap_or(0)
    }

    pub fn heart_rate(&self) -> u32 {
        self.metric(MetricKind::HeartRate)
            .and_then(|m| m.final_value.as_bpm())
            .unwrap_or(0)
    }

    /// A snapshot with no sources is the caller's "no data" state
    pub fn has_data(&self) -> bool {
        !self.data_sources_seen.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn summary(&self) -> SyncSummary {
        SyncSummary {
            timestamp: self.captured_at,
            steps: self.steps(),
            heart_rate: self.heart_rate(),
            calories: self.energy.total_calories,
            data_sources: self.data_sources_seen.iter().cloned().collect(),
            high_priority_source_present: self.high_priority_source_present,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Digest of the last persisted snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub timestamp: DateTime<Utc>,
    pub steps: u64,
    pub heart_rate: u32,
    pub calories: f64,
    pub data_sources: Vec<String>,
    pub high_priority_source_present: bool,
}
