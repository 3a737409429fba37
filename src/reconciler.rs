//! Per-metric reconciliation
//!
//! Records are partitioned by provenance tier and each tier's bucket is folded
//! on its own with the metric's fold policy. The first tier (highest priority
//! first) with a nonzero result supplies the value; lower tiers are never mixed
//! in, which keeps activity tracked by several apps from being counted twice.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::provenance::{ProvenanceRules, ProvenanceTier};
use crate::types::{FoldPolicy, MetricKind, MetricValue, ReconciledMetric, Record, RecordValue};
use crate::window::TimeWindow;

/// Reconciler bound to one provenance rule table
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    rules: ProvenanceRules,
}

impl Reconciler {
    pub fn new(rules: ProvenanceRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ProvenanceRules {
        &self.rules
    }

    /// Reconcile a record set fetched for `window` into one value.
    ///
    /// The window is informational: records are used exactly as fetched.
    pub fn reconcile(
        &self,
        kind: MetricKind,
        records: &[Record],
        window: &TimeWindow,
    ) -> ReconciledMetric {
        let sources: BTreeSet<String> = records.iter().map(|r| r.source_id.clone()).collect();
        let mut buckets: BTreeMap<ProvenanceTier, Vec<&Record>> = BTreeMap::new();

        for record in records {
            if !accepts(kind, &record.value) {
                debug!(
                    kind = %kind,
                    record_kind = %record.kind(),
                    source = %record.source_id,
                    "Ignoring record of unrelated kind"
                );
                continue;
            }
            let tier = self.rules.classify(&record.source_id);
            buckets.entry(tier).or_default().push(record);
        }

        let tier_totals: BTreeMap<ProvenanceTier, MetricValue> = buckets
            .iter()
            .map(|(tier, bucket)| (*tier, fold(kind, bucket)))
            .collect();

        let winner = ProvenanceTier::ORDERED.iter().copied().find(|tier| {
            tier_totals
                .get(tier)
                .map(MetricValue::is_nonzero)
                .unwrap_or(false)
        });

        let (final_value, contributing_records) = match winner {
            Some(tier) => {
                let mut contributing: Vec<Record> = buckets
                    .get(&tier)
                    .map(|bucket| bucket.iter().map(|r| (*r).clone()).collect())
                    .unwrap_or_default();
                contributing.sort_by(|a, b| {
                    a.start_time
                        .cmp(&b.start_time)
                        .then(a.end_time.cmp(&b.end_time))
                });
                let value = tier_totals
                    .get(&tier)
                    .cloned()
                    .unwrap_or_else(|| kind.identity());
                (value, contributing)
            }
            None => (kind.identity(), Vec::new()),
        };

        debug!(
            kind = %kind,
            window_start = %window.start,
            window_end = %window.end,
            records = records.len(),
            tier = ?winner,
            value = ?final_value,
            "Reconciled metric"
        );

        ReconciledMetric {
            kind,
            final_value,
            winning_tier: winner,
            contributing_records,
            record_count: records.len(),
            tier_totals,
            sources,
        }
    }
}

/// Whether a record payload participates in a metric's fold
fn accepts(kind: MetricKind, value: &RecordValue) -> bool {
    match kind {
        MetricKind::RestingHeartRate => matches!(
            value,
            RecordValue::RestingHeartRate { .. } | RecordValue::HeartRate { .. }
        ),
        _ => value.kind() == kind,
    }
}

fn fold(kind: MetricKind, bucket: &[&Record]) -> MetricValue {
    match kind.fold_policy() {
        FoldPolicy::Sum => fold_sum(kind, bucket),
        FoldPolicy::Latest => fold_latest(kind, bucket),
        FoldPolicy::Minimum => fold_resting(bucket),
        FoldPolicy::AccumulateSessions => fold_sessions(bucket),
    }
}

fn fold_sum(kind: MetricKind, bucket: &[&Record]) -> MetricValue {
    if kind == MetricKind::Steps {
        let total = bucket
            .iter()
            .filter_map(|r| match r.value {
                RecordValue::Steps { count } => Some(count),
                _ => None,
            })
            .fold(0u64, |acc, c| acc.saturating_add(c));
        return MetricValue::Count(total);
    }

    let total: f64 = bucket
        .iter()
        .filter_map(|r| match r.value {
            RecordValue::ActiveCalories { kcal } | RecordValue::TotalCalories { kcal } => {
                Some(kcal)
            }
            RecordValue::Distance { meters } => Some(meters),
            RecordValue::Hydration { milliliters } => Some(milliliters),
            _ => None,
        })
        .filter(|v| v.is_finite())
        .sum();
    MetricValue::Scalar(total)
}

fn fold_latest(kind: MetricKind, bucket: &[&Record]) -> MetricValue {
    let Some(latest) = bucket.iter().max_by_key(|r| r.end_time) else {
        return kind.identity();
    };

    match &latest.value {
        RecordValue::HeartRate { bpm, samples } => {
            let reading = samples
                .iter()
                .max_by_key(|s| s.time)
                .map(|s| s.bpm)
                .unwrap_or(*bpm);
            MetricValue::Bpm(reading)
        }
        RecordValue::Weight { kg } => MetricValue::Scalar(*kg),
        RecordValue::OxygenSaturation { percent } => MetricValue::Scalar(*percent),
        RecordValue::BloodPressure {
            systolic,
            diastolic,
        } => MetricValue::BloodPressure {
            systolic: *systolic,
            diastolic: *diastolic,
        },
        _ => kind.identity(),
    }
}

/// Latest provider resting value if any, else the lowest nonzero reading
fn fold_resting(bucket: &[&Record]) -> MetricValue {
    let provided = bucket
        .iter()
        .filter_map(|r| match r.value {
            RecordValue::RestingHeartRate { bpm } if bpm > 0 => Some((r.end_time, bpm)),
            _ => None,
        })
        .max_by_key(|(time, _)| *time);
    if let Some((_, bpm)) = provided {
        return MetricValue::Bpm(bpm);
    }

    bucket
        .iter()
        .flat_map(|r| match &r.value {
            RecordValue::HeartRate { bpm, samples } if samples.is_empty() => vec![*bpm],
            RecordValue::HeartRate { samples, .. } => samples.iter().map(|s| s.bpm).collect(),
            _ => Vec::new(),
        })
        .filter(|bpm| *bpm > 0)
        .min()
        .map(MetricValue::Bpm)
        .unwrap_or(MetricValue::Empty)
}

fn fold_sessions(bucket: &[&Record]) -> MetricValue {
    let minutes: f64 = bucket.iter().map(|r| r.duration_minutes()).sum();
    MetricValue::Sessions {
        count: bucket.len() as u32,
        minutes,
    }
}
