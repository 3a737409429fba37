//! Aggregation orchestration
//!
//! Fetches every metric kind independently and concurrently, reconciles each
//! one, and assembles the results into a single [`Snapshot`]. A failing or
//! slow provider only degrades its own metric: the snapshot is always
//! produced. The energy model runs last because it depends on the reconciled
//! steps and exercise sessions.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{VitalsConfig, DEFAULT_FETCH_TIMEOUT_MS};
use crate::energy::{compute_breakdown, session_energy, ResolvedProfile, SessionEvidence};
use crate::error::{ProviderError, VitalsError};
use crate::provenance::ProvenanceTier;
use crate::reconciler::Reconciler;
use crate::store::{ProfileSource, RecordStore};
use crate::types::{
    DegradedMetric, EnergyBreakdown, MetricKind, MetricValue, ReconciledMetric, Record,
    RecordValue, Snapshot, UserProfile,
};
use crate::window::{TimeWindow, WindowKind, WindowPolicy};

/// Orchestrates one or more aggregation passes over injected collaborators
pub struct Aggregator {
    store: Arc<dyn RecordStore>,
    profile: Arc<dyn ProfileSource>,
    reconciler: Reconciler,
    windows: WindowPolicy,
    fetch_timeout: Duration,
}

impl Aggregator {
    /// Create an aggregator with default rules, UTC windows and timeout
    pub fn new(store: Arc<dyn RecordStore>, profile: Arc<dyn ProfileSource>) -> Self {
        Self {
            store,
            profile,
            reconciler: Reconciler::default(),
            windows: WindowPolicy::default(),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
        }
    }

    pub fn from_config(
        store: Arc<dyn RecordStore>,
        profile: Arc<dyn ProfileSource>,
        config: &VitalsConfig,
    ) -> Result<Self, VitalsError> {
        config.validate()?;
        Ok(Self {
            store,
            profile,
            reconciler: Reconciler::new(config.provenance_rules()),
            windows: config.window_policy()?,
            fetch_timeout: config.fetch_timeout(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Run a full aggregation pass for the current instant
    pub async fn aggregate(&self) -> Snapshot {
        self.aggregate_at(Utc::now()).await
    }

    /// Run a full aggregation pass as of `now`
    pub async fn aggregate_at(&self, now: DateTime<Utc>) -> Snapshot {
        let day_start = self.windows.day_start(now);
        debug!(%day_start, %now, "Starting aggregation");

        let metric_tasks = MetricKind::ALL.iter().map(|&kind| async move {
            let result = self.try_read_metric(kind, now).await;
            (kind, result)
        });
        let (results, profile) = futures::join!(join_all(metric_tasks), self.read_profile());

        let mut metrics = BTreeMap::new();
        let mut degraded = Vec::new();
        for (kind, result) in results {
            match result {
                Ok(metric) => {
                    metrics.insert(kind, metric);
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Metric degraded to empty");
                    degraded.push(DegradedMetric {
                        kind,
                        reason: e.to_string(),
                    });
                    metrics.insert(kind, ReconciledMetric::empty(kind));
                }
            }
        }

        let data_sources_seen: BTreeSet<String> = metrics
            .values()
            .flat_map(|m| m.sources.iter().cloned())
            .collect();
        let high_priority_source_present = data_sources_seen
            .iter()
            .any(|s| self.reconciler.rules().classify(s) == ProvenanceTier::Primary);

        let energy = self.estimate_energy(&metrics, profile, day_start, now).await;

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            metrics,
            energy,
            data_sources_seen,
            high_priority_source_present,
            window_start: day_start,
            window_end: now,
            captured_at: Utc::now(),
            degraded,
        };

        info!(
            steps = snapshot.steps(),
            heart_rate = snapshot.heart_rate(),
            total_calories = snapshot.energy.total_calories,
            sources = snapshot.data_sources_seen.len(),
            high_priority = snapshot.high_priority_source_present,
            degraded = snapshot.degraded.len(),
            "Aggregation complete"
        );

        snapshot
    }

    /// Fetch and reconcile a single metric over its policy window
    pub async fn try_read_metric(
        &self,
        kind: MetricKind,
        now: DateTime<Utc>,
    ) -> Result<ReconciledMetric, ProviderError> {
        let window = self.windows.for_metric(kind, now);
        let mut records = self.fetch(kind, window).await?;
        if kind == MetricKind::RestingHeartRate {
            // Resting rate falls back to the lowest of the day's readings
            records.extend(self.fetch(MetricKind::HeartRate, window).await?);
        }
        Ok(self.reconciler.reconcile(kind, &records, &window))
    }

    /// Latest heart rate over the last hour, outside a full snapshot
    pub async fn current_heart_rate(&self, now: DateTime<Utc>) -> ReconciledMetric {
        let window = self.windows.resolve(WindowKind::Short, now);
        match self.fetch(MetricKind::HeartRate, window).await {
            Ok(records) => self
                .reconciler
                .reconcile(MetricKind::HeartRate, &records, &window),
            Err(e) => {
                warn!(error = %e, "Current heart rate unavailable");
                ReconciledMetric::empty(MetricKind::HeartRate)
            }
        }
    }

    async fn fetch(
        &self,
        kind: MetricKind,
        window: TimeWindow,
    ) -> Result<Vec<Record>, ProviderError> {
        let fetch = self.store.fetch_records(kind, window.start, window.end);
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.fetch_timeout)),
        }
    }

    async fn read_profile(&self) -> Option<UserProfile> {
        match tokio::time::timeout(self.fetch_timeout, self.profile.read_profile()).await {
            Ok(Ok(Some(profile))) => Some(profile),
            Ok(Ok(None)) => {
                warn!("Profile missing, energy model will use defaults");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Profile read failed, energy model will use defaults");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.fetch_timeout, "Profile read timed out, energy model will use defaults");
                None
            }
        }
    }

    async fn estimate_energy(
        &self,
        metrics: &BTreeMap<MetricKind, ReconciledMetric>,
        profile: Option<UserProfile>,
        day_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EnergyBreakdown {
        let steps = metrics
            .get(&MetricKind::Steps)
            .and_then(|m| m.final_value.as_count())
            .unwrap_or(0);
        let sessions: &[Record] = metrics
            .get(&MetricKind::Exercise)
            .map(|m| m.contributing_records.as_slice())
            .unwrap_or(&[]);

        let evidence = join_all(sessions.iter().map(|s| self.session_evidence(s))).await;
        let session_energies = sessions
            .iter()
            .zip(evidence.iter())
            .filter_map(|(session, evidence)| session_energy(session, evidence))
            .collect();

        let measured_weight = metrics.get(&MetricKind::Weight).and_then(|m| match m.final_value {
            MetricValue::Scalar(kg) => Some(kg),
            _ => None,
        });
        let resolved = ResolvedProfile::resolve(&profile.unwrap_or_default(), measured_weight);

        compute_breakdown(steps, session_energies, &resolved, day_start, now)
    }

    /// Look up calories and steps recorded during one session.
    ///
    /// Both are reconciled with the usual tier priority rather than summed
    /// across every overlapping record, so two apps logging the same workout
    /// are not counted twice. Lookup failures leave the corresponding field
    /// empty so the session falls back to the duration estimate.
    async fn session_evidence(&self, session: &Record) -> SessionEvidence {
        let window = TimeWindow::new(session.start_time, session.end_time);
        let ambulatory = matches!(
            &session.value,
            RecordValue::Exercise { exercise_type, .. } if exercise_type.is_ambulatory()
        );

        let measured_calories = match self.fetch(MetricKind::ActiveCalories, window).await {
            Ok(records) => self
                .reconciler
                .reconcile(MetricKind::ActiveCalories, &records, &window)
                .final_value
                .as_f64(),
            Err(e) => {
                warn!(error = %e, start = %session.start_time, "Session calorie lookup failed");
                None
            }
        };

        let steps = if ambulatory {
            match self.fetch(MetricKind::Steps, window).await {
                Ok(records) => self
                    .reconciler
                    .reconcile(MetricKind::Steps, &records, &window)
                    .final_value
                    .as_count(),
                Err(e) => {
                    warn!(error = %e, start = %session.start_time, "Session step lookup failed");
                    None
                }
            }
        } else {
            None
        };

        SessionEvidence {
            measured_calories,
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryRecordStore, StaticProfile};
    use crate::types::{EstimateMethod, ExerciseType, Gender};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use pretty_assertions::assert_eq;

    const SAMSUNG: &str = "com.sec.android.app.shealth";
    const GOOGLE_FIT: &str = "com.google.android.apps.fitness";

    fn midnight() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    fn noon() -> DateTime<Utc> {
        midnight() + ChronoDuration::hours(12)
    }

    fn at(hour: i64) -> DateTime<Utc> {
        midnight() + ChronoDuration::hours(hour)
    }

    fn aggregator(store: InMemoryRecordStore, profile: StaticProfile) -> Aggregator {
        Aggregator::new(Arc::new(store), Arc::new(profile))
    }

    fn reference_profile() -> StaticProfile {
        StaticProfile::new(UserProfile::new(30, Gender::Male, 170.0, 70.0))
    }

    #[tokio::test]
    async fn test_primary_steps_win_and_all_sources_are_seen() {
        let store = InMemoryRecordStore::new(vec![
            Record::new(SAMSUNG, at(8), at(9), RecordValue::Steps { count: 4000 }),
            Record::new(GOOGLE_FIT, at(8), at(9), RecordValue::Steps { count: 6000 }),
        ]);
        let snapshot = aggregator(store, reference_profile())
            .aggregate_at(noon())
            .await;

        let steps = snapshot.metric(MetricKind::Steps).unwrap();
        assert_eq!(steps.final_value, MetricValue::Count(4000));
        assert_eq!(steps.winning_tier, Some(ProvenanceTier::Primary));
        assert!(snapshot.data_sources_seen.contains(SAMSUNG));
        assert!(snapshot.data_sources_seen.contains(GOOGLE_FIT));
        assert!(snapshot.high_priority_source_present);
        assert!(snapshot.degraded.is_empty());
        assert_eq!(snapshot.window_start, midnight());
        assert_eq!(snapshot.window_end, noon());
    }

    #[tokio::test]
    async fn test_energy_breakdown_for_reference_day() {
        let store = InMemoryRecordStore::new(vec![Record::new(
            SAMSUNG,
            at(7),
            at(11),
            RecordValue::Steps { count: 8000 },
        )]);
        let snapshot = aggregator(store, reference_profile())
            .aggregate_at(noon())
            .await;

        assert!((snapshot.energy.step_calories - 320.0).abs() < 1e-9);
        assert!((snapshot.energy.bmr_calories_so_far - 808.75).abs() < 1e-9);
        assert!((snapshot.energy.total_calories - 1128.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_metric_is_isolated() {
        let store = InMemoryRecordStore::new(vec![
            Record::new(SAMSUNG, at(8), at(9), RecordValue::Steps { count: 1200 }),
            Record::point(SAMSUNG, at(7), RecordValue::Weight { kg: 80.0 }),
        ])
        .with_failure(
            MetricKind::Weight,
            ProviderError::PermissionDenied(MetricKind::Weight),
        );
        let snapshot = aggregator(store, reference_profile())
            .aggregate_at(noon())
            .await;

        assert_eq!(snapshot.steps(), 1200);
        let weight = snapshot.metric(MetricKind::Weight).unwrap();
        assert_eq!(weight.final_value, MetricValue::Empty);
        assert_eq!(snapshot.degraded.len(), 1);
        assert_eq!(snapshot.degraded[0].kind, MetricKind::Weight);
        assert_eq!(snapshot.metrics.len(), MetricKind::ALL.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_metric_times_out() {
        let store = InMemoryRecordStore::new(vec![Record::new(
            SAMSUNG,
            at(0),
            at(8),
            RecordValue::Sleep { title: None, notes: None },
        )])
        .with_delay(MetricKind::Sleep, Duration::from_secs(60));
        let snapshot = aggregator(store, reference_profile())
            .with_timeout(Duration::from_secs(1))
            .aggregate_at(noon())
            .await;

        let sleep = snapshot.metric(MetricKind::Sleep).unwrap();
        assert_eq!(sleep.final_value, MetricKind::Sleep.identity());
        assert!(snapshot
            .degraded
            .iter()
            .any(|d| d.kind == MetricKind::Sleep && d.reason.contains("timed out")));
    }

    #[tokio::test]
    async fn test_every_fetch_failing_still_returns_snapshot() {
        let mut store = InMemoryRecordStore::default();
        for kind in MetricKind::ALL {
            store = store.with_failure(kind, ProviderError::Unavailable("offline".to_string()));
        }
        let snapshot = aggregator(store, StaticProfile::missing())
            .aggregate_at(noon())
            .await;

        assert!(!snapshot.has_data());
        assert!(!snapshot.high_priority_source_present);
        assert_eq!(snapshot.degraded.len(), MetricKind::ALL.len());
        assert!(snapshot.energy.profile_defaults_used);
        assert_eq!(snapshot.energy.active_calories, 0.0);
        assert!((snapshot.energy.bmr_calories_so_far - 808.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_running_session_energy() {
        let store = InMemoryRecordStore::new(vec![
            Record::new(
                SAMSUNG,
                at(7),
                at(7) + ChronoDuration::minutes(30),
                RecordValue::Exercise {
                    exercise_type: ExerciseType::Running,
                    title: Some("Morning run".to_string()),
                },
            ),
            Record::new(
                SAMSUNG,
                at(7),
                at(7) + ChronoDuration::minutes(30),
                RecordValue::Steps { count: 3000 },
            ),
        ]);
        let snapshot = aggregator(store, reference_profile())
            .aggregate_at(noon())
            .await;

        let sessions = &snapshot.energy.sessions;
        assert_eq!(sessions.len(), 1);
        assert!((sessions[0].calories - 300.0).abs() < 1e-9);
        assert_eq!(sessions[0].method, EstimateMethod::DurationEstimate);
        assert!((snapshot.energy.exercise_calories - 300.0).abs() < 1e-9);
        assert!((snapshot.energy.active_calories - 300.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_session_calorie_lookup_failure_uses_duration_estimate() {
        let store = InMemoryRecordStore::new(vec![
            Record::new(
                GOOGLE_FIT,
                at(18),
                at(19),
                RecordValue::Exercise {
                    exercise_type: ExerciseType::Cycling,
                    title: None,
                },
            ),
            Record::new(
                GOOGLE_FIT,
                at(18),
                at(19),
                RecordValue::ActiveCalories { kcal: 650.0 },
            ),
        ])
        .with_failure(
            MetricKind::ActiveCalories,
            ProviderError::Unavailable("offline".to_string()),
        );
        let snapshot = aggregator(store, reference_profile())
            .aggregate_at(at(20))
            .await;

        let session = &snapshot.energy.sessions[0];
        assert!((session.calories - 480.0).abs() < 1e-9);
        assert_eq!(session.method, EstimateMethod::DurationEstimate);
    }

    #[tokio::test]
    async fn test_record_ending_at_midnight_is_not_counted_today() {
        let store = InMemoryRecordStore::new(vec![
            Record::new(
                SAMSUNG,
                midnight() - ChronoDuration::hours(1),
                midnight(),
                RecordValue::Steps { count: 5000 },
            ),
            Record::new(SAMSUNG, at(8), at(9), RecordValue::Steps { count: 1000 }),
        ]);
        let snapshot = aggregator(store, reference_profile())
            .aggregate_at(noon())
            .await;

        assert_eq!(snapshot.steps(), 1000);
        assert_eq!(
            snapshot.metric(MetricKind::Steps).unwrap().record_count,
            1
        );
    }

    #[tokio::test]
    async fn test_steps_after_session_end_are_not_session_evidence() {
        let session_end = at(7) + ChronoDuration::minutes(10);
        let store = InMemoryRecordStore::new(vec![
            Record::new(
                SAMSUNG,
                at(7),
                session_end,
                RecordValue::Exercise {
                    exercise_type: ExerciseType::Walking,
                    title: None,
                },
            ),
            Record::new(
                SAMSUNG,
                session_end,
                session_end + ChronoDuration::hours(1),
                RecordValue::Steps { count: 6000 },
            ),
        ]);
        let snapshot = aggregator(store, reference_profile())
            .aggregate_at(noon())
            .await;

        let session = &snapshot.energy.sessions[0];
        assert!((session.calories - 40.0).abs() < 1e-9);
        assert_eq!(session.method, EstimateMethod::DurationEstimate);
        assert_eq!(snapshot.steps(), 6000);
    }

    #[tokio::test]
    async fn test_malformed_record_degrades_only_its_metric() {
        let store = InMemoryRecordStore::new(vec![
            Record::new(GOOGLE_FIT, at(9), at(8), RecordValue::Distance { meters: 1200.0 }),
            Record::new(GOOGLE_FIT, at(8), at(9), RecordValue::Steps { count: 900 }),
        ]);
        let snapshot = aggregator(store, reference_profile())
            .aggregate_at(noon())
            .await;

        assert_eq!(snapshot.steps(), 900);
        assert_eq!(snapshot.degraded.len(), 1);
        assert_eq!(snapshot.degraded[0].kind, MetricKind::Distance);
        assert!(snapshot.degraded[0].reason.starts_with("Malformed record"));
    }

    #[tokio::test]
    async fn test_measured_session_calories() {
        let store = InMemoryRecordStore::new(vec![
            Record::new(
                SAMSUNG,
                at(18),
                at(19),
                RecordValue::Exercise {
                    exercise_type: ExerciseType::Swimming,
                    title: None,
                },
            ),
            Record::new(SAMSUNG, at(18), at(19), RecordValue::ActiveCalories { kcal: 410.0 }),
            Record::new(GOOGLE_FIT, at(18), at(19), RecordValue::ActiveCalories { kcal: 900.0 }),
        ]);
        let snapshot = aggregator(store, reference_profile())
            .aggregate_at(at(20))
            .await;

        let session = &snapshot.energy.sessions[0];
        assert_eq!(session.calories, 410.0);
        assert_eq!(session.method, EstimateMethod::MeasuredCalories);
    }

    #[tokio::test]
    async fn test_reconciled_weight_fills_profile_gap() {
        let store = InMemoryRecordStore::new(vec![Record::point(
            SAMSUNG,
            midnight() - ChronoDuration::days(3),
            RecordValue::Weight { kg: 90.0 },
        )]);
        let profile = StaticProfile::new(UserProfile {
            weight_kg: None,
            ..UserProfile::new(30, Gender::Male, 170.0, 0.0)
        });
        let snapshot = aggregator(store, profile).aggregate_at(noon()).await;

        // 10 * 90 + 6.25 * 170 - 5 * 30 + 5
        assert!((snapshot.energy.daily_bmr - 1817.5).abs() < 1e-9);
        assert!(!snapshot.energy.profile_defaults_used);
    }

    #[tokio::test]
    async fn test_current_heart_rate_uses_last_hour() {
        let store = InMemoryRecordStore::new(vec![
            Record::point(SAMSUNG, at(9), RecordValue::HeartRate { bpm: 95, samples: vec![] }),
            Record::point(
                GOOGLE_FIT,
                noon() - ChronoDuration::minutes(10),
                RecordValue::HeartRate { bpm: 72, samples: vec![] },
            ),
        ]);
        let agg = aggregator(store, reference_profile());

        let current = agg.current_heart_rate(noon()).await;
        assert_eq!(current.final_value, MetricValue::Bpm(72));
        assert_eq!(current.winning_tier, Some(ProvenanceTier::Secondary));

        let snapshot = agg.aggregate_at(noon()).await;
        assert_eq!(snapshot.heart_rate(), 95);
        assert_eq!(
            snapshot
                .metric(MetricKind::RestingHeartRate)
                .unwrap()
                .final_value,
            MetricValue::Bpm(95)
        );
    }

    #[tokio::test]
    async fn test_from_config_applies_timezone() {
        let config = VitalsConfig::from_json(r#"{"timezone": "Asia/Tokyo"}"#).unwrap();
        let agg = Aggregator::from_config(
            Arc::new(InMemoryRecordStore::default()),
            Arc::new(reference_profile()),
            &config,
        )
        .unwrap();

        let snapshot = agg.aggregate_at(noon()).await;
        // Noon UTC is 21:00 in Tokyo; local midnight was 15:00 UTC the day before
        assert_eq!(snapshot.window_start, midnight() - ChronoDuration::hours(9));
    }
}
