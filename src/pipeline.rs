//! Blocking entry points
//!
//! [`HealthSync`] wraps an [`Aggregator`] with its own single-threaded tokio
//! runtime and a [`SnapshotStore`], for callers that are not async. Fetches
//! still run concurrently inside each call.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tracing::warn;

use crate::aggregator::Aggregator;
use crate::config::VitalsConfig;
use crate::error::VitalsError;
use crate::store::{InMemoryRecordStore, ProfileSource, RecordStore, StaticProfile};
use crate::sync::{last_sync_summary, MemorySnapshotStore, SnapshotStore};
use crate::types::{ReconciledMetric, Snapshot, SyncSummary, UserProfile};

/// Compute a snapshot from serialized records and profile.
///
/// `records` may be a JSON array or NDJSON. A `None` profile is treated as
/// missing and the energy model falls back to defaults.
///
/// # Example
/// ```ignore
/// let snapshot = snapshot_from_json(records_json, None, &VitalsConfig::default(), Utc::now())?;
/// println!("{} steps", snapshot.steps());
/// ```
pub fn snapshot_from_json(
    records: &str,
    profile: Option<&str>,
    config: &VitalsConfig,
    now: DateTime<Utc>,
) -> Result<Snapshot, VitalsError> {
    let sync = HealthSync::from_config(
        Arc::new(parse_records(records)?),
        Arc::new(parse_profile(profile)?),
        Arc::new(MemorySnapshotStore::new()),
        config,
    )?;
    Ok(sync.get_snapshot_at(now))
}

/// Parse records from a JSON array or NDJSON
pub fn parse_records(input: &str) -> Result<InMemoryRecordStore, VitalsError> {
    if input.trim_start().starts_with('[') {
        InMemoryRecordStore::from_json(input)
    } else {
        InMemoryRecordStore::from_ndjson(input)
    }
}

/// Parse a profile; `None` or blank input means the profile is missing
pub fn parse_profile(input: Option<&str>) -> Result<StaticProfile, VitalsError> {
    match input {
        Some(json) if !json.trim().is_empty() => Ok(StaticProfile::new(UserProfile::from_json(json)?)),
        _ => Ok(StaticProfile::missing()),
    }
}

/// Blocking aggregation facade with last-sync persistence.
///
/// Must not be called from inside another tokio runtime.
pub struct HealthSync {
    runtime: Runtime,
    aggregator: Aggregator,
    snapshots: Arc<dyn SnapshotStore>,
}

impl HealthSync {
    /// Create a facade with default configuration
    pub fn new(
        store: Arc<dyn RecordStore>,
        profile: Arc<dyn ProfileSource>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Result<Self, VitalsError> {
        Ok(Self {
            runtime: build_runtime()?,
            aggregator: Aggregator::new(store, profile),
            snapshots,
        })
    }

    pub fn from_config(
        store: Arc<dyn RecordStore>,
        profile: Arc<dyn ProfileSource>,
        snapshots: Arc<dyn SnapshotStore>,
        config: &VitalsConfig,
    ) -> Result<Self, VitalsError> {
        Ok(Self {
            runtime: build_runtime()?,
            aggregator: Aggregator::from_config(store, profile, config)?,
            snapshots,
        })
    }

    /// Aggregate everything up to now and persist the result
    pub fn get_snapshot(&self) -> Snapshot {
        self.get_snapshot_at(Utc::now())
    }

    /// Aggregate everything up to `now` and persist the result.
    ///
    /// A failed save is logged; the snapshot is returned either way.
    pub fn get_snapshot_at(&self, now: DateTime<Utc>) -> Snapshot {
        let snapshot = self.runtime.block_on(self.aggregator.aggregate_at(now));
        if let Err(e) = self.snapshots.save(&snapshot) {
            warn!(error = %e, id = %snapshot.id, "Failed to persist snapshot");
        }
        snapshot
    }

    /// Digest of the last persisted snapshot
    pub fn last_sync_summary(&self) -> Result<Option<SyncSummary>, VitalsError> {
        last_sync_summary(self.snapshots.as_ref())
    }

    /// Latest heart rate over the last hour; not persisted
    pub fn current_heart_rate(&self) -> ReconciledMetric {
        self.current_heart_rate_at(Utc::now())
    }

    pub fn current_heart_rate_at(&self, now: DateTime<Utc>) -> ReconciledMetric {
        self.runtime
            .block_on(self.aggregator.current_heart_rate(now))
    }
}

fn build_runtime() -> Result<Runtime, VitalsError> {
    Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| VitalsError::RuntimeError(e.to_string()))
}
