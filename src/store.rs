//! Collaborator interfaces
//!
//! The engine never talks to a health platform directly. Records and the user
//! profile are supplied through these traits, so each aggregation pass holds
//! its own references and there is no process-wide client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ProviderError, VitalsError};
use crate::types::{MetricKind, Record, UserProfile};
use crate::window::TimeWindow;

/// Source of raw time-ranged records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch every record of `kind` overlapping `[start, end)`, as decided by
    /// [`TimeWindow::overlaps`]
    async fn fetch_records(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Record>, ProviderError>;
}

/// Source of the user's profile
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// `Ok(None)` means the user never filled in a profile
    async fn read_profile(&self) -> Result<Option<UserProfile>, ProviderError>;
}

/// Record store backed by a vector, used by the CLI, FFI and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    records: Vec<Record>,
    failures: HashMap<MetricKind, ProviderError>,
    delays: HashMap<MetricKind, Duration>,
}

impl InMemoryRecordStore {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    /// Parse a JSON array of records
    pub fn from_json(json: &str) -> Result<Self, VitalsError> {
        let records: Vec<Record> = serde_json::from_str(json)?;
        Ok(Self::new(records))
    }

    /// Parse NDJSON (one record per line, blank lines skipped)
    pub fn from_ndjson(ndjson: &str) -> Result<Self, VitalsError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(trimmed).map_err(|e| {
                VitalsError::ParseError(format!("line {}: {}", line_num + 1, e))
            })?;
            records.push(record);
        }
        Ok(Self::new(records))
    }

    /// Make every fetch of `kind` fail with `error`
    pub fn with_failure(mut self, kind: MetricKind, error: ProviderError) -> Self {
        self.failures.insert(kind, error);
        self
    }

    /// Delay every fetch of `kind` by `delay`
    pub fn with_delay(mut self, kind: MetricKind, delay: Duration) -> Self {
        self.delays.insert(kind, delay);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn fetch_records(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Record>, ProviderError> {
        if let Some(delay) = self.delays.get(&kind) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(error) = self.failures.get(&kind) {
            return Err(error.clone());
        }

        let window = TimeWindow::new(start, end);
        let mut matched = Vec::new();
        for record in self.records.iter().filter(|r| r.kind() == kind) {
            if record.end_time < record.start_time {
                return Err(ProviderError::MalformedRecord(format!(
                    "{} record from {} ends before it starts",
                    kind, record.source_id
                )));
            }
            if window.overlaps(record.start_time, record.end_time) {
                matched.push(record.clone());
            }
        }
        Ok(matched)
    }
}

/// Profile source returning a fixed profile
#[derive(Debug, Clone, Default)]
pub struct StaticProfile {
    profile: Option<UserProfile>,
}

impl StaticProfile {
    pub fn new(profile: UserProfile) -> Self {
        Self {
            profile: Some(profile),
        }
    }

    /// A source for a user who has not entered a profile
    pub fn missing() -> Self {
        Self { profile: None }
    }
}

#[async_trait]
impl ProfileSource for StaticProfile {
    async fn read_profile(&self) -> Result<Option<UserProfile>, ProviderError> {
        Ok(self.profile.clone())
    }
}
