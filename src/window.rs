//! Query window policy
//!
//! Every metric kind is read over a fixed window derived from "now" and the
//! device's time zone. Local midnight is resolved with `chrono-tz` so that
//! day boundaries follow the user's calendar rather than UTC.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::VitalsError;
use crate::types::MetricKind;

/// Half-open time range `[start, end)` in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn minutes(&self) -> f64 {
        (self.end - self.start).num_seconds().max(0) as f64 / 60.0
    }

    /// Whether a record spanning `[start, end]` belongs to this window.
    ///
    /// Intervals must share time with the window; one that only touches an
    /// edge belongs to the neighbouring window. Point samples match anywhere
    /// in `[self.start, self.end]`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if start == end {
            start >= self.start && start <= self.end
        } else {
            start < self.end && end > self.start
        }
    }
}

/// Window families used by the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Local midnight through now
    DayToDate,
    /// The last `rolling_sleep_hours` hours
    Rolling,
    /// `lookback_days` before local midnight through now
    Lookback,
    /// The last hour, for instantaneous heart rate
    Short,
}

impl WindowKind {
    pub fn for_metric(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Sleep => WindowKind::Rolling,
            MetricKind::Weight | MetricKind::OxygenSaturation | MetricKind::BloodPressure => {
                WindowKind::Lookback
            }
            _ => WindowKind::DayToDate,
        }
    }
}

/// Parameters for resolving windows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPolicy {
    pub timezone: Tz,
    pub lookback_days: i64,
    pub rolling_hours: i64,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            lookback_days: 7,
            rolling_hours: 24,
        }
    }
}

impl WindowPolicy {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            ..Self::default()
        }
    }

    /// Local midnight of the day containing `now`
    pub fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        start_of_local_day(now, self.timezone)
    }

    pub fn resolve(&self, kind: WindowKind, now: DateTime<Utc>) -> TimeWindow {
        match kind {
            WindowKind::DayToDate => TimeWindow::new(self.day_start(now), now),
            WindowKind::Rolling => TimeWindow::new(now - Duration::hours(self.rolling_hours), now),
            WindowKind::Lookback => TimeWindow::new(
                self.day_start(now) - Duration::days(self.lookback_days),
                now,
            ),
            WindowKind::Short => TimeWindow::new(now - Duration::hours(1), now),
        }
    }

    pub fn for_metric(&self, kind: MetricKind, now: DateTime<Utc>) -> TimeWindow {
        self.resolve(WindowKind::for_metric(kind), now)
    }
}

/// Parse an IANA time zone name
pub fn parse_timezone(name: &str) -> Result<Tz, VitalsError> {
    name.parse::<Tz>()
        .map_err(|_| VitalsError::InvalidTimezone(name.to_string()))
}

/// Resolve local midnight for `now` in `tz`.
///
/// Zones that skip midnight on a DST transition start the day at the first
/// valid local instant after it.
pub fn start_of_local_day(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local_date = now.with_timezone(&tz).date_naive();
    let mut candidate = local_date.and_time(NaiveTime::MIN);

    for _ in 0..4 {
        if let Some(start) = tz.from_local_datetime(&candidate).earliest() {
            return start.with_timezone(&Utc);
        }
        candidate += Duration::minutes(30);
    }

    // No zone has a gap this long; fall back to the UTC day.
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}
