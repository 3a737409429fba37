//! Engine configuration
//!
//! Loaded from JSON; every field has a default so an empty object is valid.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::VitalsError;
use crate::provenance::ProvenanceRules;
use crate::window::{parse_timezone, WindowPolicy};

/// Default per-fetch timeout in milliseconds
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;

/// Default lookback for weight, oxygen and blood pressure
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Default rolling window for sleep
pub const DEFAULT_ROLLING_SLEEP_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalsConfig {
    /// Device time zone (IANA name) used to find local midnight
    pub timezone: String,
    /// Budget for each record-store call
    pub fetch_timeout_ms: u64,
    pub lookback_days: i64,
    pub rolling_sleep_hours: i64,
    /// Source id fragments appended to the primary tier
    pub extra_primary_tokens: Vec<String>,
    /// Source id fragments appended to the secondary tier
    pub extra_secondary_tokens: Vec<String>,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            rolling_sleep_hours: DEFAULT_ROLLING_SLEEP_HOURS,
            extra_primary_tokens: Vec::new(),
            extra_secondary_tokens: Vec::new(),
        }
    }
}

impl VitalsConfig {
    /// Load configuration from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self, VitalsError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, VitalsError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), VitalsError> {
        parse_timezone(&self.timezone)?;
        if self.fetch_timeout_ms == 0 {
            return Err(VitalsError::InvalidConfig(
                "fetch_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.lookback_days < 0 {
            return Err(VitalsError::InvalidConfig(
                "lookback_days must not be negative".to_string(),
            ));
        }
        if self.rolling_sleep_hours <= 0 {
            return Err(VitalsError::InvalidConfig(
                "rolling_sleep_hours must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, VitalsError> {
        parse_timezone(&self.timezone)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn window_policy(&self) -> Result<WindowPolicy, VitalsError> {
        Ok(WindowPolicy {
            timezone: self.tz()?,
            lookback_days: self.lookback_days,
            rolling_hours: self.rolling_sleep_hours,
        })
    }

    pub fn provenance_rules(&self) -> ProvenanceRules {
        ProvenanceRules::with_extra_tokens(&self.extra_primary_tokens, &self.extra_secondary_tokens)
    }
}
