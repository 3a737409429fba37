//! Error types for Synheart Vitals

use std::time::Duration;

use thiserror::Error;

use crate::types::MetricKind;

/// Errors reported by a record or profile provider.
///
/// These never escape a snapshot computation: the orchestrator degrades the
/// affected metric to its identity value instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Permission denied for {0}")]
    PermissionDenied(MetricKind),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors that can occur outside the snapshot path
#[derive(Debug, Error)]
pub enum VitalsError {
    #[error("Failed to parse records: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Snapshot store error: {0}")]
    StoreError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),
}
