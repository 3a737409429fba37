//! Synheart Vitals - On-device health record reconciliation engine
//!
//! Vitals merges records about the same physiological quantity reported by
//! several health apps into one trustworthy value per metric, then estimates
//! the day's energy expenditure from the reconciled data:
//! provider fetch → provenance classification → per-metric reconciliation
//! → energy model → snapshot.
//!
//! ## Modules
//!
//! - **Reconciliation**: tiered source priority and per-metric fold policies
//! - **Aggregation**: concurrent, failure-isolated fetch of every metric
//! - **Energy**: step, exercise and basal calorie estimates

pub mod aggregator;
pub mod config;
pub mod energy;
pub mod error;
pub mod pipeline;
pub mod provenance;
pub mod reconciler;
pub mod store;
pub mod sync;
pub mod types;
pub mod window;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregator::Aggregator;
pub use config::VitalsConfig;
pub use error::{ProviderError, VitalsError};
pub use pipeline::{snapshot_from_json, HealthSync};
pub use provenance::{classify, ProvenanceRules, ProvenanceTier};
pub use reconciler::Reconciler;
pub use store::{InMemoryRecordStore, ProfileSource, RecordStore, StaticProfile};
pub use sync::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use types::{
    EnergyBreakdown, MetricKind, MetricValue, ReconciledMetric, Record, RecordValue, Snapshot,
    SyncSummary, UserProfile,
};
pub use window::{TimeWindow, WindowPolicy};

/// Library version
pub const VITALS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded by callers that export snapshots
pub const PRODUCER_NAME: &str = "synheart-vitals";
