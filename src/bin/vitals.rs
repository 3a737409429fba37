//! Vitals CLI - Command-line interface for Synheart Vitals
//!
//! Commands:
//! - snapshot: Reconcile a record dump into a snapshot
//! - last-sync: Print the summary of the last persisted snapshot
//! - classify: Print the provenance tier of source ids
//! - heart-rate: Latest heart rate over the last hour

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use synheart_vitals::pipeline::{parse_profile, parse_records};
use synheart_vitals::sync::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
use synheart_vitals::{HealthSync, VitalsConfig, VitalsError, PRODUCER_NAME, VITALS_VERSION};

/// Vitals - On-device reconciliation of multi-source health records
#[derive(Parser)]
#[command(name = "vitals")]
#[command(author = "Synheart AI Inc")]
#[command(version = VITALS_VERSION)]
#[command(about = "Reconcile health records from several apps into one snapshot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile records into a snapshot
    Snapshot {
        /// Records file, JSON array or NDJSON (use - for stdin)
        #[arg(short, long)]
        records: PathBuf,

        /// User profile JSON file
        #[arg(short, long)]
        profile: Option<PathBuf>,

        #[command(flatten)]
        settings: Settings,

        /// Persist the snapshot to this file
        #[arg(long)]
        state: Option<PathBuf>,

        /// Print only the sync summary
        #[arg(long)]
        summary: bool,

        /// Output format
        #[arg(long, default_value = "auto")]
        format: OutputFormat,
    },

    /// Print the summary of the last persisted snapshot
    LastSync {
        /// Snapshot file written by `snapshot --state`
        #[arg(long)]
        state: PathBuf,

        /// Output format
        #[arg(long, default_value = "auto")]
        format: OutputFormat,
    },

    /// Print the provenance tier of each source id
    Classify {
        /// Source ids (package names)
        #[arg(required = true)]
        source_ids: Vec<String>,

        /// Config file with extra tier tokens
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Latest heart rate over the hour before --now
    HeartRate {
        /// Records file, JSON array or NDJSON (use - for stdin)
        #[arg(short, long)]
        records: PathBuf,

        #[command(flatten)]
        settings: Settings,

        /// Output format
        #[arg(long, default_value = "auto")]
        format: OutputFormat,
    },
}

#[derive(clap::Args)]
struct Settings {
    /// Config JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device timezone (IANA format, e.g., "America/New_York"); overrides the config
    #[arg(long)]
    timezone: Option<String>,

    /// Per-fetch timeout in milliseconds; overrides the config
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Evaluation instant (RFC 3339); defaults to the current time
    #[arg(long)]
    now: Option<String>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Pretty when stdout is a terminal, compact otherwise
    Auto,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("synheart_vitals=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), VitalsCliError> {
    match cli.command {
        Commands::Snapshot {
            records,
            profile,
            settings,
            state,
            summary,
            format,
        } => cmd_snapshot(&records, profile.as_deref(), &settings, state, summary, &format),
        Commands::LastSync { state, format } => cmd_last_sync(state, &format),
        Commands::Classify { source_ids, config } => cmd_classify(&source_ids, config.as_deref()),
        Commands::HeartRate {
            records,
            settings,
            format,
        } => cmd_heart_rate(&records, &settings, &format),
    }
}

fn cmd_snapshot(
    records: &Path,
    profile: Option<&Path>,
    settings: &Settings,
    state: Option<PathBuf>,
    summary: bool,
    format: &OutputFormat,
) -> Result<(), VitalsCliError> {
    let config = settings.load_config()?;
    let now = settings.now()?;
    let store = parse_records(&read_input(records)?)?;
    if store.is_empty() {
        return Err(VitalsCliError::NoRecords);
    }
    let profile_json = profile.map(fs::read_to_string).transpose()?;

    let snapshots: Arc<dyn SnapshotStore> = match state {
        Some(path) => Arc::new(FileSnapshotStore::new(path)),
        None => Arc::new(MemorySnapshotStore::new()),
    };
    let sync = HealthSync::from_config(
        Arc::new(store),
        Arc::new(parse_profile(profile_json.as_deref())?),
        snapshots,
        &config,
    )?;

    let snapshot = sync.get_snapshot_at(now);
    if summary {
        print_json(&snapshot.summary(), format)
    } else {
        print_json(&snapshot, format)
    }
}

fn cmd_last_sync(state: PathBuf, format: &OutputFormat) -> Result<(), VitalsCliError> {
    let summary = FileSnapshotStore::new(state).load()?.map(|s| s.summary());
    print_json(&summary, format)
}

fn cmd_classify(source_ids: &[String], config: Option<&Path>) -> Result<(), VitalsCliError> {
    let config = match config {
        Some(path) => VitalsConfig::from_file(path)?,
        None => VitalsConfig::default(),
    };
    let rules = config.provenance_rules();

    for source_id in source_ids {
        let tier = rules.classify(source_id);
        let line = serde_json::json!({
            "source_id": source_id,
            "tier": tier.as_str(),
            "label": tier.label(),
        });
        println!("{}", line);
    }
    Ok(())
}

fn cmd_heart_rate(
    records: &Path,
    settings: &Settings,
    format: &OutputFormat,
) -> Result<(), VitalsCliError> {
    let config = settings.load_config()?;
    let now = settings.now()?;
    let store = parse_records(&read_input(records)?)?;

    let sync = HealthSync::from_config(
        Arc::new(store),
        Arc::new(parse_profile(None)?),
        Arc::new(MemorySnapshotStore::new()),
        &config,
    )?;
    let metric = sync.current_heart_rate_at(now);

    let output = serde_json::json!({
        "producer": PRODUCER_NAME,
        "as_of": now,
        "bpm": metric.final_value.as_bpm(),
        "source": metric.data_source_label(),
        "record_count": metric.record_count,
    });
    print_json(&output, format)
}

impl Settings {
    fn load_config(&self) -> Result<VitalsConfig, VitalsCliError> {
        let mut config = match &self.config {
            Some(path) => VitalsConfig::from_file(path)?,
            None => VitalsConfig::default(),
        };
        if let Some(tz) = &self.timezone {
            config.timezone = tz.clone();
        }
        if let Some(ms) = self.timeout_ms {
            config.fetch_timeout_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }

    fn now(&self) -> Result<DateTime<Utc>, VitalsCliError> {
        match &self.now {
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| VitalsCliError::InvalidTime(format!("{}: {}", s, e))),
            None => Ok(Utc::now()),
        }
    }
}

fn read_input(path: &Path) -> Result<String, VitalsCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn print_json<T: serde::Serialize>(value: &T, format: &OutputFormat) -> Result<(), VitalsCliError> {
    let pretty = match format {
        OutputFormat::Json => false,
        OutputFormat::JsonPretty => true,
        OutputFormat::Auto => atty::is(atty::Stream::Stdout),
    };
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", output);
    Ok(())
}

// Error types

#[derive(Debug)]
enum VitalsCliError {
    Io(io::Error),
    Vitals(VitalsError),
    Json(serde_json::Error),
    InvalidTime(String),
    NoRecords,
}

impl From<io::Error> for VitalsCliError {
    fn from(e: io::Error) -> Self {
        VitalsCliError::Io(e)
    }
}

impl From<VitalsError> for VitalsCliError {
    fn from(e: VitalsError) -> Self {
        VitalsCliError::Vitals(e)
    }
}

impl From<serde_json::Error> for VitalsCliError {
    fn from(e: serde_json::Error) -> Self {
        VitalsCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<VitalsCliError> for CliError {
    fn from(e: VitalsCliError) -> Self {
        match e {
            VitalsCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            VitalsCliError::Vitals(e) => {
                let (code, hint) = match &e {
                    VitalsError::ParseError(_) | VitalsError::JsonError(_) => (
                        "PARSE_ERROR",
                        "Each record needs source_id, start_time, end_time and a typed value",
                    ),
                    VitalsError::InvalidTimezone(_) => {
                        ("INVALID_TIMEZONE", "Use an IANA name such as America/New_York")
                    }
                    VitalsError::InvalidConfig(_) => ("INVALID_CONFIG", "Check the config file values"),
                    VitalsError::StoreError(_) => {
                        ("STORE_ERROR", "Delete the state file to start a fresh sync history")
                    }
                    VitalsError::IoError(_) => ("IO_ERROR", "Check file paths and permissions"),
                    VitalsError::DateParseError(_) => ("INVALID_TIME", "Use RFC 3339, e.g. 2024-01-15T12:00:00Z"),
                    VitalsError::RuntimeError(_) => ("RUNTIME_ERROR", "Retry the command"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            VitalsCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            VitalsCliError::InvalidTime(msg) => CliError {
                code: "INVALID_TIME".to_string(),
                message: msg,
                hint: Some("Use RFC 3339, e.g. 2024-01-15T12:00:00Z".to_string()),
            },
            VitalsCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure the records file is not empty".to_string()),
            },
        }
    }
}
