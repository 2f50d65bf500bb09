//! Tidemark administration CLI.
//!
//! Subcommands cover the operational surface of the pipeline:
//! - `init` applies the persisted layout (pre-deploy: raw store,
//!   post-deploy: rollup tables), with dry-run
//! - `status` reports schema, partition, and rollup state
//! - `refresh` / `compress` / `prune` run the scheduled jobs one-shot
//! - `run` hosts the recurring jobs until interrupted; ingestion workers
//!   live inside producing services via `tm_ingest::spawn_pipeline`
//! - `completions` emits shell completions

mod config;

use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use config::{ConfigError, PipelineConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tm_rollup::{refresh, AggregateDef, RefreshReport, RollupError, Scheduler};
use tm_store::{LifecycleReport, PartitionSummary, Store, StoreConfig, StoreError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Cadence of the compression and retention jobs under `run`.
const LIFECYCLE_INTERVAL: Duration = Duration::from_secs(3600);

/// Tidemark telemetry pipeline administration
#[derive(Parser)]
#[command(name = "tidemark")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Store root directory
    #[arg(long, global = true, env = "TIDEMARK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Pipeline configuration file (TOML)
    #[arg(long, global = true, env = "TIDEMARK_CONFIG")]
    config: Option<PathBuf>,

    /// Output format for command payloads
    #[arg(long, short = 'f', global = true, default_value = "text")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSONL on stderr
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Phase {
    /// Raw store layout (safe before the new code deploys)
    Pre,
    /// Rollup tables (after the new code deploys)
    Post,
    /// Both phases in order
    All,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the persisted layout
    Init {
        #[arg(long, value_enum, default_value = "all")]
        phase: Phase,

        /// Report what would be applied without touching the store
        #[arg(long)]
        dry_run: bool,
    },

    /// Show schema, partition, and rollup status
    Status,

    /// Run aggregate refreshes once
    Refresh {
        /// Refresh a single definition instead of the whole catalog
        #[arg(long)]
        name: Option<String>,
    },

    /// Compress aged partitions once
    Compress {
        #[arg(long)]
        dry_run: bool,
    },

    /// Drop partitions past the retention horizon once
    Prune {
        #[arg(long)]
        dry_run: bool,
    },

    /// Host the scheduled refresh and lifecycle jobs
    Run {
        /// Exit after this many seconds instead of waiting for SIGINT
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("rollup error: {0}")]
    Rollup(#[from] RollupError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("unknown aggregate definition: {0}")]
    UnknownAggregate(String),
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.global);

    if let Err(err) = dispatch(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(opts: &GlobalOpts) {
    let default_level = if opts.quiet {
        "error"
    } else {
        match opts.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries command payloads; logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if opts.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    let pipeline = PipelineConfig::load(cli.global.config.as_deref())?;
    let store_config = pipeline.store_config(cli.global.data_dir.clone());
    let format = cli.global.format;

    match cli.command {
        Commands::Init { phase, dry_run } => {
            let report = cmd_init(&pipeline, &store_config, phase, dry_run)?;
            emit(format, &report, render_init)
        }
        Commands::Status => {
            let report = cmd_status(&pipeline, &store_config)?;
            emit(format, &report, render_status)
        }
        Commands::Refresh { name } => {
            let reports = cmd_refresh(&pipeline, &store_config, name.as_deref())?;
            emit(format, &reports, render_refresh)
        }
        Commands::Compress { dry_run } => {
            let report = cmd_compress(&pipeline, &store_config, dry_run)?;
            emit(format, &report, render_lifecycle)
        }
        Commands::Prune { dry_run } => {
            let report = cmd_prune(&pipeline, &store_config, dry_run)?;
            emit(format, &report, render_lifecycle)
        }
        Commands::Run { duration_secs } => {
            cmd_run(&pipeline, &store_config, cli.global.data_dir, duration_secs)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "tidemark",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

fn emit<T: Serialize>(
    format: OutputFormat,
    value: &T,
    render: impl FnOnce(&T) -> String,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{}", render(value)),
    }
    Ok(())
}

// ===== schema marker =====

fn marker_path(config: &StoreConfig) -> PathBuf {
    config.data_dir.join("schema_version")
}

/// A mismatched or missing schema is fatal: the hosting service must not
/// proceed against a layout it does not understand.
fn check_schema(config: &StoreConfig) -> Result<(), CliError> {
    let path = marker_path(config);
    if !path.exists() {
        return Err(CliError::Schema(
            "store not initialized; run 'tidemark init' first".to_string(),
        ));
    }
    let found = std::fs::read_to_string(&path)?;
    let found = found.trim();
    if found != tm_store::SCHEMA_VERSION {
        return Err(CliError::Schema(format!(
            "schema version mismatch: store has {found}, binary expects {}",
            tm_store::SCHEMA_VERSION
        )));
    }
    Ok(())
}

// ===== init =====

#[derive(Debug, Serialize)]
struct InitReport {
    phase: String,
    dry_run: bool,
    applied: Vec<String>,
    skipped: Vec<String>,
}

fn cmd_init(
    pipeline: &PipelineConfig,
    store_config: &StoreConfig,
    phase: Phase,
    dry_run: bool,
) -> Result<InitReport, CliError> {
    pipeline.validate(Some(store_config.data_dir.clone()))?;

    let mut report = InitReport {
        phase: format!("{phase:?}").to_lowercase(),
        dry_run,
        applied: Vec::new(),
        skipped: Vec::new(),
    };

    if matches!(phase, Phase::Pre | Phase::All) {
        init_raw(store_config, dry_run, &mut report)?;
    }
    if matches!(phase, Phase::Post | Phase::All) {
        init_rollups(pipeline, store_config, dry_run, &mut report)?;
    }
    Ok(report)
}

fn init_raw(
    config: &StoreConfig,
    dry_run: bool,
    report: &mut InitReport,
) -> Result<(), CliError> {
    let marker = marker_path(config);
    if marker.exists() {
        // Re-running against an existing store must not clobber a newer
        // or older layout silently.
        check_schema(config)?;
        report.skipped.push("raw store layout".to_string());
        return Ok(());
    }
    if dry_run {
        report.applied.push(format!(
            "would create raw store layout at {}",
            config.data_dir.display()
        ));
        return Ok(());
    }
    Store::open(config)?;
    std::fs::write(&marker, tm_store::SCHEMA_VERSION)?;
    report.applied.push("raw store layout".to_string());
    info!(data_dir = %config.data_dir.display(), "initialized raw store");
    Ok(())
}

fn init_rollups(
    pipeline: &PipelineConfig,
    config: &StoreConfig,
    dry_run: bool,
    report: &mut InitReport,
) -> Result<(), CliError> {
    let rollups_dir = config.data_dir.join("rollups");
    if !dry_run {
        std::fs::create_dir_all(&rollups_dir)?;
    }
    for def in pipeline.definitions() {
        let table = rollups_dir.join(format!("{}.json", def.name));
        if table.exists() {
            report.skipped.push(format!("rollup {}", def.name));
        } else if dry_run {
            report.applied.push(format!("would seed rollup {}", def.name));
        } else {
            std::fs::write(&table, "[]")?;
            report.applied.push(format!("rollup {}", def.name));
        }
    }
    Ok(())
}

fn render_init(report: &InitReport) -> String {
    let mut out = format!(
        "init ({}){}\n",
        report.phase,
        if report.dry_run { " [dry-run]" } else { "" }
    );
    for item in &report.applied {
        out.push_str(&format!("  + {item}\n"));
    }
    for item in &report.skipped {
        out.push_str(&format!("  = {item} (already applied)\n"));
    }
    out.push_str(&format!(
        "{} applied, {} pending",
        report.applied.len(),
        report.skipped.len()
    ));
    out
}

// ===== status =====

#[derive(Debug, Serialize)]
struct RollupStatus {
    name: String,
    initialized: bool,
    rows: usize,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    schema_version: Option<String>,
    expected_schema_version: &'static str,
    partitions: Vec<PartitionSummary>,
    rollups: Vec<RollupStatus>,
}

fn cmd_status(
    pipeline: &PipelineConfig,
    store_config: &StoreConfig,
) -> Result<StatusReport, CliError> {
    let marker = marker_path(store_config);
    let schema_version = marker
        .exists()
        .then(|| std::fs::read_to_string(&marker))
        .transpose()?
        .map(|s| s.trim().to_string());

    let store = Store::open(store_config)?;
    let mut rollups = Vec::new();
    for def in pipeline.definitions() {
        let path = tm_rollup::table_path(&store, &def);
        let initialized = path.exists();
        let rows = if initialized {
            tm_rollup::load_table(&path)?.len()
        } else {
            0
        };
        rollups.push(RollupStatus {
            name: def.name,
            initialized,
            rows,
        });
    }

    Ok(StatusReport {
        schema_version,
        expected_schema_version: tm_store::SCHEMA_VERSION,
        partitions: store.partition_summaries()?,
        rollups,
    })
}

fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    match &report.schema_version {
        Some(v) if v == report.expected_schema_version => {
            out.push_str(&format!("schema: {v} (applied)\n"));
        }
        Some(v) => out.push_str(&format!(
            "schema: {v} (MISMATCH, expected {})\n",
            report.expected_schema_version
        )),
        None => out.push_str("schema: not initialized\n"),
    }
    out.push_str(&format!("partitions: {}\n", report.partitions.len()));
    for p in &report.partitions {
        out.push_str(&format!(
            "  {} {} {} events {} bytes\n",
            p.date, p.state, p.events, p.bytes
        ));
    }
    out.push_str(&format!("rollups: {}\n", report.rollups.len()));
    for r in &report.rollups {
        let state = if r.initialized { "ready" } else { "pending" };
        out.push_str(&format!("  {} {} {} rows\n", r.name, state, r.rows));
    }
    out.trim_end().to_string()
}

// ===== one-shot jobs =====

fn cmd_refresh(
    pipeline: &PipelineConfig,
    store_config: &StoreConfig,
    name: Option<&str>,
) -> Result<Vec<RefreshReport>, CliError> {
    check_schema(store_config)?;
    let store = Store::open(store_config)?;

    let defs: Vec<AggregateDef> = match name {
        Some(name) => {
            let def = pipeline
                .definitions()
                .into_iter()
                .find(|d| d.name == name)
                .ok_or_else(|| CliError::UnknownAggregate(name.to_string()))?;
            vec![def]
        }
        None => pipeline.definitions(),
    };

    let now = Utc::now();
    let mut reports = Vec::with_capacity(defs.len());
    for def in &defs {
        reports.push(refresh(def, &store, now)?);
    }
    Ok(reports)
}

fn render_refresh(reports: &Vec<RefreshReport>) -> String {
    let mut out = String::new();
    for r in reports {
        out.push_str(&format!(
            "{}: {} raw rows -> {} rollup rows [{} .. {})\n",
            r.definition, r.raw_rows, r.rows_written, r.window_start, r.window_end
        ));
    }
    out.trim_end().to_string()
}

fn cmd_compress(
    pipeline: &PipelineConfig,
    store_config: &StoreConfig,
    dry_run: bool,
) -> Result<LifecycleReport, CliError> {
    check_schema(store_config)?;
    pipeline.validate(Some(store_config.data_dir.clone()))?;
    let store = Store::open(store_config)?;
    Ok(store.compress_aged(&store_config.compression_policy(), Utc::now(), dry_run)?)
}

fn cmd_prune(
    pipeline: &PipelineConfig,
    store_config: &StoreConfig,
    dry_run: bool,
) -> Result<LifecycleReport, CliError> {
    check_schema(store_config)?;
    pipeline.validate(Some(store_config.data_dir.clone()))?;
    let store = Store::open(store_config)?;
    Ok(store.prune_expired(&store_config.retention_policy(), Utc::now(), dry_run)?)
}

fn render_lifecycle(report: &LifecycleReport) -> String {
    let mut out = format!(
        "{:?}{}: {} partitions, {} bytes reclaimed",
        report.action,
        if report.dry_run { " [dry-run]" } else { "" },
        report.partitions.len(),
        report.bytes_reclaimed
    );
    for date in &report.partitions {
        out.push_str(&format!("\n  {date}"));
    }
    for date in &report.skipped {
        out.push_str(&format!("\n  {date} (awaiting compression)"));
    }
    out
}

// ===== run =====

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    let handler = handle_signal as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

fn cmd_run(
    pipeline: &PipelineConfig,
    store_config: &StoreConfig,
    data_dir: Option<PathBuf>,
    duration_secs: Option<u64>,
) -> Result<(), CliError> {
    pipeline.validate(data_dir)?;
    check_schema(store_config)?;
    let store = Arc::new(Store::open(store_config)?);

    let mut scheduler = Scheduler::new();
    for def in pipeline.definitions() {
        let store = store.clone();
        let interval = def.schedule_interval;
        let name = format!("refresh-{}", def.name);
        scheduler.spawn_job(name, interval, move || {
            refresh(&def, &store, Utc::now())
                .map(|_| ())
                .map_err(|e| e.to_string())
        })?;
    }

    let compress_store = store.clone();
    let compress_policy = store_config.compression_policy();
    scheduler.spawn_job("compress", LIFECYCLE_INTERVAL, move || {
        compress_store
            .compress_aged(&compress_policy, Utc::now(), false)
            .map(|_| ())
            .map_err(|e| e.to_string())
    })?;

    let prune_store = store.clone();
    let retention_policy = store_config.retention_policy();
    scheduler.spawn_job("retention", LIFECYCLE_INTERVAL, move || {
        prune_store
            .prune_expired(&retention_policy, Utc::now(), false)
            .map(|_| ())
            .map_err(|e| e.to_string())
    })?;

    install_signal_handlers();
    info!(
        jobs = scheduler.stats().len(),
        data_dir = %store_config.data_dir.display(),
        "tidemark job host running"
    );

    let started = Instant::now();
    loop {
        if SHUTDOWN.load(Ordering::SeqCst) {
            warn!("shutdown signal received, draining jobs");
            break;
        }
        if let Some(secs) = duration_secs {
            if started.elapsed() >= Duration::from_secs(secs) {
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    scheduler.shutdown();
    info!("tidemark job host stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    fn configs(dir: &TempDir) -> (PipelineConfig, StoreConfig) {
        let pipeline = PipelineConfig::default();
        let store = pipeline.store_config(Some(dir.path().to_path_buf()));
        (pipeline, store)
    }

    #[test]
    fn init_applies_both_phases() {
        let dir = TempDir::new().unwrap();
        let (pipeline, store_config) = configs(&dir);

        let report = cmd_init(&pipeline, &store_config, Phase::All, false).unwrap();
        assert!(report.applied.iter().any(|a| a.contains("raw store")));
        // Seven rollup tables seeded.
        assert_eq!(
            report.applied.iter().filter(|a| a.contains("rollup")).count(),
            7
        );
        assert!(dir.path().join("schema_version").exists());
        assert!(dir.path().join("rollups/logins_hourly.json").exists());

        // Idempotent: a second run applies nothing.
        let again = cmd_init(&pipeline, &store_config, Phase::All, false).unwrap();
        assert!(again.applied.is_empty());
        assert_eq!(again.skipped.len(), 8);
    }

    #[test]
    fn init_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let (pipeline, store_config) = configs(&dir);

        let report = cmd_init(&pipeline, &store_config, Phase::All, true).unwrap();
        assert!(!report.applied.is_empty());
        assert!(!dir.path().join("schema_version").exists());
    }

    #[test]
    fn schema_mismatch_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (pipeline, store_config) = configs(&dir);
        cmd_init(&pipeline, &store_config, Phase::Pre, false).unwrap();
        std::fs::write(dir.path().join("schema_version"), "0.0.1").unwrap();

        let err = check_schema(&store_config).unwrap_err();
        assert!(matches!(err, CliError::Schema(_)));
        assert!(cmd_refresh(&pipeline, &store_config, None).is_err());
    }

    #[test]
    fn refresh_requires_initialized_store() {
        let dir = TempDir::new().unwrap();
        let (pipeline, store_config) = configs(&dir);
        let err = cmd_refresh(&pipeline, &store_config, None).unwrap_err();
        assert!(matches!(err, CliError::Schema(_)));
    }

    #[test]
    fn refresh_rejects_unknown_definition() {
        let dir = TempDir::new().unwrap();
        let (pipeline, store_config) = configs(&dir);
        cmd_init(&pipeline, &store_config, Phase::All, false).unwrap();

        let err = cmd_refresh(&pipeline, &store_config, Some("bogus")).unwrap_err();
        assert!(matches!(err, CliError::UnknownAggregate(_)));

        let reports = cmd_refresh(&pipeline, &store_config, Some("logins_hourly")).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].definition, "logins_hourly");
    }

    #[test]
    fn status_reports_pending_then_applied() {
        let dir = TempDir::new().unwrap();
        let (pipeline, store_config) = configs(&dir);

        let report = cmd_status(&pipeline, &store_config).unwrap();
        assert!(report.schema_version.is_none());
        assert!(report.rollups.iter().all(|r| !r.initialized));

        cmd_init(&pipeline, &store_config, Phase::All, false).unwrap();
        let report = cmd_status(&pipeline, &store_config).unwrap();
        assert_eq!(report.schema_version.as_deref(), Some(tm_store::SCHEMA_VERSION));
        assert!(report.rollups.iter().all(|r| r.initialized));
    }

    #[test]
    fn lifecycle_commands_respect_dry_run() {
        let dir = TempDir::new().unwrap();
        let (pipeline, store_config) = configs(&dir);
        cmd_init(&pipeline, &store_config, Phase::All, false).unwrap();

        let report = cmd_compress(&pipeline, &store_config, true).unwrap();
        assert!(report.dry_run);
        assert!(report.partitions.is_empty());
        let report = cmd_prune(&pipeline, &store_config, true).unwrap();
        assert!(report.dry_run);
    }
}
