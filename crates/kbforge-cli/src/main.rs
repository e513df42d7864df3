//! kbforge: ingest PDF/DOCX folders into a durable knowledge base.

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kbforge_core::{InputFolder, KbConfig, OcrCapability};
use kbforge_ingest::{Ingester, ProcessingMode, TextExtractor};
use kbforge_store::{validate_consistency, DuplicateTracker, HealthStatus, KnowledgeStore};

mod maintenance;

#[derive(Debug, Parser)]
#[command(
    name = "kbforge",
    version,
    about = "Document ingestion pipeline for the proposal/report knowledge base",
    after_help = "Processing modes:\n  \
        incremental (default)  Process only new or changed files\n  \
        --force-reprocess      Reprocess all files, ignoring the duplicate tracker\n  \
        --files F...           Process only the listed files"
)]
#[command(group(ArgGroup::new("command").multiple(false)))]
struct Cli {
    /// Reprocess every file, ignoring the duplicate tracker.
    #[arg(long, conflicts_with = "files")]
    force_reprocess: bool,

    /// Process only these files (selective mode).
    #[arg(long, num_args = 1.., value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Check file system, database, knowledge base, state and OCR, then exit.
    #[arg(long, group = "command")]
    health_check: bool,

    /// Cross-check the duplicate tracker against the knowledge base.
    #[arg(long, group = "command")]
    validate_state: bool,

    /// Delete all duplicate tracking records.
    #[arg(long, group = "command")]
    clear_duplicates: bool,

    /// Add knowledge base files missing from the duplicate tracker.
    #[arg(long, group = "command")]
    sync_states: bool,

    /// Write a timestamped snapshot of the knowledge base.
    #[arg(long, group = "command")]
    create_snapshot: bool,

    /// List knowledge base snapshots, newest first.
    #[arg(long, group = "command")]
    list_snapshots: bool,

    /// Restore the knowledge base from a snapshot file.
    #[arg(long, group = "command", value_name = "SNAPSHOT_FILE")]
    rollback: Option<PathBuf>,

    /// Print system status and metrics.
    #[arg(long, group = "command")]
    dashboard: bool,

    /// Input folder as NAME=PATH; repeatable. Replaces the default folders.
    #[arg(long = "folder", value_name = "NAME=PATH", value_parser = parse_folder)]
    folders: Vec<InputFolder>,

    /// Data directory holding the knowledge base, tracker and snapshots.
    #[arg(long, env = "KBFORGE_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_folder(spec: &str) -> Result<InputFolder, String> {
    InputFolder::parse(spec).map_err(|e| e.to_string())
}

impl Cli {
    fn mode(&self) -> ProcessingMode {
        if self.force_reprocess {
            ProcessingMode::ForceReprocess
        } else if !self.files.is_empty() {
            ProcessingMode::Selective(self.files.clone())
        } else {
            ProcessingMode::Incremental
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = KbConfig::from_env(&cli.data_dir)
        .with_context(|| format!("cannot prepare data directory {}", cli.data_dir.display()))?
        .with_folders(cli.folders.clone());
    info!("Data directory: {}", config.data_paths.root.display());

    let tracker = DuplicateTracker::open(&config.data_paths.tracker_db)
        .context("failed to open duplicate tracker")?;
    let store = KnowledgeStore::from_paths(&config.data_paths);

    let ok = run(&cli, &config, &tracker, &store)?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Execute the selected command. `Ok(false)` means it ran but reported failure.
fn run(
    cli: &Cli,
    config: &KbConfig,
    tracker: &DuplicateTracker,
    store: &KnowledgeStore,
) -> anyhow::Result<bool> {
    if cli.clear_duplicates {
        info!("Clearing all duplicate tracking records...");
        let removed = tracker.clear_all_records()?;
        println!("[SUCCESS] Duplicate tracker cleared ({} records removed)", removed);
        return Ok(true);
    }

    if cli.sync_states {
        info!("Synchronizing duplicate tracker and knowledge base states...");
        let report = store.sync_states(tracker)?;
        maintenance::print_sync(&report);
        return Ok(report.errors.is_empty());
    }

    if cli.create_snapshot {
        info!("Creating knowledge base snapshot...");
        let kb = store.load()?;
        return Ok(match store.snapshot(&kb) {
            Ok(path) => {
                println!("[SUCCESS] Snapshot created: {}", path.display());
                true
            }
            Err(e) => {
                println!("[ERROR] Failed to create snapshot: {}", e);
                false
            }
        });
    }

    if cli.list_snapshots {
        maintenance::print_snapshots(&store.list_snapshots()?);
        return Ok(true);
    }

    if let Some(snapshot) = &cli.rollback {
        info!("Rolling back to snapshot: {}", snapshot.display());
        if store.rollback(snapshot) {
            println!("[SUCCESS] Successfully rolled back to: {}", snapshot.display());
            println!("Note: previous knowledge base backed up as .rollback_backup");
            return Ok(true);
        }
        println!("[ERROR] Rollback failed");
        return Ok(false);
    }

    if cli.validate_state {
        let report = validate_consistency(tracker, &store.load()?);
        maintenance::print_consistency(&report);
        return Ok(report.status != HealthStatus::Error);
    }

    let ocr = OcrCapability::discover();

    if cli.health_check {
        info!("Performing system health check...");
        let report = maintenance::health_check(config, tracker, store, &ocr);
        maintenance::print_health(&report);
        return Ok(report.overall != HealthStatus::Error);
    }

    if cli.dashboard {
        info!("Generating monitoring dashboard...");
        let dashboard = maintenance::dashboard(config, tracker, store, &ocr);
        maintenance::print_dashboard(&dashboard);
        return Ok(dashboard.system_status != HealthStatus::Error);
    }

    if !ocr.available {
        info!("OCR disabled: scanned PDFs will be recorded as failures");
    }
    let extractor = TextExtractor::from_config(config, &ocr);
    let mode = cli.mode();
    info!("Starting {} processing", mode);
    let report = Ingester::new(config, tracker, &extractor).run(&mode)?;
    maintenance::print_run_summary(&report);
    Ok(true)
}
