//! Pitwall - broadcast graphics extraction
//!
//! The `pitwall` command runs the extraction daemon and exposes the manual
//! trigger and read-only views used by operators.
//!
//! ## Commands
//!
//! - `watch`: poll the pending directory until Ctrl-C
//! - `process`: process one image now (pending name or a fresh file)
//! - `status`: image counts per state and the active storage backend
//! - `records`: browse persisted extraction records
//! - `failures`: show failure log entries

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pitwall_core::{
    init_tracing, shutdown_channel, FailureLog, ImageReport, JsonlFailureLog, Pipeline,
    PipelineConfig, Worker, METRICS,
};
use pitwall_state::{PrimaryConfig, StorageRouter};
use pitwall_vision::OllamaClient;
use tracing::{debug, info, warn, Level};

#[derive(Parser)]
#[command(name = "pitwall")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract race data from broadcast frames with a vision model", long_about = None)]
struct Cli {
    /// Configuration file (missing file means built-in defaults)
    #[arg(short, long, global = true, env = "PITWALL_CONFIG", default_value = "config/pitwall.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background worker until interrupted
    Watch {
        /// Override the number of concurrent worker tasks
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Process a single image immediately
    Process {
        /// Name of an image already in the pending directory
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        name: Option<String>,

        /// Image file to copy into pending and process
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Store the supplied file under this name (default: manual_<timestamp>.jpg)
        #[arg(long, requires = "file", conflicts_with = "name")]
        save_as: Option<String>,
    },

    /// Show image counts and the active storage backend
    Status,

    /// Show persisted extraction records
    Records {
        /// Only records for this image
        #[arg(short, long)]
        image: Option<String>,

        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show failure log entries
    Failures {
        /// Only entries for this image
        #[arg(short, long)]
        image: Option<String>,

        /// Show only the most recent N entries
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        pitwall_core::telemetry::parse_level(&config.logging.level).unwrap_or(Level::INFO)
    };
    init_tracing(cli.json || config.logging.json, level);

    if config.database.primary.is_none() {
        match PrimaryConfig::from_env() {
            Ok(primary) => {
                info!(host = %primary.host, "Using primary database from environment");
                config.database.primary = Some(primary);
            }
            Err(reason) => debug!(%reason, "No primary database in environment"),
        }
    }

    match cli.command {
        Commands::Watch { workers } => {
            if let Some(workers) = workers {
                if workers == 0 {
                    bail!("--workers must be at least 1");
                }
                config.worker.workers = workers;
            }
            cmd_watch(&config).await
        }
        Commands::Process {
            name,
            file,
            save_as,
        } => cmd_process(&config, name.as_deref(), file.as_deref(), save_as.as_deref()).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Records { image, limit } => cmd_records(&config, image.as_deref(), limit).await,
        Commands::Failures { image, limit } => cmd_failures(&config, image.as_deref(), limit).await,
    }
}

/// Connect every backend and bootstrap directories.
async fn build_pipeline(config: &PipelineConfig) -> Result<Pipeline> {
    let storage = StorageRouter::connect(&config.database)
        .await
        .context("Failed to connect to the record database")?;
    info!(backend = %storage.active(), "Storage backend selected");

    let inference = Arc::new(OllamaClient::new(
        &config.inference.host,
        config.inference.timeout_secs,
    ));
    let failure_log = Arc::new(JsonlFailureLog::new(&config.paths.failure_log));
    failure_log
        .ensure_parent()
        .await
        .context("Failed to prepare failure log directory")?;

    let pipeline = Pipeline::from_config(config, inference, storage, failure_log);
    pipeline
        .lifecycle()
        .ensure_dirs()
        .await
        .context("Failed to create image directories")?;
    Ok(pipeline)
}

async fn cmd_watch(config: &PipelineConfig) -> Result<()> {
    let pipeline = Arc::new(build_pipeline(config).await?);

    let recovered = pipeline
        .lifecycle()
        .recover_inflight()
        .await
        .context("Failed to recover claimed images")?;
    if !recovered.is_empty() {
        warn!(count = recovered.len(), "Returned images claimed by a previous run to pending");
    }

    let (trigger, signal) = shutdown_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, finishing in-flight work"),
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C, shutting down"),
        }
        trigger.trigger();
    });

    info!(
        model = %config.inference.model,
        host = %config.inference.host,
        datatypes = ?config.datatypes.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
        "Watching for images"
    );
    let summary = Worker::new(pipeline, config.worker.clone()).run(signal).await;

    println!(
        "Processed: {}  Failed: {}  Returned to pending: {}",
        summary.processed, summary.failed, summary.released
    );
    if summary.stuck > 0 {
        println!("Could not move: {} (see failure log)", summary.stuck);
    }
    Ok(())
}

async fn cmd_process(
    config: &PipelineConfig,
    name: Option<&str>,
    file: Option<&Path>,
    save_as: Option<&str>,
) -> Result<()> {
    let pipeline = build_pipeline(config).await?;

    let report = match (name, file) {
        (Some(name), _) => pipeline
            .process_now(name)
            .await
            .with_context(|| format!("Cannot process {name}"))?,
        (None, Some(path)) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            pipeline
                .submit_and_process(save_as, bytes)
                .await
                .with_context(|| format!("Cannot process {}", path.display()))?
        }
        (None, None) => bail!("give an image name or --file"),
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &ImageReport) {
    let state = report
        .final_state
        .map(|s| s.to_string())
        .unwrap_or_else(|| "left in place".to_string());
    println!("{} -> {}", report.image_id, state);
    if let Some((code, reason)) = &report.image_error {
        println!("  image: {code} {reason}");
    }
    for outcome in &report.outcomes {
        match outcome.code() {
            None => println!("  {}: persisted ({} attempt(s))", outcome.datatype, outcome.attempts),
            Some(code) => {
                let reason = match &outcome.status {
                    pitwall_core::DatatypeStatus::Failed { reason, .. } => reason.as_str(),
                    pitwall_core::DatatypeStatus::Persisted => "",
                };
                println!("  {}: {code} {reason}", outcome.datatype);
            }
        }
    }
}

async fn cmd_status(config: &PipelineConfig) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let counts = pipeline
        .lifecycle()
        .counts()
        .await
        .context("Failed to count images")?;
    let records = pipeline
        .storage()
        .count()
        .await
        .context("Failed to count records")?;
    let failures = pipeline
        .failure_log()
        .entries()
        .await
        .context("Failed to read failure log")?
        .len();

    println!("Pending:    {}", counts.pending);
    println!("In flight:  {}", counts.in_flight);
    println!("Processed:  {}", counts.processed);
    println!("Failed:     {}", counts.failed);
    println!("Records:    {records}");
    println!("Failures:   {failures}");
    println!("Backend:    {}", pipeline.storage().active());
    println!("Model:      {} @ {}", config.inference.model, config.inference.host);
    METRICS.flush();
    Ok(())
}

async fn cmd_records(config: &PipelineConfig, image: Option<&str>, limit: usize) -> Result<()> {
    let storage = StorageRouter::connect(&config.database)
        .await
        .context("Failed to connect to the record database")?;

    let records = match image {
        Some(image) => storage.list_for_image(image).await?,
        None => storage.list_recent(limit).await?,
    };

    if records.is_empty() {
        println!("No records found");
        return Ok(());
    }
    for record in records.iter().take(limit) {
        println!(
            "{}  {}  {}  {}",
            record.captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.image_id,
            record.datatype,
            record.value
        );
    }
    Ok(())
}

async fn cmd_failures(config: &PipelineConfig, image: Option<&str>, limit: usize) -> Result<()> {
    let log = JsonlFailureLog::new(&config.paths.failure_log);
    let mut entries = log.entries().await.context("Failed to read failure log")?;
    if let Some(image) = image {
        entries.retain(|e| e.image_id == image);
    }

    if entries.is_empty() {
        println!("No failures recorded");
        return Ok(());
    }
    let skip = entries.len().saturating_sub(limit);
    for entry in entries.iter().skip(skip) {
        println!(
            "{}  {:<20} {:<20} {:<19} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.image_id,
            entry.datatype.as_deref().unwrap_or("-"),
            entry.code.as_str(),
            entry.message
        );
        if let Some(raw) = &entry.raw_response {
            println!("    response: {raw}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn process_accepts_name_or_file() {
        let cli = Cli::try_parse_from(["pitwall", "process", "frame.jpg"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Process { name: Some(_), file: None, .. }
        ));

        let cli = Cli::try_parse_from(["pitwall", "process", "--file", "/tmp/x.jpg"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Process { name: None, file: Some(_), .. }
        ));

        assert!(Cli::try_parse_from(["pitwall", "process"]).is_err());
    }

    #[test]
    fn save_as_only_applies_to_supplied_files() {
        let cli = Cli::try_parse_from([
            "pitwall", "process", "--file", "/tmp/x.jpg", "--save-as", "lap.jpg",
        ])
        .unwrap();
        match cli.command {
            Commands::Process { save_as, .. } => assert_eq!(save_as.as_deref(), Some("lap.jpg")),
            _ => panic!("expected process"),
        }

        assert!(Cli::try_parse_from(["pitwall", "process", "a.jpg", "--save-as", "b.jpg"]).is_err());
        assert!(Cli::try_parse_from(["pitwall", "process", "--save-as", "b.jpg"]).is_err());
    }

    #[test]
    fn config_defaults_to_repo_path() {
        let cli = Cli::try_parse_from(["pitwall", "status"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config/pitwall.toml"));
        assert!(!cli.json);
    }
}
