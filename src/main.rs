//! # Memory Kit - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del logging con `tracing` (filtro da `RUST_LOG`)
//! - Caricamento della configurazione (file + override da CLI)
//! - Parsing dell'export e avvio della pipeline
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI (export, output, timezone, workers, etc.)
//! 2. Configura il logging (INFO o DEBUG a seconda del flag verbose)
//! 3. Carica e valida la configurazione
//! 4. Rimuove i file temporanei di una run interrotta e verifica i tool esterni
//! 5. Parsa l'export: errore fatale se illeggibile o senza entry
//! 6. Avvia `PipelineDriver` e stampa il riepilogo
//!
//! ## Esempio di utilizzo:
//! ```bash
//! memory-kit memories_history.json --timezone Europe/Oslo --trial 5 --verbose
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use memory_kit::file_manager::FileManager;
use memory_kit::json_output::JsonMessage;
use memory_kit::platform::PlatformCommands;
use memory_kit::progress::ProgressManager;
use memory_kit::{Config, ExportParser, PipelineDriver, PipelineServices, PipelineState, RunMode};

#[derive(Parser)]
#[command(name = "memory-kit")]
#[command(about = "Rebuild a memories archive from an exported history, with correct dates and overlays")]
struct Args {
    /// Exported history file (JSON or HTML)
    export: PathBuf,

    /// Root of the final / no_filters / overlays trees
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Local timezone (IANA name like Europe/Oslo, or an offset like UTC-5)
    #[arg(short, long)]
    timezone: Option<String>,

    /// Number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Trial run: process only the first N entries
    #[arg(long, value_name = "N", conflicts_with = "full")]
    trial: Option<usize>,

    /// Full run over every entry (overrides a trial limit from the config file)
    #[arg(long)]
    full: bool,

    /// Download attempts per asset
    #[arg(long)]
    attempts: Option<u32>,

    /// Timeout in seconds for a single download attempt
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Output progress as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Configuration file to load
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the effective configuration to FILE
    #[arg(long, value_name = "FILE")]
    save_config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply_to(&self, config: &mut Config) {
        if let Some(ref output) = self.output {
            config.output_dir = output.clone();
        }
        if let Some(ref timezone) = self.timezone {
            config.timezone = timezone.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.trial.is_some() {
            config.trial_limit = self.trial;
        }
        if self.full {
            config.trial_limit = None;
        }
        if let Some(attempts) = self.attempts {
            config.max_attempts = attempts;
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout_secs = timeout;
        }
        if self.json {
            config.json_output = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stderr keeps stdout free for JSON events
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = run(&args).await;
    if let Err(ref e) = result {
        if args.json {
            JsonMessage::error(e.to_string(), e.chain().nth(1).map(|cause| cause.to_string())).emit();
        }
    }
    result
}

async fn load_config(args: &Args) -> Result<Config> {
    let mut config = match args.config {
        Some(ref path) => {
            if !path.exists() {
                return Err(anyhow::anyhow!("Config file does not exist: {}", path.display()));
            }
            Config::from_file(path).await?
        }
        None => match Config::default_location() {
            Some(path) if path.exists() => {
                info!("Using configuration from {}", path.display());
                Config::from_file(&path).await?
            }
            _ => Config::default(),
        },
    };

    args.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

async fn run(args: &Args) -> Result<()> {
    let start_time = Instant::now();
    let config = load_config(args).await?;

    if let Some(ref path) = args.save_config {
        config.save_to_file(path).await?;
        info!("Saved configuration to {}", path.display());
    }

    if !args.export.is_file() {
        return Err(anyhow::anyhow!("Export file does not exist: {}", args.export.display()));
    }

    if !config.output_dir.exists() {
        std::fs::create_dir_all(&config.output_dir)?;
        info!("Created output directory: {}", config.output_dir.display());
    }
    let removed = FileManager::sweep_stale_temp(&config.output_dir)?;
    if removed > 0 {
        info!("🧹 Removed {} leftover temporary paths from an interrupted run", removed);
    }

    let dependencies = PlatformCommands::instance().probe_dependencies().await;
    for consequence in dependencies.consequences() {
        warn!("⚠️  {}", consequence);
    }

    let spinner = ProgressManager::spinner("Parsing export...", config.json_output);
    let parsed = ExportParser::new(config.local_zone()?).parse_file(&args.export).await;
    spinner.finish_and_clear();
    let report = parsed?;

    for error in &report.errors {
        warn!("Skipped record: {}", error);
    }
    if report.entries.is_empty() {
        return Err(anyhow::anyhow!(
            "No usable entries in {} ({} malformed records)",
            args.export.display(),
            report.errors.len()
        ));
    }

    let driver = PipelineDriver::new(config.clone(), PipelineServices::production(&config)?)?;
    let selected = match config.run_mode() {
        RunMode::Trial(limit) => limit.min(report.entries.len()),
        RunMode::Full => report.entries.len(),
    };

    if config.json_output {
        JsonMessage::start(args.export.clone(), &config, selected, report.errors.len()).emit();
    } else {
        info!("Archiving {} memories into {}", selected, config.output_dir.display());
        info!("Timezone: {} | Workers: {}", config.timezone, config.workers);
    }

    let stop_tx = driver.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, finishing entries in progress...");
            let _ = stop_tx.send(());
        }
    });

    let state = driver.run(report).await;
    print_summary(&state, &config, &args.export, start_time.elapsed().as_secs_f64());

    Ok(())
}

fn print_summary(state: &PipelineState, config: &Config, export: &Path, duration: f64) {
    if config.json_output {
        JsonMessage::complete(state, duration).emit();
        return;
    }

    info!("=== Archive Complete ===");
    info!("Export: {}", export.display());
    info!("Entries in this run: {}", state.total);
    info!("Downloaded: {}", state.downloaded);
    info!("Skipped (already archived): {}", state.skipped);
    info!("Failed: {}", state.failed);
    info!("Placed, tagging incomplete: {}", state.tagging_incomplete);
    info!("Malformed export records: {}", state.parse_errors);
    if state.not_started > 0 {
        info!("Not started (interrupted): {}", state.not_started);
    }
    for (kind, count) in &state.failures_by_kind {
        info!("  • {}: {}", kind, count);
    }
    if !state.failures.is_empty() {
        info!("--- First failures ---");
        for failure in state.first_failures() {
            info!("  • {}: {}", failure.id, failure.reason);
        }
        info!("Run again to retry only the failed entries; archived ones are skipped");
    }
    info!("Duration: {:.1}s", duration);
}
