//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri della pipeline
//! - Fornisce validazione robusta dei parametri di input
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri di configurazione:
//! - `output_dir`: Directory radice dell'archivio (default: `downloaded_memories`)
//! - `timezone`: Timezone locale per bucketing e metadata (default: `UTC`)
//! - `workers`: Numero di worker paralleli (default: 4)
//! - `trial_limit`: Numero di entry per un trial run (default: None = run completo)
//! - `max_attempts`: Tentativi di download per asset (default: 3)
//! - `backoff_base_ms` / `backoff_max_ms`: Crescita del backoff (default: 500 / 8000)
//! - `request_timeout_secs`: Timeout per singolo tentativo (default: 30)
//! - `request_spacing_ms`: Pausa dopo ogni entry scaricata (default: 100)
//! - `json_output`: Eventi JSON su stdout invece della progress bar
//!
//! ## Esempio:
//! ```ignore
//! let config = Config {
//!     timezone: "Europe/Oslo".to_string(),
//!     trial_limit: Some(5),
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use crate::file_manager::FileManager;
use crate::timezone::LocalZone;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for an archive run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the `final` / `no_filters` / `overlays` trees
    pub output_dir: PathBuf,
    /// IANA timezone name or fixed UTC offset
    pub timezone: String,
    /// Number of parallel workers
    pub workers: usize,
    /// Process only the first N entries (None = everything)
    pub trial_limit: Option<usize>,
    /// Download attempts per asset, first try included
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each further retry
    pub backoff_base_ms: u64,
    /// Upper bound for a single retry delay
    pub backoff_max_ms: u64,
    /// Timeout for a single HTTP attempt
    pub request_timeout_secs: u64,
    /// Pause a worker takes after fetching an entry
    pub request_spacing_ms: u64,
    /// Output progress and status as JSON for programmatic use
    pub json_output: bool,
}

/// Whether the run is bounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Trial(usize),
    Full,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloaded_memories"),
            timezone: "UTC".to_string(),
            workers: 4,
            trial_limit: None,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            request_timeout_secs: 30,
            request_spacing_ms: 100,
            json_output: false,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow::anyhow!("Number of workers must be greater than 0"));
        }

        if self.trial_limit == Some(0) {
            return Err(anyhow::anyhow!("Trial run must process at least one entry"));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("Download attempts must be at least 1"));
        }

        if self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0 seconds"));
        }

        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(anyhow::anyhow!("Maximum backoff must not be smaller than the base backoff"));
        }

        if self.output_dir.exists() && !self.output_dir.is_dir() {
            return Err(anyhow::anyhow!("Output path is not a directory: {}", self.output_dir.display()));
        }

        self.local_zone()?;

        Ok(())
    }

    /// Parsed timezone
    pub fn local_zone(&self) -> Result<LocalZone> {
        Ok(self.timezone.parse::<LocalZone>()?)
    }

    pub fn run_mode(&self) -> RunMode {
        match self.trial_limit {
            Some(limit) => RunMode::Trial(limit),
            None => RunMode::Full,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_spacing(&self) -> Duration {
        Duration::from_millis(self.request_spacing_ms)
    }

    /// Per-user config file, if the platform has a config directory
    pub fn default_location() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("memory-kit").join("config.json"))
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        FileManager::atomic_write(path, content.as_bytes()).await
    }
}
