//! # JSON Output Module
//!
//! Output strutturato in JSON (una riga per evento) per chi pilota il tool da
//! un altro processo.
//!
//! ## Tipi di messaggi:
//! - `start`: Inizio run (export, output, numero di entry, configurazione)
//! - `entry_complete`: Fine elaborazione di una entry (archiviata, saltata, fallita)
//! - `complete`: Fine run con il riepilogo finale
//! - `error`: Errore fatale (export illeggibile, configurazione invalida)

use crate::config::{Config, RunMode};
use crate::error::FailureKind;
use crate::pipeline::state::{EntryOutcome, FailureRecord, PipelineState, Stage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum JsonMessage {
    /// Inizio della run
    #[serde(rename = "start")]
    Start {
        export: PathBuf,
        output_dir: PathBuf,
        total_entries: usize,
        parse_errors: usize,
        config: JsonConfig,
    },

    /// Fine elaborazione di una entry
    #[serde(rename = "entry_complete")]
    EntryComplete {
        id: String,
        status: &'static str,
        index: usize,
        total: usize,
        stage: Option<Stage>,
        kind: Option<FailureKind>,
        error: Option<String>,
    },

    /// Run completata
    #[serde(rename = "complete")]
    Complete {
        total: usize,
        downloaded: usize,
        skipped: usize,
        failed: usize,
        tagging_incomplete: usize,
        parse_errors: usize,
        not_started: usize,
        failures_by_kind: BTreeMap<FailureKind, usize>,
        first_failures: Vec<FailureRecord>,
        duration_seconds: f64,
    },

    /// Errore generale
    #[serde(rename = "error")]
    Error {
        message: String,
        details: Option<String>,
    },
}

/// Configurazione per output JSON
#[derive(Debug, Serialize)]
pub struct JsonConfig {
    pub timezone: String,
    pub workers: usize,
    pub trial_limit: Option<usize>,
    pub max_attempts: u32,
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn start(export: PathBuf, config: &Config, total_entries: usize, parse_errors: usize) -> Self {
        Self::Start {
            export,
            output_dir: config.output_dir.clone(),
            total_entries,
            parse_errors,
            config: JsonConfig::from(config),
        }
    }

    pub fn entry_complete(outcome: &EntryOutcome, index: usize, total: usize) -> Self {
        let (stage, kind, error) = match outcome {
            EntryOutcome::Failed { stage, kind, reason, .. } => (Some(*stage), Some(*kind), Some(reason.clone())),
            EntryOutcome::Archived { tagging_error: Some(reason), .. } => {
                (Some(Stage::Tagging), Some(FailureKind::Tagging), Some(reason.clone()))
            }
            EntryOutcome::Archived { tagging_error: None, .. } | EntryOutcome::Skipped { .. } => (None, None, None),
        };

        Self::EntryComplete {
            id: outcome.id().to_string(),
            status: outcome.status(),
            index,
            total,
            stage,
            kind,
            error,
        }
    }

    pub fn complete(state: &PipelineState, duration_seconds: f64) -> Self {
        Self::Complete {
            total: state.total,
            downloaded: state.downloaded,
            skipped: state.skipped,
            failed: state.failed,
            tagging_incomplete: state.tagging_incomplete,
            parse_errors: state.parse_errors,
            not_started: state.not_started,
            failures_by_kind: state.failures_by_kind.clone(),
            first_failures: state.first_failures().to_vec(),
            duration_seconds,
        }
    }

    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}

impl From<&Config> for JsonConfig {
    fn from(config: &Config) -> Self {
        Self {
            timezone: config.timezone.clone(),
            workers: config.workers,
            trial_limit: match config.run_mode() {
                RunMode::Trial(limit) => Some(limit),
                RunMode::Full => None,
            },
            max_attempts: config.max_attempts,
        }
    }
}
