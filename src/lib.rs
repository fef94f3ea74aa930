//! # Memory Kit Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per i test di integrazione
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tassonomia degli errori e bucket per il riepilogo
//! - `timezone`: Timezone locale per bucketing e metadata
//! - `export_parser`: Parsing dell'export (JSON o HTML) in entry tipizzate
//! - `resume`: Skip check basato sugli artifact già presenti
//! - `downloader`: Download con retry, backoff e timeout
//! - `bundle`: Estrazione dei download in bundle ZIP
//! - `compositor`: Compositing dell'overlay su foto e video
//! - `metadata`: Data di cattura e GPS dentro i file
//! - `organizer`: Layout `final` / `no_filters` / `overlays` per anno
//! - `file_manager`: Scritture atomiche e pulizia dei file temporanei
//! - `pipeline`: Orchestratore e macchina a stati per entry
//! - `platform`, `progress`, `json_output`, `utils`: supporto
//!
//! ## Utilizzo:
//! ```ignore
//! use memory_kit::{Config, ExportParser, PipelineDriver, PipelineServices};
//!
//! let config = Config::default();
//! let report = ExportParser::new(config.local_zone()?).parse_file(&export).await?;
//! let driver = PipelineDriver::new(config.clone(), PipelineServices::production(&config)?)?;
//! let summary = driver.run(report).await;
//! ```

pub mod bundle;
pub mod compositor;
pub mod config;
pub mod downloader;
pub mod error;
pub mod export_parser;
pub mod file_manager;
pub mod json_output;
pub mod metadata;
pub mod organizer;
pub mod pipeline;
pub mod platform;
pub mod progress;
pub mod resume;
pub mod timezone;
pub mod utils;

pub use config::{Config, RunMode};
pub use error::{ArchiveError, ArchiveResult, FailureKind};
pub use export_parser::{ExportParser, MediaKind, MemoryEntry, ParseReport};
pub use organizer::{ArtifactKind, OutputLayout};
pub use pipeline::{EntryOutcome, PipelineDriver, PipelineServices, PipelineState};
pub use timezone::LocalZone;
