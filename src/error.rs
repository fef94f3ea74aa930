//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce `ArchiveError` enum per categorizzare tutti gli errori possibili
//! - Classifica ogni errore in un `FailureKind` per il report finale
//! - Distingue errori di rete transitori (retry) da quelli permanenti
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Categorie di errori:
//! - `Export`: Export illeggibile nel suo insieme (fatale per il batch)
//! - `Parse`: Record dell'export malformato (record saltato, si continua)
//! - `TransientFetch`: Timeout / 5xx (retry con backoff)
//! - `PermanentFetch`: Locator invalido / 4xx (nessun retry)
//! - `FetchFailed`: Tentativi esauriti dopo errori transitori
//! - `Composition`: Fallimento del compositing (entry fallita)
//! - `Tagging`: Fallimento scrittura metadata (non fatale)
//! - `Placement`: Errore disco/permessi durante il posizionamento finale
//!
//! ## Esempio:
//! ```ignore
//! if status.is_server_error() {
//!     return Err(ArchiveError::TransientFetch(format!("HTTP {}", status)));
//! }
//! ```

use serde::Serialize;

/// Custom error types for the memories archive pipeline
#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("Export unreadable: {0}")]
    Export(String),

    #[error("Record {index}: {reason}")]
    Parse { index: usize, reason: String },

    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    #[error("Permanent fetch error: {0}")]
    PermanentFetch(String),

    #[error("Fetch failed after {attempts} attempts: {last_error}")]
    FetchFailed { attempts: u32, last_error: String },

    #[error("Composition error: {0}")]
    Composition(String),

    #[error("Tagging error: {0}")]
    Tagging(String),

    #[error("Placement error: {0}")]
    Placement(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dependency missing: {0}")]
    MissingDependency(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// Failure buckets reported in the run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Parse,
    Fetch,
    Composition,
    Tagging,
    Placement,
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Parse => "parse",
            FailureKind::Fetch => "fetch",
            FailureKind::Composition => "composition",
            FailureKind::Tagging => "tagging",
            FailureKind::Placement => "placement",
            FailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

impl ArchiveError {
    /// Summary bucket for this error
    pub fn kind(&self) -> FailureKind {
        match self {
            ArchiveError::Export(_) | ArchiveError::Parse { .. } => FailureKind::Parse,
            ArchiveError::TransientFetch(_)
            | ArchiveError::PermanentFetch(_)
            | ArchiveError::FetchFailed { .. } => FailureKind::Fetch,
            ArchiveError::Composition(_) | ArchiveError::Image(_) => FailureKind::Composition,
            ArchiveError::Tagging(_) => FailureKind::Tagging,
            ArchiveError::Placement(_) => FailureKind::Placement,
            ArchiveError::Io(_)
            | ArchiveError::Config(_)
            | ArchiveError::MissingDependency(_)
            | ArchiveError::Pipeline(_) => FailureKind::Other,
        }
    }

    /// Whether another fetch attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ArchiveError::TransientFetch(_))
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
