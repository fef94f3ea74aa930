//! # Resume Tracking Module
//!
//! Decide se un'entry è già stata completata in una run precedente.
//!
//! Non esiste un manifest separato: il filesystem stesso è il ledger.
//! Un'entry è completa solo se tutti i suoi artifact attesi esistono e non
//! sono vuoti. Grazie alla scrittura atomica (temp + rename) un file presente
//! è sempre un file finito.
//!
//! Un download in bundle ZIP può essere archiviato con l'estensione del file
//! estratto, diversa da quella dedotta dal locator: vengono quindi provate
//! anche le altre estensioni media note.

use crate::export_parser::{MemoryEntry, MEDIA_EXTENSIONS};
use crate::file_manager::FileManager;
use crate::organizer::{ArtifactKind, OutputLayout};
use std::path::PathBuf;
use tracing::debug;

/// Filesystem-backed skip check
#[derive(Debug, Clone)]
pub struct ResumeTracker {
    layout: OutputLayout,
}

impl ResumeTracker {
    pub fn new(layout: OutputLayout) -> Self {
        Self { layout }
    }

    /// Output paths a completed entry must have
    pub fn expected_paths(&self, entry: &MemoryEntry) -> Vec<(ArtifactKind, PathBuf)> {
        self.layout.expected_paths(entry)
    }

    /// True iff every expected path exists with non-zero size, under the
    /// entry's extension or another media extension
    pub async fn is_complete(&self, entry: &MemoryEntry) -> bool {
        let Some((kind, path)) = self.first_missing(entry).await else {
            debug!("[OK] {} already archived", entry.id);
            return true;
        };

        for extension in MEDIA_EXTENSIONS.iter().filter(|ext| **ext != entry.extension) {
            if self.first_missing(&entry.with_extension(extension)).await.is_none() {
                debug!("[OK] {} already archived as .{}", entry.id, extension);
                return true;
            }
        }

        debug!("[PROCESS] {} missing {} artifact: {}", entry.id, kind.tree(), path.display());
        false
    }

    async fn first_missing(&self, entry: &MemoryEntry) -> Option<(ArtifactKind, PathBuf)> {
        for (kind, path) in self.expected_paths(entry) {
            if !FileManager::is_complete_file(&path).await {
                return Some((kind, path));
            }
        }
        None
    }
}
