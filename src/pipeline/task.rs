//! # Entry Task Module
//!
//! Worker per l'elaborazione di una singola entry, separato
//! dall'orchestratore. Percorre la sequenza di stage e converte ogni errore
//! in un `EntryOutcome`: un'entry fallita non interrompe mai il batch.
//!
//! ## Sequenza:
//! 1. Resume check: se tutti gli artifact esistono, `Skipped`
//! 2. Download del media base e dell'eventuale overlay
//! 3. Estrazione dei bundle ZIP (media principale + overlay)
//! 4. Compositing in una staging directory privata
//! 5. Tagging di `final` e `no_filters` (non fatale)
//! 6. Posizionamento atomico negli alberi di output

use crate::bundle::AssetBundle;
use crate::compositor::OverlayCompositor;
use crate::downloader::DownloadManager;
use crate::error::{ArchiveError, ArchiveResult};
use crate::export_parser::MemoryEntry;
use crate::metadata::MetadataWriter;
use crate::organizer::{OutputLayout, OutputOrganizer};
use crate::pipeline::state::{EntryOutcome, EntryState, Stage};
use crate::resume::ResumeTracker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};

/// Stage implementations shared by every worker
pub struct PipelineContext {
    pub layout: OutputLayout,
    pub resume: ResumeTracker,
    pub downloads: DownloadManager,
    pub compositor: OverlayCompositor,
    pub metadata: MetadataWriter,
    pub organizer: OutputOrganizer,
    /// Pause after the downloads of one entry
    pub request_spacing: Duration,
}

/// One entry travelling through the stages
pub struct EntryTask {
    entry: MemoryEntry,
    context: Arc<PipelineContext>,
    state: EntryState,
}

impl EntryTask {
    pub fn new(entry: MemoryEntry, context: Arc<PipelineContext>) -> Self {
        Self {
            entry,
            context,
            state: EntryState::default(),
        }
    }

    pub fn state(&self) -> &EntryState {
        &self.state
    }

    /// Runs the entry to a terminal state inside an `entry` span
    pub async fn run(mut self) -> EntryOutcome {
        let span = info_span!("entry", id = %self.entry.id);
        async move {
            match self.execute().await {
                Ok(outcome) => outcome,
                Err(error) => self.fail(error),
            }
        }
        .instrument(span)
        .await
    }

    fn enter(&mut self, stage: Stage) -> ArchiveResult<()> {
        self.state = self.state.advance(EntryState::Active(stage))?;
        debug!("→ {}", stage);
        Ok(())
    }

    fn fail(&mut self, error: ArchiveError) -> EntryOutcome {
        let stage = self.state.stage().unwrap_or(Stage::Pending);
        let kind = error.kind();
        let reason = error.to_string();
        warn!("Entry failed while {}: {}", stage, reason);

        let failed = EntryState::Failed { stage, kind, reason: reason.clone() };
        if let Ok(next) = self.state.advance(failed) {
            self.state = next;
        }

        EntryOutcome::Failed {
            id: self.entry.id.clone(),
            stage,
            kind,
            reason,
        }
    }

    /// Takes the media found inside a bundled download in place of the raw bytes
    fn adopt_bundle(&mut self, bundle: AssetBundle, overlay: Option<Vec<u8>>) -> (Vec<u8>, Option<Vec<u8>>) {
        if let Some(extension) = bundle.extension() {
            self.entry.extension = extension;
        }
        if let Some(kind) = bundle.media_kind() {
            self.entry.media_kind = kind;
        }
        debug!(
            "Unpacked bundle: {} (overlay: {})",
            bundle.main_name,
            if bundle.overlay.is_some() { "yes" } else { "no" }
        );
        (bundle.main, bundle.overlay.or(overlay))
    }

    async fn execute(&mut self) -> ArchiveResult<EntryOutcome> {
        let context = Arc::clone(&self.context);
        let id = self.entry.id.clone();

        if context.resume.is_complete(&self.entry).await {
            self.state = self.state.advance(EntryState::Skipped)?;
            return Ok(EntryOutcome::Skipped { id });
        }

        self.enter(Stage::Downloading)?;
        let base = context.downloads.fetch(&self.entry.base_asset_ref).await?;
        let overlay = match self.entry.overlay_asset_ref {
            Some(ref locator) => Some(context.downloads.fetch(locator).await?),
            None => None,
        };
        if !context.request_spacing.is_zero() {
            tokio::time::sleep(context.request_spacing).await;
        }

        self.enter(Stage::Composing)?;
        let (base, overlay) = if AssetBundle::is_bundle(&base) {
            let bundle = tokio::task::spawn_blocking(move || AssetBundle::unpack(&base))
                .await
                .map_err(|e| ArchiveError::Composition(format!("bundle task failed: {}", e)))??;
            self.adopt_bundle(bundle, overlay)
        } else {
            (base, overlay)
        };
        // removed on drop, whatever happens below
        let staging = context
            .layout
            .staging_dir()
            .await
            .map_err(|e| ArchiveError::Placement(format!("cannot create staging directory: {}", e)))?;
        let staged = context
            .compositor
            .compose(&self.entry, &base, overlay.as_deref(), staging.path())
            .await?;

        self.enter(Stage::Tagging)?;
        let tagging_error = context
            .metadata
            .tag_staged(&self.entry, &staged)
            .await
            .err()
            .map(|e| e.to_string());

        self.enter(Stage::Placing)?;
        context.organizer.place(&self.entry, &staged).await?;

        self.state = self.state.advance(EntryState::Done)?;
        Ok(EntryOutcome::Archived { id, tagging_error })
    }
}
