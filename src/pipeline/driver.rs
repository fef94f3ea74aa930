//! # Pipeline Driver
//!
//! Orchestratore principale: distribuisce le entry a un pool limitato di
//! worker e raccoglie gli esiti in un `PipelineState`.
//!
//! ## Concorrenza:
//! - Un `Semaphore` con `workers` permessi; ogni worker porta una entry fino
//!   a uno stato terminale prima di rilasciare il permesso
//! - Nessuno stato mutabile condiviso tra entry: path univoci per id + anno
//!
//! ## Modalità:
//! - `RunMode::Trial(n)`: solo le prime n entry, in ordine di export
//! - `RunMode::Full`: tutte le entry
//!
//! ## Cancellazione:
//! Una richiesta di stop (Ctrl-C) impedisce l'avvio di nuove entry; quelle
//! in corso terminano normalmente o falliscono in modo pulito.

use crate::compositor::{MediaCompositor, OverlayCompositor, ToolCompositor};
use crate::config::{Config, RunMode};
use crate::downloader::{AssetFetcher, DownloadManager, HttpFetcher, RetryPolicy};
use crate::error::{ArchiveError, ArchiveResult};
use crate::export_parser::{MemoryEntry, ParseReport};
use crate::metadata::{ExifToolTagger, MetadataTagger, MetadataWriter};
use crate::organizer::{OutputLayout, OutputOrganizer};
use crate::pipeline::progress_tracker::ProgressTracker;
use crate::pipeline::state::PipelineState;
use crate::pipeline::task::{EntryTask, PipelineContext};
use crate::resume::ResumeTracker;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tracing::{error, info, warn};

/// External capabilities the pipeline depends on
#[derive(Clone)]
pub struct PipelineServices {
    pub fetcher: Arc<dyn AssetFetcher>,
    pub compositor: Arc<dyn MediaCompositor>,
    pub tagger: Arc<dyn MetadataTagger>,
}

impl PipelineServices {
    /// HTTP downloads, `image`/FFmpeg compositing, exiftool tagging
    pub fn production(config: &Config) -> ArchiveResult<Self> {
        Ok(Self {
            fetcher: Arc::new(HttpFetcher::new(config.request_timeout())?),
            compositor: Arc::new(ToolCompositor::new()),
            tagger: Arc::new(ExifToolTagger::new()),
        })
    }
}

/// Bounded-pool orchestrator
pub struct PipelineDriver {
    config: Config,
    context: Arc<PipelineContext>,
    stop_tx: broadcast::Sender<()>,
}

impl PipelineDriver {
    pub fn new(config: Config, services: PipelineServices) -> ArchiveResult<Self> {
        let zone = config
            .local_zone()
            .map_err(|e| ArchiveError::Config(e.to_string()))?;
        let layout = OutputLayout::new(config.output_dir.clone(), zone);

        let context = PipelineContext {
            layout: layout.clone(),
            resume: ResumeTracker::new(layout.clone()),
            downloads: DownloadManager::new(services.fetcher, RetryPolicy::from_config(&config)),
            compositor: OverlayCompositor::new(services.compositor),
            metadata: MetadataWriter::new(services.tagger, zone),
            organizer: OutputOrganizer::new(layout),
            request_spacing: config.request_spacing(),
        };
        let (stop_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            context: Arc::new(context),
            stop_tx,
        })
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.context.layout
    }

    /// Sender that stops the run between entries
    pub fn stop_handle(&self) -> broadcast::Sender<()> {
        self.stop_tx.clone()
    }

    /// Entries this run will look at, in export order
    pub fn select_entries(&self, entries: Vec<MemoryEntry>) -> Vec<MemoryEntry> {
        match self.config.run_mode() {
            RunMode::Trial(limit) => entries.into_iter().take(limit).collect(),
            RunMode::Full => entries,
        }
    }

    /// Processes every selected entry and returns the run counters
    pub async fn run(&self, report: ParseReport) -> PipelineState {
        let entries = self.select_entries(report.entries);
        let total = entries.len();
        let mut state = PipelineState::new(total, &report.errors);
        let progress_tracker = ProgressTracker::new(total, self.config.json_output);

        if let RunMode::Trial(limit) = self.config.run_mode() {
            info!("Trial run: processing the first {} of the parsed entries", limit);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut stop_rx = self.stop_tx.subscribe();
        let mut tasks = Vec::with_capacity(total);

        for (index, entry) in entries.into_iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Worker pool closed: {}", e);
                    state.not_started = total - index;
                    break;
                }
            };

            if Self::stop_requested(&mut stop_rx) {
                warn!("🛑 Stop requested: {} entries will not be started", total - index);
                state.not_started = total - index;
                break;
            }

            let id = entry.id.clone();
            let task = EntryTask::new(entry, Arc::clone(&self.context));
            let progress_clone = progress_tracker.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let outcome = task.run().await;
                progress_clone.handle_entry_completion(&outcome);
                outcome
            });
            tasks.push((id, handle));
        }

        for (id, handle) in tasks {
            match handle.await {
                Ok(outcome) => state.record(&outcome),
                Err(e) => {
                    error!("Worker for {} died: {}", id, e);
                    state.record_lost(&id, format!("worker died: {}", e));
                }
            }
        }

        progress_tracker.finish(&state.format_summary());
        state
    }

    fn stop_requested(stop_rx: &mut broadcast::Receiver<()>) -> bool {
        match stop_rx.try_recv() {
            Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => true,
            Err(broadcast::error::TryRecvError::Empty) => false,
            // every sender dropped: nobody can ask to stop any more
            Err(broadcast::error::TryRecvError::Closed) => false,
        }
    }
}
