//! # Progress Tracking Module
//!
//! Riporta il completamento di ogni entry: progress bar in modalità
//! interattiva, eventi `entry_complete` in modalità JSON. I contatori veri e
//! propri vivono in `PipelineState`, qui c'è solo il feedback visivo.

use crate::json_output::JsonMessage;
use crate::pipeline::state::EntryOutcome;
use crate::progress::ProgressManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Thread-safe completion reporter shared by all workers
#[derive(Clone)]
pub struct ProgressTracker {
    pub total_entries: usize,
    completed: Arc<AtomicUsize>,
    json_output: bool,
    progress_manager: ProgressManager,
}

impl ProgressTracker {
    pub fn new(total_entries: usize, json_output: bool) -> Self {
        Self {
            total_entries,
            completed: Arc::new(AtomicUsize::new(0)),
            json_output,
            progress_manager: ProgressManager::new(total_entries as u64, json_output),
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Ticks the bar and emits the JSON event for one finished entry
    pub fn handle_entry_completion(&self, outcome: &EntryOutcome) {
        let index = self.completed.fetch_add(1, Ordering::SeqCst);

        if self.json_output {
            JsonMessage::entry_complete(outcome, index, self.total_entries).emit();
        }

        let message = match outcome {
            EntryOutcome::Archived { id, tagging_error: None } => {
                debug!("[OK] {} archived", id);
                format!("[OK] {}", id)
            }
            EntryOutcome::Archived { id, tagging_error: Some(reason) } => {
                warn!("[WARN] {} placed, tagging incomplete: {}", id, reason);
                format!("[WARN] {}: tagging incomplete", id)
            }
            EntryOutcome::Skipped { id } => format!("[SKIP] {}: already archived", id),
            EntryOutcome::Failed { id, stage, reason, .. } => {
                let line = format!("[ERROR] {} failed while {}: {}", id, stage, reason);
                self.progress_manager.println(&line);
                format!("[ERROR] {}", id)
            }
        };
        self.progress_manager.update(&message);
    }

    /// Finalizza progress bar
    pub fn finish(&self, summary: &str) {
        self.progress_manager.finish(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_counter() {
        let tracker = ProgressTracker::new(2, false);
        let clone = tracker.clone();
        tracker.handle_entry_completion(&EntryOutcome::Skipped { id: "a".into() });
        clone.handle_entry_completion(&EntryOutcome::Archived { id: "b".into(), tagging_error: None });
        assert_eq!(tracker.completed(), 2);
        tracker.finish("done");
    }
}
