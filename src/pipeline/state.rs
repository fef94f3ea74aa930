//! # Pipeline State Module
//!
//! Stato per-entry (macchina a stati esplicita) e contatori della run.
//!
//! ## Macchina a stati:
//! ```text
//! Pending -> Downloading -> Composing -> Tagging -> Placing -> Done
//!    |            |             |           |          |
//!    |            +-------------+-----------+----------+--> Failed(stage, reason)
//!    +--> Skipped (resume check)
//! ```
//! Gli stati terminali (`Done`, `Skipped`, `Failed`) sono assorbenti: nessuno
//! stato viene rivisitato nella stessa run, la run successiva riparte da
//! `Pending`.
//!
//! ## PipelineState:
//! Contatori effimeri, mai persistiti. Il driver li costruisce, li aggiorna
//! con gli esiti dei worker e li restituisce al chiamante.

use crate::error::{ArchiveError, FailureKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// How many failures the summary lists by id
pub const SUMMARY_FAILURE_LIMIT: usize = 5;

/// Non-terminal stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Downloading,
    Composing,
    Tagging,
    Placing,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Pending => Some(Stage::Downloading),
            Stage::Downloading => Some(Stage::Composing),
            Stage::Composing => Some(Stage::Tagging),
            Stage::Tagging => Some(Stage::Placing),
            Stage::Placing => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Downloading => "downloading",
            Stage::Composing => "composing",
            Stage::Tagging => "tagging",
            Stage::Placing => "placing",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one entry within a run
#[derive(Debug, Clone, PartialEq)]
pub enum EntryState {
    Active(Stage),
    Done,
    Skipped,
    Failed { stage: Stage, kind: FailureKind, reason: String },
}

impl Default for EntryState {
    fn default() -> Self {
        EntryState::Active(Stage::Pending)
    }
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryState::Active(_))
    }

    /// Stage the entry is in, or was in when it failed
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EntryState::Active(stage) | EntryState::Failed { stage, .. } => Some(*stage),
            EntryState::Done | EntryState::Skipped => None,
        }
    }

    fn allows(&self, next: &EntryState) -> bool {
        let EntryState::Active(current) = self else {
            return false;
        };
        match next {
            EntryState::Active(stage) => current.next() == Some(*stage),
            EntryState::Done => *current == Stage::Placing,
            EntryState::Skipped => *current == Stage::Pending,
            EntryState::Failed { stage, .. } => stage == current,
        }
    }

    pub fn advance(&self, next: EntryState) -> Result<EntryState, ArchiveError> {
        if self.allows(&next) {
            Ok(next)
        } else {
            Err(ArchiveError::Pipeline(format!("invalid transition {:?} -> {:?}", self, next)))
        }
    }
}

/// Final result of one entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// Placed in all trees; `tagging_error` is set when metadata could not be written
    Archived { id: String, tagging_error: Option<String> },
    Skipped { id: String },
    Failed { id: String, stage: Stage, kind: FailureKind, reason: String },
}

impl EntryOutcome {
    pub fn id(&self) -> &str {
        match self {
            EntryOutcome::Archived { id, .. } | EntryOutcome::Skipped { id } | EntryOutcome::Failed { id, .. } => {
                id.as_str()
            }
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            EntryOutcome::Archived { tagging_error: None, .. } => "archived",
            EntryOutcome::Archived { tagging_error: Some(_), .. } => "tagging_incomplete",
            EntryOutcome::Skipped { .. } => "skipped",
            EntryOutcome::Failed { .. } => "failed",
        }
    }
}

/// One failed entry as shown in the summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub id: String,
    pub stage: Option<Stage>,
    pub kind: FailureKind,
    pub reason: String,
}

/// Run-level counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineState {
    /// Entries selected for this run
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Placed, but metadata could not be written
    pub tagging_incomplete: usize,
    pub parse_errors: usize,
    /// Entries never started because the run was cancelled
    pub not_started: usize,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    pub failures: Vec<FailureRecord>,
}

impl PipelineState {
    pub fn new(total: usize, parse_errors: &[ArchiveError]) -> Self {
        let mut state = Self {
            total,
            parse_errors: parse_errors.len(),
            ..Default::default()
        };
        for error in parse_errors {
            *state.failures_by_kind.entry(error.kind()).or_default() += 1;
        }
        state
    }

    pub fn record(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Archived { tagging_error, .. } => {
                self.downloaded += 1;
                if tagging_error.is_some() {
                    self.tagging_incomplete += 1;
                    *self.failures_by_kind.entry(FailureKind::Tagging).or_default() += 1;
                }
            }
            EntryOutcome::Skipped { .. } => self.skipped += 1,
            EntryOutcome::Failed { id, stage, kind, reason } => {
                self.failed += 1;
                *self.failures_by_kind.entry(*kind).or_default() += 1;
                self.failures.push(FailureRecord {
                    id: id.clone(),
                    stage: Some(*stage),
                    kind: *kind,
                    reason: reason.clone(),
                });
            }
        }
    }

    /// Records a worker that died without reporting an outcome
    pub fn record_lost(&mut self, id: &str, reason: String) {
        self.failed += 1;
        *self.failures_by_kind.entry(FailureKind::Other).or_default() += 1;
        self.failures.push(FailureRecord {
            id: id.to_string(),
            stage: None,
            kind: FailureKind::Other,
            reason,
        });
    }

    pub fn processed(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }

    pub fn first_failures(&self) -> &[FailureRecord] {
        &self.failures[..self.failures.len().min(SUMMARY_FAILURE_LIMIT)]
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Total: {} | Downloaded: {} | Skipped: {} | Failed: {} | Tagging incomplete: {} | Parse errors: {}",
            self.total, self.downloaded, self.skipped, self.failed, self.tagging_incomplete, self.parse_errors
        )
    }
}
