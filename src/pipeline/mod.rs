//! # Pipeline Module
//!
//! Modulo che separa l'orchestrazione in sottomoduli:
//! - `driver`: Orchestratore principale con pool di worker limitato
//! - `task`: Worker per la singola entry (download → compose → tag → place)
//! - `state`: Macchina a stati per entry e contatori della run
//! - `progress_tracker`: Feedback per entry (progress bar o eventi JSON)

pub mod driver;
pub mod progress_tracker;
pub mod state;
pub mod task;

pub use driver::{PipelineDriver, PipelineServices};
pub use progress_tracker::ProgressTracker;
pub use state::{EntryOutcome, EntryState, FailureRecord, PipelineState, Stage};
pub use task::{EntryTask, PipelineContext};
