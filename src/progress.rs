//! # Progress Display Module
//!
//! Progress bar `indicatif` per la modalità interattiva.
//!
//! ## Responsabilità:
//! - Barra di progresso con un tick per entry completata
//! - Messaggio di stato per l'ultima entry (`[OK]`, `[SKIP]`, `[ERROR]`)
//! - Spinner per le fasi indeterminate (parsing dell'export, sweep)
//! - Barra nascosta in modalità `--json`, dove stdout è riservato agli eventi
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] [=======================>----------------] 150/260 (57%) [OK] 2021-07-04_193012_9f3a11c2
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Manages the per-entry progress bar
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager; `hidden` draws nothing
    pub fn new(total_entries: u64, hidden: bool) -> Self {
        if hidden {
            return Self { bar: ProgressBar::hidden() };
        }

        let bar = ProgressBar::new(total_entries);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update progress with a message
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    /// Prints a line above the bar without breaking it
    pub fn println(&self, message: &str) {
        if !self.bar.is_hidden() {
            self.bar.println(message);
        }
    }

    /// Finish with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Create a spinner for indeterminate progress
    pub fn spinner(message: &str, hidden: bool) -> ProgressBar {
        if hidden {
            return ProgressBar::hidden();
        }

        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));

        spinner
    }
}
