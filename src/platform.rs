//! # Platform-specific utilities
//!
//! Questo modulo centralizza la gestione cross-platform dei tool esterni
//! usati dalla pipeline (`ffmpeg` per il compositing video, `exiftool` per i
//! metadata).
//!
//! ## Responsabilità:
//! - Nome eseguibile per piattaforma (`ffmpeg` vs `ffmpeg.exe`)
//! - Verifica disponibilità nel `PATH` tramite `which` / `where`
//! - Report delle dipendenze all'avvio (mancanze non fatali)

use crate::error::ArchiveError;
use std::collections::HashMap;
use std::sync::OnceLock;

/// External tools the pipeline can invoke
pub const REQUIRED_TOOLS: &[&str] = &["ffmpeg", "exiftool"];

/// Platform-specific command manager
pub struct PlatformCommands {
    commands: HashMap<&'static str, &'static str>,
    which_command: &'static str,
}

impl PlatformCommands {
    /// Get the singleton instance
    pub fn instance() -> &'static Self {
        static INSTANCE: OnceLock<PlatformCommands> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    fn new() -> Self {
        let mut commands = HashMap::new();
        let which_command = if cfg!(windows) {
            commands.insert("exiftool", "exiftool.exe");
            commands.insert("ffmpeg", "ffmpeg.exe");
            "where"
        } else {
            commands.insert("exiftool", "exiftool");
            commands.insert("ffmpeg", "ffmpeg");
            "which"
        };

        Self { commands, which_command }
    }

    /// Get the platform-specific command name
    pub fn get_command<'a>(&self, base_name: &'a str) -> &'a str {
        self.commands.get(base_name).copied().unwrap_or(base_name)
    }

    /// Get the command used to check if a program exists
    pub fn which_command(&self) -> &str {
        self.which_command
    }

    /// Check if a command is available on the `PATH`
    pub async fn is_command_available(&self, base_name: &str) -> bool {
        let command_name = self.get_command(base_name);

        let result = tokio::process::Command::new(self.which_command)
            .arg(command_name)
            .output()
            .await;

        match result {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    /// Probes every external tool the pipeline uses
    pub async fn probe_dependencies(&self) -> DependencyReport {
        let probes = REQUIRED_TOOLS.iter().map(|tool| self.is_command_available(tool));
        let available = futures::future::join_all(probes).await;

        let missing = REQUIRED_TOOLS
            .iter()
            .zip(available)
            .filter(|(_, present)| !present)
            .map(|(tool, _)| *tool)
            .collect();
        DependencyReport { missing }
    }
}

/// Outcome of the start-up dependency probe
#[derive(Debug, Clone, Default)]
pub struct DependencyReport {
    pub missing: Vec<&'static str>,
}

impl DependencyReport {
    pub fn all_present(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn is_missing(&self, tool: &str) -> bool {
        self.missing.contains(&tool)
    }

    /// One error per absent tool, saying what breaks without it
    pub fn consequences(&self) -> Vec<ArchiveError> {
        self.missing
            .iter()
            .map(|tool| {
                let effect = match *tool {
                    "ffmpeg" => " (video entries with an overlay will fail composition)",
                    "exiftool" => " (entries will be placed with tagging incomplete)",
                    _ => "",
                };
                ArchiveError::MissingDependency(format!("{} not found on PATH{}", tool, effect))
            })
            .collect()
    }
}
