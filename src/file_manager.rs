//! # File Management Module
//!
//! Questo modulo gestisce le operazioni sui file dell'archivio di output.
//!
//! ## Responsabilità:
//! - Verifica che un artifact sia completo (esiste e non è vuoto)
//! - Scrittura atomica: file temporaneo nella stessa directory + rename
//! - Pulizia di staging directory e file temporanei lasciati da un crash
//! - Impostazione della modification time alla data di cattura
//! - Formattazione human-readable delle dimensioni
//!
//! ## Sicurezza operazioni:
//! - Nessun file parziale raggiunge mai il path finale
//! - Un file a zero byte non viene mai considerato completo
//!
//! ## Esempio:
//! ```ignore
//! FileManager::atomic_write(&target, &bytes).await?;
//! assert!(FileManager::is_complete_file(&target).await);
//! ```

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

/// Prefix of per-entry working directories inside the output root
pub const STAGING_PREFIX: &str = ".staging-";
/// Prefix `tempfile` gives to its temporary files
const TEMP_FILE_PREFIX: &str = ".tmp";

/// Manages file operations on the archive tree
pub struct FileManager;

impl FileManager {
    /// True iff `path` exists, is a file and has non-zero size
    pub async fn is_complete_file(path: &Path) -> bool {
        match fs::metadata(path).await {
            Ok(metadata) => metadata.is_file() && metadata.len() > 0,
            Err(_) => false,
        }
    }

    /// Writes `bytes` next to `target` and renames it into place
    pub async fn atomic_write(target: &Path, bytes: &[u8]) -> Result<()> {
        let parent = Self::parent_dir(target)?;
        fs::create_dir_all(&parent).await?;

        let target = target.to_path_buf();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut temp = NamedTempFile::new_in(&parent)?;
            temp.write_all(&bytes)?;
            temp.as_file().sync_all()?;
            temp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await?
    }

    /// Moves a finished file to `target` atomically.
    ///
    /// A plain rename is used when source and target share a filesystem; otherwise the
    /// content is copied to a temporary file beside the target, which is then renamed.
    pub async fn atomic_move(source: &Path, target: &Path) -> Result<()> {
        let parent = Self::parent_dir(target)?;
        fs::create_dir_all(&parent).await?;

        if fs::rename(source, target).await.is_ok() {
            return Ok(());
        }

        let source = source.to_path_buf();
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let modified = std::fs::metadata(&source)?.modified()?;
            let mut input = std::fs::File::open(&source)?;
            let mut temp = NamedTempFile::new_in(&parent)?;
            std::io::copy(&mut input, temp.as_file_mut())?;
            temp.as_file().sync_all()?;
            temp.as_file().set_modified(modified)?;
            temp.persist(&target).map_err(|e| e.error)?;
            let _ = std::fs::remove_file(&source);
            Ok(())
        })
        .await?
    }

    /// Sets the file modification time to the capture instant
    pub async fn set_modified_time(path: &Path, instant: DateTime<Utc>) -> Result<()> {
        let path = path.to_path_buf();
        let time: SystemTime = instant.into();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.set_modified(time)?;
            Ok(())
        })
        .await?
    }

    /// Removes staging directories and temporary files left by an interrupted run
    pub fn sweep_stale_temp(root: &Path) -> Result<usize> {
        if !root.exists() {
            return Ok(0);
        }

        let stale: Vec<(PathBuf, bool)> = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy();
                (e.file_type().is_dir() && name.starts_with(STAGING_PREFIX))
                    || (e.file_type().is_file() && name.starts_with(TEMP_FILE_PREFIX))
            })
            .map(|e| (e.path().to_path_buf(), e.file_type().is_dir()))
            .collect();

        let mut removed = 0;
        for (path, is_dir) in stale {
            let result = if is_dir {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            // files inside an already removed staging dir are gone too
            if result.is_ok() {
                debug!("Removed stale temporary path: {}", path.display());
                removed += 1;
            }
        }

        Ok(removed)
    }

    fn parent_dir(target: &Path) -> Result<PathBuf> {
        target
            .parent()
            .map(|parent| {
                if parent.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    parent.to_path_buf()
                }
            })
            .ok_or_else(|| anyhow::anyhow!("Invalid target path: {}", target.display()))
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}
