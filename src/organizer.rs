//! # Output Organizer Module
//!
//! Calcola il layout dell'archivio e posiziona gli artifact finiti.
//!
//! ## Layout di output:
//! ```text
//! downloaded_memories/
//!   final/<anno>/<entry-id>.<ext>
//!   no_filters/<anno>/<entry-id>.<ext>
//!   overlays/<anno>/<entry-id>.png
//! ```
//!
//! L'anno è quello locale (timezone configurata), non quello UTC: una memory
//! catturata alle 23:30 UTC del 31 dicembre finisce nell'anno successivo per
//! chi vive a est di Greenwich.
//!
//! Ogni file viene scritto in un path temporaneo e rinominato atomicamente,
//! quindi il `ResumeTracker` non vede mai un file parziale.

use crate::error::{ArchiveError, ArchiveResult};
use crate::export_parser::MemoryEntry;
use crate::file_manager::{FileManager, STAGING_PREFIX};
use crate::timezone::LocalZone;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// One of the three output trees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Final,
    NoFilters,
    Overlay,
}

impl ArtifactKind {
    pub fn tree(&self) -> &'static str {
        match self {
            ArtifactKind::Final => "final",
            ArtifactKind::NoFilters => "no_filters",
            ArtifactKind::Overlay => "overlays",
        }
    }
}

/// Deterministic mapping from entries to output paths
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    zone: LocalZone,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, zone: LocalZone) -> Self {
        Self { root: root.into(), zone }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn zone(&self) -> LocalZone {
        self.zone
    }

    /// Local-time year the entry is filed under
    pub fn year_bucket(&self, entry: &MemoryEntry) -> i32 {
        self.zone.year_of(entry.capture_instant)
    }

    pub fn path_for(&self, entry: &MemoryEntry, kind: ArtifactKind) -> PathBuf {
        let extension = match kind {
            ArtifactKind::Overlay => "png",
            ArtifactKind::Final | ArtifactKind::NoFilters => entry.extension.as_str(),
        };
        self.root
            .join(kind.tree())
            .join(self.year_bucket(entry).to_string())
            .join(format!("{}.{}", entry.id, extension))
    }

    /// Every artifact a finished entry must have
    pub fn expected_paths(&self, entry: &MemoryEntry) -> Vec<(ArtifactKind, PathBuf)> {
        let mut kinds = vec![ArtifactKind::Final, ArtifactKind::NoFilters];
        if entry.has_overlay() {
            kinds.push(ArtifactKind::Overlay);
        }
        kinds
            .into_iter()
            .map(|kind| (kind, self.path_for(entry, kind)))
            .collect()
    }

    /// Private working directory on the same filesystem as the output trees
    pub async fn staging_dir(&self) -> ArchiveResult<TempDir> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> ArchiveResult<TempDir> {
            std::fs::create_dir_all(&root)?;
            Ok(tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir_in(&root)?)
        })
        .await
        .map_err(|e| ArchiveError::Placement(format!("staging task failed: {}", e)))?
    }
}

/// Finished, tagged files waiting in a staging directory
#[derive(Debug, Clone)]
pub struct StagedArtifacts {
    pub final_path: PathBuf,
    pub no_filters_path: PathBuf,
    pub overlay_path: Option<PathBuf>,
}

/// Files placed into the three trees
#[derive(Debug, Clone, Default)]
pub struct PlacedArtifacts {
    pub paths: Vec<PathBuf>,
}

/// Moves staged artifacts into their year bucket
pub struct OutputOrganizer {
    layout: OutputLayout,
}

impl OutputOrganizer {
    pub fn new(layout: OutputLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Places every staged artifact; `final` goes last
    pub async fn place(&self, entry: &MemoryEntry, staged: &StagedArtifacts) -> ArchiveResult<PlacedArtifacts> {
        let mut moves = Vec::with_capacity(3);
        if let Some(ref overlay) = staged.overlay_path {
            moves.push((overlay.as_path(), ArtifactKind::Overlay));
        } else if entry.has_overlay() {
            return Err(ArchiveError::Placement(format!("{}: overlay artifact missing", entry.id)));
        }
        moves.push((staged.no_filters_path.as_path(), ArtifactKind::NoFilters));
        moves.push((staged.final_path.as_path(), ArtifactKind::Final));

        let mut placed = PlacedArtifacts::default();
        for (source, kind) in moves {
            let target = self.layout.path_for(entry, kind);
            FileManager::atomic_move(source, &target).await.map_err(|e| {
                ArchiveError::Placement(format!("{} -> {}: {}", source.display(), target.display(), e))
            })?;
            debug!("Placed {} artifact at {}", kind.tree(), target.display());
            placed.paths.push(target);
        }

        Ok(placed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export_parser::MediaKind;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn entry(overlay: bool) -> MemoryEntry {
        MemoryEntry {
            id: "2024-12-31_233000_abcd1234".to_string(),
            capture_instant: Utc.with_ymd_and_hms(2024, 12, 31, 23, 30, 0).unwrap(),
            media_kind: MediaKind::Photo,
            base_asset_ref: "https://cdn.example.com/a".to_string(),
            overlay_asset_ref: overlay.then(|| "https://cdn.example.com/o".to_string()),
            location: None,
            extension: "jpg".to_string(),
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = OutputLayout::new("downloaded_memories", "UTC-5".parse().unwrap());
        let e = entry(true);

        assert_eq!(
            layout.path_for(&e, ArtifactKind::Final),
            PathBuf::from("downloaded_memories/final/2024/2024-12-31_233000_abcd1234.jpg")
        );
        assert_eq!(
            layout.path_for(&e, ArtifactKind::Overlay),
            PathBuf::from("downloaded_memories/overlays/2024/2024-12-31_233000_abcd1234.png")
        );

        let east = OutputLayout::new("downloaded_memories", "UTC+5".parse().unwrap());
        assert_eq!(
            east.path_for(&e, ArtifactKind::NoFilters),
            PathBuf::from("downloaded_memories/no_filters/2025/2024-12-31_233000_abcd1234.jpg")
        );
    }

    #[test]
    fn test_expected_paths_depend_on_overlay() {
        let layout = OutputLayout::new("out", LocalZone::utc());
        assert_eq!(layout.expected_paths(&entry(false)).len(), 2);
        let with_overlay = layout.expected_paths(&entry(true));
        assert_eq!(with_overlay.len(), 3);
        assert_eq!(with_overlay[2].0, ArtifactKind::Overlay);
    }

    #[tokio::test]
    async fn test_place_moves_staged_files() {
        let temp_dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(temp_dir.path(), LocalZone::utc());
        let staging = layout.staging_dir().await.unwrap();
        let e = entry(true);

        let staged = StagedArtifacts {
            final_path: staging.path().join("final.jpg"),
            no_filters_path: staging.path().join("base.jpg"),
            overlay_path: Some(staging.path().join("overlay.png")),
        };
        std::fs::write(&staged.final_path, b"final").unwrap();
        std::fs::write(&staged.no_filters_path, b"base").unwrap();
        std::fs::write(staged.overlay_path.as_ref().unwrap(), b"png").unwrap();

        let organizer = OutputOrganizer::new(layout.clone());
        let placed = organizer.place(&e, &staged).await.unwrap();

        assert_eq!(placed.paths.len(), 3);
        assert_eq!(std::fs::read(layout.path_for(&e, ArtifactKind::Final)).unwrap(), b"final");
        assert_eq!(std::fs::read(layout.path_for(&e, ArtifactKind::NoFilters)).unwrap(), b"base");
        assert_eq!(std::fs::read(layout.path_for(&e, ArtifactKind::Overlay)).unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_staging_dir_is_created_under_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("not").join("yet");
        let layout = OutputLayout::new(&root, LocalZone::utc());

        let staging = layout.staging_dir().await.unwrap();

        assert!(staging.path().starts_with(&root));
        let name = staging.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(STAGING_PREFIX));
        let path = staging.path().to_path_buf();
        drop(staging);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_place_requires_overlay_when_entry_has_one() {
        let temp_dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(temp_dir.path(), LocalZone::utc());
        let staged = StagedArtifacts {
            final_path: temp_dir.path().join("f.jpg"),
            no_filters_path: temp_dir.path().join("b.jpg"),
            overlay_path: None,
        };

        let result = OutputOrganizer::new(layout).place(&entry(true), &staged).await;
        assert!(matches!(result, Err(ArchiveError::Placement(_))));
    }
}
