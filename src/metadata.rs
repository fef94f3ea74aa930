//! # Metadata Writer Module
//!
//! Scrive data di cattura e posizione GPS dentro gli artifact finiti, così
//! che le applicazioni di gestione foto mostrino la data corretta senza
//! dipendere dalla modification time del filesystem.
//!
//! ## Responsabilità:
//! - Trait `MetadataTagger`: capability esterna `write_tags(path, tags)`
//! - `ExifToolTagger`: implementazione basata su `exiftool`
//! - `MetadataWriter`: tagga `final` e `no_filters` in modo identico
//! - Imposta la modification time al momento della cattura
//!
//! ## Tag scritti:
//! - **Foto**: `DateTimeOriginal`, `CreateDate`, `ModifyDate` in ora locale
//!   più `OffsetTime*`, GPS con i rispettivi `Ref`
//! - **Video**: date QuickTime in UTC, `Keys:CreationDate` locale con offset,
//!   `GPSCoordinates`
//!
//! Un fallimento qui non è mai fatale: l'entry viene comunque posizionata e
//! segnalata come "tagging incomplete" nel riepilogo.

use crate::args;
use crate::error::{ArchiveError, ArchiveResult};
use crate::export_parser::{GeoPoint, MediaKind, MemoryEntry};
use crate::file_manager::FileManager;
use crate::organizer::StagedArtifacts;
use crate::platform::PlatformCommands;
use crate::timezone::LocalZone;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Everything that gets embedded into one asset
#[derive(Debug, Clone, Copy)]
pub struct CaptureTags {
    pub instant: DateTime<Utc>,
    pub zone: LocalZone,
    pub kind: MediaKind,
    pub location: Option<GeoPoint>,
}

impl CaptureTags {
    pub fn for_entry(entry: &MemoryEntry, zone: LocalZone) -> Self {
        Self {
            instant: entry.capture_instant,
            zone,
            kind: entry.media_kind,
            location: entry.location,
        }
    }
}

/// External metadata capability. Re-applying the same tags must be harmless.
#[async_trait]
pub trait MetadataTagger: Send + Sync {
    async fn write_tags(&self, path: &Path, tags: &CaptureTags) -> ArchiveResult<()>;
}

/// Tagger that shells out to `exiftool`
#[derive(Debug, Default, Clone)]
pub struct ExifToolTagger;

impl ExifToolTagger {
    pub fn new() -> Self {
        Self
    }

    /// Tag arguments for one asset, without the target path
    pub fn tag_arguments(tags: &CaptureTags) -> Vec<String> {
        let (local, offset) = tags.zone.localize(tags.instant);
        let local_stamp = local.format(EXIF_DATE_FORMAT).to_string();
        let offset_stamp = offset.to_string();

        let mut argv = args!["-overwrite_original", "-m"];
        match tags.kind {
            MediaKind::Photo => {
                for tag in ["DateTimeOriginal", "CreateDate", "ModifyDate"] {
                    argv.push(format!("-EXIF:{}={}", tag, local_stamp));
                }
                for tag in ["OffsetTimeOriginal", "OffsetTime", "OffsetTimeDigitized"] {
                    argv.push(format!("-EXIF:{}={}", tag, offset_stamp));
                }
                if let Some(point) = tags.location {
                    argv.extend(args![
                        format!("-GPSLatitude={:.6}", point.latitude.abs()),
                        format!("-GPSLatitudeRef={}", if point.latitude >= 0.0 { "N" } else { "S" }),
                        format!("-GPSLongitude={:.6}", point.longitude.abs()),
                        format!("-GPSLongitudeRef={}", if point.longitude >= 0.0 { "E" } else { "W" }),
                    ]);
                }
            }
            MediaKind::Video => {
                let utc_stamp = format!("{}+00:00", tags.instant.format(EXIF_DATE_FORMAT));
                argv.extend(args!["-api", "QuickTimeUTC"]);
                for tag in ["CreateDate", "ModifyDate", "TrackCreateDate", "MediaCreateDate"] {
                    argv.push(format!("-QuickTime:{}={}", tag, utc_stamp));
                }
                argv.push(format!("-Keys:CreationDate={}{}", local_stamp, offset_stamp));
                if let Some(point) = tags.location {
                    argv.push(format!("-Keys:GPSCoordinates={:.6}, {:.6}", point.latitude, point.longitude));
                }
            }
        }
        argv
    }
}

#[async_trait]
impl MetadataTagger for ExifToolTagger {
    async fn write_tags(&self, path: &Path, tags: &CaptureTags) -> ArchiveResult<()> {
        let exiftool_cmd = PlatformCommands::instance().get_command("exiftool");
        let mut argv = Self::tag_arguments(tags);
        argv.push(path.display().to_string());

        let output = Command::new(exiftool_cmd)
            .args(&argv)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ArchiveError::Tagging(format!("Failed to execute {}: {}", exiftool_cmd, e)))?;

        if !output.status.success() {
            return Err(ArchiveError::Tagging(format!(
                "{} failed on {}: {}",
                exiftool_cmd,
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Applies capture metadata to the staged `final` and `no_filters` assets
#[derive(Clone)]
pub struct MetadataWriter {
    tagger: Arc<dyn MetadataTagger>,
    zone: LocalZone,
}

impl MetadataWriter {
    pub fn new(tagger: Arc<dyn MetadataTagger>, zone: LocalZone) -> Self {
        Self { tagger, zone }
    }

    /// Tags one asset and stamps its modification time
    pub async fn tag(&self, path: &Path, entry: &MemoryEntry) -> ArchiveResult<()> {
        let tags = CaptureTags::for_entry(entry, self.zone);
        self.tagger.write_tags(path, &tags).await?;
        FileManager::set_modified_time(path, entry.capture_instant)
            .await
            .map_err(|e| ArchiveError::Tagging(format!("mtime on {}: {}", path.display(), e)))
    }

    /// Tags both assets; every asset is attempted even after a failure.
    /// The overlay PNG is left untouched.
    pub async fn tag_staged(&self, entry: &MemoryEntry, staged: &StagedArtifacts) -> ArchiveResult<()> {
        let mut failures = Vec::new();
        for path in [&staged.final_path, &staged.no_filters_path] {
            if let Err(e) = self.tag(path, entry).await {
                warn!("Tagging failed for {}: {}", path.display(), e);
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            debug!("Tagged {} ({})", entry.id, entry.media_kind.default_extension());
            Ok(())
        } else {
            Err(ArchiveError::Tagging(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn tags(kind: MediaKind, location: Option<GeoPoint>) -> CaptureTags {
        CaptureTags {
            instant: Utc.with_ymd_and_hms(2024, 12, 31, 23, 30, 0).unwrap(),
            zone: "UTC-5".parse().unwrap(),
            kind,
            location,
        }
    }

    #[test]
    fn test_photo_arguments_use_local_time() {
        let point = GeoPoint { latitude: 59.9139, longitude: -10.7522 };
        let argv = ExifToolTagger::tag_arguments(&tags(MediaKind::Photo, Some(point)));

        assert_eq!(argv[0], "-overwrite_original");
        assert!(argv.contains(&"-EXIF:DateTimeOriginal=2024:12:31 18:30:00".to_string()));
        assert!(argv.contains(&"-EXIF:OffsetTimeOriginal=-05:00".to_string()));
        assert!(argv.contains(&"-GPSLatitudeRef=N".to_string()));
        assert!(argv.contains(&"-GPSLongitude=10.752200".to_string()));
        assert!(argv.contains(&"-GPSLongitudeRef=W".to_string()));
    }

    #[test]
    fn test_video_arguments_use_utc_container_dates() {
        let argv = ExifToolTagger::tag_arguments(&tags(MediaKind::Video, None));

        assert!(argv.contains(&"QuickTimeUTC".to_string()));
        assert!(argv.contains(&"-QuickTime:CreateDate=2024:12:31 23:30:00+00:00".to_string()));
        assert!(argv.contains(&"-Keys:CreationDate=2024:12:31 18:30:00-05:00".to_string()));
        assert!(!argv.iter().any(|a| a.contains("GPS")));
    }

    struct RecordingTagger {
        fail_on: Option<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MetadataTagger for RecordingTagger {
        async fn write_tags(&self, path: &Path, _tags: &CaptureTags) -> ArchiveResult<()> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            self.seen.lock().unwrap().push(name.clone());
            if self.fail_on.is_some_and(|f| name.starts_with(f)) {
                return Err(ArchiveError::Tagging("exiftool exited with status 1".into()));
            }
            Ok(())
        }
    }

    fn staged(dir: &Path) -> StagedArtifacts {
        let staged = StagedArtifacts {
            final_path: dir.join("final.jpg"),
            no_filters_path: dir.join("no_filters.jpg"),
            overlay_path: Some(dir.join("overlay.png")),
        };
        std::fs::write(&staged.final_path, b"f").unwrap();
        std::fs::write(&staged.no_filters_path, b"n").unwrap();
        staged
    }

    fn entry() -> MemoryEntry {
        MemoryEntry {
            id: "2024-12-31_183000_0badf00d".to_string(),
            capture_instant: Utc.with_ymd_and_hms(2024, 12, 31, 23, 30, 0).unwrap(),
            media_kind: MediaKind::Photo,
            base_asset_ref: "https://cdn.example.com/a".to_string(),
            overlay_asset_ref: Some("https://cdn.example.com/o".to_string()),
            location: None,
            extension: "jpg".to_string(),
        }
    }

    #[tokio::test]
    async fn test_tags_final_and_no_filters_but_not_overlay() {
        let temp_dir = TempDir::new().unwrap();
        let tagger = Arc::new(RecordingTagger { fail_on: None, seen: Mutex::new(Vec::new()) });
        let writer = MetadataWriter::new(tagger.clone(), LocalZone::utc());
        let staged = staged(temp_dir.path());

        writer.tag_staged(&entry(), &staged).await.unwrap();

        assert_eq!(*tagger.seen.lock().unwrap(), vec!["final.jpg", "no_filters.jpg"]);
        let modified = std::fs::metadata(&staged.final_path).unwrap().modified().unwrap();
        assert_eq!(DateTime::<Utc>::from(modified), entry().capture_instant);
    }

    #[tokio::test]
    async fn test_failure_still_attempts_every_asset() {
        let temp_dir = TempDir::new().unwrap();
        let tagger = Arc::new(RecordingTagger { fail_on: Some("final"), seen: Mutex::new(Vec::new()) });
        let writer = MetadataWriter::new(tagger.clone(), LocalZone::utc());

        let result = writer.tag_staged(&entry(), &staged(temp_dir.path())).await;

        assert!(matches!(result, Err(ArchiveError::Tagging(_))));
        assert_eq!(tagger.seen.lock().unwrap().len(), 2);
    }
}
