//! # Overlay Compositing Module
//!
//! Questo modulo ricombina il media base con l'overlay del filtro.
//!
//! ## Responsabilità:
//! - Trait `MediaCompositor`: capability esterna `compose(base, overlay) -> output`
//! - `ToolCompositor`: foto con il crate `image`, video con FFmpeg
//! - `OverlayCompositor`: prepara gli artifact di staging per un'entry
//! - Normalizzazione dell'overlay in PNG trasparente (sempre conservato)
//!
//! ## Pipeline per entry:
//! 1. Scrive il media base in staging (diventerà `no_filters`)
//! 2. Senza overlay: `final` è una copia byte-identica del base
//! 3. Con overlay: salva l'overlay come PNG, poi compone `final`
//!
//! ## Compositing video (FFmpeg):
//! - `scale2ref` porta l'overlay alla risoluzione del video base
//! - `overlay=0:0` per tutti i frame, durata e risoluzione invariate
//! - Audio copiato senza ricodifica, metadata del container mappati
//!
//! ## Dipendenze richieste:
//! - `ffmpeg`: solo per video con overlay

use crate::args;
use crate::error::{ArchiveError, ArchiveResult};
use crate::export_parser::{MediaKind, MemoryEntry};
use crate::organizer::StagedArtifacts;
use crate::platform::PlatformCommands;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageOutputFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
/// Scales the overlay to the video size, then overlays it on every frame
const VIDEO_OVERLAY_FILTER: &str =
    "[1:v][0:v]scale2ref[ovr][base];[base][ovr]overlay=0:0:format=auto,format=yuv420p[out]";

/// External compositing capability
#[async_trait]
pub trait MediaCompositor: Send + Sync {
    /// Renders `overlay` on top of `base` into `output`, keeping the base geometry
    async fn compose(&self, base: &Path, overlay: &Path, kind: MediaKind, output: &Path) -> ArchiveResult<()>;
}

/// Compositor backed by the `image` crate (photos) and FFmpeg (videos)
pub struct ToolCompositor {
    jpeg_quality: u8,
    video_crf: u8,
    timeout: Duration,
}

impl Default for ToolCompositor {
    fn default() -> Self {
        Self {
            jpeg_quality: 95,
            video_crf: 18,
            timeout: Duration::from_secs(600),
        }
    }
}

impl ToolCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    fn blend_photo(base: &Path, overlay: &Path, output: &Path, jpeg_quality: u8) -> ArchiveResult<()> {
        let base_bytes = std::fs::read(base)?;
        let format = image::guess_format(&base_bytes)?;
        let mut canvas = image::load_from_memory_with_format(&base_bytes, format)?.to_rgba8();

        let layer = image::load_from_memory(&std::fs::read(overlay)?)?.to_rgba8();
        let layer = if layer.dimensions() != canvas.dimensions() {
            image::imageops::resize(&layer, canvas.width(), canvas.height(), FilterType::Lanczos3)
        } else {
            layer
        };
        image::imageops::overlay(&mut canvas, &layer, 0, 0);

        let mut encoded = Cursor::new(Vec::new());
        match format {
            ImageFormat::Png => DynamicImage::ImageRgba8(canvas).write_to(&mut encoded, ImageOutputFormat::Png)?,
            _ => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
                .write_to(&mut encoded, ImageOutputFormat::Jpeg(jpeg_quality))?,
        }
        std::fs::write(output, encoded.into_inner())?;
        Ok(())
    }

    /// FFmpeg arguments that burn `overlay` into every frame of `base`
    pub fn video_arguments(&self, base: &Path, overlay: &Path, output: &Path) -> Vec<String> {
        args![
            "-y",
            "-hide_banner",
            "-loglevel", "error",
            "-i", base.display(),
            "-i", overlay.display(),
            "-filter_complex", VIDEO_OVERLAY_FILTER,
            "-map", "[out]",
            "-map", "0:a?",
            "-c:v", "libx264",
            "-crf", self.video_crf,
            "-preset", "medium",
            "-c:a", "copy",
            "-map_metadata", "0",
            "-movflags", "+faststart",
            output.display(),
        ]
    }

    async fn compose_video(&self, base: &Path, overlay: &Path, output: &Path) -> ArchiveResult<()> {
        let ffmpeg_cmd = PlatformCommands::instance().get_command("ffmpeg");

        let mut cmd = Command::new(ffmpeg_cmd);
        cmd.args(self.video_arguments(base, overlay, output)).kill_on_drop(true);

        debug!("🎬 Compositing video overlay: {}", base.display());
        let start_time = std::time::Instant::now();

        let result = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ArchiveError::Composition(format!("{} timed out after {:?}", ffmpeg_cmd, self.timeout)))?;
        let output_status =
            result.map_err(|e| ArchiveError::Composition(format!("Failed to execute {}: {}", ffmpeg_cmd, e)))?;

        if !output_status.status.success() {
            return Err(ArchiveError::Composition(format!(
                "{} failed: {}",
                ffmpeg_cmd,
                String::from_utf8_lossy(&output_status.stderr).trim()
            )));
        }

        debug!("✅ Video composited in {:.1}s", start_time.elapsed().as_secs_f64());
        Ok(())
    }
}

#[async_trait]
impl MediaCompositor for ToolCompositor {
    async fn compose(&self, base: &Path, overlay: &Path, kind: MediaKind, output: &Path) -> ArchiveResult<()> {
        match kind {
            MediaKind::Photo => {
                let (base, overlay, output) = (base.to_path_buf(), overlay.to_path_buf(), output.to_path_buf());
                let quality = self.jpeg_quality;
                tokio::task::spawn_blocking(move || Self::blend_photo(&base, &overlay, &output, quality))
                    .await
                    .map_err(|e| ArchiveError::Composition(format!("photo compositing task failed: {}", e)))?
            }
            MediaKind::Video => self.compose_video(base, overlay, output).await,
        }
    }
}

/// Keeps PNG overlays byte-for-byte and re-encodes anything else to PNG
pub fn normalize_overlay_png(bytes: &[u8]) -> ArchiveResult<Vec<u8>> {
    if bytes.starts_with(PNG_SIGNATURE) {
        return Ok(bytes.to_vec());
    }
    let decoded = image::load_from_memory(bytes)?;
    let mut encoded = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(decoded.to_rgba8()).write_to(&mut encoded, ImageOutputFormat::Png)?;
    Ok(encoded.into_inner())
}

/// Builds the staged `final` / `no_filters` / overlay artifacts for one entry
#[derive(Clone)]
pub struct OverlayCompositor {
    compositor: Arc<dyn MediaCompositor>,
}

impl OverlayCompositor {
    pub fn new(compositor: Arc<dyn MediaCompositor>) -> Self {
        Self { compositor }
    }

    pub async fn compose(
        &self,
        entry: &MemoryEntry,
        base_bytes: &[u8],
        overlay_bytes: Option<&[u8]>,
        staging: &Path,
    ) -> ArchiveResult<StagedArtifacts> {
        let no_filters_path = staging.join(format!("no_filters.{}", entry.extension));
        let final_path = staging.join(format!("final.{}", entry.extension));
        tokio::fs::write(&no_filters_path, base_bytes).await?;

        let Some(overlay_bytes) = overlay_bytes else {
            tokio::fs::copy(&no_filters_path, &final_path).await?;
            return Ok(StagedArtifacts { final_path, no_filters_path, overlay_path: None });
        };

        let overlay_path: PathBuf = staging.join("overlay.png");
        let png = normalize_overlay_png(overlay_bytes)
            .map_err(|e| ArchiveError::Composition(format!("overlay is not a usable image: {}", e)))?;
        tokio::fs::write(&overlay_path, png).await?;

        self.compositor
            .compose(&no_filters_path, &overlay_path, entry.media_kind, &final_path)
            .await
            .map_err(|e| match e {
                ArchiveError::Composition(_) => e,
                other => ArchiveError::Composition(other.to_string()),
            })?;

        match tokio::fs::metadata(&final_path).await {
            Ok(metadata) if metadata.len() > 0 => {}
            _ => {
                return Err(ArchiveError::Composition(format!(
                    "compositor produced no output for {}",
                    entry.id
                )))
            }
        }

        Ok(StagedArtifacts {
            final_path,
            no_filters_path,
            overlay_path: Some(overlay_path),
        })
    }
}
