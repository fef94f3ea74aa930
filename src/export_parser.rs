//! # Export Parsing Module
//!
//! Questo modulo trasforma l'export della cronologia in entry tipizzate.
//!
//! ## Responsabilità:
//! - Lettura dell'export in formato JSON (`Saved Media`) o HTML (righe `<tr>`)
//! - Parsing della data di cattura (sempre UTC nell'export)
//! - Riconoscimento del tipo di media (immagine / video)
//! - Estrazione dei locator: base e, se presente, overlay
//! - Parsing opzionale delle coordinate GPS
//! - Calcolo di un id stabile e univoco per ogni entry
//!
//! ## Tolleranza agli errori:
//! - Un record malformato (data mancante, locator invalido) viene riportato
//!   come `ArchiveError::Parse` e saltato, il parsing continua
//! - Solo un export illeggibile nel suo insieme è un errore fatale
//!
//! ## Formato id:
//! ```text
//! 2024-12-31_183000_1f2e3d4c        (ora locale + sha256 del locator base)
//! 2024-12-31_183000_1f2e3d4c-2      (duplicato nello stesso export)
//! ```

use crate::error::{ArchiveError, ArchiveResult};
use crate::timezone::LocalZone;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LOCATION_PREFIX: &str = "Latitude, Longitude:";
/// Extensions kept as-is for `final` and `no_filters` files
pub const MEDIA_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "mp4", "mov"];

/// Kind of archived media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    fn from_marker(marker: &str) -> Option<Self> {
        match marker.trim().to_ascii_lowercase().as_str() {
            "image" | "photo" => Some(MediaKind::Photo),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" => Some(MediaKind::Photo),
            "mp4" | "mov" => Some(MediaKind::Video),
            _ => None,
        }
    }

    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

/// Capture location attached to a memory
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Parses `Latitude, Longitude: 59.91, 10.75`; zero coordinates mean unknown
    pub fn parse(raw: &str) -> Option<Self> {
        let coords = raw.trim().strip_prefix(LOCATION_PREFIX)?;
        let (lat, lon) = coords.split_once(',')?;
        let latitude = lat.trim().parse::<f64>().ok()?;
        let longitude = lon.trim().parse::<f64>().ok()?;

        if latitude == 0.0 || longitude == 0.0 {
            return None;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }

        Some(Self { latitude, longitude })
    }
}

/// One archived memory
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub id: String,
    pub capture_instant: DateTime<Utc>,
    pub media_kind: MediaKind,
    pub base_asset_ref: String,
    pub overlay_asset_ref: Option<String>,
    pub location: Option<GeoPoint>,
    /// Extension used for `final` and `no_filters` files
    pub extension: String,
}

impl MemoryEntry {
    pub fn has_overlay(&self) -> bool {
        self.overlay_asset_ref.is_some()
    }

    /// Same entry filed under another media extension
    pub fn with_extension(&self, extension: &str) -> Self {
        Self {
            extension: extension.to_string(),
            ..self.clone()
        }
    }
}

/// Outcome of parsing a whole export
#[derive(Debug, Default)]
pub struct ParseReport {
    pub entries: Vec<MemoryEntry>,
    pub errors: Vec<ArchiveError>,
}

/// Supported export encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Html,
}

impl ExportFormat {
    /// Picks the format from the extension, falling back to the content
    pub fn detect(path: &Path, content: &str) -> Self {
        match path.extension().map(|e| e.to_string_lossy().to_lowercase()).as_deref() {
            Some("json") => ExportFormat::Json,
            Some("html") | Some("htm") => ExportFormat::Html,
            _ => {
                let head = content.trim_start();
                if head.starts_with('{') || head.starts_with('[') {
                    ExportFormat::Json
                } else {
                    ExportFormat::Html
                }
            }
        }
    }
}

/// Fields shared by both export encodings before validation
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "Date")]
    date: Option<String>,
    #[serde(rename = "Media Type")]
    media_type: Option<String>,
    #[serde(rename = "Location")]
    location: Option<String>,
    #[serde(rename = "Media Download Url")]
    media_download_url: Option<String>,
    #[serde(rename = "Download Link")]
    download_link: Option<String>,
    #[serde(rename = "Overlay Download Url")]
    overlay_download_url: Option<String>,
}

impl RawRecord {
    fn base_locator(&self) -> Option<&str> {
        [&self.media_download_url, &self.download_link]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }

    fn overlay_locator(&self) -> Option<&str> {
        self.overlay_download_url.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Turns an export document into `MemoryEntry` values
pub struct ExportParser {
    zone: LocalZone,
}

impl ExportParser {
    pub fn new(zone: LocalZone) -> Self {
        Self { zone }
    }

    /// Reads and parses an export file
    pub async fn parse_file(&self, path: &Path) -> ArchiveResult<ParseReport> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ArchiveError::Export(format!("cannot read {}: {}", path.display(), e)))?;
        let format = ExportFormat::detect(path, &content);
        info!("Parsing {:?} export: {}", format, path.display());
        self.parse_str(&content, format)
    }

    /// Parses export content already in memory
    pub fn parse_str(&self, content: &str, format: ExportFormat) -> ArchiveResult<ParseReport> {
        let records = match format {
            ExportFormat::Json => Self::json_records(content)?,
            ExportFormat::Html => Self::html_records(content)?,
        };

        let mut report = ParseReport::default();
        let mut seen_ids: HashMap<String, usize> = HashMap::new();

        for (index, record) in records.into_iter().enumerate() {
            match record.and_then(|raw| self.build_entry(index, raw)) {
                Ok(mut entry) => {
                    let count = seen_ids.entry(entry.id.clone()).or_insert(0);
                    *count += 1;
                    if *count > 1 {
                        entry.id = format!("{}-{}", entry.id, count);
                    }
                    report.entries.push(entry);
                }
                Err(e) => {
                    warn!("Skipping malformed record: {}", e);
                    report.errors.push(e);
                }
            }
        }

        info!(
            "Found {} memories ({} malformed records skipped)",
            report.entries.len(),
            report.errors.len()
        );
        Ok(report)
    }

    fn json_records(content: &str) -> ArchiveResult<Vec<ArchiveResult<RawRecord>>> {
        let document: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| ArchiveError::Export(format!("invalid JSON: {}", e)))?;

        let items = match document {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(mut map) => match map.remove("Saved Media") {
                Some(serde_json::Value::Array(items)) => items,
                _ => return Err(ArchiveError::Export("no \"Saved Media\" list in export".to_string())),
            },
            _ => return Err(ArchiveError::Export("unexpected JSON document shape".to_string())),
        };

        Ok(items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value::<RawRecord>(item).map_err(|e| ArchiveError::Parse {
                    index,
                    reason: format!("not a memory record: {}", e),
                })
            })
            .collect())
    }

    fn html_records(content: &str) -> ArchiveResult<Vec<ArchiveResult<RawRecord>>> {
        let patterns = HtmlPatterns::compile()?;
        let mut records = Vec::new();

        for row in patterns.row.captures_iter(content) {
            let cells: Vec<&str> = patterns
                .cell
                .captures_iter(&row[1])
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();

            // header and layout rows
            if cells.len() < 4 {
                continue;
            }

            let links_html = decode_entities(&cells[3..].join(" "));
            let mut links = patterns
                .link
                .captures_iter(&links_html)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()));

            records.push(Ok(RawRecord {
                date: Some(patterns.cell_text(cells[0])),
                media_type: Some(patterns.cell_text(cells[1])),
                location: Some(patterns.cell_text(cells[2])),
                media_download_url: None,
                download_link: links.next(),
                overlay_download_url: links.next(),
            }));
        }

        debug!("Extracted {} table rows from HTML export", records.len());
        Ok(records)
    }

    fn build_entry(&self, index: usize, raw: RawRecord) -> ArchiveResult<MemoryEntry> {
        let parse_error = |reason: String| ArchiveError::Parse { index, reason };

        let date_str = raw
            .date
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| parse_error("missing date".to_string()))?;
        let capture_instant = parse_capture_date(date_str)
            .ok_or_else(|| parse_error(format!("unparseable date '{}'", date_str)))?;

        let marker = raw.media_type.as_deref().unwrap_or_default();
        let media_kind = MediaKind::from_marker(marker)
            .ok_or_else(|| parse_error(format!("unknown media type '{}'", marker)))?;

        let base = raw
            .base_locator()
            .ok_or_else(|| parse_error("missing download locator".to_string()))?;
        let base_url = validate_locator(base).map_err(parse_error)?;

        let overlay_asset_ref = match raw.overlay_locator() {
            Some(overlay) => Some(
                validate_locator(overlay)
                    .map_err(|reason| parse_error(format!("overlay: {}", reason)))?
                    .to_string(),
            ),
            None => None,
        };

        let location = raw.location.as_deref().and_then(GeoPoint::parse);
        let extension = extension_for(&base_url, media_kind);
        let id = self.entry_id(capture_instant, base);

        Ok(MemoryEntry {
            id,
            capture_instant,
            media_kind,
            base_asset_ref: base_url.to_string(),
            overlay_asset_ref,
            location,
            extension,
        })
    }

    fn entry_id(&self, capture_instant: DateTime<Utc>, base_locator: &str) -> String {
        let (local, _) = self.zone.localize(capture_instant);
        let digest = hex::encode(Sha256::digest(base_locator.as_bytes()));
        format!("{}_{}", local.format("%Y-%m-%d_%H%M%S"), &digest[..8])
    }
}

/// Export dates are UTC, with or without the trailing ` UTC` marker
fn parse_capture_date(raw: &str) -> Option<DateTime<Utc>> {
    let stripped = raw.strip_suffix("UTC").map(str::trim_end).unwrap_or(raw);
    let naive = NaiveDateTime::parse_from_str(stripped, DATE_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

fn validate_locator(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("malformed locator '{}': {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported locator scheme '{}'", other)),
    }
}

/// Lowercased extension of `name` when it is one of `MEDIA_EXTENSIONS`
pub fn media_extension(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
}

fn extension_for(url: &Url, kind: MediaKind) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(media_extension)
        .unwrap_or_else(|| kind.default_extension().to_string())
}

/// Patterns for scraping the HTML export table, compiled once per document
struct HtmlPatterns {
    row: Regex,
    cell: Regex,
    link: Regex,
    tag: Regex,
}

impl HtmlPatterns {
    fn compile() -> ArchiveResult<Self> {
        let build = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ArchiveError::Export(format!("HTML pattern: {}", e)))
        };
        Ok(Self {
            row: build(r"(?is)<tr[^>]*>(.*?)</tr>")?,
            cell: build(r"(?is)<td[^>]*>(.*?)</td>")?,
            link: build(r"downloadMemories\(\s*'([^']+)'")?,
            tag: build(r"(?s)<[^>]*>")?,
        })
    }

    fn cell_text(&self, html: &str) -> String {
        decode_entities(&self.tag.replace_all(html, "")).trim().to_string()
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
