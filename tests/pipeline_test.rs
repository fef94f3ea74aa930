//! End-to-end runs of the archive pipeline against in-process fakes for the
//! network, the compositor and the metadata tool.

use async_trait::async_trait;
use memory_kit::compositor::MediaCompositor;
use memory_kit::downloader::AssetFetcher;
use memory_kit::export_parser::ExportFormat;
use memory_kit::metadata::{CaptureTags, MetadataTagger};
use memory_kit::{
    ArchiveError, ArchiveResult, ArtifactKind, Config, ExportParser, FailureKind, MediaKind, MemoryEntry,
    PipelineDriver, PipelineServices, PipelineState,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::broadcast;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Overlay stored inside bundled downloads
fn bundled_overlay() -> Vec<u8> {
    let mut png = PNG_SIGNATURE.to_vec();
    png.extend_from_slice(b"bundled-overlay");
    png
}

/// A download that packs the media and its overlay into one archive
fn bundle_zip() -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let files: [(&str, Vec<u8>); 3] = [
        ("__MACOSX/._memory-main.png", b"resource fork".to_vec()),
        ("memory-main.png", b"main-bytes".to_vec()),
        ("memory-overlay.png", bundled_overlay()),
    ];
    for (name, content) in files {
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(&content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Serves deterministic bytes per locator; `/missing/` locators answer 404
#[derive(Default)]
struct FakeFetcher {
    calls: AtomicUsize,
    stop_after_first: Mutex<Option<broadcast::Sender<()>>>,
}

#[async_trait]
impl AssetFetcher for FakeFetcher {
    async fn fetch(&self, locator: &str) -> ArchiveResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stop) = self.stop_after_first.lock().unwrap().take() {
            let _ = stop.send(());
        }

        if locator.contains("/missing/") {
            return Err(ArchiveError::PermanentFetch("HTTP 404 Not Found".into()));
        }
        if locator.contains("/bundle/") {
            return Ok(bundle_zip());
        }
        if locator.contains("/overlay/") {
            let mut png = PNG_SIGNATURE.to_vec();
            png.extend_from_slice(locator.as_bytes());
            return Ok(png);
        }
        Ok(format!("media:{}", locator).into_bytes())
    }
}

/// Concatenates base and overlay so the result is recognisable
#[derive(Default)]
struct FakeCompositor {
    calls: AtomicUsize,
}

#[async_trait]
impl MediaCompositor for FakeCompositor {
    async fn compose(&self, base: &Path, overlay: &Path, _kind: MediaKind, output: &Path) -> ArchiveResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut bytes = std::fs::read(base)?;
        bytes.extend_from_slice(b"|");
        bytes.extend_from_slice(&std::fs::read(overlay)?);
        std::fs::write(output, bytes)?;
        Ok(())
    }
}

/// Appends a marker to tagged files; can be switched to fail
#[derive(Default)]
struct FakeTagger {
    fail: AtomicBool,
    calls: AtomicUsize,
}

#[async_trait]
impl MetadataTagger for FakeTagger {
    async fn write_tags(&self, path: &Path, tags: &CaptureTags) -> ArchiveResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ArchiveError::Tagging("exiftool exited with status 1".into()));
        }
        let mut bytes = std::fs::read(path)?;
        bytes.extend_from_slice(format!("#{}", tags.instant.to_rfc3339()).as_bytes());
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

struct Harness {
    temp_dir: TempDir,
    fetcher: Arc<FakeFetcher>,
    compositor: Arc<FakeCompositor>,
    tagger: Arc<FakeTagger>,
}

impl Harness {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
            fetcher: Arc::new(FakeFetcher::default()),
            compositor: Arc::new(FakeCompositor::default()),
            tagger: Arc::new(FakeTagger::default()),
        }
    }

    fn root(&self) -> PathBuf {
        self.temp_dir.path().join("downloaded_memories")
    }

    fn config(&self) -> Config {
        Config {
            output_dir: self.root(),
            workers: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            request_spacing_ms: 0,
            ..Default::default()
        }
    }

    fn driver(&self, config: Config) -> PipelineDriver {
        let services = PipelineServices {
            fetcher: self.fetcher.clone(),
            compositor: self.compositor.clone(),
            tagger: self.tagger.clone(),
        };
        PipelineDriver::new(config, services).unwrap()
    }

    fn entries(&self, config: &Config, content: &str) -> Vec<MemoryEntry> {
        let parser = ExportParser::new(config.local_zone().unwrap());
        parser.parse_str(content, ExportFormat::Json).unwrap().entries
    }

    async fn run_with(&self, config: Config, content: &str) -> PipelineState {
        let parser = ExportParser::new(config.local_zone().unwrap());
        let report = parser.parse_str(content, ExportFormat::Json).unwrap();
        self.driver(config).run(report).await
    }

    async fn run(&self, content: &str) -> PipelineState {
        self.run_with(self.config(), content).await
    }

    fn fetches(&self) -> usize {
        self.fetcher.calls.load(Ordering::SeqCst)
    }

    fn compositions(&self) -> usize {
        self.compositor.calls.load(Ordering::SeqCst)
    }

    /// Relative path -> content of every file under the output root
    fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(self.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let relative = e.path().strip_prefix(self.root()).unwrap().to_path_buf();
                (relative, std::fs::read(e.path()).unwrap())
            })
            .collect()
    }
}

fn record(date: &str, kind: &str, name: &str, overlay: bool) -> serde_json::Value {
    let mut record = json!({
        "Date": date,
        "Media Type": kind,
        "Location": "Latitude, Longitude: 59.9139, 10.7522",
        "Media Download Url": format!("https://cdn.example.com/media/{}", name),
    });
    if overlay {
        record["Overlay Download Url"] = json!(format!("https://cdn.example.com/overlay/{}.png", name));
    }
    record
}

fn mixed_export() -> String {
    json!({ "Saved Media": [
        record("2023-07-04 19:30:12 UTC", "Image", "beach.jpg", true),
        record("2023-08-01 08:00:00 UTC", "Video", "concert.mp4", false),
        record("2024-02-10 12:00:00 UTC", "Image", "snow.jpg", false),
    ]})
    .to_string()
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let harness = Harness::new();
    let export = mixed_export();

    let first = harness.run(&export).await;
    assert_eq!(first.downloaded, 3);
    assert_eq!(first.failed, 0);
    assert_eq!(harness.fetches(), 4);
    assert_eq!(harness.compositions(), 1);
    let files_after_first = harness.snapshot();
    assert_eq!(files_after_first.len(), 7);

    let second = harness.run(&export).await;
    assert_eq!(second.skipped, 3);
    assert_eq!(second.downloaded, 0);
    assert_eq!(harness.fetches(), 4);
    assert_eq!(harness.compositions(), 1);
    assert_eq!(harness.snapshot(), files_after_first);
}

#[tokio::test]
async fn test_entries_without_overlay_keep_identical_final_and_no_filters() {
    let harness = Harness::new();
    let export = mixed_export();
    let config = harness.config();
    harness.run(&export).await;

    let driver = harness.driver(config.clone());
    for entry in harness.entries(&config, &export) {
        let layout = driver.layout();
        let final_bytes = std::fs::read(layout.path_for(&entry, ArtifactKind::Final)).unwrap();
        let base_bytes = std::fs::read(layout.path_for(&entry, ArtifactKind::NoFilters)).unwrap();
        let overlay_path = layout.path_for(&entry, ArtifactKind::Overlay);

        if entry.has_overlay() {
            assert_ne!(final_bytes, base_bytes);
            assert!(std::fs::read(&overlay_path).unwrap().starts_with(PNG_SIGNATURE));
        } else {
            assert_eq!(final_bytes, base_bytes);
            assert!(!overlay_path.exists());
        }
    }
}

#[tokio::test]
async fn test_missing_overlay_triggers_reprocessing() {
    let harness = Harness::new();
    let export = mixed_export();
    let config = harness.config();
    harness.run(&export).await;

    let entries = harness.entries(&config, &export);
    let with_overlay = entries.iter().find(|e| e.has_overlay()).unwrap();
    let layout = harness.driver(config.clone()).layout().clone();
    let overlay_path = layout.path_for(with_overlay, ArtifactKind::Overlay);
    std::fs::remove_file(&overlay_path).unwrap();
    assert!(layout.path_for(with_overlay, ArtifactKind::Final).exists());

    let fetches_before = harness.fetches();
    let rerun = harness.run(&export).await;

    assert_eq!(rerun.downloaded, 1);
    assert_eq!(rerun.skipped, 2);
    assert_eq!(harness.fetches() - fetches_before, 2);
    assert!(overlay_path.exists());
}

#[tokio::test]
async fn test_bundled_download_is_unpacked_into_all_trees() {
    let harness = Harness::new();
    let export = json!({ "Saved Media": [
        record("2024-05-01 10:00:00 UTC", "Image", "bundle/memory", false),
    ]})
    .to_string();
    let config = harness.config();

    let state = harness.run(&export).await;
    assert_eq!(state.downloaded, 1);
    assert_eq!(state.failed, 0);
    assert_eq!(harness.compositions(), 1);

    let entry = harness.entries(&config, &export).remove(0);
    assert_eq!(entry.extension, "jpg");
    let layout = harness.driver(config.clone()).layout().clone();
    let unpacked = entry.with_extension("png");

    let no_filters = std::fs::read(layout.path_for(&unpacked, ArtifactKind::NoFilters)).unwrap();
    assert!(no_filters.starts_with(b"main-bytes#"));
    let final_bytes = std::fs::read(layout.path_for(&unpacked, ArtifactKind::Final)).unwrap();
    let mut composed = b"main-bytes|".to_vec();
    composed.extend_from_slice(&bundled_overlay());
    assert!(final_bytes.starts_with(&composed));
    assert_eq!(
        std::fs::read(layout.path_for(&entry, ArtifactKind::Overlay)).unwrap(),
        bundled_overlay()
    );
    assert!(!layout.path_for(&entry, ArtifactKind::Final).exists());
    assert!(harness.snapshot().values().all(|bytes| !bytes.starts_with(b"PK\x03\x04")));

    let fetches_before = harness.fetches();
    let rerun = harness.run(&export).await;
    assert_eq!(rerun.skipped, 1);
    assert_eq!(harness.fetches(), fetches_before);
}

#[tokio::test]
async fn test_bad_record_does_not_stop_the_batch() {
    let harness = Harness::new();
    let records: Vec<_> = (0..10)
        .map(|i| {
            let date = if i == 4 {
                "31/12/2024 11pm".to_string()
            } else {
                format!("2022-03-{:02} 09:15:00 UTC", i + 1)
            };
            record(&date, "Image", &format!("photo-{}.jpg", i), false)
        })
        .collect();
    let export = json!({ "Saved Media": records }).to_string();

    let state = harness.run(&export).await;

    assert_eq!(state.total, 9);
    assert_eq!(state.downloaded, 9);
    assert_eq!(state.parse_errors, 1);
    assert_eq!(state.failures_by_kind[&FailureKind::Parse], 1);
}

#[tokio::test]
async fn test_tagging_failure_still_places_assets() {
    let harness = Harness::new();
    harness.tagger.fail.store(true, Ordering::SeqCst);
    let export = mixed_export();
    let config = harness.config();

    let state = harness.run(&export).await;

    assert_eq!(state.downloaded, 3);
    assert_eq!(state.failed, 0);
    assert_eq!(state.tagging_incomplete, 3);
    assert_eq!(state.failures_by_kind[&FailureKind::Tagging], 3);

    let driver = harness.driver(config.clone());
    for entry in harness.entries(&config, &export) {
        for (_, path) in driver.layout().expected_paths(&entry) {
            assert!(path.exists(), "{} should be placed", path.display());
        }
    }
}

#[tokio::test]
async fn test_failed_fetch_is_isolated_and_leaves_no_debris() {
    let harness = Harness::new();
    let export = json!([
        record("2021-01-01 10:00:00 UTC", "Image", "ok.jpg", false),
        json!({
            "Date": "2021-01-02 10:00:00 UTC",
            "Media Type": "Image",
            "Media Download Url": "https://cdn.example.com/missing/gone.jpg",
        }),
        record("2021-01-03 10:00:00 UTC", "Video", "ok.mp4", true),
    ])
    .to_string();

    let state = harness.run(&export).await;

    assert_eq!(state.downloaded, 2);
    assert_eq!(state.failed, 1);
    assert_eq!(state.failures[0].kind, FailureKind::Fetch);
    assert!(state.failures[0].reason.contains("404"));
    assert_eq!(harness.snapshot().len(), 5);

    let leftovers = std::fs::read_dir(harness.root())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".staging-"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_year_bucket_follows_local_timezone() {
    let export = json!([record("2024-12-31 23:30:00 UTC", "Image", "nye.jpg", false)]).to_string();

    for (zone, year) in [("UTC-5", "2024"), ("UTC+5", "2025")] {
        let harness = Harness::new();
        let config = Config {
            timezone: zone.to_string(),
            ..harness.config()
        };

        let state = tokio_test::block_on(harness.run_with(config, &export));
        assert_eq!(state.downloaded, 1);

        let files: Vec<_> = harness.snapshot().into_keys().collect();
        assert!(files.iter().all(|p| p.components().nth(1).unwrap().as_os_str() == year), "{:?}", files);
    }
}

#[tokio::test]
async fn test_trial_run_takes_first_entries_in_export_order() {
    let harness = Harness::new();
    let config = Config {
        trial_limit: Some(2),
        ..harness.config()
    };
    let export = mixed_export();
    let expected: Vec<_> = harness.entries(&config, &export).into_iter().take(2).collect();

    let state = harness.run_with(config.clone(), &export).await;

    assert_eq!(state.total, 2);
    assert_eq!(state.downloaded, 2);
    let driver = harness.driver(config);
    for entry in &expected {
        assert!(driver.layout().path_for(entry, ArtifactKind::Final).exists());
    }
}

#[tokio::test]
async fn test_stop_request_prevents_new_entries() {
    let harness = Harness::new();
    let config = Config {
        workers: 1,
        ..harness.config()
    };
    let driver = harness.driver(config.clone());
    *harness.fetcher.stop_after_first.lock().unwrap() = Some(driver.stop_handle());

    let report = ExportParser::new(config.local_zone().unwrap())
        .parse_str(&mixed_export(), ExportFormat::Json)
        .unwrap();
    let state = driver.run(report).await;

    assert_eq!(state.downloaded, 1);
    assert_eq!(state.not_started, 2);
    assert_eq!(harness.snapshot().len(), 3);
}
