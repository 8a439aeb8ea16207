use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use canopyscan::detection::{DetectorReply, ObjectDetector};
use canopyscan::registry::{ImportRequest, ImportSummary, ImportedTree, TreeImporter};
use canopyscan::{DetectionConfig, DetectionPipeline, DetectionWorkflow, GeoRectangle, TileAddress, TileSource};
use image::{ImageBuffer, Rgb};
use tokio::sync::Barrier;
use serde_json::{Value, json};

/// The 3x2 tile area around central Bangalore used throughout the tests.
pub fn bangalore_rect() -> GeoRectangle {
    GeoRectangle::new(12.975, 12.970, 77.600, 77.595).expect("valid rectangle")
}

/// First tile of `bangalore_rect()` at zoom 17.
pub const BANGALORE_TOP_LEFT: TileAddress = TileAddress { x: 93787, y: 60771, zoom: 17 };

/// Color each tile is painted with, derived from its address.
pub fn tile_color(tile: TileAddress) -> Rgb<u8> {
    Rgb([(tile.x % 251) as u8, (tile.y % 251) as u8, 200])
}

fn encode_png(img: &ImageBuffer<Rgb<u8>, Vec<u8>>) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("Failed to encode test tile");
    out.into_inner()
}

/// Serves solid-color PNG tiles; selected tiles can be made to fail.
#[derive(Default)]
pub struct SolidTileSource {
    pub failing: HashSet<TileAddress>,
    pub tile_size: u32,
    pub fetched: AtomicUsize,
}

impl SolidTileSource {
    pub fn new() -> Self {
        Self {
            tile_size: 256,
            ..Default::default()
        }
    }

    pub fn failing_on(tile: TileAddress) -> Self {
        let mut source = Self::new();
        source.failing.insert(tile);
        source
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }
}

impl TileSource for SolidTileSource {
    async fn fetch_tile(&self, tile: TileAddress) -> anyhow::Result<Vec<u8>> {
        self.fetched.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&tile) {
            anyhow::bail!("HTTP 404 for tile {tile}");
        }
        let img = ImageBuffer::from_pixel(self.tile_size, self.tile_size, tile_color(tile));
        Ok(encode_png(&img))
    }
}

/// Every fetch waits until `parties` fetches are in flight at the same time.
pub struct BarrierTileSource {
    inner: SolidTileSource,
    barrier: Barrier,
}

impl BarrierTileSource {
    pub fn new(parties: usize) -> Self {
        Self {
            inner: SolidTileSource::new(),
            barrier: Barrier::new(parties),
        }
    }
}

impl TileSource for BarrierTileSource {
    async fn fetch_tile(&self, tile: TileAddress) -> anyhow::Result<Vec<u8>> {
        self.barrier.wait().await;
        self.inner.fetch_tile(tile).await
    }
}

/// Counts fetch futures dropped before finishing.
struct Abandoned<'a>(&'a AtomicUsize);

impl Drop for Abandoned<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Once all `parties` fetches have started, `failing` errors and every other
/// fetch stalls forever.
pub struct StallingTileSource {
    failing: TileAddress,
    barrier: Barrier,
    abandoned: AtomicUsize,
}

impl StallingTileSource {
    pub fn new(failing: TileAddress, parties: usize) -> Self {
        Self {
            failing,
            barrier: Barrier::new(parties),
            abandoned: AtomicUsize::new(0),
        }
    }

    pub fn abandoned_count(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

impl TileSource for StallingTileSource {
    async fn fetch_tile(&self, tile: TileAddress) -> anyhow::Result<Vec<u8>> {
        self.barrier.wait().await;
        if tile == self.failing {
            anyhow::bail!("HTTP 500 for tile {tile}");
        }
        let _abandoned = Abandoned(&self.abandoned);
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}

/// Replays canned detector replies in order.
pub struct ScriptedDetector {
    replies: Mutex<VecDeque<DetectorReply>>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(replies: Vec<DetectorReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn answering(body: Value) -> Self {
        Self::new(vec![DetectorReply::Success(body)])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ObjectDetector for ScriptedDetector {
    async fn detect(&self, image: &[u8], content_type: &str) -> anyhow::Result<DetectorReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(content_type, "image/jpeg");
        assert_eq!(&image[..2], &[0xFF, 0xD8], "detector should receive a JPEG");
        let next = self.replies.lock().expect("detector lock").pop_front();
        next.ok_or_else(|| anyhow::anyhow!("no scripted reply left"))
    }
}

/// Never answers; used to exercise cancellation.
pub struct HangingDetector;

impl ObjectDetector for HangingDetector {
    async fn detect(&self, _image: &[u8], _content_type: &str) -> anyhow::Result<DetectorReply> {
        std::future::pending::<()>().await;
        Ok(DetectorReply::WarmingUp)
    }
}

/// Records import requests; fails the first `failures` calls.
#[derive(Default)]
pub struct RecordingImporter {
    pub requests: Mutex<Vec<ImportRequest>>,
    failures: AtomicUsize,
}

impl RecordingImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Default::default()
        }
    }

    pub fn recorded(&self) -> Vec<ImportRequest> {
        self.requests.lock().expect("importer lock").clone()
    }
}

impl TreeImporter for RecordingImporter {
    async fn import(&self, request: &ImportRequest) -> anyhow::Result<ImportSummary> {
        self.requests.lock().expect("importer lock").push(request.clone());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("registry returned HTTP 400: No zones configured");
        }

        // Mirror the registry: entries below 0.3 confidence are skipped
        let mut summary = ImportSummary::default();
        for (i, tree) in request.trees.iter().enumerate() {
            if tree.confidence < 0.3 {
                summary.skipped += 1;
                continue;
            }
            summary.created += 1;
            summary.trees.push(ImportedTree {
                tag_number: format!("T-{:04}", i + 1),
                zone: "Central".to_string(),
                latitude: tree.latitude,
                longitude: tree.longitude,
            });
        }
        Ok(summary)
    }
}

/// Never finishes an import.
pub struct HangingImporter;

impl TreeImporter for HangingImporter {
    async fn import(&self, _request: &ImportRequest) -> anyhow::Result<ImportSummary> {
        std::future::pending::<()>().await;
        Ok(ImportSummary::default())
    }
}

/// A detection entry as the API returns it.
pub fn detection_json(label: &str, score: f32, xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Value {
    json!({
        "label": label,
        "score": score,
        "box": {"xmin": xmin, "ymin": ymin, "xmax": xmax, "ymax": ymax}
    })
}

/// Two trees, a car and a confident canopy-sized blob on the 768x512 composite.
pub fn mixed_detections() -> Value {
    json!([
        detection_json("tree", 0.9, 100.0, 100.0, 140.0, 140.0),
        detection_json("car", 0.5, 300.0, 300.0, 320.0, 320.0),
        detection_json("umbrella", 0.85, 500.0, 200.0, 540.0, 240.0),
        detection_json("potted plant", 0.45, 700.0, 450.0, 720.0, 470.0),
    ])
}

/// Config with no real waiting between cold-start attempts.
pub fn test_config() -> DetectionConfig {
    DetectionConfig::default().with_retry_delay(Duration::from_millis(10))
}

pub fn make_pipeline<D: ObjectDetector>(detector: D) -> DetectionPipeline<SolidTileSource, D> {
    DetectionPipeline::new(test_config(), SolidTileSource::new(), detector)
}

pub fn make_workflow<D: ObjectDetector, I: TreeImporter>(
    detector: D,
    importer: I,
) -> DetectionWorkflow<SolidTileSource, D, I> {
    DetectionWorkflow::new(make_pipeline(detector), importer)
}
