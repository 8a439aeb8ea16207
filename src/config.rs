use std::time::Duration;

/// Zoom level used for satellite tiles unless overridden.
pub const DEFAULT_ZOOM: u8 = 17;
/// Edge length of a single map tile in pixels.
pub const TILE_SIZE: u32 = 256;
/// Largest grid the compositor will fetch. Bigger selections must be redrawn.
pub const MAX_TILES: usize = 16;
/// Quality used when encoding the composite for the detection API.
pub const JPEG_QUALITY: u8 = 85;
/// Wait applied once when the detection model reports a cold start.
pub const COLD_START_RETRY_DELAY: Duration = Duration::from_secs(10);
/// Provenance tag attached to imported trees.
pub const IMPORT_SOURCE_TAG: &str = "satellite_detection";
/// The registry refuses batches larger than this.
pub const MAX_IMPORT_BATCH: usize = 200;

pub const MIN_SCORE: f32 = 0.4;
pub const STRONG_SCORE: f32 = 0.7;
pub const MIN_EXTENT: f32 = 0.02;
pub const MAX_EXTENT: f32 = 0.4;

/// Labels treated as vegetation (matched case-insensitively as substrings).
pub const VEGETATION_LABELS: &[&str] = &[
    "tree",
    "plant",
    "potted plant",
    "broccoli",
    "bush",
    "shrub",
    "palm tree",
    "flower",
];

/// Acceptance policy for raw detector output.
///
/// The thresholds are empirical. A detection is kept when its score exceeds
/// `min_score` and it either carries a vegetation label or is a confident,
/// canopy-sized box (`strong_score`, extent within `min_extent..max_extent`
/// of the image on both axes).
#[derive(Debug, Clone, PartialEq)]
pub struct FilterPolicy {
    pub min_score: f32,
    pub strong_score: f32,
    pub min_extent: f32,
    pub max_extent: f32,
    pub vegetation_labels: Vec<String>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            min_score: MIN_SCORE,
            strong_score: STRONG_SCORE,
            min_extent: MIN_EXTENT,
            max_extent: MAX_EXTENT,
            vegetation_labels: VEGETATION_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Tunables for a single detection run.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub zoom: u8,
    pub tile_size: u32,
    pub max_tiles: usize,
    pub jpeg_quality: u8,
    pub retry_delay: Duration,
    pub source_tag: String,
    pub max_import_batch: usize,
    pub filter: FilterPolicy,
}

impl DetectionConfig {
    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_max_tiles(mut self, max_tiles: usize) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_filter(mut self, filter: FilterPolicy) -> Self {
        self.filter = filter;
        self
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            zoom: DEFAULT_ZOOM,
            tile_size: TILE_SIZE,
            max_tiles: MAX_TILES,
            jpeg_quality: JPEG_QUALITY,
            retry_delay: COLD_START_RETRY_DELAY,
            source_tag: IMPORT_SOURCE_TAG.to_string(),
            max_import_batch: MAX_IMPORT_BATCH,
            filter: FilterPolicy::default(),
        }
    }
}
