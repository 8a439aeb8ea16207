use std::future::Future;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, imageops};
use tokio::task::JoinSet;

use crate::error::PipelineError;
use crate::geo::{GeoRectangle, TileAddress, TileGrid};

/// Default imagery source (ESRI World Imagery).
pub const DEFAULT_TILE_URL: &str =
    "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}";

/// Anything that can hand out encoded tile images.
pub trait TileSource: Send + Sync + 'static {
    fn fetch_tile(&self, tile: TileAddress) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

/// Tile source backed by a `{z}/{y}/{x}` URL template.
#[derive(Debug, Clone)]
pub struct HttpTileSource {
    client: reqwest::Client,
    url_template: String,
}

impl HttpTileSource {
    pub fn new(url_template: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("canopyscan/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(20))
            .build()
            .context("Failed to build tile HTTP client")?;
        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    pub fn tile_url(&self, tile: TileAddress) -> String {
        self.url_template
            .replace("{z}", &tile.zoom.to_string())
            .replace("{y}", &tile.y.to_string())
            .replace("{x}", &tile.x.to_string())
    }
}

impl TileSource for HttpTileSource {
    async fn fetch_tile(&self, tile: TileAddress) -> anyhow::Result<Vec<u8>> {
        let url = self.tile_url(tile);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("HTTP {} from {}", resp.status(), url);
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Stitched tile mosaic plus the extent it actually covers.
///
/// This is the canvas for the whole run: annotation draws into it in place.
#[derive(Debug, Clone)]
pub struct CompositeImage {
    raster: RgbaImage,
    bounds: GeoRectangle,
}

impl CompositeImage {
    pub fn new(raster: RgbaImage, bounds: GeoRectangle) -> Self {
        Self { raster, bounds }
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    /// Tile-aligned bounds, usually larger than the requested rectangle
    pub fn bounds(&self) -> &GeoRectangle {
        &self.bounds
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        self.raster.get_pixel_checked(x, y).copied()
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, value: Rgba<u8>) {
        if x < self.width() && y < self.height() {
            self.raster.put_pixel(x, y, value);
        }
    }

    pub fn raster(&self) -> &RgbaImage {
        &self.raster
    }

    pub fn raster_mut(&mut self) -> &mut RgbaImage {
        &mut self.raster
    }

    /// JPEG bytes for the detection API (alpha is dropped).
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, PipelineError> {
        let rgb = DynamicImage::ImageRgba8(self.raster.clone()).to_rgb8();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(&rgb)
            .map_err(|e| PipelineError::Encoding(e.to_string()))?;
        Ok(out)
    }

    pub fn to_png(&self) -> Result<Vec<u8>, PipelineError> {
        let mut out = Cursor::new(Vec::new());
        self.raster
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| PipelineError::Encoding(e.to_string()))?;
        Ok(out.into_inner())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        self.raster
            .save(path.as_ref())
            .with_context(|| format!("Failed to save composite image {:?}", path.as_ref()))
    }
}

/// Fetches every tile of a grid and stitches them into one image.
pub struct Compositor<S> {
    source: Arc<S>,
    tile_size: u32,
}

impl<S: TileSource> Compositor<S> {
    pub fn new(source: S, tile_size: u32) -> Self {
        Self {
            source: Arc::new(source),
            tile_size,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch all tiles concurrently and composite them.
    ///
    /// Fails as a whole if any single tile cannot be fetched or decoded; the
    /// remaining fetches are aborted.
    pub async fn composite(&self, grid: &TileGrid) -> Result<CompositeImage, PipelineError> {
        let canvas_w = grid.width() * self.tile_size;
        let canvas_h = grid.height() * self.tile_size;
        log::info!(
            "Fetching {} tiles ({}x{} px composite)",
            grid.len(),
            canvas_w,
            canvas_h
        );

        let mut pending = JoinSet::new();
        for tile in grid.tiles() {
            let source = Arc::clone(&self.source);
            pending.spawn(async move {
                let result = source.fetch_tile(tile).await;
                (tile, result)
            });
        }

        let mut canvas = RgbaImage::new(canvas_w, canvas_h);
        while let Some(joined) = pending.join_next().await {
            let (tile, fetched) = joined.map_err(|e| PipelineError::TileFetch {
                tile: grid.top_left,
                reason: format!("fetch task failed: {e}"),
            })?;
            let bytes = fetched.map_err(|e| PipelineError::TileFetch {
                tile,
                reason: format!("{e:#}"),
            })?;
            let decoded = image::load_from_memory(&bytes).map_err(|e| PipelineError::TileFetch {
                tile,
                reason: format!("undecodable tile image: {e}"),
            })?;

            let mut tile_img = decoded.to_rgba8();
            if tile_img.dimensions() != (self.tile_size, self.tile_size) {
                log::debug!(
                    "Tile {} is {:?}, resizing to {}px",
                    tile,
                    tile_img.dimensions(),
                    self.tile_size
                );
                tile_img = imageops::resize(
                    &tile_img,
                    self.tile_size,
                    self.tile_size,
                    imageops::FilterType::Triangle,
                );
            }

            let (px, py) = grid.pixel_offset(tile, self.tile_size);
            imageops::replace(&mut canvas, &tile_img, px as i64, py as i64);
            log::debug!("Placed tile {} at ({}, {})", tile, px, py);
        }

        Ok(CompositeImage::new(canvas, grid.bounds()))
    }
}
