use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use uuid::Uuid;

use crate::compositor::{CompositeImage, Compositor, TileSource};
use crate::config::DetectionConfig;
use crate::detection::annotate::draw_detections;
use crate::detection::client::{DetectionClient, ObjectDetector};
use crate::detection::filter::filter_detections;
use crate::error::PipelineError;
use crate::geo::{GeoRectangle, TileGrid, resolve_grid};
use crate::models::{AcceptedDetection, GeoDetection};
use crate::projector::project_all;

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
    /// Whether debug mode is enabled
    pub enabled: bool,
}

/// Context available to every stage of a run
#[derive(Clone, Debug, Default)]
pub struct PipelineContext {
    pub debug: Option<DebugConfig>,
}

impl PipelineContext {
    fn debug_dir(&self) -> Option<&PathBuf> {
        self.debug
            .as_ref()
            .filter(|d| d.enabled)
            .map(|d| &d.output_dir)
    }
}

/// Cooperative cancellation for an in-flight run.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct DetectionRun {
    pub run_id: Uuid,
    pub started_at: OffsetDateTime,
    pub requested: GeoRectangle,
    pub grid: TileGrid,
    /// Composite with the accepted detections drawn in
    pub image: CompositeImage,
    pub accepted: Vec<AcceptedDetection>,
    /// Parallel to `accepted`
    pub located: Vec<GeoDetection>,
}

impl DetectionRun {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Hint shown when nothing was found.
    pub fn hint(&self) -> Option<&'static str> {
        self.is_empty().then_some(
            "No trees detected. Try a smaller area with denser tree coverage, or adjust the zoom level",
        )
    }
}

#[derive(Serialize)]
struct DebugDump<'a> {
    run_id: Uuid,
    requested: &'a GeoRectangle,
    bounds: &'a GeoRectangle,
    width: u32,
    height: u32,
    accepted: &'a [AcceptedDetection],
    located: &'a [GeoDetection],
}

/// Tile resolution, compositing, detection, filtering and projection in sequence.
pub struct DetectionPipeline<S, D> {
    config: DetectionConfig,
    compositor: Compositor<S>,
    client: DetectionClient<D>,
    context: PipelineContext,
}

impl<S: TileSource, D: ObjectDetector> DetectionPipeline<S, D> {
    pub fn new(config: DetectionConfig, tiles: S, detector: D) -> Self {
        let compositor = Compositor::new(tiles, config.tile_size);
        let client = DetectionClient::new(detector, config.retry_delay);
        Self {
            config,
            compositor,
            client,
            context: PipelineContext::default(),
        }
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.context.debug = Some(DebugConfig {
            output_dir,
            enabled: true,
        });

        Ok(self)
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn tile_source(&self) -> &S {
        self.compositor.source()
    }

    pub fn detector(&self) -> &D {
        self.client.detector()
    }

    /// Run every stage for `requested`, aborting at the first failure.
    pub async fn run(
        &self,
        requested: GeoRectangle,
        cancel: Option<&CancelToken>,
    ) -> Result<DetectionRun, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = OffsetDateTime::now_utc();
        log::info!(
            "Run {}: detecting trees in N {:.5} S {:.5} E {:.5} W {:.5}",
            run_id,
            requested.north,
            requested.south,
            requested.east,
            requested.west
        );

        let work = self.run_stages(run_id, started_at, requested);
        let result = match cancel {
            Some(token) => {
                if token.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                tokio::select! {
                    result = work => result,
                    _ = token.cancelled() => Err(PipelineError::Cancelled),
                }
            }
            None => work.await,
        };

        match &result {
            Ok(run) => log::info!(
                "Run {}: {} candidate trees located",
                run_id,
                run.located.len()
            ),
            Err(e) => log::warn!("Run {} aborted: {}", run_id, e),
        }
        result
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        started_at: OffsetDateTime,
        requested: GeoRectangle,
    ) -> Result<DetectionRun, PipelineError> {
        // Step 1: tile grid
        let grid = resolve_grid(&requested, self.config.zoom, self.config.max_tiles)?;

        // Step 2: fetch and stitch
        let mut image = self.compositor.composite(&grid).await?;
        self.save_debug_image(&image, "00_composite.png");

        // Step 3: remote detection
        let jpeg = image.to_jpeg(self.config.jpeg_quality)?;
        log::info!("Running detection on {} byte image", jpeg.len());
        let raw = self.client.detect_objects(&jpeg).await?;
        let raw_count = raw.len();

        // Step 4: vegetation filter
        let accepted = filter_detections(raw, image.width(), image.height(), &self.config.filter);
        log::info!(
            "Kept {} of {} detections as vegetation",
            accepted.len(),
            raw_count
        );

        // Step 5: annotate the canvas, then project to coordinates
        draw_detections(&mut image, &accepted);
        let located = project_all(&accepted, image.width(), image.height(), image.bounds());
        for (a, g) in accepted.iter().zip(&located) {
            log::debug!(
                "  {} ({:.2}) at px ({:.1}, {:.1}) -> ({:.6}, {:.6})",
                a.detection.label,
                a.detection.score,
                a.canopy_center.x,
                a.canopy_center.y,
                g.latitude,
                g.longitude
            );
        }

        let run = DetectionRun {
            run_id,
            started_at,
            requested,
            grid,
            image,
            accepted,
            located,
        };
        self.save_debug_image(&run.image, "01_annotated.png");
        self.save_debug_dump(&run);
        Ok(run)
    }

    fn save_debug_image(&self, image: &CompositeImage, name: &str) {
        if let Some(dir) = self.context.debug_dir() {
            let path = dir.join(name);
            match image.save(&path) {
                Ok(()) => log::debug!("Debug: saved {}", path.display()),
                Err(e) => log::warn!("Debug: {:#}", e),
            }
        }
    }

    fn save_debug_dump(&self, run: &DetectionRun) {
        let Some(dir) = self.context.debug_dir() else {
            return;
        };
        let dump = DebugDump {
            run_id: run.run_id,
            requested: &run.requested,
            bounds: run.image.bounds(),
            width: run.image.width(),
            height: run.image.height(),
            accepted: &run.accepted,
            located: &run.located,
        };
        let path = dir.join("detections.json");
        let written = serde_json::to_vec_pretty(&dump)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(anyhow::Error::from));
        match written {
            Ok(()) => log::debug!("Debug: saved {}", path.display()),
            Err(e) => log::warn!("Debug: failed to write {}: {:#}", path.display(), e),
        }
    }
}
