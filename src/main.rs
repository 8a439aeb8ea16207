use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use flexi_logger::Logger;

use canopyscan::compositor::DEFAULT_TILE_URL;
use canopyscan::config::{DEFAULT_ZOOM, MAX_TILES};
use canopyscan::detection::client::DEFAULT_DETECTOR_URL;
use canopyscan::detection::HuggingFaceDetector;
use canopyscan::geo::MAX_ZOOM;
use canopyscan::{
    DetectionConfig, DetectionPipeline, DetectionWorkflow, GeoRectangle, HttpTileSource,
    RegistryClient,
};

#[derive(Parser)]
#[command(name = "canopyscan")]
#[command(about = "Detect trees in satellite imagery and import them into the tree registry")]
struct Cli {
    /// Northern edge of the area (degrees)
    #[arg(long, allow_hyphen_values = true)]
    north: f64,

    /// Southern edge of the area (degrees)
    #[arg(long, allow_hyphen_values = true)]
    south: f64,

    /// Eastern edge of the area (degrees)
    #[arg(long, allow_hyphen_values = true)]
    east: f64,

    /// Western edge of the area (degrees)
    #[arg(long, allow_hyphen_values = true)]
    west: f64,

    /// Tile zoom level
    #[arg(
        long,
        default_value_t = DEFAULT_ZOOM,
        value_parser = clap::value_parser!(u8).range(0..=MAX_ZOOM as i64)
    )]
    zoom: u8,

    /// Largest tile grid allowed
    #[arg(long, default_value_t = MAX_TILES)]
    max_tiles: usize,

    /// Tile URL template with {z}, {y} and {x} placeholders
    #[arg(long, env = "CANOPYSCAN_TILE_URL", default_value = DEFAULT_TILE_URL)]
    tile_url: String,

    /// Object-detection endpoint
    #[arg(long, env = "CANOPYSCAN_DETECTOR_URL", default_value = DEFAULT_DETECTOR_URL)]
    detector_url: String,

    /// Bearer token for the detection endpoint
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,

    /// Tree registry API base URL
    #[arg(long, env = "CANOPYSCAN_REGISTRY_URL")]
    registry_url: Option<String>,

    #[arg(long, env = "CANOPYSCAN_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[arg(long, env = "CANOPYSCAN_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// Import detected trees into the registry
    #[arg(long = "import")]
    import: bool,

    /// Save debug outputs to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let _logger = Logger::try_with_str(if args.verbose { "debug" } else { "info" })?
        .start()
        .context("Failed to start logger")?;

    let area = GeoRectangle::new(args.north, args.south, args.east, args.west)?;
    log::info!("Selected area: ~{:.3} km²", area.approx_area_km2());

    let config = DetectionConfig::default()
        .with_zoom(args.zoom)
        .with_max_tiles(args.max_tiles);
    let tiles = HttpTileSource::new(args.tile_url)?;
    let detector = HuggingFaceDetector::new(args.detector_url, args.hf_token)?;

    let mut pipeline = DetectionPipeline::new(config, tiles, detector);
    if let Some(debug_dir) = args.debug_out {
        pipeline = pipeline.with_debug(debug_dir)?;
    }

    // Importing is optional; without a registry the client is never called
    let registry_url = args.registry_url.as_deref().unwrap_or("http://localhost:8000/api");
    if args.import && args.registry_url.is_none() {
        anyhow::bail!("--import requires --registry-url (or CANOPYSCAN_REGISTRY_URL)");
    }
    let registry = RegistryClient::connect(registry_url, args.access_token, args.refresh_token)?;

    let mut workflow = DetectionWorkflow::new(pipeline, registry);
    workflow.commit_rectangle(area)?;

    let outcome = workflow.run_detection(None).await.map(|_| ());
    if let Err(e) = outcome {
        let message = workflow.last_error().unwrap_or("Detection failed").to_string();
        return Err(anyhow::Error::new(e).context(message));
    }
    let run = workflow.run().context("Detection finished without results")?;

    println!("\n=== Tree Detection Results ===");
    println!(
        "Composite: {}x{} px, {} tiles",
        run.image.width(),
        run.image.height(),
        run.grid.len()
    );
    println!("Trees found: {}", run.located.len());

    if let Some(hint) = run.hint() {
        println!("{hint}");
        return Ok(());
    }

    for (i, (accepted, located)) in run.accepted.iter().zip(&run.located).enumerate() {
        let label = if accepted.detection.label.is_empty() {
            "tree"
        } else {
            accepted.detection.label.as_str()
        };
        println!(
            "  {} #{} at ({:.6}, {:.6}) - confidence: {:.0}%",
            label,
            i + 1,
            located.latitude,
            located.longitude,
            located.confidence * 100.0
        );
    }

    if !args.import {
        return Ok(());
    }

    let summary = workflow.confirm_import().await?;
    println!("\n=== Import ===");
    println!("{} trees imported", summary.created);
    for tree in &summary.trees {
        println!(
            "  {} -> {} ({:.4}, {:.4})",
            tree.tag_number, tree.zone, tree.latitude, tree.longitude
        );
    }
    if summary.skipped > 0 {
        println!("{} low-confidence detections skipped", summary.skipped);
    }

    Ok(())
}
