pub mod compositor;
pub mod config;
pub mod detection;
pub mod error;
pub mod geo;
pub mod models;
pub mod pipeline;
pub mod projector;
pub mod registry;
pub mod workflow;

pub use compositor::{CompositeImage, Compositor, HttpTileSource, TileSource};
pub use config::{DetectionConfig, FilterPolicy};
pub use error::{PipelineError, WorkflowError};
pub use geo::{GeoPoint, GeoRectangle, TileAddress, TileGrid};
pub use models::{AcceptedDetection, GeoDetection, PixelBox, PixelPoint, RawDetection};
pub use pipeline::{CancelToken, DebugConfig, DetectionPipeline, DetectionRun, PipelineContext};
pub use registry::{ImportSummary, RegistryClient, TreeImporter};
pub use workflow::{DetectionWorkflow, WorkflowState};
