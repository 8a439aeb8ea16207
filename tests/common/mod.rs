mod fixtures;
mod http_stub;
pub use fixtures::*;
pub use http_stub::*;

// Re-export commonly used types from canopyscan for tests
pub use canopyscan::detection::DetectorReply;
pub use canopyscan::registry::{ImportRequest, ImportSummary, ImportedTree};
pub use canopyscan::{
    CancelToken, DetectionConfig, DetectionPipeline, DetectionRun, DetectionWorkflow,
    GeoRectangle, PipelineError, TileAddress, WorkflowError, WorkflowState,
};
