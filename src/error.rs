use crate::geo::TileAddress;

/// Failures that abort a detection run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("area covers {tiles} tiles (max: {max})")]
    CapacityExceeded { tiles: usize, max: usize },

    #[error("invalid area: {0}")]
    InvalidArea(String),

    #[error("failed to fetch tile {tile}: {reason}")]
    TileFetch { tile: TileAddress, reason: String },

    #[error("detection API error: {message}")]
    DetectionApi { status: Option<u16>, message: String },

    #[error("malformed detection response: {0}")]
    MalformedResponse(String),

    #[error("image encoding failed: {0}")]
    Encoding(String),

    #[error("detection run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Text shown to the user when a run aborts.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::CapacityExceeded { .. } => {
                "Area too large, please draw a smaller rectangle (max ~500m x 500m)".to_string()
            }
            PipelineError::InvalidArea(reason) => format!("Cannot use this area: {reason}"),
            PipelineError::TileFetch { .. } => {
                "Failed to fetch satellite imagery, please try again".to_string()
            }
            PipelineError::DetectionApi { .. } | PipelineError::MalformedResponse(_) => {
                self.to_string()
            }
            PipelineError::Encoding(_) => "Failed to prepare the satellite image".to_string(),
            PipelineError::Cancelled => "Detection cancelled".to_string(),
        }
    }
}

/// Errors raised by the detection workflow state machine.
#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("cannot {action} while in state {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },

    #[error("no area selected")]
    NoSelection,

    #[error("no detections to import")]
    NothingToImport,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("import failed: {0}")]
    Import(String),
}
