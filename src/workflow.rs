use crate::compositor::TileSource;
use crate::detection::client::ObjectDetector;
use crate::error::WorkflowError;
use crate::geo::GeoRectangle;
use crate::pipeline::{CancelToken, DetectionPipeline, DetectionRun};
use crate::registry::{ImportCandidate, ImportRequest, ImportSummary, TreeImporter};

/// Where the satellite detection flow currently is.
#[derive(Debug, Clone)]
pub enum WorkflowState {
    /// Waiting for the user to draw and commit a rectangle.
    Draw {
        selection: Option<GeoRectangle>,
        drawing: bool,
    },
    Detecting {
        requested: GeoRectangle,
    },
    Results(Box<DetectionRun>),
    Importing(Box<DetectionRun>),
    Done {
        run: Box<DetectionRun>,
        summary: ImportSummary,
    },
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Draw { .. } => "draw",
            WorkflowState::Detecting { .. } => "detecting",
            WorkflowState::Results(_) => "results",
            WorkflowState::Importing(_) => "importing",
            WorkflowState::Done { .. } => "done",
        }
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        WorkflowState::Draw {
            selection: None,
            drawing: false,
        }
    }
}

/// Holds the state slot during an awaited transition and rolls it back if
/// the transition future is dropped before finishing.
struct Rollback<'a, F>
where
    F: FnOnce(WorkflowState) -> WorkflowState,
{
    slot: &'a mut WorkflowState,
    undo: Option<F>,
}

impl<'a, F> Rollback<'a, F>
where
    F: FnOnce(WorkflowState) -> WorkflowState,
{
    fn enter(slot: &'a mut WorkflowState, during: WorkflowState, undo: F) -> Self {
        *slot = during;
        Self {
            slot,
            undo: Some(undo),
        }
    }

    fn disarm(mut self) {
        self.undo = None;
    }
}

impl<F> Drop for Rollback<'_, F>
where
    F: FnOnce(WorkflowState) -> WorkflowState,
{
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            let abandoned = std::mem::take(self.slot);
            log::warn!("Abandoned while {}, rolling back", abandoned.name());
            *self.slot = undo(abandoned);
        }
    }
}

/// Single-flow state machine driving one detection run at a time.
///
/// `Draw -> Detecting -> Results -> Importing -> Done`. A failed run falls
/// back to `Draw`, a failed import back to `Results`, and `reset` always
/// starts over from an empty `Draw`. Dropping a `run_detection` or
/// `confirm_import` future part way lands in the same fallback states.
pub struct DetectionWorkflow<S, D, I> {
    pipeline: DetectionPipeline<S, D>,
    importer: I,
    state: WorkflowState,
    last_error: Option<String>,
}

impl<S, D, I> DetectionWorkflow<S, D, I>
where
    S: TileSource,
    D: ObjectDetector,
    I: TreeImporter,
{
    pub fn new(pipeline: DetectionPipeline<S, D>, importer: I) -> Self {
        Self {
            pipeline,
            importer,
            state: WorkflowState::default(),
            last_error: None,
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Message from the most recent failure, cleared by the next transition.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn pipeline(&self) -> &DetectionPipeline<S, D> {
        &self.pipeline
    }

    pub fn importer(&self) -> &I {
        &self.importer
    }

    pub fn selection(&self) -> Option<&GeoRectangle> {
        match &self.state {
            WorkflowState::Draw { selection, .. } => selection.as_ref(),
            _ => None,
        }
    }

    /// The run being shown, if any.
    pub fn run(&self) -> Option<&DetectionRun> {
        match &self.state {
            WorkflowState::Results(run) | WorkflowState::Importing(run) => Some(&**run),
            WorkflowState::Done { run, .. } => Some(&**run),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<&ImportSummary> {
        match &self.state {
            WorkflowState::Done { summary, .. } => Some(summary),
            _ => None,
        }
    }

    fn invalid(&self, action: &'static str) -> WorkflowError {
        WorkflowError::InvalidTransition {
            state: self.state.name(),
            action,
        }
    }

    /// The map widget started a drag; any previous selection is dropped.
    pub fn begin_drawing(&mut self) -> Result<(), WorkflowError> {
        match &mut self.state {
            WorkflowState::Draw { selection, drawing } => {
                *selection = None;
                *drawing = true;
                Ok(())
            }
            _ => Err(self.invalid("begin drawing")),
        }
    }

    pub fn commit_rectangle(&mut self, rect: GeoRectangle) -> Result<(), WorkflowError> {
        // Revalidates rectangles built without `GeoRectangle::new`
        let rect = GeoRectangle::new(rect.north, rect.south, rect.east, rect.west)?;
        match &mut self.state {
            WorkflowState::Draw { selection, drawing } => {
                *selection = Some(rect);
                *drawing = false;
                self.last_error = None;
                Ok(())
            }
            _ => Err(self.invalid("commit a rectangle")),
        }
    }

    pub fn cancel_drawing(&mut self) -> Result<(), WorkflowError> {
        match &mut self.state {
            WorkflowState::Draw { drawing, .. } => {
                *drawing = false;
                Ok(())
            }
            _ => Err(self.invalid("cancel drawing")),
        }
    }

    /// Run the pipeline on the committed selection.
    ///
    /// On failure the workflow is back in `Draw` (selection kept) and the
    /// error text is available from `last_error`.
    pub async fn run_detection(
        &mut self,
        cancel: Option<&CancelToken>,
    ) -> Result<&DetectionRun, WorkflowError> {
        let requested = match &self.state {
            WorkflowState::Draw {
                selection: Some(rect),
                drawing: false,
            } => *rect,
            WorkflowState::Draw { .. } => return Err(WorkflowError::NoSelection),
            _ => return Err(self.invalid("run detection")),
        };

        self.last_error = None;
        let guard = Rollback::enter(
            &mut self.state,
            WorkflowState::Detecting { requested },
            move |_| WorkflowState::Draw {
                selection: Some(requested),
                drawing: false,
            },
        );
        let outcome = self.pipeline.run(requested, cancel).await;
        guard.disarm();

        match outcome {
            Ok(run) => {
                if let Some(hint) = run.hint() {
                    log::info!("{}", hint);
                }
                self.state = WorkflowState::Results(Box::new(run));
                match &self.state {
                    WorkflowState::Results(run) => Ok(&**run),
                    _ => Err(self.invalid("show results")),
                }
            }
            Err(e) => {
                self.last_error = Some(e.user_message());
                self.state = WorkflowState::Draw {
                    selection: Some(requested),
                    drawing: false,
                };
                Err(e.into())
            }
        }
    }

    /// Hand the located trees to the importer.
    ///
    /// Batches are capped at the configured size and their summaries summed.
    /// Any failure returns to `Results` with the detections intact.
    pub async fn confirm_import(&mut self) -> Result<&ImportSummary, WorkflowError> {
        match &self.state {
            WorkflowState::Results(run) if run.located.is_empty() => {
                return Err(WorkflowError::NothingToImport);
            }
            WorkflowState::Results(_) => {}
            _ => return Err(self.invalid("import")),
        }
        let run = match std::mem::take(&mut self.state) {
            WorkflowState::Results(run) => run,
            other => {
                self.state = other;
                return Err(self.invalid("import"));
            }
        };

        self.last_error = None;
        let candidates: Vec<ImportCandidate> = run.located.iter().map(ImportCandidate::from).collect();
        let guard = Rollback::enter(
            &mut self.state,
            WorkflowState::Importing(run),
            |abandoned| match abandoned {
                WorkflowState::Importing(run) => WorkflowState::Results(run),
                other => other,
            },
        );

        let config = self.pipeline.config();
        let batch_size = config.max_import_batch.max(1);
        let mut summary = ImportSummary::default();
        let mut failure = None;
        for batch in candidates.chunks(batch_size) {
            let request = ImportRequest {
                trees: batch.to_vec(),
                source: config.source_tag.clone(),
            };
            match self.importer.import(&request).await {
                Ok(part) => summary.merge(part),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        guard.disarm();

        let run = match std::mem::take(&mut self.state) {
            WorkflowState::Importing(run) => run,
            other => {
                self.state = other;
                return Err(self.invalid("finish import"));
            }
        };

        if let Some(e) = failure {
            let message = format!("{e:#}");
            log::warn!("Import failed: {}", message);
            self.last_error = Some(message.clone());
            self.state = WorkflowState::Results(run);
            return Err(WorkflowError::Import(message));
        }

        log::info!(
            "Imported {} trees ({} skipped)",
            summary.created,
            summary.skipped
        );
        self.state = WorkflowState::Done { run, summary };
        match &self.state {
            WorkflowState::Done { summary, .. } => Ok(summary),
            _ => Err(self.invalid("show summary")),
        }
    }

    /// Abandon the current run and start over.
    pub fn reset(&mut self) {
        self.state = WorkflowState::default();
        self.last_error = None;
    }
}
