use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{GuidanceArtifact, IntakeData, JsonMap, WorkflowResult, WorkflowState};

/// The workflow-specific half of a kit.
///
/// The `Kit` driver owns the lifecycle and the state; implementations only
/// compute each stage's result from a read-only view of the state. A failing
/// hook leaves the state exactly as it was before the stage started.
pub trait KitHooks: Send + Sync + 'static {
    /// Workflow kind id (e.g., "rent-increase"). Not unique per run.
    fn workflow_id(&self) -> &str;

    /// Validate an intake payload. `Err` carries a human-readable reason.
    fn validate_intake(&self, data: &IntakeData) -> std::result::Result<(), String> {
        if data.description.trim().is_empty() {
            return Err("description is required".to_string());
        }
        Ok(())
    }

    /// Derive system-context values from the merged user inputs.
    ///
    /// The returned entries are merged into `system_context`.
    fn perform_intake<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<JsonMap>> {
        let _ = state;
        Box::pin(async { Ok(JsonMap::new()) })
    }

    /// Produce the analysis (classification) result.
    fn perform_analysis<'a>(
        &'a self,
        state: &'a WorkflowState,
    ) -> BoxFuture<'a, Result<serde_json::Value>>;

    /// Produce document descriptors.
    fn perform_document_generation<'a>(
        &'a self,
        state: &'a WorkflowState,
    ) -> BoxFuture<'a, Result<Vec<serde_json::Value>>>;

    /// Produce the action plan and narrative guidance.
    fn perform_guidance<'a>(
        &'a self,
        state: &'a WorkflowState,
    ) -> BoxFuture<'a, Result<GuidanceArtifact>>;

    /// Package the run into a caller-facing result.
    fn finalize<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<WorkflowResult>>;
}
