//! Kit driver: the concrete, non-overridable half of a workflow unit.
//!
//! A `Kit` owns one `WorkflowState` and a `KitHooks` trait object. Each
//! lifecycle method checks the stage precondition, calls the matching hook
//! against a read-only view of the state, and only commits the hook's output
//! (and the stage transition) once the hook has succeeded.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use kitflow_core::error::{KitError, Result};
use kitflow_core::stage::WorkflowStage;
use kitflow_core::traits::KitHooks;
use kitflow_core::types::{IntakeData, SessionId, WorkflowResult, WorkflowState};

/// Shared handle to a kit registered with an orchestrator.
///
/// The mutex is held for a whole run, so two stages of the same kit never
/// interleave.
pub type KitHandle = Arc<Mutex<Kit>>;

pub struct Kit {
    hooks: Box<dyn KitHooks>,
    state: WorkflowState,
}

impl Kit {
    /// Create a kit with a generated session id and no user.
    pub fn new(hooks: impl KitHooks) -> Self {
        Self::from_boxed(Box::new(hooks), None, None)
    }

    /// Create a kit bound to a session and, optionally, a user.
    pub fn with_session(
        hooks: impl KitHooks,
        session_id: SessionId,
        user_id: Option<String>,
    ) -> Self {
        Self::from_boxed(Box::new(hooks), Some(session_id), user_id)
    }

    pub fn from_boxed(
        hooks: Box<dyn KitHooks>,
        session_id: Option<SessionId>,
        user_id: Option<String>,
    ) -> Self {
        let state = WorkflowState::new(hooks.workflow_id(), session_id, user_id);
        Self { hooks, state }
    }

    /// Wrap this kit in a shareable handle for the orchestrator.
    pub fn into_handle(self) -> KitHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn workflow_id(&self) -> &str {
        &self.state.workflow_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.state.session_id
    }

    pub fn current_stage(&self) -> WorkflowStage {
        self.state.current_stage
    }

    pub fn progress(&self) -> u8 {
        self.state.progress
    }

    /// Value copy of the current state.
    pub fn state(&self) -> WorkflowState {
        self.state.clone()
    }

    /// Validate and record the intake payload. `intake → analysis`.
    pub async fn intake(&mut self, data: IntakeData) -> Result<()> {
        self.require_stage(WorkflowStage::Intake)?;

        if let Err(reason) = self.hooks.validate_intake(&data) {
            warn!(workflow_id = %self.state.workflow_id, reason = %reason, "Intake rejected");
            return Err(KitError::Validation {
                workflow_id: self.state.workflow_id.clone(),
                reason,
            });
        }

        let mut staged = self.state.clone();
        let inputs = &mut staged.user_inputs;
        // Named fields win over custom fields with the same key.
        inputs.extend(data.custom_fields);
        inputs.insert("description".into(), serde_json::Value::String(data.description));
        if let Some(jurisdiction) = data.jurisdiction {
            inputs.insert("jurisdiction".into(), serde_json::Value::String(jurisdiction));
        }
        if !data.tags.is_empty() {
            inputs.insert("tags".into(), serde_json::json!(data.tags));
        }

        let derived = self
            .hooks
            .perform_intake(&staged)
            .await
            .map_err(|e| stage_failure(&self.state, WorkflowStage::Intake, e))?;
        staged.system_context.extend(derived);

        self.state = staged;
        self.advance(WorkflowStage::Intake);
        Ok(())
    }

    /// Run the analysis hook. `analysis → document`.
    pub async fn analysis(&mut self) -> Result<()> {
        self.require_stage(WorkflowStage::Analysis)?;
        let result = self
            .hooks
            .perform_analysis(&self.state)
            .await
            .map_err(|e| stage_failure(&self.state, WorkflowStage::Analysis, e))?;
        self.state.analysis_result = Some(result);
        self.advance(WorkflowStage::Analysis);
        Ok(())
    }

    /// Run the document hook. `document → guidance`.
    pub async fn document(&mut self) -> Result<()> {
        self.require_stage(WorkflowStage::Document)?;
        let documents = self
            .hooks
            .perform_document_generation(&self.state)
            .await
            .map_err(|e| stage_failure(&self.state, WorkflowStage::Document, e))?;
        self.state.documents = Some(documents);
        self.advance(WorkflowStage::Document);
        Ok(())
    }

    /// Run the guidance hook. `guidance → complete`.
    pub async fn guidance(&mut self) -> Result<()> {
        self.require_stage(WorkflowStage::Guidance)?;
        let guidance = self
            .hooks
            .perform_guidance(&self.state)
            .await
            .map_err(|e| stage_failure(&self.state, WorkflowStage::Guidance, e))?;
        self.state.guidance = Some(guidance);
        self.advance(WorkflowStage::Guidance);
        Ok(())
    }

    /// Package the run. Requires every prior stage to have completed.
    pub async fn complete(&mut self) -> Result<WorkflowResult> {
        if self.state.current_stage != WorkflowStage::Complete {
            return Err(KitError::IncompleteLifecycle {
                workflow_id: self.state.workflow_id.clone(),
                current: self.state.current_stage,
            });
        }

        let result = self
            .hooks
            .finalize(&self.state)
            .await
            .map_err(|e| stage_failure(&self.state, WorkflowStage::Complete, e))?;

        self.state.progress = 100;
        self.state.last_modified = Utc::now();
        debug!(
            workflow_id = %self.state.workflow_id,
            session_id = %self.state.session_id,
            "Kit completed"
        );
        Ok(result)
    }

    /// Run all five stages in order, stopping at the first failure.
    pub async fn execute_full_workflow(&mut self, data: IntakeData) -> Result<WorkflowResult> {
        self.intake(data).await?;
        self.analysis().await?;
        self.document().await?;
        self.guidance().await?;
        self.complete().await
    }

    fn require_stage(&self, operation: WorkflowStage) -> Result<()> {
        if self.state.current_stage != operation {
            return Err(KitError::IllegalTransition {
                operation,
                expected: operation,
                actual: self.state.current_stage,
            });
        }
        Ok(())
    }

    fn advance(&mut self, finished: WorkflowStage) {
        let state = &mut self.state;
        state.completed_stages.push(finished);
        state.current_stage = finished.next().unwrap_or(WorkflowStage::Complete);
        state.progress = WorkflowStage::progress_for(state.completed_stages.len());
        state.last_modified = Utc::now();
        debug!(
            workflow_id = %state.workflow_id,
            session_id = %state.session_id,
            stage = %finished,
            progress = state.progress,
            "Stage completed"
        );
    }
}

fn stage_failure(state: &WorkflowState, stage: WorkflowStage, cause: KitError) -> KitError {
    warn!(
        workflow_id = %state.workflow_id,
        session_id = %state.session_id,
        stage = %stage,
        error = %cause,
        "Stage hook failed"
    );
    KitError::StageExecution {
        workflow_id: state.workflow_id.clone(),
        stage,
        message: cause.to_string(),
    }
}

impl std::fmt::Debug for Kit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kit")
            .field("workflow_id", &self.state.workflow_id)
            .field("session_id", &self.state.session_id)
            .field("current_stage", &self.state.current_stage)
            .field("progress", &self.state.progress)
            .finish()
    }
}
