//! Test doubles for Kitflow.
//!
//! `ScriptedKit` is a deterministic `KitHooks` implementation whose stages
//! can be delayed or made to fail, so lifecycle, concurrency and ordering
//! behaviour can be exercised without a real rule engine.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use futures::future::BoxFuture;

use kitflow_core::error::{KitError, Result};
use kitflow_core::stage::WorkflowStage;
use kitflow_core::traits::KitHooks;
use kitflow_core::types::{GuidanceArtifact, JsonMap, WorkflowResult, WorkflowState};

/// Scripted kit hooks with per-stage delays and an optional failing stage.
#[derive(Debug, Clone)]
pub struct ScriptedKit {
    id: String,
    delays: HashMap<WorkflowStage, Duration>,
    fail_at: Option<WorkflowStage>,
}

impl ScriptedKit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delays: HashMap::new(),
            fail_at: None,
        }
    }

    /// Sleep for `delay` before the given stage's hook returns.
    pub fn with_delay(mut self, stage: WorkflowStage, delay: Duration) -> Self {
        self.delays.insert(stage, delay);
        self
    }

    /// Make the given stage's hook fail.
    pub fn failing_at(mut self, stage: WorkflowStage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    async fn script(&self, stage: WorkflowStage) -> Result<()> {
        if let Some(delay) = self.delays.get(&stage) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail_at == Some(stage) {
            return Err(KitError::hook(format!("scripted failure at {}", stage)));
        }
        Ok(())
    }
}

impl KitHooks for ScriptedKit {
    fn workflow_id(&self) -> &str {
        &self.id
    }

    fn perform_intake<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<JsonMap>> {
        Box::pin(async move {
            self.script(WorkflowStage::Intake).await?;
            let mut derived = JsonMap::new();
            derived.insert("kit".into(), serde_json::json!(self.id));
            let description = state.input_str("description").unwrap_or_default();
            derived.insert(
                "normalized_description".into(),
                serde_json::json!(description.to_lowercase()),
            );
            Ok(derived)
        })
    }

    fn perform_analysis<'a>(
        &'a self,
        state: &'a WorkflowState,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            self.script(WorkflowStage::Analysis).await?;
            Ok(serde_json::json!({
                "kit": self.id,
                "description": state.input_str("description"),
                "jurisdiction": state.input_str("jurisdiction"),
            }))
        })
    }

    fn perform_document_generation<'a>(
        &'a self,
        state: &'a WorkflowState,
    ) -> BoxFuture<'a, Result<Vec<serde_json::Value>>> {
        Box::pin(async move {
            self.script(WorkflowStage::Document).await?;
            Ok(vec![serde_json::json!({
                "kind": "summary",
                "title": format!("{} summary", self.id),
                "session": state.session_id,
            })])
        })
    }

    fn perform_guidance<'a>(
        &'a self,
        _state: &'a WorkflowState,
    ) -> BoxFuture<'a, Result<GuidanceArtifact>> {
        Box::pin(async move {
            self.script(WorkflowStage::Guidance).await?;
            Ok(GuidanceArtifact::new(
                serde_json::json!({ "steps": ["Gather evidence", "Send a demand letter"] }),
                format!("Guidance for {}", self.id),
            ))
        })
    }

    fn finalize<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<WorkflowResult>> {
        Box::pin(async move {
            self.script(WorkflowStage::Complete).await?;
            let guidance = state
                .guidance
                .clone()
                .ok_or_else(|| KitError::hook("guidance missing"))?;
            let documents = state.documents.clone().unwrap_or_default();
            Ok(WorkflowResult {
                workflow_id: state.workflow_id.clone(),
                session_id: state.session_id.clone(),
                classification: state.analysis_result.clone().unwrap_or_default(),
                action_plan: guidance.action_plan,
                estimated_time_to_complete_minutes: 30 + 15 * documents.len() as u32,
                documents,
                guidance: guidance.narrative,
                next_steps: vec!["Review the generated documents".into()],
                risks: None,
                opportunities: None,
            })
        })
    }
}

/// Write `content` to a temporary TOML file that lives as long as the handle.
pub fn temp_config(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write toml");
    tmp
}
