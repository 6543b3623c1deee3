use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::WorkflowStage;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

/// String-keyed JSON map used for user inputs, system context and shared state.
pub type JsonMap = HashMap<String, serde_json::Value>;

/// Caller-supplied intake payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntakeData {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_fields: JsonMap,
}

impl IntakeData {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom_fields.insert(key.into(), value);
        self
    }
}

/// Output of the guidance stage: an action plan plus narrative text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceArtifact {
    pub action_plan: serde_json::Value,
    pub narrative: String,
}

impl GuidanceArtifact {
    pub fn new(action_plan: serde_json::Value, narrative: impl Into<String>) -> Self {
        Self {
            action_plan,
            narrative: narrative.into(),
        }
    }
}

/// Lifecycle state of a single kit run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub workflow_id: String,
    pub started_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub current_stage: WorkflowStage,
    pub completed_stages: Vec<WorkflowStage>,
    pub progress: u8,
    pub user_inputs: JsonMap,
    pub system_context: JsonMap,
    pub analysis_result: Option<serde_json::Value>,
    pub documents: Option<Vec<serde_json::Value>>,
    pub guidance: Option<GuidanceArtifact>,
}

impl WorkflowState {
    /// Fresh state at `intake`. A session id is generated when none is supplied.
    pub fn new(
        workflow_id: impl Into<String>,
        session_id: Option<SessionId>,
        user_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.unwrap_or_default(),
            user_id,
            workflow_id: workflow_id.into(),
            started_at: now,
            last_modified: now,
            current_stage: WorkflowStage::Intake,
            completed_stages: Vec::new(),
            progress: 0,
            user_inputs: HashMap::new(),
            system_context: HashMap::new(),
            analysis_result: None,
            documents: None,
            guidance: None,
        }
    }

    pub fn has_completed(&self, stage: WorkflowStage) -> bool {
        self.completed_stages.contains(&stage)
    }

    /// Look up a user input as a string.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.user_inputs.get(key).and_then(|v| v.as_str())
    }

    /// Look up a system context value as a string.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.system_context.get(key).and_then(|v| v.as_str())
    }

    /// Whether `complete()` has succeeded for this run.
    pub fn is_finished(&self) -> bool {
        self.progress == 100
    }
}

/// Packaged outcome returned by `complete()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub session_id: SessionId,
    pub classification: serde_json::Value,
    pub action_plan: serde_json::Value,
    pub documents: Vec<serde_json::Value>,
    pub guidance: String,
    pub next_steps: Vec<String>,
    pub estimated_time_to_complete_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risks: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opportunities: Option<Vec<String>>,
}

/// Kind of lifecycle event recorded in a session's execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionEventKind {
    Started,
    StageCompleted,
    Error,
    Completed,
}

impl ExecutionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::StageCompleted => "stage-completed",
            Self::Error => "error",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ExecutionEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of a lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub kind: ExecutionEventKind,
    pub workflow_id: String,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<WorkflowStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ExecutionEvent {
    pub fn new(
        kind: ExecutionEventKind,
        session_id: SessionId,
        workflow_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            workflow_id: workflow_id.into(),
            session_id,
            timestamp: Utc::now(),
            stage: None,
            data: None,
        }
    }

    pub fn with_stage(mut self, stage: WorkflowStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
