use thiserror::Error;

use crate::stage::WorkflowStage;

#[derive(Debug, Error)]
pub enum KitError {
    // Lifecycle errors
    #[error("Intake validation failed for {workflow_id}: {reason}")]
    Validation { workflow_id: String, reason: String },

    #[error(
        "Illegal transition: cannot run {operation} while at stage {actual} (expected {expected})"
    )]
    IllegalTransition {
        operation: WorkflowStage,
        expected: WorkflowStage,
        actual: WorkflowStage,
    },

    #[error("Incomplete lifecycle: cannot complete {workflow_id} while at stage {current}")]
    IncompleteLifecycle {
        workflow_id: String,
        current: WorkflowStage,
    },

    #[error("Stage {stage} failed for {workflow_id}: {message}")]
    StageExecution {
        workflow_id: String,
        stage: WorkflowStage,
        message: String,
    },

    /// Raised by hook implementations; wrapped into `StageExecution` by the driver.
    #[error("{0}")]
    Hook(String),

    // Session errors
    #[error("No such session: {0}")]
    UnknownSession(String),

    // Registry errors
    #[error("Kit already registered: {0}")]
    DuplicateKit(String),

    #[error("Kit is not active: {0}")]
    KitInactive(String),

    #[error("Kit not found: {0}")]
    KitNotFound(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KitError {
    /// Shorthand for hook implementations reporting a failure.
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }

    /// Whether the caller can retry the same operation with corrected input.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::StageExecution { .. })
    }

    /// The stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<WorkflowStage> {
        match self {
            Self::Validation { .. } => Some(WorkflowStage::Intake),
            Self::IllegalTransition { operation, .. } => Some(*operation),
            Self::IncompleteLifecycle { .. } => Some(WorkflowStage::Complete),
            Self::StageExecution { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, KitError>;
