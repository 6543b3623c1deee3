use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the five lifecycle stages of a kit, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStage {
    Intake,
    Analysis,
    Document,
    Guidance,
    Complete,
}

impl WorkflowStage {
    /// All stages in lifecycle order.
    pub const ALL: [WorkflowStage; 5] = [
        Self::Intake,
        Self::Analysis,
        Self::Document,
        Self::Guidance,
        Self::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Analysis => "analysis",
            Self::Document => "document",
            Self::Guidance => "guidance",
            Self::Complete => "complete",
        }
    }

    /// Position in the lifecycle (intake = 0).
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The stage that follows this one, or `None` for `Complete`.
    pub fn next(&self) -> Option<WorkflowStage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Progress percentage for a given number of completed stages.
    ///
    /// 0 → 0, 1 → 20, 2 → 40, 3 → 60, 4 → 80. Reaching 100 requires
    /// a successful `complete()` and is not derived from this table.
    pub fn progress_for(completed: usize) -> u8 {
        (completed.min(4) * 20) as u8
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown workflow stage: {}", s))
    }
}
