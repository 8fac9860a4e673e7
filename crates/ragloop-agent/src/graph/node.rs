use futures::future::BoxFuture;
use serde::Serialize;

use super::state::{Field, StateUpdate, WorkflowState};

/// A unit of work in the graph.
///
/// Steps are constructed once and invoked once per traversal. They read a
/// snapshot of the state and return a partial update. Collaborator failures
/// are turned into placeholder values inside the step; `run` never fails.
pub trait Step: Send + Sync + 'static {
    /// Unique step name.
    fn name(&self) -> &str;

    /// Fields this step may write. Anything else in its update is dropped.
    fn writes(&self) -> &[Field];

    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, StepOutcome>;
}

/// How a step finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// Real work was done (including a legitimately empty result).
    Completed,
    /// The fast-path classification was set; placeholder output only.
    FastPath,
    /// A collaborator failed; the update carries a placeholder.
    Degraded { reason: String },
}

impl StepStatus {
    pub fn label(&self) -> &'static str {
        match self {
            StepStatus::Completed => "completed",
            StepStatus::FastPath => "fast_path",
            StepStatus::Degraded { .. } => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub update: StateUpdate,
    pub status: StepStatus,
}

impl StepOutcome {
    pub fn completed(update: StateUpdate) -> Self {
        Self {
            update,
            status: StepStatus::Completed,
        }
    }

    pub fn fast_path(update: StateUpdate) -> Self {
        Self {
            update,
            status: StepStatus::FastPath,
        }
    }

    pub fn degraded(update: StateUpdate, reason: impl Into<String>) -> Self {
        Self {
            update,
            status: StepStatus::Degraded {
                reason: reason.into(),
            },
        }
    }
}
