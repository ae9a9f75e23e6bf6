use provisioning_primitives::{ProvisioningError, StepName};
use serde::Serialize;

/// Progress feedback while a step list runs or unwinds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ExecutionProgress {
    Started {
        id: StepName,
        /// Row of the step in the selected pipeline table, if listed there.
        position: Option<u32>,
        description: String,
    },
    Progress { id: StepName, message: String },
    Complete { id: StepName },
    Failed { id: StepName, error: String },
    RollingBack { id: StepName },
    Undone { id: StepName },
}

impl ExecutionProgress {
    pub fn id(&self) -> &StepName {
        match self {
            ExecutionProgress::Started { id, .. }
            | ExecutionProgress::Progress { id, .. }
            | ExecutionProgress::Complete { id }
            | ExecutionProgress::Failed { id, .. }
            | ExecutionProgress::RollingBack { id }
            | ExecutionProgress::Undone { id } => id,
        }
    }
}

/// Steps a run got through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Steps whose action completed, in execution order.
    pub completed: Vec<StepName>,
}

/// A failed run: the original error plus what the unwind managed to do.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct RunFailure {
    pub error: ProvisioningError,
    /// `None` when the step list was rejected before anything ran.
    pub failed_step: Option<StepName>,
    /// Steps undone by the unwind, in undo order.
    pub rolled_back: Vec<StepName>,
    /// Compensation failure that aborted the unwind.
    pub rollback_error: Option<ProvisioningError>,
}

impl RunFailure {
    pub(crate) fn rejected(error: ProvisioningError) -> Self {
        Self {
            error,
            failed_step: None,
            rolled_back: Vec::new(),
            rollback_error: None,
        }
    }

    /// Whether every completed step was compensated.
    pub fn fully_rolled_back(&self) -> bool {
        self.rollback_error.is_none()
    }
}
