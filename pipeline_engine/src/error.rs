//! Error taxonomy. Any stage failure is terminal for its run; a human
//! inspects the report and triggers a fresh run after fixing the source.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::target::EnvName;

/// Why a single stage execution failed. Recorded on the StageResult.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Wall-clock budget exceeded.
    #[error("stage timed out after {budget_secs}s")]
    Timeout { budget_secs: u64 },

    /// Non-zero scan/build result, including scan policy violations.
    #[error("stage execution failed: {detail}")]
    ExecutionFailure { detail: String },

    /// The new task never reached a healthy state within the grace period.
    #[error("revision {revision} did not stabilize on {target}")]
    UnhealthyRevision { target: EnvName, revision: String },

    /// Another deploy to the same target is already in flight.
    #[error("deploy already in flight for {target}")]
    TargetLockContention { target: EnvName },
}

/// Engine-level errors. Stage failures are not here: they travel as
/// the `FailureReason` recorded on the StageResult.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Programming/state error: advance called past a stage that has
    /// not succeeded, or on a terminal run.
    #[error("out-of-order advance on run {run_id}: {detail}")]
    OutOfOrderAdvance { run_id: Uuid, detail: String },

    /// The approval request was already decided (or closed by supersession).
    #[error("approval for run {run_id} already resolved")]
    AlreadyResolved { run_id: Uuid },

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("artifact {0} not found")]
    ArtifactNotFound(String),

    #[error("no approval pending for run {0}")]
    NoPendingApproval(Uuid),

    #[error("invalid pipeline definition: {0}")]
    InvalidPipeline(String),
}
