//! Pipeline event definitions, one per state transition.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::approval::ApprovalDecision;
use crate::model::target::EnvName;

/// Events emitted by the controller as a run moves through its stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Run was created from a webhook or manual trigger.
    RunCreated {
        run_id: Uuid,
        branch: String,
        commit_sha: String,
        trigger_event: String,
    },
    /// First stage has started.
    RunStarted { run_id: Uuid },
    StageStarted { run_id: Uuid, stage: String },
    StageSucceeded {
        run_id: Uuid,
        stage: String,
        duration_ms: i64,
    },
    StageFailed {
        run_id: Uuid,
        stage: String,
        reason: String,
    },
    /// Run reached the approval gate and is suspended.
    ApprovalRequested { run_id: Uuid, summary: String },
    ApprovalResolved {
        run_id: Uuid,
        decision: ApprovalDecision,
        decided_by: Option<String>,
    },
    /// A successful deploy moved a target to a new revision.
    TargetDeployed {
        run_id: Uuid,
        target: EnvName,
        revision: String,
    },
    RunSucceeded { run_id: Uuid, duration_ms: i64 },
    RunFailed { run_id: Uuid, stage: String },
    RunRejected { run_id: Uuid },
    /// Pre-empted by a newer run on the same branch.
    RunSuperseded { run_id: Uuid, by: Uuid },
}

impl PipelineEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            PipelineEvent::RunCreated { run_id, .. }
            | PipelineEvent::RunStarted { run_id }
            | PipelineEvent::StageStarted { run_id, .. }
            | PipelineEvent::StageSucceeded { run_id, .. }
            | PipelineEvent::StageFailed { run_id, .. }
            | PipelineEvent::ApprovalRequested { run_id, .. }
            | PipelineEvent::ApprovalResolved { run_id, .. }
            | PipelineEvent::TargetDeployed { run_id, .. }
            | PipelineEvent::RunSucceeded { run_id, .. }
            | PipelineEvent::RunFailed { run_id, .. }
            | PipelineEvent::RunRejected { run_id }
            | PipelineEvent::RunSuperseded { run_id, .. } => *run_id,
        }
    }
}
