//! pipeline.run — One execution of the promotion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::StageResult;

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    AwaitingApproval,
    Succeeded,
    Failed,
    Rejected,
    /// Pre-empted by a newer run for the same branch. Terminal; its
    /// approval gate, if reached, is no longer actionable.
    Superseded,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Rejected | RunStatus::Superseded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::AwaitingApproval => "awaiting_approval",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Rejected => "rejected",
            RunStatus::Superseded => "superseded",
        }
    }
}

/// What started the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrigger {
    pub repo: String,
    pub branch: String,
    pub commit_sha: String,
    pub author: Option<String>,
    pub message: Option<String>,
    /// Dedup key: `{sha}-{branch}-{event}`.
    pub fingerprint: String,
    /// `push`, `manual`, ...
    pub event: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    /// Results in stage order, one appended per finished stage.
    pub results: Vec<StageResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(trigger: RunTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            status: RunStatus::Pending,
            results: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Index of the next stage to execute (number of finished results).
    pub fn cursor(&self) -> usize {
        self.results.len()
    }

    /// The most recent finished result, if any.
    pub fn last_result(&self) -> Option<&StageResult> {
        self.results.last()
    }
}
