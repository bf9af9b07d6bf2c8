//! pipeline.approval — Manual checkpoint before the production deploy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

/// Created when a run reaches the approval gate. Resolved exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub run_id: Uuid,
    /// Human-readable digest of the run: which scans ran, their outcomes.
    pub summary: String,
    pub requested_at: DateTime<Utc>,
    pub decision: Option<ApprovalDecision>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(run_id: Uuid, summary: String) -> Self {
        Self {
            run_id,
            summary,
            requested_at: Utc::now(),
            decision: None,
            decided_by: None,
            decided_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.decision.is_none()
    }
}
