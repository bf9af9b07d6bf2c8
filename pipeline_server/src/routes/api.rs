//! REST API for runs, approvals, and deployment targets.

use secpipe_engine::controller::{AdvanceOutcome, PipelineController};
use secpipe_engine::error::PipelineError;
use secpipe_engine::model::approval::ApprovalDecision;
use secpipe_engine::model::run::{PipelineRun, RunTrigger};
use secpipe_engine::model::stage::StageStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON response for a run with its stage results.
#[derive(Debug, Serialize)]
pub struct RunJson {
    pub id: Uuid,
    pub repo: String,
    pub branch: String,
    pub commit_sha: String,
    pub author: Option<String>,
    pub message: Option<String>,
    pub status: String,
    pub trigger_event: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub stages: Vec<StageJson>,
}

#[derive(Debug, Serialize)]
pub struct StageJson {
    pub name: String,
    pub category: String,
    pub status: String,
    pub artifact: Option<String>,
    pub report: Option<String>,
    pub failure: Option<String>,
    pub duration_ms: Option<i64>,
}

impl From<PipelineRun> for RunJson {
    fn from(run: PipelineRun) -> Self {
        RunJson {
            id: run.id,
            repo: run.trigger.repo,
            branch: run.trigger.branch,
            commit_sha: run.trigger.commit_sha,
            author: run.trigger.author,
            message: run.trigger.message,
            status: run.status.as_str().to_string(),
            trigger_event: run.trigger.event,
            created_at: run.created_at,
            finished_at: run.finished_at,
            stages: run
                .results
                .into_iter()
                .map(|r| StageJson {
                    name: r.stage,
                    category: format!("{:?}", r.category).to_lowercase(),
                    status: match r.status {
                        StageStatus::InProgress => "in_progress",
                        StageStatus::Succeeded => "succeeded",
                        StageStatus::Failed => "failed",
                    }
                    .to_string(),
                    artifact: r.artifact.map(|a| a.to_string()),
                    report: r.report.map(|a| a.to_string()),
                    failure: r.failure.map(|f| f.to_string()),
                    duration_ms: r.duration_ms,
                })
                .collect(),
        }
    }
}

// ── Trigger API ──

/// Request body for manually triggering a run.
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub repo: String,
    pub branch: String,
    pub commit_sha: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub id: Uuid,
    pub status: String,
}

/// Manually trigger a run.
pub async fn trigger_run(
    controller: &PipelineController,
    req: TriggerRequest,
) -> anyhow::Result<TriggerResponse> {
    let commit_sha = req.commit_sha.unwrap_or_else(|| "HEAD".to_string());
    let trigger = RunTrigger {
        fingerprint: format!("{commit_sha}-{}-manual", req.branch),
        repo: req.repo,
        branch: req.branch,
        commit_sha,
        author: Some("manual".to_string()),
        message: Some("Manual trigger via API".to_string()),
        event: "manual".to_string(),
    };

    let run = controller.create_run(trigger).await;
    Ok(TriggerResponse {
        id: run.id,
        status: run.status.as_str().to_string(),
    })
}

// ── Approval API ──

#[derive(Debug, Deserialize)]
pub struct ApprovalBody {
    pub decision: ApprovalDecision,
    pub decided_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub run_id: Uuid,
    pub decision: ApprovalDecision,
    pub run_status: String,
}

/// Resolve the approval gate for a suspended run. Approval resumes the
/// run inline; the response carries the post-resumption status.
pub async fn resolve_approval(
    controller: &PipelineController,
    run_id: Uuid,
    body: ApprovalBody,
) -> Result<ApprovalResponse, PipelineError> {
    let _outcome: AdvanceOutcome = controller
        .resolve_approval(run_id, body.decision, body.decided_by)
        .await?;
    let run = controller.runs().get(run_id).await?;
    Ok(ApprovalResponse {
        run_id,
        decision: body.decision,
        run_status: run.status.as_str().to_string(),
    })
}
