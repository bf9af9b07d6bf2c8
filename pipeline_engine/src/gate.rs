//! Approval gate — the manual checkpoint before the production deploy.
//!
//! `pending → {approved, rejected}`, terminal on either transition.
//! A pending gate holds no execution thread: the run is parked in the
//! store and resumed by the resolution callback. No expiry is imposed;
//! production changes wait for a human for as long as it takes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::approval::{ApprovalDecision, ApprovalRequest};
use crate::model::run::PipelineRun;
use crate::model::stage::StageCategory;

/// Out-of-band delivery of a pending-approval message (topic, email).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, request: &ApprovalRequest);
}

/// Logs instead of delivering. Used when no channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, request: &ApprovalRequest) {
        tracing::info!(
            run_id = %request.run_id,
            summary = %request.summary,
            "Approval pending (no notification channel configured)"
        );
    }
}

enum GateEntry {
    Pending(ApprovalRequest),
    Resolved(ApprovalRequest),
    /// The run was superseded; the gate is no longer actionable.
    Closed,
}

pub struct ApprovalGate {
    entries: Mutex<HashMap<Uuid, GateEntry>>,
    notifier: Arc<dyn Notifier>,
}

impl ApprovalGate {
    pub fn new(notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            notifier,
        })
    }

    /// Open the gate for a run: exactly one request per run. Publishes
    /// the notification before returning.
    pub async fn open(&self, run: &PipelineRun) -> ApprovalRequest {
        let request = ApprovalRequest::new(run.id, summarize(run));
        {
            let mut entries = self.entries.lock().await;
            entries.insert(run.id, GateEntry::Pending(request.clone()));
        }
        self.notifier.notify(&request).await;
        request
    }

    /// Accept exactly one decision. The loser of a race, a retry, or a
    /// decision against a superseded run gets `AlreadyResolved`.
    pub async fn resolve(
        &self,
        run_id: Uuid,
        decision: ApprovalDecision,
        decided_by: Option<String>,
    ) -> Result<ApprovalRequest, PipelineError> {
        let mut entries = self.entries.lock().await;
        match entries.remove(&run_id) {
            None => Err(PipelineError::NoPendingApproval(run_id)),
            Some(entry @ (GateEntry::Resolved(_) | GateEntry::Closed)) => {
                entries.insert(run_id, entry);
                Err(PipelineError::AlreadyResolved { run_id })
            }
            Some(GateEntry::Pending(mut request)) => {
                request.decision = Some(decision);
                request.decided_by = decided_by;
                request.decided_at = Some(Utc::now());
                entries.insert(run_id, GateEntry::Resolved(request.clone()));
                Ok(request)
            }
        }
    }

    /// Close a pending gate without a decision (run superseded).
    pub async fn close(&self, run_id: Uuid) {
        let mut entries = self.entries.lock().await;
        if let Some(entry @ GateEntry::Pending(_)) = entries.get_mut(&run_id) {
            *entry = GateEntry::Closed;
        }
    }

    pub async fn get(&self, run_id: Uuid) -> Option<ApprovalRequest> {
        let entries = self.entries.lock().await;
        match entries.get(&run_id) {
            Some(GateEntry::Pending(r)) | Some(GateEntry::Resolved(r)) => Some(r.clone()),
            _ => None,
        }
    }
}

/// Human-readable digest of the run for the notification message:
/// which scans ran and how each came out.
fn summarize(run: &PipelineRun) -> String {
    // Webhook payloads are untrusted; take chars, not a byte slice.
    let short_sha: String = run.trigger.commit_sha.chars().take(12).collect();
    let mut lines = vec![format!(
        "Run {} ({} @ {}) awaits production approval.",
        run.id, run.trigger.branch, short_sha,
    )];
    for result in &run.results {
        if result.category == StageCategory::Scan {
            lines.push(format!("  {}: {:?}", result.stage, result.status));
        }
    }
    lines.join("\n")
}
