//! Pipeline controller — orders stages, enforces halt-on-failure,
//! passes artifacts between stages, and exposes run state.
//!
//! Stages execute one at a time per run; the single linear audit trail
//! is deliberate. The only suspension point is the approval gate, where
//! the run is parked in the store and resumed by `resolve_approval`.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::events::PipelineEvent;
use crate::executor::StageExecutor;
use crate::gate::ApprovalGate;
use crate::model::approval::ApprovalDecision;
use crate::model::artifact::Artifact;
use crate::model::run::{PipelineRun, RunStatus, RunTrigger};
use crate::model::stage::{StageCategory, StageResult, StageStatus};
use crate::pipeline::PipelineDef;
use crate::store::{ArtifactStore, RunStore};

/// What one `advance` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// A stage succeeded; more stages remain.
    Advanced,
    /// The run is parked at the approval gate.
    Suspended,
    /// The final stage succeeded; the run is `succeeded`.
    Completed,
    /// A stage failed or the approval was rejected; the run is terminal.
    Halted,
}

pub struct PipelineController {
    def: PipelineDef,
    runs: Arc<RunStore>,
    artifacts: Arc<ArtifactStore>,
    executor: StageExecutor,
    gate: Arc<ApprovalGate>,
    events: broadcast::Sender<PipelineEvent>,
}

impl PipelineController {
    pub fn new(
        def: PipelineDef,
        runs: Arc<RunStore>,
        artifacts: Arc<ArtifactStore>,
        executor: StageExecutor,
        gate: Arc<ApprovalGate>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            def,
            runs,
            artifacts,
            executor,
            gate,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn runs(&self) -> &Arc<RunStore> {
        &self.runs
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    /// Create a pending run and pre-empt older non-terminal runs on the
    /// same branch: their gates stop being actionable.
    pub async fn create_run(&self, trigger: RunTrigger) -> PipelineRun {
        let run = PipelineRun::new(trigger);
        self.emit(PipelineEvent::RunCreated {
            run_id: run.id,
            branch: run.trigger.branch.clone(),
            commit_sha: run.trigger.commit_sha.clone(),
            trigger_event: run.trigger.event.clone(),
        });
        self.runs.insert(run.clone()).await;

        let superseded = self
            .runs
            .supersede_branch(&run.trigger.branch, run.id)
            .await;
        for old_id in superseded {
            self.gate.close(old_id).await;
            tracing::info!(run_id = %old_id, by = %run.id, "Run superseded");
            self.emit(PipelineEvent::RunSuperseded {
                run_id: old_id,
                by: run.id,
            });
        }

        tracing::info!(
            run_id = %run.id,
            branch = %run.trigger.branch,
            commit = %run.trigger.commit_sha,
            event = %run.trigger.event,
            "Run created"
        );
        run
    }

    /// Atomically claim the oldest pending run for execution. The run
    /// leaves `pending` under the store's write lock, so two concurrent
    /// pollers can never both pick it up.
    pub async fn claim_next_run(&self) -> Option<Uuid> {
        let run_id = self.runs.claim_next_pending().await?;
        self.emit(PipelineEvent::RunStarted { run_id });
        Some(run_id)
    }

    /// Execute the next stage of `run_id`. The previous stage must have
    /// succeeded; anything else is an `OutOfOrderAdvance`.
    pub async fn advance(&self, run_id: Uuid) -> Result<AdvanceOutcome, PipelineError> {
        let run = self.runs.get(run_id).await?;

        if run.status.is_terminal() {
            return Err(PipelineError::OutOfOrderAdvance {
                run_id,
                detail: format!("run is terminal ({})", run.status.as_str()),
            });
        }
        if run.status == RunStatus::AwaitingApproval {
            return Err(PipelineError::OutOfOrderAdvance {
                run_id,
                detail: "run is suspended at the approval gate".to_string(),
            });
        }
        if let Some(prev) = run.last_result() {
            if !prev.succeeded() {
                return Err(PipelineError::OutOfOrderAdvance {
                    run_id,
                    detail: format!("previous stage `{}` has not succeeded", prev.stage),
                });
            }
        }

        let cursor = run.cursor();
        let spec = match self.def.stage(cursor) {
            Some(s) => s.clone(),
            None => return Ok(AdvanceOutcome::Completed),
        };

        if run.status == RunStatus::Pending {
            self.runs
                .update(run_id, |r| {
                    r.status = RunStatus::Running;
                    r.started_at = Some(Utc::now());
                })
                .await?;
            self.emit(PipelineEvent::RunStarted { run_id });
        }

        if spec.category == StageCategory::Approval {
            self.runs
                .update(run_id, |r| r.status = RunStatus::AwaitingApproval)
                .await?;
            let run = self.runs.get(run_id).await?;
            let request = self.gate.open(&run).await;
            tracing::info!(run_id = %run_id, "Run suspended at approval gate");
            self.emit(PipelineEvent::ApprovalRequested {
                run_id,
                summary: request.summary,
            });
            return Ok(AdvanceOutcome::Suspended);
        }

        tracing::info!(run_id = %run_id, stage = %spec.name, "Stage started");
        self.emit(PipelineEvent::StageStarted {
            run_id,
            stage: spec.name.clone(),
        });

        let input = self.input_artifact(&run).await?;
        let started = Instant::now();
        let exec = self.executor.execute(&spec, input.as_ref()).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match exec {
            Ok(outcome) => {
                let result = StageResult {
                    stage: spec.name.clone(),
                    category: spec.category,
                    status: StageStatus::Succeeded,
                    artifact: outcome.artifact,
                    report: outcome.report,
                    failure: None,
                    duration_ms: Some(duration_ms),
                    finished_at: Some(Utc::now()),
                };
                let last = cursor + 1 == self.def.len();
                self.runs
                    .update(run_id, |r| {
                        r.results.push(result);
                        if last {
                            r.status = RunStatus::Succeeded;
                            r.finished_at = Some(Utc::now());
                        }
                    })
                    .await?;

                if let (Some(target), Some(revision)) = (spec.target, &outcome.revision) {
                    self.emit(PipelineEvent::TargetDeployed {
                        run_id,
                        target,
                        revision: revision.0.clone(),
                    });
                }
                tracing::info!(
                    run_id = %run_id,
                    stage = %spec.name,
                    duration_ms,
                    "Stage passed"
                );
                self.emit(PipelineEvent::StageSucceeded {
                    run_id,
                    stage: spec.name.clone(),
                    duration_ms,
                });

                if last {
                    let run = self.runs.get(run_id).await?;
                    let total_ms = run
                        .started_at
                        .map(|s| (Utc::now() - s).num_milliseconds())
                        .unwrap_or(0);
                    tracing::info!(run_id = %run_id, duration_ms = total_ms, "Run succeeded");
                    self.emit(PipelineEvent::RunSucceeded {
                        run_id,
                        duration_ms: total_ms,
                    });
                    Ok(AdvanceOutcome::Completed)
                } else {
                    Ok(AdvanceOutcome::Advanced)
                }
            }
            Err(failure) => {
                let reason_text = failure.reason.to_string();
                let result = StageResult {
                    stage: spec.name.clone(),
                    category: spec.category,
                    status: StageStatus::Failed,
                    artifact: None,
                    report: failure.report,
                    failure: Some(failure.reason),
                    duration_ms: Some(duration_ms),
                    finished_at: Some(Utc::now()),
                };
                self.runs
                    .update(run_id, |r| {
                        r.results.push(result);
                        r.status = RunStatus::Failed;
                        r.finished_at = Some(Utc::now());
                    })
                    .await?;

                tracing::warn!(
                    run_id = %run_id,
                    stage = %spec.name,
                    reason = %reason_text,
                    "Stage failed; run halted"
                );
                self.emit(PipelineEvent::StageFailed {
                    run_id,
                    stage: spec.name.clone(),
                    reason: reason_text,
                });
                self.emit(PipelineEvent::RunFailed {
                    run_id,
                    stage: spec.name,
                });
                Ok(AdvanceOutcome::Halted)
            }
        }
    }

    /// Drive a run forward until it finishes, fails, or parks at the
    /// approval gate.
    pub async fn run_until_suspended(
        &self,
        run_id: Uuid,
    ) -> Result<AdvanceOutcome, PipelineError> {
        loop {
            match self.advance(run_id).await? {
                AdvanceOutcome::Advanced => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Resolve the approval gate. Approve resumes the run into the
    /// production deploy; reject terminates it. Either way the gate
    /// accepts no further decisions.
    pub async fn resolve_approval(
        &self,
        run_id: Uuid,
        decision: ApprovalDecision,
        decided_by: Option<String>,
    ) -> Result<AdvanceOutcome, PipelineError> {
        // The gate is the single arbiter of the race between two
        // concurrent decisions; resolve before touching the run.
        let request = self.gate.resolve(run_id, decision, decided_by).await?;
        self.emit(PipelineEvent::ApprovalResolved {
            run_id,
            decision,
            decided_by: request.decided_by.clone(),
        });

        match decision {
            ApprovalDecision::Approve => {
                // The suspended run's cursor sits on the approval stage.
                let cursor = self.runs.get(run_id).await?.cursor();
                let spec = self
                    .def
                    .stage(cursor)
                    .filter(|s| s.category == StageCategory::Approval)
                    .cloned();
                self.runs
                    .update(run_id, |r| {
                        if let Some(spec) = &spec {
                            r.results.push(StageResult {
                                stage: spec.name.clone(),
                                category: StageCategory::Approval,
                                status: StageStatus::Succeeded,
                                artifact: None,
                                report: None,
                                failure: None,
                                duration_ms: None,
                                finished_at: Some(Utc::now()),
                            });
                        }
                        r.status = RunStatus::Running;
                    })
                    .await?;
                tracing::info!(run_id = %run_id, "Approval granted; resuming run");
                self.run_until_suspended(run_id).await
            }
            ApprovalDecision::Reject => {
                self.runs
                    .update(run_id, |r| {
                        r.status = RunStatus::Rejected;
                        r.finished_at = Some(Utc::now());
                    })
                    .await?;
                tracing::info!(run_id = %run_id, "Approval rejected; run terminal");
                self.emit(PipelineEvent::RunRejected { run_id });
                Ok(AdvanceOutcome::Halted)
            }
        }
    }

    /// The artifact feeding the next stage: the most recent produced
    /// artifact (source snapshot or image manifest), or nothing for the
    /// first stage.
    async fn input_artifact(
        &self,
        run: &PipelineRun,
    ) -> Result<Option<Artifact>, PipelineError> {
        for result in run.results.iter().rev() {
            if let Some(id) = &result.artifact {
                return Ok(Some(self.artifacts.get(id).await?));
            }
        }
        Ok(None)
    }
}
