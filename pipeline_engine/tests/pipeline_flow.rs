//! End-to-end runs through the promotion pipeline with scripted stage
//! runners and a fake deploy backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secpipe_engine::controller::{AdvanceOutcome, PipelineController};
use secpipe_engine::deploy::{DeployBackend, TargetAdapter};
use secpipe_engine::error::{FailureReason, PipelineError};
use secpipe_engine::executor::{StageExecutor, StageRunner};
use secpipe_engine::gate::{ApprovalGate, LogNotifier};
use secpipe_engine::model::approval::ApprovalDecision;
use secpipe_engine::model::artifact::Artifact;
use secpipe_engine::model::run::{RunStatus, RunTrigger};
use secpipe_engine::model::stage::{StageSpec, StageStatus};
use secpipe_engine::model::target::{DeploymentTarget, EnvName, ImageManifest, RevisionId};
use secpipe_engine::pipeline::PipelineDef;
use secpipe_engine::store::{ArtifactStore, RunStore};

const MANIFEST: &str = "api registry.local/crud-api@sha256:abc123\n";

/// Per-stage scripted behavior.
#[derive(Clone)]
enum Script {
    /// Produce these bytes (artifact for source/build, report for scans).
    Emit(&'static str),
    /// Sleep past any budget.
    Hang,
}

/// Scripted runner that records every stage it executes.
struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Script>>,
    invoked: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            invoked: Mutex::new(Vec::new()),
        })
    }

    fn script(&self, stage: &str, script: Script) {
        self.scripts.lock().unwrap().insert(stage.to_string(), script);
    }

    fn invoked(&self) -> Vec<String> {
        self.invoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageRunner for ScriptedRunner {
    async fn run(
        &self,
        spec: &StageSpec,
        _input: Option<&Artifact>,
    ) -> Result<Vec<u8>, FailureReason> {
        self.invoked.lock().unwrap().push(spec.name.clone());
        let script = self.scripts.lock().unwrap().get(&spec.name).cloned();
        match script {
            Some(Script::Emit(body)) => Ok(body.as_bytes().to_vec()),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("budget must fire first")
            }
            None => match spec.name.as_str() {
                "source" => Ok(b"source snapshot".to_vec()),
                "build" => Ok(MANIFEST.as_bytes().to_vec()),
                _ => Ok(b"scan complete, no findings\n".to_vec()),
            },
        }
    }
}

/// Counts deploys per environment; always healthy unless told otherwise.
struct CountingBackend {
    staging: AtomicUsize,
    production: AtomicUsize,
}

impl CountingBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            staging: AtomicUsize::new(0),
            production: AtomicUsize::new(0),
        })
    }

    fn deploys(&self, env: EnvName) -> usize {
        match env {
            EnvName::Staging => self.staging.load(Ordering::SeqCst),
            EnvName::Production => self.production.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl DeployBackend for CountingBackend {
    async fn replace_task(
        &self,
        target: &DeploymentTarget,
        _manifest: &ImageManifest,
    ) -> Result<RevisionId, String> {
        let n = match target.env {
            EnvName::Staging => self.staging.fetch_add(1, Ordering::SeqCst) + 1,
            EnvName::Production => self.production.fetch_add(1, Ordering::SeqCst) + 1,
        };
        Ok(RevisionId(format!("{}-rev-{n}", target.env)))
    }

    async fn probe_health(&self, _target: &DeploymentTarget) -> bool {
        true
    }
}

struct Harness {
    controller: Arc<PipelineController>,
    runner: Arc<ScriptedRunner>,
    backend: Arc<CountingBackend>,
    adapter: Arc<TargetAdapter>,
}

fn harness_with(def: PipelineDef) -> Harness {
    let runner = ScriptedRunner::new();
    let backend = CountingBackend::new();
    let adapter = TargetAdapter::new(
        backend.clone(),
        vec![
            DeploymentTarget::new(EnvName::Staging, "app-staging", "api", "http://stg/health"),
            DeploymentTarget::new(EnvName::Production, "app-prod", "api", "http://prod/health"),
        ],
        Duration::from_secs(1),
        Duration::from_millis(5),
    );
    let artifacts = ArtifactStore::new();
    let executor = StageExecutor::new(runner.clone(), adapter.clone(), artifacts.clone());
    let gate = ApprovalGate::new(Arc::new(LogNotifier));
    let controller = PipelineController::new(def, RunStore::new(), artifacts, executor, gate);
    Harness {
        controller,
        runner,
        backend,
        adapter,
    }
}

fn harness() -> Harness {
    harness_with(PipelineDef::standard("http://stg/health"))
}

fn trigger(sha: &str) -> RunTrigger {
    RunTrigger {
        repo: "org/crud-api".into(),
        branch: "main".into(),
        commit_sha: sha.into(),
        author: Some("dev".into()),
        message: None,
        fingerprint: format!("{sha}-main-push"),
        event: "push".into(),
    }
}

#[tokio::test]
async fn full_run_with_approval_succeeds_and_deploys_production() {
    let h = harness();
    let run = h.controller.create_run(trigger("aaa111")).await;

    let outcome = h.controller.run_until_suspended(run.id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Suspended);
    assert_eq!(
        h.controller.runs().get(run.id).await.unwrap().status,
        RunStatus::AwaitingApproval
    );
    assert_eq!(h.backend.deploys(EnvName::Staging), 1);
    assert_eq!(h.backend.deploys(EnvName::Production), 0);

    let outcome = h
        .controller
        .resolve_approval(run.id, ApprovalDecision::Approve, Some("release-mgr".into()))
        .await
        .unwrap();
    assert_eq!(outcome, AdvanceOutcome::Completed);

    let run = h.controller.runs().get(run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(h.backend.deploys(EnvName::Production), 1);
    assert!(h
        .adapter
        .current_revision(EnvName::Production)
        .await
        .is_some());

    // No gaps, no out-of-order completion: every recorded stage
    // succeeded, in definition order.
    let names: Vec<_> = run.results.iter().map(|r| r.stage.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "source",
            "build",
            "secret-scan",
            "dependency-scan",
            "static-analysis",
            "container-scan",
            "iac-scan",
            "staging-deploy",
            "dast-scan",
            "production-approval",
            "production-deploy",
        ]
    );
    assert!(run.results.iter().all(|r| r.status == StageStatus::Succeeded));
}

#[tokio::test]
async fn rejected_approval_leaves_production_untouched() {
    let h = harness();
    let run = h.controller.create_run(trigger("bbb222")).await;
    h.controller.run_until_suspended(run.id).await.unwrap();

    let before = h.adapter.current_revision(EnvName::Production).await;
    let outcome = h
        .controller
        .resolve_approval(run.id, ApprovalDecision::Reject, Some("release-mgr".into()))
        .await
        .unwrap();
    assert_eq!(outcome, AdvanceOutcome::Halted);

    let run = h.controller.runs().get(run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Rejected);
    assert_eq!(h.backend.deploys(EnvName::Production), 0);
    assert_eq!(h.adapter.current_revision(EnvName::Production).await, before);

    // Terminal by design: the run cannot be resumed.
    let err = h
        .controller
        .resolve_approval(run.id, ApprovalDecision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyResolved { .. }));
    let err = h.controller.advance(run.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::OutOfOrderAdvance { .. }));
}

#[tokio::test]
async fn failing_scan_halts_the_run_before_any_deploy() {
    let h = harness();
    h.runner.script(
        "dependency-scan",
        Script::Emit("CRITICAL CVE-2021-44228 log4j-core 2.14.1\n"),
    );
    let run = h.controller.create_run(trigger("ccc333")).await;

    let outcome = h.controller.run_until_suspended(run.id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Halted);

    let run = h.controller.runs().get(run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let last = run.results.last().unwrap();
    assert_eq!(last.stage, "dependency-scan");
    assert_eq!(last.status, StageStatus::Failed);
    assert!(matches!(
        last.failure,
        Some(FailureReason::ExecutionFailure { .. })
    ));
    // The report stays around for postmortem.
    let report = last.report.clone().expect("failed scan keeps its report");
    assert!(h.controller.artifacts().get(&report).await.is_ok());

    assert_eq!(h.backend.deploys(EnvName::Staging), 0);
    assert_eq!(h.backend.deploys(EnvName::Production), 0);
    assert!(!h.runner.invoked().contains(&"static-analysis".to_string()));
}

#[tokio::test(start_paused = true)]
async fn scan_timeout_fails_the_stage_and_skips_downstream() {
    let h = harness();
    h.runner.script("dependency-scan", Script::Hang);
    let run = h.controller.create_run(trigger("ddd444")).await;

    // Paused clock: the 20-minute budget elapses instantly.
    let outcome = h.controller.run_until_suspended(run.id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Halted);

    let run = h.controller.runs().get(run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let last = run.results.last().unwrap();
    assert_eq!(last.stage, "dependency-scan");
    assert_eq!(
        last.failure,
        Some(FailureReason::Timeout { budget_secs: 1200 })
    );
    assert!(!h.runner.invoked().contains(&"static-analysis".to_string()));
    assert_eq!(h.backend.deploys(EnvName::Staging), 0);
}

#[tokio::test]
async fn failed_build_produces_zero_deploy_executions() {
    // Shrink the build budget so the hung build fails immediately.
    let mut def = PipelineDef::standard("http://stg/health");
    def.stages[1].budget = Duration::from_millis(20);
    let h = harness_with(def);
    h.runner.script("build", Script::Hang);

    let run = h.controller.create_run(trigger("eee555")).await;
    let outcome = h.controller.run_until_suspended(run.id).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Halted);
    assert_eq!(h.backend.deploys(EnvName::Staging), 0);
    assert_eq!(h.backend.deploys(EnvName::Production), 0);
    assert_eq!(
        h.controller.runs().get(run.id).await.unwrap().status,
        RunStatus::Failed
    );
}

#[tokio::test]
async fn advance_past_a_failed_stage_is_out_of_order() {
    let mut def = PipelineDef::standard("http://stg/health");
    def.stages[1].budget = Duration::from_millis(20);
    let h = harness_with(def);
    h.runner.script("build", Script::Hang);

    let run = h.controller.create_run(trigger("fff666")).await;
    h.controller.run_until_suspended(run.id).await.unwrap();

    let err = h.controller.advance(run.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::OutOfOrderAdvance { .. }));
}

#[tokio::test]
async fn advance_while_suspended_is_out_of_order() {
    let h = harness();
    let run = h.controller.create_run(trigger("abc123")).await;
    h.controller.run_until_suspended(run.id).await.unwrap();

    let err = h.controller.advance(run.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::OutOfOrderAdvance { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_run_is_claimed_once_and_records_each_stage_once() {
    let h = harness();
    let run = h.controller.create_run(trigger("222ccc")).await;

    // Two pollers racing for the same pending run: one wins the claim.
    let (a, b) = tokio::join!(h.controller.claim_next_run(), h.controller.claim_next_run());
    assert_eq!(
        [a, b].iter().filter(|c| c.is_some()).count(),
        1,
        "exactly one poller may claim the run"
    );

    h.controller.run_until_suspended(run.id).await.unwrap();
    let run = h.controller.runs().get(run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::AwaitingApproval);
    let names: Vec<_> = run.results.iter().map(|r| r.stage.as_str()).collect();
    let mut deduped = names.clone();
    deduped.dedup();
    assert_eq!(names, deduped, "no stage may record two results");
    assert_eq!(h.backend.deploys(EnvName::Staging), 1);
}

#[tokio::test]
async fn superseded_run_gate_is_no_longer_actionable() {
    let h = harness();
    let stale = h.controller.create_run(trigger("000aaa")).await;
    h.controller.run_until_suspended(stale.id).await.unwrap();

    // A newer push on the same branch pre-empts the suspended run.
    let fresh = h.controller.create_run(trigger("111bbb")).await;
    assert_eq!(
        h.controller.runs().get(stale.id).await.unwrap().status,
        RunStatus::Superseded
    );
    assert_ne!(fresh.id, stale.id);

    let err = h
        .controller
        .resolve_approval(stale.id, ApprovalDecision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyResolved { .. }));
    assert_eq!(h.backend.deploys(EnvName::Production), 0);
}
