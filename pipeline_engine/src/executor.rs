//! Stage executor — runs one unit of work against an input artifact.
//!
//! Enforces the stage's wall-clock budget, persists produced artifacts
//! and reports, and applies scan pass/fail policy. Scan stages are
//! read-only with respect to deployment state: they consume the source
//! snapshot or a running endpoint and produce a report.

use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::deploy::TargetAdapter;
use crate::error::FailureReason;
use crate::model::artifact::{Artifact, ArtifactId, ArtifactKind};
use crate::model::stage::{Severity, StageCategory, StageSpec};
use crate::model::target::RevisionId;
use crate::store::ArtifactStore;

/// Produces the raw output of a non-approval, non-deploy stage: the
/// artifact bytes for source/build stages, the report body for scans.
/// Implementations wrap the actual tools (checkout, scanners).
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(
        &self,
        spec: &StageSpec,
        input: Option<&Artifact>,
    ) -> Result<Vec<u8>, FailureReason>;
}

/// What a successful stage execution yields.
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    pub artifact: Option<ArtifactId>,
    pub report: Option<ArtifactId>,
    pub revision: Option<RevisionId>,
}

/// A failed execution, keeping the report (if one was produced) for
/// postmortem.
#[derive(Debug)]
pub struct ExecFailure {
    pub reason: FailureReason,
    pub report: Option<ArtifactId>,
}

impl From<FailureReason> for ExecFailure {
    fn from(reason: FailureReason) -> Self {
        Self {
            reason,
            report: None,
        }
    }
}

pub struct StageExecutor {
    runner: Arc<dyn StageRunner>,
    adapter: Arc<TargetAdapter>,
    artifacts: Arc<ArtifactStore>,
}

impl StageExecutor {
    pub fn new(
        runner: Arc<dyn StageRunner>,
        adapter: Arc<TargetAdapter>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            runner,
            adapter,
            artifacts,
        }
    }

    /// Execute one stage within its budget.
    pub async fn execute(
        &self,
        spec: &StageSpec,
        input: Option<&Artifact>,
    ) -> Result<StageOutcome, ExecFailure> {
        match spec.category {
            StageCategory::Deploy => self.execute_deploy(spec, input).await,
            StageCategory::Scan => self.execute_scan(spec, input).await,
            StageCategory::Source | StageCategory::Build => {
                self.execute_produce(spec, input).await
            }
            // The gate is the controller's concern, never executed here.
            StageCategory::Approval => Err(FailureReason::ExecutionFailure {
                detail: "approval stages are not executable".to_string(),
            }
            .into()),
        }
    }

    async fn run_with_budget(
        &self,
        spec: &StageSpec,
        input: Option<&Artifact>,
    ) -> Result<Vec<u8>, FailureReason> {
        match tokio::time::timeout(spec.budget, self.runner.run(spec, input)).await {
            Ok(result) => result,
            Err(_) => Err(FailureReason::Timeout {
                budget_secs: spec.budget.as_secs(),
            }),
        }
    }

    /// Source/build stages: output becomes the next stage's input artifact.
    async fn execute_produce(
        &self,
        spec: &StageSpec,
        input: Option<&Artifact>,
    ) -> Result<StageOutcome, ExecFailure> {
        let content = self.run_with_budget(spec, input).await?;
        let kind = if spec.category == StageCategory::Source {
            ArtifactKind::SourceSnapshot
        } else {
            ArtifactKind::ImageManifest
        };
        let artifact = self.artifacts.put(&spec.name, kind, content).await;
        tracing::info!(
            stage = %spec.name,
            artifact = %artifact.id,
            version = artifact.version,
            "Stage produced artifact"
        );
        Ok(StageOutcome {
            artifact: Some(artifact.id),
            ..Default::default()
        })
    }

    /// Scan stages: persist the report, then apply the policy. Same
    /// report + same policy always yields the same outcome.
    async fn execute_scan(
        &self,
        spec: &StageSpec,
        input: Option<&Artifact>,
    ) -> Result<StageOutcome, ExecFailure> {
        let body = self.run_with_budget(spec, input).await?;
        let report = self
            .artifacts
            .put(&format!("{}-report", spec.name), ArtifactKind::Report, body)
            .await;

        let policy = spec.policy.unwrap_or_default();
        let blocking = count_findings_at_or_above(&report.content_str(), policy.fail_at_or_above);
        if blocking > 0 {
            tracing::warn!(
                stage = %spec.name,
                findings = blocking,
                threshold = policy.fail_at_or_above.as_str(),
                "Scan policy violated"
            );
            return Err(ExecFailure {
                reason: FailureReason::ExecutionFailure {
                    detail: format!(
                        "{blocking} finding(s) at or above {}",
                        policy.fail_at_or_above.as_str()
                    ),
                },
                report: Some(report.id),
            });
        }

        Ok(StageOutcome {
            report: Some(report.id),
            ..Default::default()
        })
    }

    /// Deploy stages: hand the manifest to the target adapter. Success
    /// means the target reports a stable revision for the new artifact.
    async fn execute_deploy(
        &self,
        spec: &StageSpec,
        input: Option<&Artifact>,
    ) -> Result<StageOutcome, ExecFailure> {
        let target = spec.target.ok_or_else(|| FailureReason::ExecutionFailure {
            detail: format!("deploy stage `{}` has no target", spec.name),
        })?;
        let artifact = input.ok_or_else(|| FailureReason::ExecutionFailure {
            detail: format!("deploy stage `{}` has no input artifact", spec.name),
        })?;

        let deploy = self.adapter.deploy(target, artifact);
        let revision = match tokio::time::timeout(spec.budget, deploy).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FailureReason::Timeout {
                    budget_secs: spec.budget.as_secs(),
                }
                .into())
            }
        };

        Ok(StageOutcome {
            artifact: Some(artifact.id.clone()),
            revision: Some(revision),
            ..Default::default()
        })
    }
}

static FINDING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(LOW|MEDIUM|HIGH|CRITICAL)\b").unwrap());

/// Count report findings at or above the severity threshold. A finding
/// is a report line starting with its severity.
pub fn count_findings_at_or_above(report: &str, threshold: Severity) -> usize {
    FINDING_REGEX
        .captures_iter(report)
        .filter_map(|c| Severity::parse(&c[1]))
        .filter(|s| *s >= threshold)
        .count()
}
