//! Pipeline definition — the ordered stage list and its JSON parsing.
//!
//! Stages are statically configured. The default sequence mirrors the
//! production topology: source → build → secret/dependency/static/
//! container/IaC scans → staging deploy → DAST against the live staging
//! endpoint → approval gate → production deploy. The build stage emits
//! the image manifest the deploy stages consume.

use std::time::Duration;

use crate::error::PipelineError;
use crate::model::stage::{ScanPolicy, Severity, StageCategory, StageSpec};
use crate::model::target::EnvName;

/// Ordered, immutable stage list for every run.
#[derive(Debug, Clone)]
pub struct PipelineDef {
    pub stages: Vec<StageSpec>,
}

impl PipelineDef {
    pub fn stage(&self, index: usize) -> Option<&StageSpec> {
        self.stages.get(index)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The canonical promotion pipeline.
    pub fn standard(staging_endpoint: &str) -> Self {
        let scan = ScanPolicy::default();
        Self {
            stages: vec![
                StageSpec::new("source", StageCategory::Source, Duration::from_secs(300)),
                StageSpec::new("build", StageCategory::Build, Duration::from_secs(1800)),
                StageSpec::new("secret-scan", StageCategory::Scan, Duration::from_secs(600))
                    .with_policy(scan),
                StageSpec::new(
                    "dependency-scan",
                    StageCategory::Scan,
                    Duration::from_secs(1200),
                )
                .with_policy(scan),
                StageSpec::new(
                    "static-analysis",
                    StageCategory::Scan,
                    Duration::from_secs(900),
                )
                .with_policy(scan),
                StageSpec::new(
                    "container-scan",
                    StageCategory::Scan,
                    Duration::from_secs(900),
                )
                .with_policy(scan),
                StageSpec::new("iac-scan", StageCategory::Scan, Duration::from_secs(600))
                    .with_policy(scan),
                StageSpec::new(
                    "staging-deploy",
                    StageCategory::Deploy,
                    Duration::from_secs(900),
                )
                .with_target(EnvName::Staging),
                StageSpec::new("dast-scan", StageCategory::Scan, Duration::from_secs(1800))
                    .with_policy(scan)
                    .with_env("TARGET_URL", staging_endpoint),
                StageSpec::new(
                    "production-approval",
                    StageCategory::Approval,
                    Duration::from_secs(0),
                ),
                StageSpec::new(
                    "production-deploy",
                    StageCategory::Deploy,
                    Duration::from_secs(900),
                )
                .with_target(EnvName::Production),
            ],
        }
    }

    /// Parse a pipeline definition from JSON, falling back to the
    /// standard sequence when absent.
    ///
    /// ```json
    /// { "stages": [ { "name": "dependency-scan", "category": "scan",
    ///                 "budget_secs": 1200, "fail_at_or_above": "high" } ] }
    /// ```
    pub fn from_json(
        config: Option<&serde_json::Value>,
        staging_endpoint: &str,
    ) -> Result<Self, PipelineError> {
        let invalid = |msg: String| PipelineError::InvalidPipeline(msg);

        let config = match config {
            Some(v) => v,
            None => return Ok(Self::standard(staging_endpoint)),
        };

        let raw = config
            .get("stages")
            .and_then(|s| s.as_array())
            .ok_or_else(|| invalid("missing `stages` array".to_string()))?;

        let mut stages = Vec::with_capacity(raw.len());
        for (i, stage) in raw.iter().enumerate() {
            let name = stage
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| invalid(format!("stage {i}: missing name")))?;
            let category = stage
                .get("category")
                .and_then(|v| v.as_str())
                .ok_or_else(|| invalid(format!("stage {i}: missing category")))?;
            let category = match category {
                "source" => StageCategory::Source,
                "build" => StageCategory::Build,
                "scan" => StageCategory::Scan,
                "deploy" => StageCategory::Deploy,
                "approval" => StageCategory::Approval,
                other => return Err(invalid(format!("stage {i}: unknown category `{other}`"))),
            };
            let budget_secs = stage
                .get("budget_secs")
                .and_then(|v| v.as_u64())
                .unwrap_or(600);

            let mut spec =
                StageSpec::new(name, category, Duration::from_secs(budget_secs));

            if category == StageCategory::Scan {
                let threshold = stage
                    .get("fail_at_or_above")
                    .and_then(|v| v.as_str())
                    .and_then(Severity::parse)
                    .unwrap_or(Severity::High);
                spec = spec.with_policy(ScanPolicy {
                    fail_at_or_above: threshold,
                });
            }
            if category == StageCategory::Deploy {
                let target = match stage.get("target").and_then(|v| v.as_str()) {
                    Some("staging") => EnvName::Staging,
                    Some("production") => EnvName::Production,
                    _ => return Err(invalid(format!("stage {i}: deploy stage missing target"))),
                };
                spec = spec.with_target(target);
            }
            if let Some(env) = stage.get("env").and_then(|v| v.as_object()) {
                for (k, v) in env {
                    if let Some(v) = v.as_str() {
                        spec = spec.with_env(k, v);
                    }
                }
            }
            stages.push(spec);
        }

        if stages.is_empty() {
            return Err(invalid("pipeline lists no stages".to_string()));
        }
        Ok(Self { stages })
    }
}
