//! pipeline.stage — Static stage definitions and per-run stage results.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::ArtifactId;
use super::target::EnvName;
use crate::error::FailureReason;

/// Stage category. Drives how the executor treats the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageCategory {
    Source,
    Build,
    Scan,
    Deploy,
    Approval,
}

/// Minimum severity at which a scan stage fails the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Pass/fail policy applied to a scan stage's report. Same report +
/// same policy always yields the same outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScanPolicy {
    pub fail_at_or_above: Severity,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            fail_at_or_above: Severity::High,
        }
    }
}

/// A statically configured pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub category: StageCategory,
    /// Wall-clock budget for one execution.
    #[serde(with = "budget_secs")]
    pub budget: Duration,
    /// Scan stages only.
    pub policy: Option<ScanPolicy>,
    /// Deploy stages only.
    pub target: Option<EnvName>,
    /// Extra environment the stage needs (endpoint URLs etc).
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl StageSpec {
    pub fn new(name: &str, category: StageCategory, budget: Duration) -> Self {
        Self {
            name: name.to_string(),
            category,
            budget,
            policy: None,
            target: None,
            env: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: ScanPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_target(mut self, target: EnvName) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }
}

mod budget_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Status of one stage within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    InProgress,
    Succeeded,
    Failed,
}

/// Outcome of one stage within one run. Immutable once finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub category: StageCategory,
    pub status: StageStatus,
    /// Produced artifact (source snapshot, image manifest).
    pub artifact: Option<ArtifactId>,
    /// Scan report, when the stage is a scan.
    pub report: Option<ArtifactId>,
    pub failure: Option<FailureReason>,
    pub duration_ms: Option<i64>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageResult {
    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}
