//! pipeline.target — Deployment environments and the image manifest format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named environment. Each runs exactly one task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvName {
    Staging,
    Production,
}

impl EnvName {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvName::Staging => "staging",
            EnvName::Production => "production",
        }
    }
}

impl std::fmt::Display for EnvName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a running task revision on a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionId(pub String);

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A deployment environment with its own cluster and service identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub env: EnvName,
    pub cluster: String,
    pub service: String,
    /// Health-check path polled after a deploy.
    pub health_url: String,
    pub current_revision: Option<RevisionId>,
    pub last_deployed_at: Option<DateTime<Utc>>,
}

impl DeploymentTarget {
    pub fn new(env: EnvName, cluster: &str, service: &str, health_url: &str) -> Self {
        Self {
            env,
            cluster: cluster.to_string(),
            service: service.to_string(),
            health_url: health_url.to_string(),
            current_revision: None,
            last_deployed_at: None,
        }
    }
}

/// What a deploy stage consumes: container name → image digest pairs,
/// one per line (`name image@sha256:...`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub images: Vec<(String, String)>,
}

impl ImageManifest {
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut images = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (name, digest) = match (parts.next(), parts.next()) {
                (Some(n), Some(d)) => (n, d),
                _ => return Err(format!("line {}: expected `name digest`", lineno + 1)),
            };
            if !digest.contains("sha256:") {
                return Err(format!("line {}: digest missing sha256", lineno + 1));
            }
            images.push((name.to_string(), digest.to_string()));
        }
        if images.is_empty() {
            return Err("manifest lists no images".to_string());
        }
        Ok(Self { images })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, digest) in &self.images {
            out.push_str(name);
            out.push(' ');
            out.push_str(digest);
            out.push('\n');
        }
        out
    }
}
