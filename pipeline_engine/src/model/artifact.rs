//! pipeline.artifact — Immutable, content-addressed blobs passed between stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content address: hex-encoded SHA-256 of the blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    pub fn of(content: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        ArtifactId(hex::encode(Sha256::digest(content)))
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    SourceSnapshot,
    ImageManifest,
    Report,
}

/// An opaque versioned blob. Never mutated after creation; a newer
/// version under the same logical name supersedes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    /// Logical name, e.g. `source`, `image-manifest`, `dependency-scan-report`.
    pub name: String,
    pub kind: ArtifactKind,
    /// Version counter per logical name, starting at 1.
    pub version: u32,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn content_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}
