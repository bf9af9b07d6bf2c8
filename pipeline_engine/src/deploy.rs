//! Deployment target adapter — applies an image manifest to a named
//! environment.
//!
//! Deploys are whole-replacement: each environment runs exactly one
//! task instance, so the old task is stopped before the new one starts
//! and zero downtime is not guaranteed. The target's running revision
//! is the one piece of mutable shared state; it changes only under the
//! per-target deploy lock, and only on a healthy deploy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::FailureReason;
use crate::model::artifact::Artifact;
use crate::model::target::{DeploymentTarget, EnvName, ImageManifest, RevisionId};

/// The compute layer behind a target (container cluster, etc).
/// Consumed as a black box.
#[async_trait]
pub trait DeployBackend: Send + Sync {
    /// Stop the target's current task and start one for the manifest.
    /// Returns the new task revision.
    async fn replace_task(
        &self,
        target: &DeploymentTarget,
        manifest: &ImageManifest,
    ) -> Result<RevisionId, String>;

    /// One probe of the target's health endpoint.
    async fn probe_health(&self, target: &DeploymentTarget) -> bool;
}

struct TargetSlot {
    state: RwLock<DeploymentTarget>,
    /// Held for the whole stop-start-stabilize sequence.
    deploy_lock: Mutex<()>,
}

pub struct TargetAdapter {
    backend: Arc<dyn DeployBackend>,
    slots: HashMap<EnvName, TargetSlot>,
    /// How long a new task has to become healthy.
    grace_period: Duration,
    poll_interval: Duration,
}

impl TargetAdapter {
    pub fn new(
        backend: Arc<dyn DeployBackend>,
        targets: Vec<DeploymentTarget>,
        grace_period: Duration,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let slots = targets
            .into_iter()
            .map(|t| {
                (
                    t.env,
                    TargetSlot {
                        state: RwLock::new(t),
                        deploy_lock: Mutex::new(()),
                    },
                )
            })
            .collect();
        Arc::new(Self {
            backend,
            slots,
            grace_period,
            poll_interval,
        })
    }

    /// Deploy an image-manifest artifact to `env`. Fails fast with
    /// `TargetLockContention` if another deploy holds the target.
    pub async fn deploy(
        &self,
        env: EnvName,
        artifact: &Artifact,
    ) -> Result<RevisionId, FailureReason> {
        let slot = self
            .slots
            .get(&env)
            .ok_or_else(|| FailureReason::ExecutionFailure {
                detail: format!("unknown deployment target {env}"),
            })?;

        let _guard = slot
            .deploy_lock
            .try_lock()
            .map_err(|_| FailureReason::TargetLockContention { target: env })?;

        let manifest = ImageManifest::parse(&artifact.content_str()).map_err(|e| {
            FailureReason::ExecutionFailure {
                detail: format!("invalid image manifest: {e}"),
            }
        })?;

        let snapshot = slot.state.read().await.clone();
        tracing::info!(
            target = %env,
            cluster = %snapshot.cluster,
            service = %snapshot.service,
            images = manifest.images.len(),
            "Replacing running task"
        );

        let revision = self
            .backend
            .replace_task(&snapshot, &manifest)
            .await
            .map_err(|detail| FailureReason::ExecutionFailure { detail })?;

        // The old task is already gone; the new one must stabilize
        // within the grace period or the deploy fails.
        let deadline = Instant::now() + self.grace_period;
        loop {
            if self.backend.probe_health(&snapshot).await {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    target = %env,
                    revision = %revision,
                    grace_secs = self.grace_period.as_secs(),
                    "New task never became healthy"
                );
                return Err(FailureReason::UnhealthyRevision {
                    target: env,
                    revision: revision.0.clone(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        {
            let mut state = slot.state.write().await;
            state.current_revision = Some(revision.clone());
            state.last_deployed_at = Some(Utc::now());
        }
        tracing::info!(target = %env, revision = %revision, "Deploy stable");
        Ok(revision)
    }

    pub async fn current_revision(&self, env: EnvName) -> Option<RevisionId> {
        match self.slots.get(&env) {
            Some(slot) => slot.state.read().await.current_revision.clone(),
            None => None,
        }
    }

    /// Snapshot of every target's state, for the query surface.
    pub async fn targets(&self) -> Vec<DeploymentTarget> {
        let mut out = Vec::with_capacity(self.slots.len());
        for slot in self.slots.values() {
            out.push(slot.state.read().await.clone());
        }
        out.sort_by_key(|t| t.env.as_str());
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::model::artifact::{ArtifactId, ArtifactKind};

    fn manifest_artifact() -> Artifact {
        let content = b"api registry.local/api@sha256:abc123\n".to_vec();
        Artifact {
            id: ArtifactId::of(&content),
            name: "image-manifest".into(),
            kind: ArtifactKind::ImageManifest,
            version: 1,
            content,
            created_at: Utc::now(),
        }
    }

    fn targets() -> Vec<DeploymentTarget> {
        vec![
            DeploymentTarget::new(EnvName::Staging, "app-staging", "api", "http://stg/actuator/health"),
            DeploymentTarget::new(EnvName::Production, "app-prod", "api", "http://prod/actuator/health"),
        ]
    }

    /// Counts deploys and optionally holds each one open for a while.
    struct SlowBackend {
        deploys: AtomicUsize,
        hold: Duration,
        healthy: bool,
    }

    #[async_trait]
    impl DeployBackend for SlowBackend {
        async fn replace_task(
            &self,
            _target: &DeploymentTarget,
            _manifest: &ImageManifest,
        ) -> Result<RevisionId, String> {
            let n = self.deploys.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.hold).await;
            Ok(RevisionId(format!("rev-{n}")))
        }

        async fn probe_health(&self, _target: &DeploymentTarget) -> bool {
            self.healthy
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_deploys_to_same_target_are_mutually_excluded() {
        let backend = Arc::new(SlowBackend {
            deploys: AtomicUsize::new(0),
            hold: Duration::from_millis(100),
            healthy: true,
        });
        let adapter = TargetAdapter::new(
            backend.clone(),
            targets(),
            Duration::from_secs(5),
            Duration::from_millis(5),
        );
        let artifact = manifest_artifact();

        let (a, b) = tokio::join!(
            adapter.deploy(EnvName::Staging, &artifact),
            adapter.deploy(EnvName::Staging, &artifact),
        );

        let failures: Vec<_> = [&a, &b].into_iter().filter(|r| r.is_err()).collect();
        assert_eq!(failures.len(), 1, "exactly one deploy must lose the lock");
        assert!(matches!(
            [a, b].into_iter().find(|r| r.is_err()).unwrap(),
            Err(FailureReason::TargetLockContention {
                target: EnvName::Staging
            })
        ));
        assert_eq!(backend.deploys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deploys_to_different_targets_do_not_contend() {
        let backend = Arc::new(SlowBackend {
            deploys: AtomicUsize::new(0),
            hold: Duration::from_millis(50),
            healthy: true,
        });
        let adapter = TargetAdapter::new(
            backend,
            targets(),
            Duration::from_secs(5),
            Duration::from_millis(5),
        );
        let artifact = manifest_artifact();

        let (a, b) = tokio::join!(
            adapter.deploy(EnvName::Staging, &artifact),
            adapter.deploy(EnvName::Production, &artifact),
        );
        assert!(a.is_ok() && b.is_ok());
    }

    #[tokio::test]
    async fn unhealthy_task_fails_after_grace_period_and_keeps_no_revision() {
        let backend = Arc::new(SlowBackend {
            deploys: AtomicUsize::new(0),
            hold: Duration::ZERO,
            healthy: false,
        });
        let adapter = TargetAdapter::new(
            backend,
            targets(),
            Duration::from_millis(30),
            Duration::from_millis(5),
        );

        let err = adapter
            .deploy(EnvName::Staging, &manifest_artifact())
            .await
            .unwrap_err();
        assert!(matches!(err, FailureReason::UnhealthyRevision { .. }));
        assert_eq!(adapter.current_revision(EnvName::Staging).await, None);
    }

    #[tokio::test]
    async fn garbage_manifest_is_rejected_before_touching_the_target() {
        let backend = Arc::new(SlowBackend {
            deploys: AtomicUsize::new(0),
            hold: Duration::ZERO,
            healthy: true,
        });
        let adapter = TargetAdapter::new(
            backend.clone(),
            targets(),
            Duration::from_secs(1),
            Duration::from_millis(5),
        );

        let content = b"not a manifest".to_vec();
        let artifact = Artifact {
            id: ArtifactId::of(&content),
            name: "image-manifest".into(),
            kind: ArtifactKind::ImageManifest,
            version: 1,
            content,
            created_at: Utc::now(),
        };
        let err = adapter.deploy(EnvName::Staging, &artifact).await.unwrap_err();
        assert!(matches!(err, FailureReason::ExecutionFailure { .. }));
        assert_eq!(backend.deploys.load(Ordering::SeqCst), 0);
    }
}
