//! In-process stores for runs and artifacts.
//!
//! The artifact store is content-addressed (id = SHA-256 of content)
//! and versioned per logical name: a new blob under an existing name
//! supersedes it, nothing is mutated in place. Reports are subject to
//! a retention window and swept periodically.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::artifact::{Artifact, ArtifactId, ArtifactKind};
use crate::model::run::{PipelineRun, RunStatus};

// ── Artifact store ──

#[derive(Default)]
struct ArtifactInner {
    blobs: HashMap<ArtifactId, Artifact>,
    /// Latest version number per logical name.
    versions: HashMap<String, u32>,
}

#[derive(Default)]
pub struct ArtifactStore {
    inner: RwLock<ArtifactInner>,
}

impl ArtifactStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store a blob, assigning the next version for its logical name.
    /// Idempotent for identical content under the same name.
    pub async fn put(&self, name: &str, kind: ArtifactKind, content: Vec<u8>) -> Artifact {
        let id = ArtifactId::of(&content);
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.blobs.get(&id) {
            return existing.clone();
        }
        let version = inner
            .versions
            .entry(name.to_string())
            .and_modify(|v| *v += 1)
            .or_insert(1);
        let artifact = Artifact {
            id: id.clone(),
            name: name.to_string(),
            kind,
            version: *version,
            content,
            created_at: Utc::now(),
        };
        inner.blobs.insert(id, artifact.clone());
        artifact
    }

    pub async fn get(&self, id: &ArtifactId) -> Result<Artifact, PipelineError> {
        self.inner
            .read()
            .await
            .blobs
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::ArtifactNotFound(id.to_string()))
    }

    /// Delete report artifacts older than the retention window.
    /// Returns how many were expired.
    pub async fn expire_reports(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut inner = self.inner.write().await;
        let before = inner.blobs.len();
        inner
            .blobs
            .retain(|_, a| a.kind != ArtifactKind::Report || a.created_at >= cutoff);
        before - inner.blobs.len()
    }

    #[cfg(test)]
    pub async fn backdate(&self, id: &ArtifactId, created_at: chrono::DateTime<Utc>) {
        if let Some(a) = self.inner.write().await.blobs.get_mut(id) {
            a.created_at = created_at;
        }
    }
}

// ── Run store ──

/// All pipeline runs, newest last. Failed runs keep their results and
/// artifact references for postmortem.
#[derive(Default)]
pub struct RunStore {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
}

impl RunStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, run: PipelineRun) {
        self.runs.write().await.insert(run.id, run);
    }

    pub async fn get(&self, id: Uuid) -> Result<PipelineRun, PipelineError> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(PipelineError::RunNotFound(id))
    }

    /// Apply a mutation to one run under the write lock.
    pub async fn update<F, T>(&self, id: Uuid, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut PipelineRun) -> T,
    {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&id).ok_or(PipelineError::RunNotFound(id))?;
        Ok(f(run))
    }

    /// Runs newest-first, up to `limit`.
    pub async fn list(&self, limit: usize) -> Vec<PipelineRun> {
        let runs = self.runs.read().await;
        let mut all: Vec<_> = runs.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        all
    }

    /// Claim the oldest pending run: flips it to `running` under the
    /// write lock so no two pollers can pick up the same run.
    pub async fn claim_next_pending(&self) -> Option<Uuid> {
        let mut runs = self.runs.write().await;
        let id = runs
            .values()
            .filter(|r| r.status == RunStatus::Pending)
            .min_by_key(|r| r.created_at)
            .map(|r| r.id)?;
        let run = runs.get_mut(&id)?;
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        Some(id)
    }

    pub async fn count_with_status(&self, status: RunStatus) -> usize {
        self.runs
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    /// True when a run with this fingerprint was created inside the
    /// throttle window.
    pub async fn is_duplicate(&self, fingerprint: &str, window_secs: u64) -> bool {
        let cutoff = Utc::now() - Duration::seconds(window_secs as i64);
        self.runs
            .read()
            .await
            .values()
            .any(|r| r.trigger.fingerprint == fingerprint && r.created_at > cutoff)
    }

    /// Mark every non-terminal run on `branch` (other than `by`) as
    /// superseded. Returns the ids that were pre-empted.
    pub async fn supersede_branch(&self, branch: &str, by: Uuid) -> Vec<Uuid> {
        let mut runs = self.runs.write().await;
        let mut superseded = Vec::new();
        for run in runs.values_mut() {
            if run.id != by && run.trigger.branch == branch && !run.status.is_terminal() {
                run.status = RunStatus::Superseded;
                run.finished_at = Some(Utc::now());
                superseded.push(run.id);
            }
        }
        superseded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_content_addressed_and_versioned() {
        let store = ArtifactStore::new();
        let a = store
            .put("source", ArtifactKind::SourceSnapshot, b"v1".to_vec())
            .await;
        let b = store
            .put("source", ArtifactKind::SourceSnapshot, b"v2".to_vec())
            .await;
        let a_again = store
            .put("source", ArtifactKind::SourceSnapshot, b"v1".to_vec())
            .await;
        assert_ne!(a.id, b.id);
        assert_eq!(a.version, 1);
        assert_eq!(b.version, 2);
        assert_eq!(a_again.id, a.id, "same content, same address");
        assert_eq!(a_again.version, 1);
    }

    #[tokio::test]
    async fn expired_reports_are_gone_but_other_kinds_stay() {
        let store = ArtifactStore::new();
        let report = store
            .put("dast-report", ArtifactKind::Report, b"findings".to_vec())
            .await;
        let manifest = store
            .put("image-manifest", ArtifactKind::ImageManifest, b"api x@sha256:1".to_vec())
            .await;
        store
            .backdate(&report.id, Utc::now() - Duration::days(31))
            .await;
        store
            .backdate(&manifest.id, Utc::now() - Duration::days(31))
            .await;

        let expired = store.expire_reports(Duration::days(30)).await;
        assert_eq!(expired, 1);
        assert!(store.get(&report.id).await.is_err());
        assert!(store.get(&manifest.id).await.is_ok());
    }

    #[tokio::test]
    async fn a_pending_run_is_claimed_exactly_once() {
        use crate::model::run::{PipelineRun, RunTrigger};

        let store = RunStore::new();
        let run = PipelineRun::new(RunTrigger {
            repo: "org/app".into(),
            branch: "main".into(),
            commit_sha: "abc".into(),
            author: None,
            message: None,
            fingerprint: "abc-main-push".into(),
            event: "push".into(),
        });
        let id = run.id;
        store.insert(run).await;

        assert_eq!(store.claim_next_pending().await, Some(id));
        // The claim already moved the run to running.
        assert_eq!(store.claim_next_pending().await, None);
        let claimed = store.get(id).await.unwrap();
        assert_eq!(claimed.status, RunStatus::Running);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn supersede_skips_terminal_runs() {
        use crate::model::run::{PipelineRun, RunTrigger};

        let store = RunStore::new();
        let trigger = |sha: &str| RunTrigger {
            repo: "org/app".into(),
            branch: "main".into(),
            commit_sha: sha.into(),
            author: None,
            message: None,
            fingerprint: format!("{sha}-main-push"),
            event: "push".into(),
        };

        let mut done = PipelineRun::new(trigger("aaa"));
        done.status = RunStatus::Succeeded;
        let stale = PipelineRun::new(trigger("bbb"));
        let fresh = PipelineRun::new(trigger("ccc"));
        let (done_id, stale_id, fresh_id) = (done.id, stale.id, fresh.id);
        store.insert(done).await;
        store.insert(stale).await;
        store.insert(fresh).await;

        let superseded = store.supersede_branch("main", fresh_id).await;
        assert_eq!(superseded, vec![stale_id]);
        assert_eq!(store.get(done_id).await.unwrap().status, RunStatus::Succeeded);
        assert_eq!(store.get(fresh_id).await.unwrap().status, RunStatus::Pending);
    }
}
