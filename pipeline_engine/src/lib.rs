//! Secpipe engine — core of the deployment promotion pipeline.
//!
//! Models a linear, stage-gated pipeline: source → security scans →
//! staging deploy → DAST → manual approval → production deploy. Each
//! stage consumes the previous stage's artifact and either produces a
//! new artifact, a scan report, or a deployment. A failed stage halts
//! the run; the approval gate suspends it until an external decision.
//!
//! The engine is transport-free: HTTP, env config, and notification
//! delivery live in `secpipe-server`.

pub mod controller;
pub mod deploy;
pub mod error;
pub mod events;
pub mod executor;
pub mod gate;
pub mod model;
pub mod pipeline;
pub mod store;

pub use controller::{AdvanceOutcome, PipelineController};
pub use error::{FailureReason, PipelineError};
pub use events::PipelineEvent;
pub use model::approval::{ApprovalDecision, ApprovalRequest};
pub use model::artifact::{Artifact, ArtifactId, ArtifactKind};
pub use model::run::{PipelineRun, RunStatus, RunTrigger};
pub use model::stage::{StageCategory, StageResult, StageSpec, StageStatus};
pub use model::target::{DeploymentTarget, EnvName, ImageManifest, RevisionId};
