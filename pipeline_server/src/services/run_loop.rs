//! Background tasks: the run executor loop, the report-retention
//! sweeper, and the event → metrics pump.

use std::sync::Arc;
use std::time::Duration;

use secpipe_engine::controller::PipelineController;
use secpipe_engine::events::PipelineEvent;
use secpipe_engine::model::run::RunStatus;

use crate::config::ServerConfig;

/// Poll for pending runs and drive them. Spawned as a background task.
pub async fn run_executor(controller: Arc<PipelineController>, config: ServerConfig) {
    tracing::info!(
        max_concurrent = config.max_concurrent_runs,
        poll_secs = config.poll_interval_secs,
        "Run executor started"
    );

    loop {
        if let Err(e) = poll_and_execute(&controller, &config).await {
            tracing::error!("Executor poll error: {e}");
        }
        tokio::time::sleep(Duration::from_secs(config.poll_interval_secs)).await;
    }
}

async fn poll_and_execute(
    controller: &Arc<PipelineController>,
    config: &ServerConfig,
) -> anyhow::Result<()> {
    let running = controller.runs().count_with_status(RunStatus::Running).await;
    if running >= config.max_concurrent_runs {
        return Ok(());
    }

    // The claim flips the run out of pending atomically; a delayed
    // driver task can never be doubled up by the next poll.
    let run_id = match controller.claim_next_run().await {
        Some(id) => id,
        None => return Ok(()),
    };

    tracing::info!(run_id = %run_id, "Executing run");
    let controller = controller.clone();
    tokio::spawn(async move {
        if let Err(e) = controller.run_until_suspended(run_id).await {
            tracing::error!(run_id = %run_id, "Run driver error: {e}");
        }
    });

    Ok(())
}

/// Periodically delete scan reports older than the retention window.
pub async fn run_retention_sweeper(controller: Arc<PipelineController>, retention_days: i64) {
    let retention = chrono::Duration::days(retention_days);
    loop {
        // Hourly sweep is plenty for a daily-granularity policy.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        let expired = controller.artifacts().expire_reports(retention).await;
        if expired > 0 {
            tracing::info!(expired, retention_days, "Expired scan reports");
            crate::metrics::reports_expired(expired);
        }
    }
}

/// Turn controller events into metrics and structured log lines.
pub async fn run_event_pump(controller: Arc<PipelineController>) {
    let mut events = controller.subscribe();
    loop {
        let event = match events.recv().await {
            Ok(ev) => ev,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Event pump lagged");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        };

        match &event {
            PipelineEvent::RunCreated { .. } => crate::metrics::run_status_changed("pending"),
            PipelineEvent::RunStarted { .. } => crate::metrics::run_status_changed("running"),
            PipelineEvent::StageSucceeded {
                stage, duration_ms, ..
            } => crate::metrics::stage_duration(stage, *duration_ms as u64),
            PipelineEvent::StageFailed { stage, .. } => {
                crate::metrics::stage_duration(stage, 0);
            }
            PipelineEvent::ApprovalRequested { .. } => {
                crate::metrics::run_status_changed("awaiting_approval");
                let waiting = controller
                    .runs()
                    .count_with_status(RunStatus::AwaitingApproval)
                    .await;
                crate::metrics::awaiting_approval(waiting);
            }
            PipelineEvent::ApprovalResolved { decision, .. } => {
                crate::metrics::approval_resolved(&format!("{decision:?}").to_lowercase());
                let waiting = controller
                    .runs()
                    .count_with_status(RunStatus::AwaitingApproval)
                    .await;
                crate::metrics::awaiting_approval(waiting);
            }
            PipelineEvent::RunSucceeded { duration_ms, .. } => {
                crate::metrics::run_status_changed("succeeded");
                crate::metrics::run_duration(*duration_ms as u64);
            }
            PipelineEvent::RunFailed { .. } => crate::metrics::run_status_changed("failed"),
            PipelineEvent::RunRejected { .. } => crate::metrics::run_status_changed("rejected"),
            PipelineEvent::RunSuperseded { .. } => {
                crate::metrics::run_status_changed("superseded")
            }
            PipelineEvent::StageStarted { .. } | PipelineEvent::TargetDeployed { .. } => {}
        }
    }
}
