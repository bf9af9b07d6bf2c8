//! HTTP routes — webhook, run API, approvals, targets.

pub mod api;
pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use secpipe_engine::controller::PipelineController;
use secpipe_engine::deploy::TargetAdapter;
use secpipe_engine::error::PipelineError;
use secpipe_engine::model::target::DeploymentTarget;
use uuid::Uuid;

use crate::config::ServerConfig;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<PipelineController>,
    pub adapter: Arc<TargetAdapter>,
    pub config: ServerConfig,
}

/// Build the server's Axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Webhook
        .route("/webhook/github", post(webhook_handler))
        // Run API
        .route("/api/runs", get(list_runs_handler))
        .route("/api/runs/trigger", post(trigger_run_handler))
        .route("/api/runs/{run_id}", get(get_run_handler))
        .route("/api/runs/{run_id}/approval", post(approval_handler))
        // Targets
        .route("/api/targets", get(list_targets_handler))
        // Liveness
        .route("/healthz", get(|| async { StatusCode::OK }))
        .with_state(state)
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    crate::metrics::webhook_received(
        headers
            .get("x-github-event")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
    );

    webhook::handle_webhook(&state.config, &state.controller, &headers, body).await
}

// ── Run API ──

async fn trigger_run_handler(
    State(state): State<AppState>,
    Json(req): Json<api::TriggerRequest>,
) -> Result<(StatusCode, Json<api::TriggerResponse>), StatusCode> {
    api::trigger_run(&state.controller, req)
        .await
        .map(|r| (StatusCode::CREATED, Json(r)))
        .map_err(|e| {
            tracing::error!("Trigger run error: {e}");
            StatusCode::BAD_REQUEST
        })
}

#[derive(serde::Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<usize>,
}

async fn list_runs_handler(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Json<Vec<api::RunJson>> {
    let runs = state
        .controller
        .runs()
        .list(query.limit.unwrap_or(20))
        .await;
    Json(runs.into_iter().map(api::RunJson::from).collect())
}

async fn get_run_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<api::RunJson>, StatusCode> {
    state
        .controller
        .runs()
        .get(run_id)
        .await
        .map(|run| Json(api::RunJson::from(run)))
        .map_err(|_| StatusCode::NOT_FOUND)
}

async fn approval_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(body): Json<api::ApprovalBody>,
) -> Result<Json<api::ApprovalResponse>, StatusCode> {
    api::resolve_approval(&state.controller, run_id, body)
        .await
        .map(Json)
        .map_err(|e| match e {
            PipelineError::RunNotFound(_) | PipelineError::NoPendingApproval(_) => {
                StatusCode::NOT_FOUND
            }
            PipelineError::AlreadyResolved { .. } => StatusCode::CONFLICT,
            other => {
                tracing::error!(run_id = %run_id, "Approval resolution error: {other}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })
}

// ── Targets ──

async fn list_targets_handler(State(state): State<AppState>) -> Json<Vec<DeploymentTarget>> {
    Json(state.adapter.targets().await)
}
