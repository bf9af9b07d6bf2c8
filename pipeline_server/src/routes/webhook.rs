//! Webhook handler — receives push events, creates runs.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use secpipe_engine::controller::PipelineController;

use crate::config::ServerConfig;
use crate::services::trigger_service;

/// Handle an incoming source-control webhook payload.
pub async fn handle_webhook(
    config: &ServerConfig,
    controller: &PipelineController,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    // Validate signature
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !trigger_service::validate_signature(&config.webhook_secret, &body, signature) {
        tracing::warn!("Webhook signature validation failed");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let payload: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

    match event_type {
        "push" => handle_push(config, controller, &payload).await,
        "ping" => {
            tracing::info!("Received ping webhook");
            Ok(StatusCode::OK)
        }
        _ => {
            tracing::debug!("Ignoring webhook event: {}", event_type);
            Ok(StatusCode::OK)
        }
    }
}

async fn handle_push(
    config: &ServerConfig,
    controller: &PipelineController,
    payload: &serde_json::Value,
) -> Result<StatusCode, StatusCode> {
    let trigger = match trigger_service::parse_push(payload) {
        Some(t) => t,
        None => return Ok(StatusCode::OK),
    };

    // Check throttle
    if controller
        .runs()
        .is_duplicate(&trigger.fingerprint, config.throttle_window_secs)
        .await
    {
        tracing::info!("Duplicate run throttled: {}", trigger.fingerprint);
        return Ok(StatusCode::OK);
    }

    let branch = trigger.branch.clone();
    let run = controller.create_run(trigger).await;
    tracing::info!(
        run_id = %run.id,
        branch = %branch,
        "Run created from push webhook"
    );
    Ok(StatusCode::CREATED)
}
