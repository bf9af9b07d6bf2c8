//! Secpipe server — deployment promotion pipeline for containerized
//! services.
//!
//! A standalone binary that drives source pushes through security
//! scans, a staging deploy, DAST against the live staging endpoint, a
//! manual approval gate, and finally a production deploy. This binary
//! handles: webhook reception, run triggering/tracking, the approval
//! endpoint, notifications, and observability. The scan tools and the
//! compute clusters behind the deploy hooks are external.

mod config;
mod metrics;
mod routes;
mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use secpipe_engine::controller::PipelineController;
use secpipe_engine::deploy::TargetAdapter;
use secpipe_engine::executor::StageExecutor;
use secpipe_engine::gate::ApprovalGate;
use secpipe_engine::model::target::{DeploymentTarget, EnvName};
use secpipe_engine::pipeline::PipelineDef;
use secpipe_engine::store::{ArtifactStore, RunStore};
use tower_http::trace::TraceLayer;

use crate::services::deploy_backend::HttpDeployBackend;
use crate::services::notify_service::TopicNotifier;
use crate::services::stage_runner::ShellRunner;

#[derive(Parser)]
#[command(name = "secpipe", about = "Secure deployment promotion pipeline")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "SECPIPE_PORT", default_value = "9090")]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let config = config::ServerConfig::from_env();

    tracing::info!("Starting secpipe server...");

    // Pipeline definition (and per-stage commands) from file, or the
    // standard promotion sequence.
    let pipeline_json = match &config.pipeline_file {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            Some(serde_json::from_str::<serde_json::Value>(&raw)?)
        }
        None => None,
    };
    let def = PipelineDef::from_json(pipeline_json.as_ref(), &config.staging_health_url)?;
    tracing::info!(stages = def.len(), "Pipeline definition loaded");

    let runner = match &pipeline_json {
        Some(json) => ShellRunner::from_json(json),
        None => ShellRunner::new(Default::default()),
    };

    let backend = Arc::new(HttpDeployBackend::new(
        config.staging_deploy_url.clone(),
        config.production_deploy_url.clone(),
    ));
    let adapter = TargetAdapter::new(
        backend,
        vec![
            DeploymentTarget::new(
                EnvName::Staging,
                "app-staging",
                "crud-api",
                &config.staging_health_url,
            ),
            DeploymentTarget::new(
                EnvName::Production,
                "app-production",
                "crud-api",
                &config.production_health_url,
            ),
        ],
        Duration::from_secs(config.deploy_grace_secs),
        Duration::from_secs(config.health_poll_secs),
    );

    let artifacts = ArtifactStore::new();
    let executor = StageExecutor::new(Arc::new(runner), adapter.clone(), artifacts.clone());
    let gate = ApprovalGate::new(Arc::new(TopicNotifier::new(
        config.notify_topic_url.clone(),
    )));
    let controller = PipelineController::new(def, RunStore::new(), artifacts, executor, gate);

    // Background tasks
    tokio::spawn(services::run_loop::run_executor(
        controller.clone(),
        config.clone(),
    ));
    tokio::spawn(services::run_loop::run_retention_sweeper(
        controller.clone(),
        config.report_retention_days,
    ));
    tokio::spawn(services::run_loop::run_event_pump(controller.clone()));

    // Initialize metrics
    metrics::init_metrics();

    let state = routes::AppState {
        controller,
        adapter,
        config,
    };
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Secpipe server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
