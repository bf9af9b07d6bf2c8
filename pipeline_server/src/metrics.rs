//! Prometheus metrics for pipeline observability.

use metrics::{counter, gauge, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("secpipe_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record a run state transition.
pub fn run_status_changed(status: &str) {
    counter!("secpipe_runs_total", "status" => status.to_string()).increment(1);
}

/// Record run duration.
pub fn run_duration(duration_ms: u64) {
    histogram!("secpipe_run_duration_ms").record(duration_ms as f64);
}

/// Record stage duration.
pub fn stage_duration(stage_name: &str, duration_ms: u64) {
    histogram!("secpipe_stage_duration_ms", "stage" => stage_name.to_string())
        .record(duration_ms as f64);
}

/// Record an approval decision.
pub fn approval_resolved(decision: &str) {
    counter!("secpipe_approvals_total", "decision" => decision.to_string()).increment(1);
}

/// Set the count of runs parked at the approval gate.
pub fn awaiting_approval(count: usize) {
    gauge!("secpipe_awaiting_approval").set(count as f64);
}

/// Record expired scan reports.
pub fn reports_expired(count: usize) {
    counter!("secpipe_reports_expired_total").increment(count as u64);
}
