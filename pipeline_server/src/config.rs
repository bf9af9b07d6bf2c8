//! Server configuration — loaded from environment variables.

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Webhook secret for HMAC validation.
    pub webhook_secret: String,
    /// Topic URL approval notifications are POSTed to.
    pub notify_topic_url: String,
    /// Throttle window in seconds between duplicate runs.
    pub throttle_window_secs: u64,
    /// Maximum number of runs executing at once.
    pub max_concurrent_runs: usize,
    /// Seconds between executor polls for pending runs.
    pub poll_interval_secs: u64,
    /// Days scan reports are retained before the sweeper deletes them.
    pub report_retention_days: i64,
    /// Seconds a freshly deployed task has to become healthy.
    pub deploy_grace_secs: u64,
    /// Seconds between health probes during that grace period.
    pub health_poll_secs: u64,
    /// Staging environment: deploy hook and health endpoint.
    pub staging_deploy_url: String,
    pub staging_health_url: String,
    /// Production environment: deploy hook and health endpoint.
    pub production_deploy_url: String,
    pub production_health_url: String,
    /// Optional JSON pipeline definition file; standard pipeline when unset.
    pub pipeline_file: Option<String>,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let webhook_secret = std::env::var("SECPIPE_WEBHOOK_SECRET").unwrap_or_default();
        let notify_topic_url = std::env::var("SECPIPE_NOTIFY_TOPIC_URL").unwrap_or_default();

        if webhook_secret.is_empty() {
            tracing::warn!("SECPIPE_WEBHOOK_SECRET not set -- webhook signature validation disabled");
        }
        if notify_topic_url.is_empty() {
            tracing::warn!("SECPIPE_NOTIFY_TOPIC_URL not set -- approval notifications go to the log only");
        }

        Self {
            webhook_secret,
            notify_topic_url,
            throttle_window_secs: env_parsed("SECPIPE_THROTTLE_WINDOW", 60),
            max_concurrent_runs: env_parsed("SECPIPE_MAX_CONCURRENT", 1),
            poll_interval_secs: env_parsed("SECPIPE_POLL_INTERVAL", 5),
            report_retention_days: env_parsed("SECPIPE_REPORT_RETENTION_DAYS", 30),
            deploy_grace_secs: env_parsed("SECPIPE_DEPLOY_GRACE", 120),
            health_poll_secs: env_parsed("SECPIPE_HEALTH_POLL", 5),
            staging_deploy_url: std::env::var("SECPIPE_STAGING_DEPLOY_URL")
                .unwrap_or_else(|_| "http://localhost:8081/deploy".to_string()),
            staging_health_url: std::env::var("SECPIPE_STAGING_HEALTH_URL")
                .unwrap_or_else(|_| "http://localhost:8081/actuator/health".to_string()),
            production_deploy_url: std::env::var("SECPIPE_PRODUCTION_DEPLOY_URL")
                .unwrap_or_else(|_| "http://localhost:8082/deploy".to_string()),
            production_health_url: std::env::var("SECPIPE_PRODUCTION_HEALTH_URL")
                .unwrap_or_else(|_| "http://localhost:8082/actuator/health".to_string()),
            pipeline_file: std::env::var("SECPIPE_PIPELINE_FILE").ok(),
        }
    }
}
