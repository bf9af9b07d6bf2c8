//! Approval notifications — one message per pending approval, POSTed
//! to a configured topic. Subscribers (email etc) fan out from there.

use async_trait::async_trait;
use secpipe_engine::gate::Notifier;
use secpipe_engine::model::approval::ApprovalRequest;

pub struct TopicNotifier {
    topic_url: String,
    client: reqwest::Client,
}

impl TopicNotifier {
    pub fn new(topic_url: String) -> Self {
        Self {
            topic_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for TopicNotifier {
    async fn notify(&self, request: &ApprovalRequest) {
        if self.topic_url.is_empty() {
            tracing::info!(
                run_id = %request.run_id,
                summary = %request.summary,
                "Approval pending (notification topic not configured)"
            );
            return;
        }

        let body = serde_json::json!({
            "subject": format!("Production approval pending for run {}", request.run_id),
            "run_id": request.run_id,
            "requested_at": request.requested_at,
            "message": request.summary,
        });

        match self
            .client
            .post(&self.topic_url)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(run_id = %request.run_id, "Approval notification published");
            }
            Ok(resp) => {
                tracing::warn!(
                    run_id = %request.run_id,
                    status = %resp.status(),
                    "Approval notification rejected by topic"
                );
            }
            Err(e) => {
                tracing::warn!(run_id = %request.run_id, "Approval notification failed: {e}");
            }
        }
    }
}
