//! HTTP deploy backend — hands the image manifest to each environment's
//! deploy hook and probes its health endpoint. The compute cluster
//! behind the hook is a black box.

use std::collections::HashMap;

use async_trait::async_trait;
use secpipe_engine::deploy::DeployBackend;
use secpipe_engine::model::target::{DeploymentTarget, EnvName, ImageManifest, RevisionId};
use uuid::Uuid;

pub struct HttpDeployBackend {
    client: reqwest::Client,
    deploy_urls: HashMap<EnvName, String>,
}

impl HttpDeployBackend {
    pub fn new(staging_deploy_url: String, production_deploy_url: String) -> Self {
        let mut deploy_urls = HashMap::new();
        deploy_urls.insert(EnvName::Staging, staging_deploy_url);
        deploy_urls.insert(EnvName::Production, production_deploy_url);
        Self {
            client: reqwest::Client::new(),
            deploy_urls,
        }
    }
}

#[async_trait]
impl DeployBackend for HttpDeployBackend {
    async fn replace_task(
        &self,
        target: &DeploymentTarget,
        manifest: &ImageManifest,
    ) -> Result<RevisionId, String> {
        let url = self
            .deploy_urls
            .get(&target.env)
            .ok_or_else(|| format!("no deploy hook for {}", target.env))?;

        let revision = RevisionId(format!("{}-{}", target.service, Uuid::new_v4().simple()));
        let body = serde_json::json!({
            "cluster": target.cluster,
            "service": target.service,
            "revision": revision.0,
            "images": manifest
                .images
                .iter()
                .map(|(name, digest)| serde_json::json!({ "name": name, "imageUri": digest }))
                .collect::<Vec<_>>(),
        });

        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("deploy hook unreachable: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("deploy hook returned {status}: {text}"));
        }
        Ok(revision)
    }

    async fn probe_health(&self, target: &DeploymentTarget) -> bool {
        match self.client.get(&target.health_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
