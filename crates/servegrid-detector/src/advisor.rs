//! HTTP client for the remote advisor (recommendation and anomaly service).

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use servegrid_core::config::AdvisorConfig;
use servegrid_core::{
    AnomalyDetectRequest, AnomalyDetectResult, AnomalyRecoverRequest, ConfigRecommendRequest,
    ConfigRecommendation,
};

use crate::error::{AdvisorError, AdvisorResult};

/// Response envelope shared by every advisor endpoint. Only `result` is
/// consumed.
#[derive(Debug, serde::Deserialize)]
struct Envelope {
    #[serde(default, alias = "Result")]
    result: Option<Value>,
}

#[derive(Clone)]
pub struct RecommendClient {
    http: reqwest::Client,
    base_url: String,
}

impl RecommendClient {
    pub fn new(config: &AdvisorConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: &AdvisorConfig) -> Self {
        let base_url = format!(
            "{}/{}",
            config.url.trim_end_matches('/'),
            config.path_prefix.trim_matches('/')
        );
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Initial engine configuration for a model on a GPU type.
    pub async fn config_recommend(
        &self,
        request: &ConfigRecommendRequest,
    ) -> AdvisorResult<ConfigRecommendation> {
        self.call("config_recommend", request).await
    }

    pub async fn anomaly_detect(
        &self,
        request: &AnomalyDetectRequest,
    ) -> AdvisorResult<AnomalyDetectResult> {
        self.call("anomaly_detect", request).await
    }

    /// New engine configuration for a task found anomalous.
    pub async fn anomaly_recover(
        &self,
        request: &AnomalyRecoverRequest,
    ) -> AdvisorResult<ConfigRecommendation> {
        self.call("anomaly_recover", request).await
    }

    async fn call<B, R>(&self, endpoint: &str, body: &B) -> AdvisorResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{endpoint}", self.base_url);
        let resp = self.http.post(&url).json(body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AdvisorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope = resp.json().await?;
        let result = envelope.result.ok_or(AdvisorError::MissingResult)?;
        debug!(%endpoint, "advisor call succeeded");
        Ok(serde_json::from_value(result)?)
    }
}
