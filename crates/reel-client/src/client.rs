use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use reel_core::errors::GenerationError;
use reel_core::ids::TaskId;
use reel_core::provider::{GenerationCallbacks, GenerationRequest, VideoGenerator};
use reel_core::usage::{NoopRecorder, UsageRecorder};
use reel_settings::ReelSettings;

use crate::classifier::ErrorClassifier;
use crate::content;
use crate::download::{self, DownloadError};
use crate::stream::{self, StreamOutcome};

pub const COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub const MODELS_PATH: &str = "/v1/models";
/// Prefix shared by every video-capable model id.
pub const VIDEO_MODEL_PREFIX: &str = "sora-video";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub connect_timeout: Duration,
    /// Longest silence tolerated between body chunks.
    pub idle_timeout: Duration,
    pub classifier: ErrorClassifier,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: SecretString::from(api_key.into()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            classifier: ErrorClassifier::default(),
        }
    }

    pub fn from_settings(settings: &ReelSettings) -> Self {
        let generation = &settings.generation;
        Self {
            base_url: settings.api.base_url.clone(),
            api_key: SecretString::from(settings.api.api_key.clone()),
            connect_timeout: Duration::from_secs(generation.connect_timeout_secs),
            idle_timeout: Duration::from_secs(generation.idle_timeout_secs),
            classifier: ErrorClassifier::from_settings(&generation.content_restriction),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Streaming client for the generation backend.
pub struct GenerationClient {
    http: Client,
    config: ClientConfig,
    usage: Arc<dyn UsageRecorder>,
}

impl GenerationClient {
    pub fn new(config: ClientConfig) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            config,
            usage: Arc::new(NoopRecorder),
        })
    }

    /// Route API-call accounting to `usage`.
    pub fn with_usage(mut self, usage: Arc<dyn UsageRecorder>) -> Self {
        self.usage = usage;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let key = self.config.api_key.expose_secret();
        if key.is_empty() {
            req
        } else {
            req.bearer_auth(key)
        }
    }

    async fn send(&self, request: &GenerationRequest) -> Result<reqwest::Response, GenerationError> {
        let body = content::build_request(request);
        let req = self
            .authorize(self.http.post(self.endpoint(COMPLETIONS_PATH)))
            .header("accept", "text/event-stream")
            .json(&body);

        self.usage.record_api_call();

        let resp = req
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Http { status, body });
        }
        Ok(resp)
    }

    /// All model ids the backend advertises.
    pub async fn models(&self) -> Result<Vec<String>, GenerationError> {
        let resp = self
            .authorize(self.http.get(self.endpoint(MODELS_PATH)))
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Http { status, body });
        }

        let listing: ModelsResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }

    /// Model ids usable for video generation. Empty when listing fails.
    pub async fn video_models(&self) -> Vec<String> {
        filter_video_models(self.list_models().await)
    }

    /// Fetch a finished artifact into `dir`.
    pub async fn download(
        &self,
        url: &str,
        dir: &std::path::Path,
        task_id: &TaskId,
    ) -> Result<std::path::PathBuf, DownloadError> {
        download::download_artifact(&self.http, url, dir, task_id).await
    }
}

pub fn filter_video_models(models: Vec<String>) -> Vec<String> {
    models
        .into_iter()
        .filter(|id| id.starts_with(VIDEO_MODEL_PREFIX))
        .collect()
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[async_trait]
impl VideoGenerator for GenerationClient {
    fn name(&self) -> &str {
        "sora"
    }

    #[instrument(skip_all, fields(task_id = %request.task_id, mode = %request.mode, model = %request.model))]
    async fn generate(
        &self,
        request: &GenerationRequest,
        callbacks: &dyn GenerationCallbacks,
    ) -> Result<String, GenerationError> {
        if let Err(e) = request.validate() {
            let err = GenerationError::from(e);
            warn!(error = %err, "rejecting request before send");
            callbacks.on_error(&err.user_message());
            return Err(err);
        }

        let resp = match self.send(request).await {
            Ok(resp) => resp,
            Err(err) => {
                let outcome = StreamOutcome {
                    failure: Some(err),
                    ..Default::default()
                };
                return outcome.settle(&self.config.classifier, callbacks);
            }
        };
        info!(status = resp.status().as_u16(), "generation stream opened");

        let outcome = stream::read_events(
            Box::pin(resp.bytes_stream()),
            self.config.idle_timeout,
            callbacks,
        )
        .await;
        debug!(
            terminal = outcome.saw_terminal,
            artifact = outcome.artifact_url.is_some(),
            "generation stream closed"
        );
        outcome.settle(&self.config.classifier, callbacks)
    }

    async fn list_models(&self) -> Vec<String> {
        match self.models().await {
            Ok(models) => models,
            Err(e) => {
                warn!(error = %e, "model listing failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trims_trailing_slash() {
        let client = GenerationClient::new(ClientConfig::new("http://host:8000/", "")).unwrap();
        assert_eq!(
            client.endpoint(COMPLETIONS_PATH),
            "http://host:8000/v1/chat/completions"
        );
    }

    #[test]
    fn config_from_settings() {
        let mut settings = ReelSettings::default();
        settings.generation.idle_timeout_secs = 42;
        let config = ClientConfig::from_settings(&settings);
        assert_eq!(config.idle_timeout, Duration::from_secs(42));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn video_model_filter() {
        let models = vec![
            "gpt-4o".to_string(),
            "sora-video-landscape-10s".to_string(),
            "sora-image".to_string(),
            "sora-video-portrait-15s".to_string(),
        ];
        assert_eq!(
            filter_video_models(models),
            vec!["sora-video-landscape-10s", "sora-video-portrait-15s"]
        );
    }
}
