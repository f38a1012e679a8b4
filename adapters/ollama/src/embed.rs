//! Embedding backend over Ollama's HTTP API.
//!
//! One batch maps to one `POST /api/embed` call with every item in `input`;
//! Ollama returns the embeddings in input order.

use std::time::Duration;

use async_trait::async_trait;
use embedgate_core::{BackendError, Embedding, InferenceBackend};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::OllamaConfig;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Embedding>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Ollama lists untagged models with an implicit `:latest`
fn model_listed(tags: &TagsResponse, model: &str) -> bool {
    tags.models.iter().any(|tag| {
        tag.name == model
            || tag.name.strip_suffix(":latest").is_some_and(|base| base == model)
    })
}

/// [`InferenceBackend`] calling a local or remote Ollama server
#[derive(Debug, Clone)]
pub struct OllamaEmbedBackend {
    client: Client,
    base_url: String,
    model: String,
    keep_alive: Option<String>,
    timeout: Duration,
}

impl OllamaEmbedBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_timeout(base_url, model, crate::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();
        info!(url = %base_url, model = %model, "Creating Ollama embedding backend");

        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build HTTP client with timeout, using defaults");
            Client::new()
        });

        Self { client, base_url, model, keep_alive: None, timeout }
    }

    pub fn from_config(config: &OllamaConfig) -> Self {
        let backend = Self::with_timeout(config.base_url(), config.model(), config.timeout());
        match &config.keep_alive {
            Some(keep_alive) => backend.with_keep_alive(keep_alive.clone()),
            None => backend,
        }
    }

    /// Ask Ollama to keep the model loaded for this long (e.g. "10m")
    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn send_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else if err.is_connect() {
            BackendError::unavailable(format!("cannot reach Ollama at {}: {}", self.base_url, err))
        } else {
            BackendError::inference(err.to_string())
        }
    }
}

#[async_trait]
impl InferenceBackend for OllamaEmbedBackend {
    async fn infer(&self, items: Vec<String>) -> Result<Vec<Embedding>, BackendError> {
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            input: &items,
            keep_alive: self.keep_alive.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), model = %self.model, "Ollama embed request failed");
            let message = format!("Ollama API error ({}): {}", status, body.trim());
            return Err(if status == StatusCode::SERVICE_UNAVAILABLE {
                BackendError::unavailable(message)
            } else {
                BackendError::inference(message)
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| BackendError::inference(format!("failed to parse Ollama response: {}", e)))?;

        debug!(items = items.len(), model = %self.model, "Ollama embed call completed");
        Ok(parsed.embeddings)
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let url = format!("{}/api/tags", self.base_url);
        debug!(url = %url, "Checking Ollama health");

        let response = self.client.get(&url).send().await.map_err(|e| self.send_error(e))?;
        if !response.status().is_success() {
            return Err(BackendError::unavailable(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| BackendError::unavailable(format!("invalid /api/tags response: {}", e)))?;
        if !model_listed(&tags, &self.model) {
            return Err(BackendError::unavailable(format!(
                "model '{}' is not pulled on this Ollama server",
                self.model
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let input = vec!["first".to_string(), "second".to_string()];
        let request = EmbedRequest { model: "nomic-embed-text", input: &input, keep_alive: None };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "nomic-embed-text");
        assert_eq!(json["input"][1], "second");
        assert!(json.get("keep_alive").is_none());

        let request = EmbedRequest { keep_alive: Some("5m"), ..request };
        assert_eq!(serde_json::to_value(&request).unwrap()["keep_alive"], "5m");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "model": "nomic-embed-text",
            "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]],
            "total_duration": 14143917
        }"#;
        let parsed: EmbedResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1], vec![0.4, 0.5, 0.6]);
    }

    #[test]
    fn test_model_listed() {
        let tags: TagsResponse = serde_json::from_str(
            r#"{"models": [{"name": "nomic-embed-text:latest"}, {"name": "all-minilm:33m"}]}"#,
        )
        .unwrap();

        assert!(model_listed(&tags, "nomic-embed-text"));
        assert!(model_listed(&tags, "nomic-embed-text:latest"));
        assert!(model_listed(&tags, "all-minilm:33m"));
        assert!(!model_listed(&tags, "all-minilm"));

        let empty: TagsResponse = serde_json::from_str("{}").unwrap();
        assert!(!model_listed(&empty, "nomic-embed-text"));
    }

    #[test]
    fn test_from_config() {
        let config = OllamaConfig {
            ollama_host: Some("gpu-box".to_string()),
            embed_model: Some("all-minilm".to_string()),
            keep_alive: Some("1h".to_string()),
            timeout_secs: Some(3),
        };
        let backend = OllamaEmbedBackend::from_config(&config);

        assert_eq!(backend.base_url(), "http://gpu-box:11434");
        assert_eq!(backend.model(), "all-minilm");
        assert_eq!(backend.keep_alive.as_deref(), Some("1h"));
        assert_eq!(backend.timeout, Duration::from_secs(3));
        assert_eq!(backend.name(), "ollama");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // Nothing listens on port 1
        let backend = OllamaEmbedBackend::new("http://127.0.0.1:1/", "nomic-embed-text");
        assert_eq!(backend.base_url(), "http://127.0.0.1:1");

        let err = backend.infer(vec!["hello".to_string()]).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)), "{:?}", err);
        assert!(backend.health_check().await.is_err());
    }
}
