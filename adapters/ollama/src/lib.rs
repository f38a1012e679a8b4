use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

mod embed;

pub use embed::OllamaEmbedBackend;

/// Address used when `OLLAMA_HOST` is unset
pub const DEFAULT_HOST: &str = "http://127.0.0.1:11434";

/// Embedding model used when none is configured
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

/// Default per-request timeout for embedding calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_PORT: u16 = 11434;

/// Ollama connection settings from environment variables
///
/// Ollama itself is configured through `OLLAMA_*` variables; the client side
/// reuses `OLLAMA_HOST` and `OLLAMA_KEEP_ALIVE` and adds a couple of
/// `EMBEDGATE_OLLAMA_*` knobs of its own.
///
/// Reference: https://github.com/ollama/ollama/blob/main/docs/faq.md#how-do-i-configure-ollama-server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OllamaConfig {
    /// Ollama host address (`OLLAMA_HOST`)
    /// Default: "127.0.0.1:11434"
    pub ollama_host: Option<String>,

    /// Embedding model name (`EMBEDGATE_OLLAMA_MODEL`)
    /// Default: "nomic-embed-text"
    pub embed_model: Option<String>,

    /// How long Ollama keeps the model loaded after last use (`OLLAMA_KEEP_ALIVE`)
    /// Format: duration string (e.g., "5m", "1h")
    pub keep_alive: Option<String>,

    /// Per-request timeout in seconds (`EMBEDGATE_OLLAMA_TIMEOUT_SECS`)
    pub timeout_secs: Option<u64>,
}

impl OllamaConfig {
    /// Read the Ollama client configuration from environment variables
    ///
    /// # Example
    /// ```
    /// use embedgate_adapters_ollama::OllamaConfig;
    ///
    /// let config = OllamaConfig::from_env();
    /// println!("Ollama at {}", config.base_url());
    /// ```
    pub fn from_env() -> Self {
        Self {
            ollama_host: env::var("OLLAMA_HOST").ok().filter(|s| !s.trim().is_empty()),
            embed_model: env::var("EMBEDGATE_OLLAMA_MODEL").ok().filter(|s| !s.trim().is_empty()),
            keep_alive: env::var("OLLAMA_KEEP_ALIVE").ok(),
            timeout_secs: env::var("EMBEDGATE_OLLAMA_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Base URL for API calls, with scheme and port filled in.
    ///
    /// `OLLAMA_HOST` is commonly set as a bare `host` or `host:port`.
    pub fn base_url(&self) -> String {
        match self.ollama_host.as_deref() {
            Some(host) => normalize_host(host),
            None => DEFAULT_HOST.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        self.embed_model.as_deref().unwrap_or(DEFAULT_EMBED_MODEL)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Check if any configuration values are set
    pub fn is_empty(&self) -> bool {
        self.ollama_host.is_none()
            && self.embed_model.is_none()
            && self.keep_alive.is_none()
            && self.timeout_secs.is_none()
    }

    /// Merge another config into this one, preferring values from `other`
    pub fn merge(&mut self, other: &OllamaConfig) {
        if other.ollama_host.is_some() {
            self.ollama_host = other.ollama_host.clone();
        }
        if other.embed_model.is_some() {
            self.embed_model = other.embed_model.clone();
        }
        if other.keep_alive.is_some() {
            self.keep_alive = other.keep_alive.clone();
        }
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    let (scheme, rest) = match host.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", host),
    };
    if rest.contains(':') {
        format!("{}://{}", scheme, rest)
    } else {
        format!("{}://{}:{}", scheme, rest, DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OllamaConfig::default();
        assert!(config.is_empty());
        assert_eq!(config.base_url(), DEFAULT_HOST);
        assert_eq!(config.model(), DEFAULT_EMBED_MODEL);
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_base_url_normalization() {
        let with = |host: &str| OllamaConfig { ollama_host: Some(host.to_string()), ..Default::default() };

        assert_eq!(with("localhost").base_url(), "http://localhost:11434");
        assert_eq!(with("10.0.0.5:9000").base_url(), "http://10.0.0.5:9000");
        assert_eq!(with("https://ollama.internal/").base_url(), "https://ollama.internal:11434");
        assert_eq!(with("http://127.0.0.1:11434").base_url(), "http://127.0.0.1:11434");
    }

    #[test]
    fn test_merge() {
        let mut base = OllamaConfig {
            ollama_host: Some("localhost".to_string()),
            embed_model: Some("all-minilm".to_string()),
            ..Default::default()
        };
        let other = OllamaConfig {
            embed_model: Some("mxbai-embed-large".to_string()),
            timeout_secs: Some(5),
            ..Default::default()
        };

        base.merge(&other);

        assert_eq!(base.ollama_host.as_deref(), Some("localhost"));
        assert_eq!(base.model(), "mxbai-embed-large");
        assert_eq!(base.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_serialization() {
        let config = OllamaConfig {
            ollama_host: Some("localhost:11434".to_string()),
            keep_alive: Some("10m".to_string()),
            ..Default::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: OllamaConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config, deserialized);
    }
}
