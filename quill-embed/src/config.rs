//! Configuration for the Ollama collaborator client.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for a local Ollama server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL of the Ollama HTTP API.
    pub base_url: String,
    /// Model used for embedding requests.
    pub embedding_model: String,
    /// Model used for answer generation.
    pub generation_model: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            generation_model: "deepseek-r1:7b".to_string(),
            timeout_secs: 60,
        }
    }
}

impl OllamaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn embeddings_endpoint(&self) -> String {
        format!("{}/api/embeddings", normalize_base_url(&self.base_url))
    }

    pub fn generate_endpoint(&self) -> String {
        format!("{}/api/generate", normalize_base_url(&self.base_url))
    }
}

fn normalize_base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_from_default_base() {
        let config = OllamaConfig::default();
        assert_eq!(
            config.embeddings_endpoint(),
            "http://127.0.0.1:11434/api/embeddings"
        );
        assert_eq!(
            config.generate_endpoint(),
            "http://127.0.0.1:11434/api/generate"
        );
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let config = OllamaConfig {
            base_url: "http://ollama.local:11434/".to_string(),
            ..OllamaConfig::default()
        };
        assert_eq!(
            config.embeddings_endpoint(),
            "http://ollama.local:11434/api/embeddings"
        );
    }
}
