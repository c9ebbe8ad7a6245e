//! Collaborator client implementations.
//!
//! The retrieval engine never computes vectors or prose itself; both come
//! from an external model server reached over HTTP. [`EmbeddingProvider`]
//! and [`GenerationProvider`] are the seams the engine is written against,
//! and [`OllamaClient`] is the production implementation speaking Ollama's
//! `/api/embeddings` and `/api/generate` endpoints.

use crate::config::OllamaConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use half::f16;
use serde::{Deserialize, Serialize};

/// Result of embedding one or more texts.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// One normalized vector per input text.
    pub embeddings: Vec<Vec<f16>>,
    /// Dimension shared by every vector in `embeddings`.
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Build a result, inferring the dimension from the first vector.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Produces embedding vectors for text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Embed a batch of texts, preserving input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Name of the model backing this provider.
    fn model_name(&self) -> &str;
}

/// Produces a natural-language answer from a fully assembled prompt.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Client for a local Ollama server, implementing both collaborator traits.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    config: OllamaConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

/// Sampling options tuned to keep answers grounded in the supplied context.
#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
    num_predict: i32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.8,
            repeat_penalty: 1.1,
            num_predict: 500,
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|source| EmbedError::Unavailable { source })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            prompt: text,
        };

        let response = self
            .client
            .post(self.config.embeddings_endpoint())
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EmbedError::from_request(e, self.config.timeout()))?
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| EmbedError::from_request(e, self.config.timeout()))?;

        if response.embedding.is_empty() {
            return Err(EmbedError::invalid("empty embedding vector"));
        }
        Ok(response.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let raw = self.request_embedding(text).await?;
        Ok(to_normalized_f16(raw))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        tracing::debug!(count = texts.len(), "requesting embeddings");

        // The embeddings endpoint takes one prompt per request; batching
        // across documents happens at the indexing layer.
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            let raw = self.request_embedding(text).await?;
            embeddings.push(to_normalized_f16(raw));
        }

        let result = EmbeddingResult::new(embeddings);
        if result.embeddings.iter().any(|e| e.len() != result.dimension) {
            return Err(EmbedError::invalid(
                "embedding dimensions differ within one batch",
            ));
        }
        Ok(result)
    }

    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }
}

#[async_trait]
impl GenerationProvider for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.config.generation_model,
            prompt,
            stream: false,
            options: GenerateOptions::default(),
        };

        tracing::debug!(model = %self.config.generation_model, "requesting generation");

        let response = self
            .client
            .post(self.config.generate_endpoint())
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EmbedError::from_request(e, self.config.timeout()))?
            .json::<GenerateResponse>()
            .await
            .map_err(|e| EmbedError::from_request(e, self.config.timeout()))?;

        Ok(response.response)
    }

    fn model_name(&self) -> &str {
        &self.config.generation_model
    }
}

/// Convert a raw f32 vector to unit-length f16, the storage format of the
/// index. Zero vectors pass through unscaled.
fn to_normalized_f16(raw: Vec<f32>) -> Vec<f16> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.into_iter().map(|x| f16::from_f32(x / norm)).collect()
    } else {
        raw.into_iter().map(f16::from_f32).collect()
    }
}
