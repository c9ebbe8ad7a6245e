//! HTTP clients for the model-serving collaborators used by quill.
//!
//! Embedding vectors and generated answers both come from an external
//! Ollama server; this crate defines the provider traits the engine depends
//! on and the reqwest-based client that implements them.

pub mod config;
pub mod error;
pub mod provider;

pub use config::OllamaConfig;
pub use error::{EmbedError, Result};
pub use provider::{
    EmbeddingProvider, EmbeddingResult, GenerationProvider, OllamaClient,
};
