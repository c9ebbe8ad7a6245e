//! TOML configuration for the quill engine and CLI.

use anyhow::{Context, Result};
use quill_context::ChunkerConfig;
use quill_embed::OllamaConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::retrieval::orchestrator::RetrievalConfig;

/// Where the corpus lives and where the index is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Directory scanned for documents.
    pub root: PathBuf,
    /// SQLite database file holding the index.
    pub db_path: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            db_path: PathBuf::from(".quill.db"),
        }
    }
}

/// Index-build settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Documents chunked and embedded concurrently during a pass.
    pub max_workers: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self { max_workers: 4 }
    }
}

/// Root configuration, one section per subsystem. Every field has a
/// default, so a missing file or an empty table is fully usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    pub corpus: CorpusConfig,
    pub chunking: ChunkerConfig,
    pub retrieval: RetrievalConfig,
    pub ollama: OllamaConfig,
    pub indexing: IndexingConfig,
}

impl QuillConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Load from a TOML file, falling back to defaults when it is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = QuillConfig::default();
        assert_eq!(config.corpus.root, PathBuf::from("data"));
        assert_eq!(config.chunking.max_chunk_size, 400);
        assert!(config.chunking.sentence_split);
        assert_eq!(config.retrieval.max_results, 12);
        assert!((config.retrieval.min_similarity - 0.15).abs() < f32::EPSILON);
        assert!(config.retrieval.fallback_to_all);
        assert_eq!(config.ollama.embedding_model, "nomic-embed-text");
        assert_eq!(config.indexing.max_workers, 4);
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_sections() {
        let config: QuillConfig = toml::from_str(
            r#"
            [corpus]
            root = "docs"

            [retrieval]
            min_similarity = 0.3
            fallback_to_all = false

            [chunking]
            max_chunk_size = 120
            sentence_split = false
            "#,
        )
        .unwrap();

        assert_eq!(config.corpus.root, PathBuf::from("docs"));
        assert_eq!(config.corpus.db_path, PathBuf::from(".quill.db"));
        assert!((config.retrieval.min_similarity - 0.3).abs() < f32::EPSILON);
        assert!(!config.retrieval.fallback_to_all);
        assert_eq!(config.retrieval.max_results, 12);
        assert_eq!(config.chunking.max_chunk_size, 120);
        assert!(!config.chunking.sentence_split);
        assert!(config.chunking.preserve_urls);
        assert_eq!(config.ollama.timeout_secs, 60);
    }

    #[test]
    fn empty_input_is_all_defaults() {
        let config: QuillConfig = toml::from_str("").unwrap();
        assert_eq!(config.retrieval.context_budget, 8000);
        assert_eq!(config.ollama.base_url, "http://127.0.0.1:11434");
    }
}
