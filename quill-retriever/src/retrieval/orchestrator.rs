//! Query-time orchestration: embed the question, search the index, and
//! assemble the evidence set handed to generation.
//!
//! The orchestrator holds no persisted state of its own. A query that
//! retrieves nothing — even after the index-level fallback — comes back as
//! an `Ok` empty [`QueryResult`], the explicit no-match signal; errors are
//! reserved for the store being unusable. Collaborator timeouts degrade to
//! the same empty result so one slow request never takes the process down.

use anyhow::Result;
use quill_embed::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::vector_index::{QueryResult, SearchOptions, VectorIndex};

/// Shown to the user when retrieval produces no evidence at all.
pub const NO_MATCH_MESSAGE: &str = "No matching content was found in the indexed documents.";

/// Retrieval knobs, loaded from the `[retrieval]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Top-k for the similarity search.
    pub max_results: usize,
    /// Similarity floor below which matches are discarded.
    pub min_similarity: f32,
    /// Relax the floor once (to the unfiltered top-k) rather than return
    /// nothing.
    pub fallback_to_all: bool,
    /// Result count below which the fallback engages.
    pub min_results: usize,
    /// Total evidence budget in characters handed to generation.
    pub context_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: 12,
            min_similarity: 0.15,
            fallback_to_all: true,
            min_results: 1,
            context_budget: 8000,
        }
    }
}

impl RetrievalConfig {
    fn search_options(&self) -> SearchOptions {
        SearchOptions {
            max_results: self.max_results,
            min_similarity: self.min_similarity,
            fallback_to_all: self.fallback_to_all,
            min_results: self.min_results,
        }
    }
}

/// Resolves a query into the ranked, deduplicated evidence set.
pub struct RetrievalOrchestrator {
    index: VectorIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
    collaborator_timeout: Duration,
}

impl RetrievalOrchestrator {
    pub fn new(
        index: VectorIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
        collaborator_timeout: Duration,
    ) -> Self {
        Self {
            index,
            embedder,
            config,
            collaborator_timeout,
        }
    }

    /// Retrieve the evidence set for a query.
    ///
    /// The query embedding is a single bounded request: on timeout or
    /// embedder failure the result is empty rather than an error, since
    /// retry policy belongs to the collaborator, not here. Index errors
    /// (store unreachable, dimension mismatch) do propagate.
    pub async fn answer_context(&self, query: &str) -> Result<QueryResult> {
        let embed = self.embedder.embed_text(query);
        let embedding = match tokio::time::timeout(self.collaborator_timeout, embed).await {
            Err(_) => {
                warn!(
                    timeout = ?self.collaborator_timeout,
                    "query embedding timed out, returning empty result"
                );
                return Ok(QueryResult::empty());
            }
            Ok(Err(e)) => {
                warn!(error = %e, "query embedding failed, returning empty result");
                return Ok(QueryResult::empty());
            }
            Ok(Ok(vector)) => vector,
        };

        let mut result = self
            .index
            .search(&embedding, &self.config.search_options())
            .await?;
        self.truncate_to_budget(&mut result);
        Ok(result)
    }

    /// Cap total evidence size by dropping the tail of the ranked list.
    /// Never re-ranks; the top match is always kept.
    fn truncate_to_budget(&self, result: &mut QueryResult) {
        let mut used = 0usize;
        let mut keep = 0usize;
        for chunk in &result.matches {
            if keep > 0 && used + chunk.content.len() > self.config.context_budget {
                break;
            }
            used += chunk.content.len();
            keep += 1;
        }
        if keep < result.matches.len() {
            debug!(
                kept = keep,
                dropped = result.matches.len() - keep,
                budget = self.config.context_budget,
                "evidence truncated to context budget"
            );
            result.matches.truncate(keep);
        }
    }

    /// Format the evidence set into the grounded-answer prompt for the
    /// generation collaborator.
    pub fn build_prompt(&self, query: &str, result: &QueryResult) -> String {
        let mut context = String::new();
        for chunk in &result.matches {
            context.push_str(&format!("[{}] {}\n", chunk.doc_id, chunk.content.trim()));
        }

        format!(
            "Answer the question using only the documents below.\n\
             \n\
             Documents:\n\
             {context}\n\
             Question: {query}\n\
             \n\
             Rules:\n\
             1. Use only information found in the documents above.\n\
             2. If the documents do not contain the answer, state that explicitly.\n\
             3. Do not speculate or add information from outside the documents.\n\
             4. Quote the relevant document text that supports the answer.\n\
             5. Be accurate, concise, and direct.\n\
             \n\
             Answer:"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::vector_index::{EmbeddedChunk, ScoredChunk};
    use async_trait::async_trait;
    use half::f16;
    use quill_embed::{EmbedError, EmbeddingResult};

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed_text(&self, _text: &str) -> quill_embed::Result<Vec<f16>> {
            Ok(self.0.iter().map(|&v| f16::from_f32(v)).collect())
        }

        async fn embed_texts(&self, texts: &[String]) -> quill_embed::Result<EmbeddingResult> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed_text(text).await?);
            }
            Ok(EmbeddingResult::new(out))
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingProvider for DownEmbedder {
        async fn embed_text(&self, _text: &str) -> quill_embed::Result<Vec<f16>> {
            Err(EmbedError::InvalidResponse {
                message: "down".to_string(),
            })
        }

        async fn embed_texts(&self, _texts: &[String]) -> quill_embed::Result<EmbeddingResult> {
            Err(EmbedError::InvalidResponse {
                message: "down".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "down"
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        async fn embed_text(&self, _text: &str) -> quill_embed::Result<Vec<f16>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![f16::from_f32(1.0)])
        }

        async fn embed_texts(&self, _texts: &[String]) -> quill_embed::Result<EmbeddingResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(EmbeddingResult::new(vec![]))
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    async fn populated_index() -> VectorIndex {
        let index = VectorIndex::open_memory().await.unwrap();
        index.ensure_model("fixed", 2).await.unwrap();
        index
            .replace_document(
                "a.txt",
                &[1u8; 32],
                &[EmbeddedChunk {
                    chunk_id: "a.txt#0".to_string(),
                    doc_id: "a.txt".to_string(),
                    sequence: 0,
                    content: "relevant evidence".to_string(),
                    embedding: vec![f16::from_f32(1.0), f16::from_f32(0.0)],
                }],
            )
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn retrieves_ranked_evidence() {
        let index = populated_index().await;
        let orchestrator = RetrievalOrchestrator::new(
            index,
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            RetrievalConfig::default(),
            Duration::from_secs(5),
        );

        let result = orchestrator.answer_context("anything").await.unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].content, "relevant evidence");
    }

    #[tokio::test]
    async fn embedder_failure_degrades_to_empty_result() {
        let index = populated_index().await;
        let orchestrator = RetrievalOrchestrator::new(
            index,
            Arc::new(DownEmbedder),
            RetrievalConfig::default(),
            Duration::from_secs(5),
        );

        let result = orchestrator.answer_context("anything").await.unwrap();
        assert!(result.is_empty(), "collaborator failure must not be an error");
    }

    #[tokio::test]
    async fn embedder_timeout_degrades_to_empty_result() {
        let index = populated_index().await;
        let orchestrator = RetrievalOrchestrator::new(
            index,
            Arc::new(SlowEmbedder),
            RetrievalConfig::default(),
            Duration::from_millis(50),
        );

        let result = orchestrator.answer_context("anything").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn context_budget_truncates_the_tail_only() {
        let index = VectorIndex::open_memory().await.unwrap();
        let orchestrator = RetrievalOrchestrator::new(
            index,
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            RetrievalConfig {
                context_budget: 25,
                ..RetrievalConfig::default()
            },
            Duration::from_secs(5),
        );

        let scored = |id: &str, score: f32| ScoredChunk {
            chunk_id: id.to_string(),
            doc_id: "d".to_string(),
            sequence: 0,
            content: "ten bytes!".to_string(),
            score,
        };
        let mut result = QueryResult {
            matches: vec![scored("d#0", 0.9), scored("d#1", 0.8), scored("d#2", 0.7)],
            fallback: false,
        };

        orchestrator.truncate_to_budget(&mut result);
        // 10 + 10 fits in 25; the third would overflow and is dropped.
        assert_eq!(result.matches.len(), 2);
        assert_eq!(result.matches[0].chunk_id, "d#0");
        assert_eq!(result.matches[1].chunk_id, "d#1");
    }

    #[tokio::test]
    async fn top_match_survives_even_when_over_budget() {
        let index = VectorIndex::open_memory().await.unwrap();
        let orchestrator = RetrievalOrchestrator::new(
            index,
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            RetrievalConfig {
                context_budget: 5,
                ..RetrievalConfig::default()
            },
            Duration::from_secs(5),
        );

        let mut result = QueryResult {
            matches: vec![ScoredChunk {
                chunk_id: "d#0".to_string(),
                doc_id: "d".to_string(),
                sequence: 0,
                content: "much longer than the budget allows".to_string(),
                score: 0.9,
            }],
            fallback: false,
        };
        orchestrator.truncate_to_budget(&mut result);
        assert_eq!(result.matches.len(), 1);
    }

    #[tokio::test]
    async fn prompt_contains_evidence_and_question() {
        let index = VectorIndex::open_memory().await.unwrap();
        let orchestrator = RetrievalOrchestrator::new(
            index,
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            RetrievalConfig::default(),
            Duration::from_secs(5),
        );

        let result = QueryResult {
            matches: vec![ScoredChunk {
                chunk_id: "notes.txt#0".to_string(),
                doc_id: "notes.txt".to_string(),
                sequence: 0,
                content: "the launch is on Tuesday".to_string(),
                score: 0.8,
            }],
            fallback: false,
        };
        let prompt = orchestrator.build_prompt("When is the launch?", &result);
        assert!(prompt.contains("[notes.txt] the launch is on Tuesday"));
        assert!(prompt.contains("Question: When is the launch?"));
        assert!(prompt.contains("only the documents below"));
    }
}
