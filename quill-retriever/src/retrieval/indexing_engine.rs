//! One index-build pass: discover documents, diff against the stored
//! fingerprints, then chunk, embed, and store what changed.
//!
//! ## Pipeline
//!
//! ```text
//! DocumentSource → ChangeTracker → TextChunker → EmbeddingProvider → VectorIndex
//!      (files)        (diff)         (chunks)       (vectors)         (SQLite)
//! ```
//!
//! Documents are processed with bounded concurrency; every chunk of one
//! document is handled by the one task that owns that document, so writes
//! to the same chunk identifier are serialized by construction. Failures
//! that concern a single document (empty text, unreachable embedder) are
//! logged and counted without aborting the pass; store failures abort,
//! since no further progress is possible.

use anyhow::Result;
use futures::StreamExt;
use quill_context::{ChunkError, ChunkerConfig, TextChunker};
use quill_embed::EmbeddingProvider;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::change_tracker::{self, IndexDelta};
use super::source::{DocumentSnapshot, DocumentSource};
use super::vector_index::{EmbeddedChunk, IndexError, VectorIndex};

/// Configuration for the indexing engine.
#[derive(Debug, Clone)]
pub struct IndexingEngineConfig {
    pub chunker: ChunkerConfig,
    /// Maximum documents chunked and embedded concurrently.
    pub max_workers: usize,
}

impl Default for IndexingEngineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            max_workers: 4,
        }
    }
}

impl IndexingEngineConfig {
    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }
}

/// Cooperative cancellation for an in-flight pass. Checked between
/// documents, never mid-write, so no document is left half-indexed.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What one pass did, returned to the caller and logged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Documents skipped because of a per-document failure.
    pub skipped: usize,
    pub chunks_written: usize,
    /// True when the pass was cancelled before finishing.
    pub cancelled: bool,
}

enum DocOutcome {
    Indexed { chunks: usize },
    Skipped,
    Cancelled,
}

/// Drives the chunk → embed → store pipeline for a document corpus.
pub struct IndexingEngine {
    index: VectorIndex,
    source: Arc<dyn DocumentSource>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: TextChunker,
    max_workers: usize,
    cancel: CancelHandle,
}

impl IndexingEngine {
    pub fn new(
        index: VectorIndex,
        source: Arc<dyn DocumentSource>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: IndexingEngineConfig,
    ) -> Self {
        Self {
            index,
            source,
            embedder,
            chunker: TextChunker::new(config.chunker),
            max_workers: config.max_workers.max(1),
            cancel: CancelHandle::default(),
        }
    }

    /// Handle for cancelling the current pass between document boundaries.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The underlying index, for serving queries after a pass.
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Run one full index-build pass and report what changed.
    ///
    /// Running twice over an unchanged corpus writes nothing the second
    /// time and leaves an identical set of chunk identifiers.
    pub async fn run_pass(&self) -> Result<IndexReport> {
        let started = Instant::now();

        let snapshots = self.source.snapshot().await?;
        let previous = self.index.fingerprints().await?;
        let delta = change_tracker::diff(&previous, snapshots);

        let mut report = IndexReport {
            unchanged: delta.unchanged.len(),
            ..IndexReport::default()
        };

        if delta.is_noop() {
            info!(unchanged = report.unchanged, "corpus unchanged, nothing to index");
            return Ok(report);
        }

        if !delta.removed.is_empty() {
            let removed_chunks = self.index.delete_documents(&delta.removed).await?;
            info!(
                documents = delta.removed.len(),
                chunks = removed_chunks,
                "removed deleted documents from index"
            );
            report.removed = delta.removed.len();
        }

        let IndexDelta { added, modified, .. } = delta;
        let work: Vec<(DocumentSnapshot, bool)> = added
            .into_iter()
            .map(|doc| (doc, true))
            .chain(modified.into_iter().map(|doc| (doc, false)))
            .collect();

        let mut outcomes = futures::stream::iter(work.into_iter().map(move |(doc, is_new)| {
            async move {
                let outcome = self.process_document(&doc).await;
                (is_new, outcome)
            }
        }))
        .buffer_unordered(self.max_workers);

        while let Some((is_new, outcome)) = outcomes.next().await {
            match outcome {
                Ok(DocOutcome::Indexed { chunks }) => {
                    if is_new {
                        report.added += 1;
                    } else {
                        report.updated += 1;
                    }
                    report.chunks_written += chunks;
                }
                Ok(DocOutcome::Skipped) => report.skipped += 1,
                Ok(DocOutcome::Cancelled) => report.cancelled = true,
                // A store-level failure aborts the pass outright.
                Err(e) => return Err(e.into()),
            }
        }
        drop(outcomes);

        info!(
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            unchanged = report.unchanged,
            skipped = report.skipped,
            chunks = report.chunks_written,
            cancelled = report.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index pass complete"
        );
        Ok(report)
    }

    /// Chunk, embed, and store one document. Per-document failures resolve
    /// to `Skipped`; only store errors propagate.
    async fn process_document(&self, doc: &DocumentSnapshot) -> Result<DocOutcome, IndexError> {
        if self.cancel.is_cancelled() {
            return Ok(DocOutcome::Cancelled);
        }

        let chunks: Vec<_> = match self.chunker.split(&doc.id, &doc.text) {
            Ok(iter) => iter.collect(),
            Err(ChunkError::EmptyDocument) => {
                warn!(doc = %doc.id, "skipping empty document");
                return Ok(DocOutcome::Skipped);
            }
        };

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = match self.embedder.embed_texts(&texts).await {
            Ok(result) => result,
            Err(e) => {
                warn!(doc = %doc.id, error = %e, "embedding failed, skipping document");
                return Ok(DocOutcome::Skipped);
            }
        };
        if embeddings.len() != chunks.len() {
            warn!(
                doc = %doc.id,
                expected = chunks.len(),
                got = embeddings.len(),
                "embedding count mismatch, skipping document"
            );
            return Ok(DocOutcome::Skipped);
        }

        // Registers the model on first contact; a dimension disagreement
        // aborts the pass since only a full rebuild can fix it.
        self.index
            .ensure_model(self.embedder.model_name(), embeddings.dimension)
            .await?;

        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(embeddings.embeddings)
            .map(|(chunk, embedding)| EmbeddedChunk::from_chunk(chunk, embedding))
            .collect();
        let written = embedded.len();

        self.index
            .replace_document(&doc.id, &doc.fingerprint, &embedded)
            .await?;

        debug!(
            doc = %doc.id,
            chunks = written,
            fingerprint = %hex::encode(&doc.fingerprint[..6]),
            "indexed document"
        );
        Ok(DocOutcome::Indexed { chunks: written })
    }
}
