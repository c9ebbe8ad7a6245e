//! SQLite-backed vector index: the persistent mapping from chunk identity
//! to embedding, text, and metadata.
//!
//! ## Schema
//!
//! ```sql
//! -- Documents table: one row per indexed source document
//! CREATE TABLE documents (
//!     doc_id      TEXT PRIMARY KEY,    -- path relative to the corpus root
//!     fingerprint BLOB NOT NULL,       -- blake3 hash of the raw bytes
//!     indexed_at  TIMESTAMP NOT NULL
//! );
//!
//! -- Chunks table: one row per chunk, keyed by the stable chunk id
//! CREATE TABLE chunks (
//!     chunk_id  TEXT PRIMARY KEY,      -- "{doc_id}#{sequence}"
//!     doc_id    TEXT NOT NULL,
//!     sequence  INTEGER NOT NULL,
//!     content   TEXT NOT NULL,
//!     embedding BLOB NOT NULL,         -- f16 little-endian vector
//!     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//! ```
//!
//! The `index_meta` table records the embedding model name and dimension the
//! index was built with; a disagreeing dimension surfaces as
//! [`IndexError::DimensionMismatch`], the signal that the embedding model
//! changed and a full rebuild is required.

use chrono::{DateTime, Utc};
use half::f16;
use quill_context::Chunk;
use serde::Serialize;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::change_tracker::Fingerprint;

/// Errors from the vector index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The persisted store could not be reached or a statement failed.
    /// Fatal for the current operation; there is no partial retry here.
    #[error("vector store unavailable: {source}")]
    Unavailable {
        #[from]
        source: sqlx::Error,
    },

    /// A vector's dimensionality disagrees with what the index was built
    /// with. This means the embedding model changed; the caller should run
    /// a full rebuild rather than attempt partial recovery.
    #[error(
        "embedding dimension mismatch: index holds {expected}-dimensional vectors, got {actual} \
         (rebuild the index with the current embedding model)"
    )]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A chunk paired with the embedding that will be stored under its id.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub sequence: usize,
    pub content: String,
    pub embedding: Vec<f16>,
}

impl EmbeddedChunk {
    pub fn from_chunk(chunk: Chunk, embedding: Vec<f16>) -> Self {
        Self {
            chunk_id: chunk.id(),
            doc_id: chunk.doc,
            sequence: chunk.sequence,
            content: chunk.text,
            embedding,
        }
    }
}

/// Knobs for one similarity search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Keep at most this many results (the `k` in top-k).
    pub max_results: usize,
    /// Drop results scoring below this floor.
    pub min_similarity: f32,
    /// When filtering leaves fewer than `min_results`, fall back to the
    /// unfiltered top-k once instead of returning nothing.
    pub fallback_to_all: bool,
    /// Minimum acceptable result count before the fallback engages.
    /// Treated as at least 1.
    pub min_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 12,
            min_similarity: 0.15,
            fallback_to_all: true,
            min_results: 1,
        }
    }
}

/// One retrieved chunk with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub sequence: usize,
    pub content: String,
    pub score: f32,
}

/// Ranked, deduplicated evidence for one query.
///
/// An empty `matches` list is the explicit no-match signal: the index was
/// reachable and simply holds nothing for this query, which is distinct
/// from a store error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub matches: Vec<ScoredChunk>,
    /// True when the similarity floor was relaxed to produce this result.
    pub fallback: bool,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Aggregate counts for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub model: Option<String>,
    pub dimension: Option<usize>,
    pub last_indexed: Option<DateTime<Utc>>,
}

/// SQLite-backed vector index with an explicit open/close lifecycle.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    pool: SqlitePool,
}

impl VectorIndex {
    /// Open (creating if missing) a persistent index at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self, IndexError> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// Open an in-memory index, used by tests.
    ///
    /// Pinned to one connection: every pooled connection to `:memory:`
    /// would otherwise get its own private database.
    pub async fn open_memory() -> Result<Self, IndexError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self, IndexError> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    /// Close the underlying pool. Further calls on any clone will fail with
    /// [`IndexError::Unavailable`].
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn create_tables(pool: &SqlitePool) -> Result<(), IndexError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                doc_id TEXT PRIMARY KEY,
                fingerprint BLOB NOT NULL,
                indexed_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                doc_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id)")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                model_name TEXT NOT NULL,
                dimension INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Record the embedding model this index is built with, or verify that
    /// the recorded one is compatible. A dimension disagreement is fatal.
    ///
    /// Insert-or-ignore then read back, so concurrent workers registering
    /// the same model on a fresh index do not race each other.
    pub async fn ensure_model(&self, model_name: &str, dimension: usize) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO index_meta (id, model_name, dimension) VALUES (1, ?1, ?2) \
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(model_name)
        .bind(dimension as i64)
        .execute(&self.pool)
        .await?;

        let (stored_name, stored_dim): (String, i64) =
            sqlx::query_as("SELECT model_name, dimension FROM index_meta WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;

        if stored_dim as usize != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: stored_dim as usize,
                actual: dimension,
            });
        }
        if stored_name != model_name {
            tracing::warn!(
                stored = %stored_name,
                configured = %model_name,
                "embedding model name changed but dimension matches"
            );
        }
        Ok(())
    }

    /// Dimension of the stored vectors, if any model has been recorded.
    pub async fn dimension(&self) -> Result<Option<usize>, IndexError> {
        let dim: Option<i64> = sqlx::query_scalar("SELECT dimension FROM index_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(dim.map(|d| d as usize))
    }

    /// Fingerprints recorded by the previous index build, keyed by doc id.
    pub async fn fingerprints(&self) -> Result<HashMap<String, Fingerprint>, IndexError> {
        let rows = sqlx::query("SELECT doc_id, fingerprint FROM documents")
            .fetch_all(&self.pool)
            .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let doc_id: String = row.get("doc_id");
            let bytes: Vec<u8> = row.get("fingerprint");
            if let Ok(fingerprint) = <Fingerprint>::try_from(bytes.as_slice()) {
                map.insert(doc_id, fingerprint);
            } else {
                // A malformed fingerprint forces the document back through
                // the added path on the next pass.
                tracing::warn!(doc = %doc_id, "discarding malformed stored fingerprint");
            }
        }
        Ok(map)
    }

    /// Replace all of a document's chunks and record its fingerprint, in one
    /// transaction. Upserting an existing chunk id replaces the prior row.
    pub async fn replace_document(
        &self,
        doc_id: &str,
        fingerprint: &Fingerprint,
        chunks: &[EmbeddedChunk],
    ) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await?;

        // Chunk boundaries may have shifted, so the old set goes away wholesale.
        sqlx::query("DELETE FROM chunks WHERE doc_id = ?1")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let embedding_bytes = bytemuck::cast_slice::<f16, u8>(&chunk.embedding);
            sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, doc_id, sequence, content, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    doc_id = excluded.doc_id,
                    sequence = excluded.sequence,
                    content = excluded.content,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.doc_id)
            .bind(chunk.sequence as i64)
            .bind(&chunk.content)
            .bind(embedding_bytes)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO documents (doc_id, fingerprint, indexed_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(doc_id) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(doc_id)
        .bind(&fingerprint[..])
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Delete documents and their chunks by id. Idempotent: unknown ids are
    /// a no-op, not an error. Returns the number of chunk rows removed.
    pub async fn delete_documents(&self, doc_ids: &[String]) -> Result<usize, IndexError> {
        if doc_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0usize;
        for doc_id in doc_ids {
            let result = sqlx::query("DELETE FROM chunks WHERE doc_id = ?1")
                .bind(doc_id)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected() as usize;

            sqlx::query("DELETE FROM documents WHERE doc_id = ?1")
                .bind(doc_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// All stored chunk ids in a stable order. Used for status output and
    /// for verifying incremental behavior in tests.
    pub async fn chunk_ids(&self) -> Result<Vec<String>, IndexError> {
        let rows = sqlx::query_scalar("SELECT chunk_id FROM chunks ORDER BY chunk_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Similarity search: cosine score against every stored vector, stable
    /// sort by descending score (ties keep insertion order), dedup by
    /// (document, sequence), then top-k and the similarity floor.
    ///
    /// When filtering leaves fewer than `min_results` entries and the
    /// fallback is enabled, the unfiltered top-k is returned instead —
    /// a single bounded retry, never a loop. An empty index legitimately
    /// returns an empty result.
    pub async fn search(
        &self,
        query: &[f16],
        opts: &SearchOptions,
    ) -> Result<QueryResult, IndexError> {
        let rows = sqlx::query(
            "SELECT chunk_id, doc_id, sequence, content, embedding FROM chunks ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(QueryResult::empty());
        }

        if let Some(dim) = self.dimension().await? {
            if query.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    actual: query.len(),
                });
            }
        }

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let embedding_bytes: Vec<u8> = row.get("embedding");
            let embedding: Vec<f16> = bytemuck::pod_collect_to_vec(&embedding_bytes);
            if embedding.len() != query.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: embedding.len(),
                    actual: query.len(),
                });
            }

            scored.push(ScoredChunk {
                chunk_id: row.get("chunk_id"),
                doc_id: row.get("doc_id"),
                sequence: row.get::<i64, _>("sequence") as usize,
                content: row.get("content"),
                score: cosine_similarity(query, &embedding),
            });
        }

        // Stable sort keeps rowid order for equal scores, which makes
        // ranking deterministic across runs.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut seen = HashSet::new();
        scored.retain(|c| seen.insert((c.doc_id.clone(), c.sequence)));
        scored.truncate(opts.max_results);

        let kept: Vec<ScoredChunk> = scored
            .iter()
            .filter(|c| c.score >= opts.min_similarity)
            .cloned()
            .collect();

        if kept.len() >= opts.min_results.max(1) || !opts.fallback_to_all {
            return Ok(QueryResult {
                matches: kept,
                fallback: false,
            });
        }

        tracing::debug!(
            kept = kept.len(),
            floor = opts.min_similarity,
            "similarity floor left too few results, returning unfiltered top-k"
        );
        Ok(QueryResult {
            matches: scored,
            fallback: true,
        })
    }

    /// Aggregate statistics about the stored index.
    pub async fn stats(&self) -> Result<IndexStats, IndexError> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let meta: Option<(String, i64)> =
            sqlx::query_as("SELECT model_name, dimension FROM index_meta WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        let last_indexed: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(indexed_at) FROM documents")
                .fetch_one(&self.pool)
                .await?;

        Ok(IndexStats {
            documents: documents as usize,
            chunks: chunks as usize,
            model: meta.as_ref().map(|(name, _)| name.clone()),
            dimension: meta.map(|(_, dim)| dim as usize),
            last_indexed,
        })
    }
}

/// Cosine similarity between two equal-length f16 vectors, in f32 math.
fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    let dot: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f32::from(*x) * f32::from(*y))
        .sum();
    let norm_a: f32 = a.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
