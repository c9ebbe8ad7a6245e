//! quill-retriever: incremental document indexing and similarity retrieval.
//!
//! This crate keeps a SQLite-backed vector index consistent with a local
//! document corpus over repeated runs and resolves natural-language queries
//! into ranked, deduplicated evidence sets for a generation model.
//!
//! ## Key modules
//!
//! - [`retrieval::source`]: document discovery and per-format text extraction
//! - [`retrieval::change_tracker`]: fingerprint diffing for incremental passes
//! - [`retrieval::vector_index`]: the persistent chunk/embedding store
//! - [`retrieval::indexing_engine`]: one chunk → embed → store pass
//! - [`retrieval::orchestrator`]: query-time retrieval and prompt assembly
//!
//! ## Architecture
//!
//! ```text
//! Files → Extractors → ChangeTracker → Chunker → Embeddings → SQLite
//!                                                                ↓
//!             Generation ← RetrievalOrchestrator ← similarity search
//! ```

pub mod config;
pub mod retrieval;

pub use config::QuillConfig;
pub use retrieval::indexing_engine::{IndexReport, IndexingEngine, IndexingEngineConfig};
pub use retrieval::orchestrator::{NO_MATCH_MESSAGE, RetrievalConfig, RetrievalOrchestrator};
pub use retrieval::vector_index::{IndexError, QueryResult, ScoredChunk, VectorIndex};
