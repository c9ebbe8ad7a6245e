//! Chunking primitives for the quill retrieval engine.
//!
//! This crate owns the transformation from raw document text into the
//! retrievable units stored by the vector index. See [`text`] for the
//! splitting rules and the protected-span guarantees.

pub mod text;

pub use text::{Chunk, ChunkError, ChunkerConfig, Chunks, TextChunker};
