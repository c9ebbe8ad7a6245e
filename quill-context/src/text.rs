//! Splitting raw document text into retrievable chunks.
//!
//! The chunker turns a document's text into a sequence of [`Chunk`]s that are
//! contiguous byte ranges of the original: concatenating the chunks of a
//! document in sequence order reconstructs the input exactly. Splitting is
//! driven by sentence boundaries (or fixed windows when sentence splitting is
//! disabled), bounded by a configured minimum and maximum chunk size.
//!
//! URLs and email addresses are detected up front and treated as atomic
//! spans: no chunk boundary may fall inside one. When a protected span is
//! longer than the maximum chunk size, the chunk that contains it is allowed
//! to exceed the maximum rather than corrupt the span.
//!
//! ```
//! use quill_context::{ChunkerConfig, TextChunker};
//!
//! let chunker = TextChunker::new(ChunkerConfig::default());
//! let chunks: Vec<_> = chunker
//!     .split("notes.md", "First sentence. Second sentence.")
//!     .unwrap()
//!     .collect();
//! assert!(!chunks.is_empty());
//! let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(rebuilt, "First sentence. Second sentence.");
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// URLs must survive chunking verbatim, including scheme-less `www.` forms.
const URL_PATTERN: &str = r#"https?://[^\s<>"']+|ftp://[^\s<>"']+|www\.[^\s<>"']+"#;
const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}";

/// Errors produced while splitting a document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    /// The document contained no text worth indexing. Callers are expected
    /// to skip the document and continue with the rest of the batch.
    #[error("document is empty or whitespace-only")]
    EmptyDocument,
}

/// Configuration for [`TextChunker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum chunk length in bytes. Only a protected span may push a
    /// chunk past this limit.
    pub max_chunk_size: usize,
    /// Fragments shorter than this merge into a neighboring chunk instead
    /// of being emitted on their own.
    pub min_chunk_size: usize,
    /// Split on sentence punctuation instead of fixed-size windows.
    pub sentence_split: bool,
    /// Treat URLs as atomic spans.
    pub preserve_urls: bool,
    /// Treat email addresses as atomic spans.
    pub preserve_emails: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 400,
            min_chunk_size: 10,
            sentence_split: true,
            preserve_urls: true,
            preserve_emails: true,
        }
    }
}

impl ChunkerConfig {
    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    pub fn with_min_chunk_size(mut self, min_chunk_size: usize) -> Self {
        self.min_chunk_size = min_chunk_size;
        self
    }

    pub fn with_sentence_split(mut self, sentence_split: bool) -> Self {
        self.sentence_split = sentence_split;
        self
    }
}

/// A contiguous fragment of a document's text.
///
/// The owning document is referenced by id only; chunks are transient and
/// rebuilt on every index pass. The stable identifier returned by
/// [`Chunk::id`] is derived from the document id and the sequence number,
/// never from the content, so re-chunking an unchanged document yields the
/// same identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Identifier of the owning document.
    pub doc: String,
    /// 0-based position of this chunk within the document.
    pub sequence: usize,
    /// Byte offset of this chunk in the original text.
    pub offset: usize,
    /// The chunk text, with protected spans verbatim.
    pub text: String,
}

impl Chunk {
    /// Stable store key for this chunk.
    pub fn id(&self) -> String {
        format!("{}#{}", self.doc, self.sequence)
    }
}

/// Splits document text into [`Chunk`]s according to a [`ChunkerConfig`].
///
/// Deterministic: the same input and configuration always produce the same
/// chunks, independent of processing order.
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkerConfig,
    protected: Vec<Regex>,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        let mut protected = Vec::new();
        if config.preserve_urls {
            protected.push(Regex::new(URL_PATTERN).expect("url pattern is valid"));
        }
        if config.preserve_emails {
            protected.push(Regex::new(EMAIL_PATTERN).expect("email pattern is valid"));
        }
        Self { config, protected }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into chunks owned by document `doc`.
    ///
    /// Returns a lazy iterator; calling `split` again with the same input
    /// restarts the sequence from the beginning. Fails with
    /// [`ChunkError::EmptyDocument`] when the text is empty or
    /// whitespace-only.
    pub fn split<'a>(&self, doc: &str, text: &'a str) -> Result<Chunks<'a>, ChunkError> {
        if text.trim().is_empty() {
            return Err(ChunkError::EmptyDocument);
        }

        let protected = self.protected_spans(text);
        let units = if self.config.sentence_split {
            self.sentence_units(text, &protected)
        } else {
            let mut units = Vec::new();
            self.bounded_cut(text, 0..text.len(), &protected, &mut units);
            units
        };

        Ok(Chunks {
            doc: doc.to_string(),
            text,
            units,
            max: self.config.max_chunk_size,
            min: self.config.min_chunk_size,
            next_unit: 0,
            sequence: 0,
        })
    }

    /// Locate protected spans, merging any that overlap.
    fn protected_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans: Vec<Range<usize>> = self
            .protected
            .iter()
            .flat_map(|re| re.find_iter(text).map(|m| m.range()))
            .collect();
        spans.sort_by_key(|s| (s.start, std::cmp::Reverse(s.end)));

        let mut merged: Vec<Range<usize>> = Vec::new();
        for span in spans {
            match merged.last_mut() {
                Some(last) if span.start <= last.end => {
                    if span.end > last.end {
                        last.end = span.end;
                    }
                }
                _ => merged.push(span),
            }
        }
        merged
    }

    /// Split into sentence-bounded units, subdividing any sentence that is
    /// still longer than the maximum chunk size.
    fn sentence_units(&self, text: &str, protected: &[Range<usize>]) -> Vec<Range<usize>> {
        let mut boundaries = Vec::new();
        let mut chars = text.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let end = i + c.len_utf8();
            let is_boundary = match c {
                '。' | '！' | '？' | '；' => true,
                '.' | '!' | '?' | ';' => {
                    matches!(chars.peek(), Some(&(_, next)) if next.is_whitespace())
                }
                _ => false,
            };
            if is_boundary && end < text.len() && !inside_protected(end, protected) {
                boundaries.push(end);
            }
        }

        let mut units = Vec::new();
        let mut start = 0;
        for boundary in boundaries.into_iter().chain(std::iter::once(text.len())) {
            if boundary > start {
                self.bounded_cut(text, start..boundary, protected, &mut units);
                start = boundary;
            }
        }
        units
    }

    /// Cut `range` into pieces no longer than the maximum chunk size. Cuts
    /// land on char boundaries and are shifted past protected spans, so a
    /// piece containing an oversized span may exceed the maximum.
    fn bounded_cut(
        &self,
        text: &str,
        range: Range<usize>,
        protected: &[Range<usize>],
        out: &mut Vec<Range<usize>>,
    ) {
        let max = self.config.max_chunk_size;
        let mut start = range.start;
        while range.end - start > max {
            let mut cut = start + max;
            while cut < range.end && !text.is_char_boundary(cut) {
                cut += 1;
            }
            if let Some(span) = protected.iter().find(|s| s.start < cut && cut < s.end) {
                cut = span.end;
            }
            if cut >= range.end {
                break;
            }
            out.push(start..cut);
            start = cut;
        }
        out.push(start..range.end);
    }
}

fn inside_protected(pos: usize, protected: &[Range<usize>]) -> bool {
    protected.iter().any(|s| s.start < pos && pos < s.end)
}

/// Lazy iterator over the chunks of one document.
///
/// Packs pre-computed units greedily up to the maximum chunk size and
/// absorbs a trailing fragment shorter than the minimum into the final
/// chunk.
#[derive(Debug)]
pub struct Chunks<'a> {
    doc: String,
    text: &'a str,
    units: Vec<Range<usize>>,
    max: usize,
    min: usize,
    next_unit: usize,
    sequence: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next_unit >= self.units.len() {
            return None;
        }

        let start = self.units[self.next_unit].start;
        let mut end = self.units[self.next_unit].end;
        self.next_unit += 1;

        while self.next_unit < self.units.len() {
            let unit = &self.units[self.next_unit];
            if unit.end - start > self.max {
                break;
            }
            end = unit.end;
            self.next_unit += 1;
        }

        // A runt tail merges into this chunk rather than becoming its own.
        let remaining: usize = self.units[self.next_unit..].iter().map(|u| u.len()).sum();
        if remaining > 0 && remaining < self.min {
            end = self.units[self.units.len() - 1].end;
            self.next_unit = self.units.len();
        }

        let chunk = Chunk {
            doc: self.doc.clone(),
            sequence: self.sequence,
            offset: start,
            text: self.text[start..end].to_string(),
        };
        self.sequence += 1;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(chunker: &TextChunker, text: &str) -> Vec<Chunk> {
        chunker.split("doc", text).unwrap().collect()
    }

    #[test]
    fn empty_and_whitespace_documents_are_rejected() {
        let chunker = TextChunker::new(ChunkerConfig::default());
        assert_eq!(chunker.split("doc", "").unwrap_err(), ChunkError::EmptyDocument);
        assert_eq!(
            chunker.split("doc", "  \n\t  ").unwrap_err(),
            ChunkError::EmptyDocument
        );
    }

    #[test]
    fn chunks_reconstruct_the_original_text() {
        let config = ChunkerConfig::default()
            .with_max_chunk_size(50)
            .with_min_chunk_size(5);
        let chunker = TextChunker::new(config);
        let text: String = (0..40).map(|_| "This is a test sentence. ").collect();

        let chunks = collect(&chunker, &text);
        assert!(chunks.len() > 1);
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);

        // Sequences are dense and offsets line up with the original.
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, i);
            assert_eq!(&text[chunk.offset..chunk.offset + chunk.text.len()], chunk.text);
        }
    }

    #[test]
    fn chunks_respect_max_size_without_protected_spans() {
        let config = ChunkerConfig::default()
            .with_max_chunk_size(60)
            .with_min_chunk_size(5);
        let chunker = TextChunker::new(config);
        let text: String = (0..30).map(|_| "Short sentence here. ").collect();

        for chunk in collect(&chunker, &text) {
            assert!(
                chunk.text.len() <= 60,
                "chunk exceeded max: {} bytes",
                chunk.text.len()
            );
        }
    }

    #[test]
    fn oversized_url_stays_intact_in_one_chunk() {
        let config = ChunkerConfig::default()
            .with_max_chunk_size(40)
            .with_min_chunk_size(5);
        let chunker = TextChunker::new(config);
        let url = "https://example.com/a/very/long/path/that/keeps/going/and/going";
        let text = format!("See {url} for details on the setup process.");

        let chunks = collect(&chunker, &text);
        let holder = chunks
            .iter()
            .find(|c| c.text.contains(url))
            .expect("some chunk must contain the full url");
        assert!(holder.text.len() > 40, "holder chunk is allowed to exceed max");

        // No chunk holds a torn-off piece of the url.
        for chunk in &chunks {
            if !chunk.text.contains(url) {
                assert!(!chunk.text.contains("https://"));
            }
        }

        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn email_addresses_are_never_split() {
        let config = ChunkerConfig::default()
            .with_max_chunk_size(20)
            .with_min_chunk_size(3);
        let chunker = TextChunker::new(config);
        let text = "Contact first.last+archive@example-corp.org about renewals soon.";

        let chunks = collect(&chunker, text);
        assert!(
            chunks
                .iter()
                .any(|c| c.text.contains("first.last+archive@example-corp.org")),
            "email must survive verbatim in a single chunk"
        );
    }

    #[test]
    fn sentence_boundaries_inside_urls_are_ignored() {
        let chunker = TextChunker::new(
            ChunkerConfig::default()
                .with_max_chunk_size(200)
                .with_min_chunk_size(5),
        );
        let text = "Docs live at https://docs.example.com/v2.1/guide now. Next sentence.";
        let chunks = collect(&chunker, text);
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
        assert!(chunks[0].text.contains("https://docs.example.com/v2.1/guide"));
    }

    #[test]
    fn cjk_punctuation_splits_sentences() {
        let config = ChunkerConfig::default()
            .with_max_chunk_size(30)
            .with_min_chunk_size(3);
        let chunker = TextChunker::new(config);
        let text = "张三，28岁。电话是13800138000。住在北京市。";

        let chunks = collect(&chunker, text);
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
        assert!(chunks.len() >= 2);
    }

    #[test]
    fn window_mode_cuts_fixed_sizes_and_merges_runt_tail() {
        let config = ChunkerConfig {
            max_chunk_size: 50,
            min_chunk_size: 10,
            sentence_split: false,
            preserve_urls: false,
            preserve_emails: false,
        };
        let chunker = TextChunker::new(config);
        let text = "a".repeat(105);

        let chunks = collect(&chunker, &text);
        // 50 + 55: the 5-byte tail is under min and merges into the second
        // window instead of becoming its own chunk.
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.len(), 50);
        assert_eq!(chunks[1].text.len(), 55);
    }

    #[test]
    fn splitting_is_deterministic() {
        let chunker = TextChunker::new(
            ChunkerConfig::default()
                .with_max_chunk_size(35)
                .with_min_chunk_size(5),
        );
        let text = "One sentence. Another sentence! A third? Yes; a fourth. And more text.";

        let first = collect(&chunker, text);
        let second = collect(&chunker, text);
        assert_eq!(first, second);
    }

    #[test]
    fn chunk_ids_derive_from_document_and_sequence() {
        let chunker = TextChunker::new(ChunkerConfig::default());
        let chunks = collect(&chunker, "Only one sentence here.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id(), "doc#0");
    }

    #[test]
    fn split_is_restartable() {
        let chunker = TextChunker::new(
            ChunkerConfig::default()
                .with_max_chunk_size(25)
                .with_min_chunk_size(5),
        );
        let text = "First sentence. Second sentence. Third sentence.";

        let mut iter = chunker.split("doc", text).unwrap();
        let first_pass_head = iter.next().unwrap();
        drop(iter);

        let restarted: Vec<_> = chunker.split("doc", text).unwrap().collect();
        assert_eq!(restarted[0], first_pass_head);
    }
}
