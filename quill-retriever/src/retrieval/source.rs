//! Document discovery and text extraction for the corpus directory.
//!
//! The engine sees documents through the [`DocumentSource`] trait: a flat
//! enumeration of `(id, text, fingerprint)` snapshots. Deletions are
//! detected downstream by the enumerated set shrinking between passes.
//! Format handling is a [`TextExtractor`] variant chosen once per document
//! by extension, never by inspecting content at runtime.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::change_tracker::Fingerprint;

/// One document as seen during a single pass: identity, extracted text,
/// and the content fingerprint used for change detection.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    /// Path relative to the corpus root, with `/` separators.
    pub id: String,
    /// Text produced by the extractor for this document's format.
    pub text: String,
    /// blake3 hash of the raw file bytes.
    pub fingerprint: Fingerprint,
}

/// Per-format text extraction, selected once per document by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextExtractor {
    PlainText,
    Markdown,
    Csv,
    Tsv,
}

impl TextExtractor {
    /// Pick the extractor for a path, or `None` for unsupported formats.
    pub fn for_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            _ => None,
        }
    }

    /// Turn raw file bytes into indexable text.
    pub fn extract(&self, raw: &[u8]) -> String {
        let text = String::from_utf8_lossy(raw);
        match self {
            Self::PlainText | Self::Markdown => text.into_owned(),
            Self::Csv => strip_header(&text, ','),
            Self::Tsv => strip_header(&text, '\t'),
        }
    }
}

/// Tabular exports lead with a header row; drop it so column names don't
/// pollute retrieval.
fn strip_header(text: &str, delimiter: char) -> String {
    let mut lines = text.lines();
    match lines.next() {
        Some(first) if first.contains(delimiter) => lines.collect::<Vec<_>>().join("\n"),
        Some(first) => {
            let mut rest: Vec<&str> = vec![first];
            rest.extend(lines);
            rest.join("\n")
        }
        None => String::new(),
    }
}

/// Files that editors and operating systems litter alongside real documents.
fn is_temp_or_hidden(name: &str) -> bool {
    if name.starts_with('.') || name.starts_with("~$") {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    const TEMP_SUFFIXES: &[&str] = &[".tmp", ".temp", ".bak", ".swp", ".lock"];
    TEMP_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
        || lower == "thumbs.db"
        || lower == "desktop.ini"
}

/// Yields the current set of documents for one index pass.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn snapshot(&self) -> Result<Vec<DocumentSnapshot>>;
}

/// Filesystem-backed source walking a corpus root recursively.
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn snapshot(&self) -> Result<Vec<DocumentSnapshot>> {
        // A missing root must not be read as "everything was deleted".
        if !self.root.is_dir() {
            anyhow::bail!("corpus root {} does not exist", self.root.display());
        }

        let mut docs = Vec::new();
        let mut dir_stack = vec![self.root.clone()];

        while let Some(dir) = dir_stack.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "failed to read directory");
                    continue;
                }
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                let metadata = match entry.metadata().await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to stat entry");
                        continue;
                    }
                };

                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if is_temp_or_hidden(name) {
                    debug!(path = %path.display(), "skipping temporary or hidden entry");
                    continue;
                }
                if metadata.is_dir() {
                    dir_stack.push(path);
                    continue;
                }

                let Some(extractor) = TextExtractor::for_path(&path) else {
                    debug!(path = %path.display(), "skipping unsupported file format");
                    continue;
                };

                let raw = match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to read file");
                        continue;
                    }
                };

                let fingerprint = *blake3::hash(&raw).as_bytes();
                let id = path
                    .strip_prefix(&self.root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");

                docs.push(DocumentSnapshot {
                    id,
                    text: extractor.extract(&raw),
                    fingerprint,
                });
            }
        }

        // Directory iteration order is platform-defined; sort for a
        // deterministic pass.
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extractor_selection_by_extension() {
        assert_eq!(
            TextExtractor::for_path(Path::new("notes.txt")),
            Some(TextExtractor::PlainText)
        );
        assert_eq!(
            TextExtractor::for_path(Path::new("README.MD")),
            Some(TextExtractor::Markdown)
        );
        assert_eq!(
            TextExtractor::for_path(Path::new("people.csv")),
            Some(TextExtractor::Csv)
        );
        assert_eq!(
            TextExtractor::for_path(Path::new("people.tsv")),
            Some(TextExtractor::Tsv)
        );
        assert_eq!(TextExtractor::for_path(Path::new("report.docx")), None);
        assert_eq!(TextExtractor::for_path(Path::new("binary.png")), None);
        assert_eq!(TextExtractor::for_path(Path::new("Makefile")), None);
    }

    #[test]
    fn csv_extraction_drops_the_header_row() {
        let raw = b"name,age,phone\nZhang San,28,13800138000\nLi Si,30,13900139000";
        let text = TextExtractor::Csv.extract(raw);
        assert_eq!(text, "Zhang San,28,13800138000\nLi Si,30,13900139000");
    }

    #[test]
    fn headerless_single_column_file_is_kept_whole() {
        let raw = b"just one line without the delimiter\nand another";
        let text = TextExtractor::Csv.extract(raw);
        assert_eq!(text, "just one line without the delimiter\nand another");
    }

    #[test]
    fn temp_and_hidden_files_are_recognized() {
        assert!(is_temp_or_hidden(".DS_Store"));
        assert!(is_temp_or_hidden("~$report.docx"));
        assert!(is_temp_or_hidden("draft.tmp"));
        assert!(is_temp_or_hidden("old.bak"));
        assert!(is_temp_or_hidden("Thumbs.db"));
        assert!(!is_temp_or_hidden("notes.txt"));
    }

    #[tokio::test]
    async fn snapshot_walks_subdirectories_and_filters() -> Result<()> {
        let dir = tempdir()?;
        tokio::fs::write(dir.path().join("a.txt"), "alpha document").await?;
        tokio::fs::write(dir.path().join(".hidden.txt"), "ignored").await?;
        tokio::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).await?;
        tokio::fs::create_dir(dir.path().join("sub")).await?;
        tokio::fs::write(dir.path().join("sub/b.md"), "# beta").await?;

        let source = FsDocumentSource::new(dir.path().to_path_buf());
        let docs = source.snapshot().await?;

        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "sub/b.md"]);
        assert_eq!(docs[0].text, "alpha document");
        assert_eq!(docs[0].fingerprint, *blake3::hash(b"alpha document").as_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn missing_root_is_an_error_not_an_empty_set() {
        let source = FsDocumentSource::new(PathBuf::from("/definitely/not/here"));
        assert!(source.snapshot().await.is_err());
    }
}
