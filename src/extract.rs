//! Document extractor interface and the built-in plain-text extractor.
//!
//! Extractors turn a source file into raw text plus light metadata; the pipeline consumes
//! them only through [`DocumentExtractor`]. Page boundaries are represented as form-feed
//! characters in the extracted text, which is how the chunk page numbers are derived.

use std::path::Path;
use thiserror::Error;

/// Light metadata reported alongside extracted text.
#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    /// Document title, when one could be determined.
    pub title: Option<String>,
    /// Page count, when the format has pages.
    pub page_count: Option<usize>,
}

/// Raw text and metadata produced by an extractor.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Extracted text; page breaks are form-feed characters.
    pub text: String,
    /// Light metadata.
    pub metadata: DocumentMetadata,
}

/// Errors raised while extracting a document.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Extractor does not handle this file type.
    #[error("unsupported document type: {0}")]
    Unsupported(String),
    /// Reading the file failed.
    #[error("failed to read document: {0}")]
    Io(#[from] std::io::Error),
    /// The document produced no extractable text.
    #[error("document contains no extractable text")]
    Empty,
}

/// Interface implemented by document extractors.
pub trait DocumentExtractor: Send + Sync {
    /// Whether this extractor handles the given file.
    fn supports(&self, path: &Path) -> bool;

    /// Extract text and metadata from the file.
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError>;
}

/// Extractor for plain-text and Markdown files.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    const EXTENSIONS: [&'static str; 4] = ["txt", "text", "md", "markdown"];
}

impl DocumentExtractor for PlainTextExtractor {
    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                Self::EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError> {
        if !self.supports(path) {
            return Err(ExtractError::Unsupported(path.display().to_string()));
        }

        let text = std::fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Err(ExtractError::Empty);
        }

        let metadata = DocumentMetadata {
            title: detect_title(&text),
            page_count: page_count(&text),
        };
        tracing::debug!(
            path = %path.display(),
            chars = text.chars().count(),
            pages = ?metadata.page_count,
            "Document extracted"
        );

        Ok(ExtractedDocument { text, metadata })
    }
}

/// First plausible title line: non-empty, not purely numeric, with some letters in it.
fn detect_title(text: &str) -> Option<String> {
    for line in text.lines() {
        let trimmed = line.trim().trim_start_matches('#').trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if trimmed.chars().filter(|c| c.is_alphabetic()).count() < 3 {
            continue;
        }
        return Some(trimmed.chars().take(120).collect());
    }
    None
}

fn page_count(text: &str) -> Option<usize> {
    let breaks = text.matches('\u{0C}').count();
    if breaks == 0 { None } else { Some(breaks + 1) }
}

/// Character positions of every page break in the text.
pub fn page_breaks(text: &str) -> Vec<usize> {
    text.chars()
        .enumerate()
        .filter(|(_, ch)| *ch == '\u{0C}')
        .map(|(idx, _)| idx)
        .collect()
}

/// 1-based page number for a character offset, or `None` when the text has no pages.
pub fn page_for_offset(breaks: &[usize], char_offset: usize) -> Option<u32> {
    if breaks.is_empty() {
        return None;
    }
    let page = breaks.partition_point(|&brk| brk < char_offset) + 1;
    Some(page as u32)
}
