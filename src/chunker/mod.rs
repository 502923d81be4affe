//! Chunk boundary policies and token accounting.
//!
//! Splitting happens over whitespace-delimited tokens located by character offset, so every
//! chunk knows exactly where it came from in the source document. Two strategies are
//! supported:
//!
//! - `fixed`: consecutive token windows of `chunk_size`, advancing by `chunk_size − overlap`
//!   tokens per step, with a shorter final window when tokens remain.
//! - `structure_aware`: segment at headings, paragraph breaks, and list items first; window
//!   only the units that exceed 1.5 × `chunk_size`, and merge consecutive short units under
//!   the same section until they approach the budget. Units within the 1.5× allowance are
//!   kept intact even when they exceed the exact target.

mod structure;
mod tokenize;

pub use tokenize::determine_chunk_size;

use serde::{Deserialize, Serialize};
use structure::segment;
use thiserror::Error;
use tokenize::{Token, tokenize};

/// Errors produced while validating chunking options.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave room for the window to advance.
    #[error("overlap of {overlap} tokens must be smaller than the chunk size of {chunk_size}")]
    OverlapTooLarge {
        /// Requested overlap in tokens.
        overlap: usize,
        /// Requested chunk size in tokens.
        chunk_size: usize,
    },
}

/// Chunk boundary strategy applied during ingestion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Sliding token windows over the whole document.
    Fixed,
    /// Structural segmentation first, windows only inside oversized units.
    StructureAware,
}

impl std::str::FromStr for ChunkStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "structure_aware" => Ok(Self::StructureAware),
            _ => Err(()),
        }
    }
}

/// Options controlling one chunking pass.
#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    /// Target token budget per chunk.
    pub chunk_size: usize,
    /// Tokens shared between consecutive chunks.
    pub overlap: usize,
    /// Boundary strategy.
    pub strategy: ChunkStrategy,
}

impl ChunkOptions {
    /// Build options, leaving validation to [`chunk`].
    pub fn new(chunk_size: usize, overlap: usize, strategy: ChunkStrategy) -> Self {
        Self {
            chunk_size,
            overlap,
            strategy,
        }
    }

    fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_size == 0 {
            return Err(ChunkError::InvalidChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(ChunkError::OverlapTooLarge {
                overlap: self.overlap,
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }
}

/// One bounded text segment produced by the chunker, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    /// Segment text, sliced verbatim from the source.
    pub text: String,
    /// Number of tokens in the segment.
    pub token_count: usize,
    /// Character offset of the segment's first token in the source text.
    pub char_start: usize,
    /// Exclusive character offset of the segment's last token.
    pub char_end: usize,
    /// Title of the nearest preceding heading, when the strategy tracks one.
    pub section_title: Option<String>,
}

/// Split text into ordered chunk drafts according to the requested strategy.
///
/// Whitespace-only input yields zero drafts. Invalid options are rejected before any
/// processing happens.
pub fn chunk(text: &str, options: &ChunkOptions) -> Result<Vec<ChunkDraft>, ChunkError> {
    options.validate()?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let tokens = tokenize(text);
    let drafts = match options.strategy {
        ChunkStrategy::Fixed => fixed_windows(text, &tokens, options, None),
        ChunkStrategy::StructureAware => structure_chunks(text, &tokens, options),
    };
    Ok(drafts)
}

/// Emit sliding windows over a token slice.
///
/// The final window may be shorter; iteration stops once a window reaches the last token,
/// so no window is ever fully contained in its predecessor.
fn fixed_windows(
    text: &str,
    tokens: &[Token],
    options: &ChunkOptions,
    section: Option<&str>,
) -> Vec<ChunkDraft> {
    let mut drafts = Vec::new();
    if tokens.is_empty() {
        return drafts;
    }

    let step = options.chunk_size - options.overlap;
    let mut start = 0;
    loop {
        let end = (start + options.chunk_size).min(tokens.len());
        drafts.push(draft_from(text, &tokens[start..end], section));
        if start + options.chunk_size >= tokens.len() {
            break;
        }
        start += step;
    }

    drafts
}

fn structure_chunks(text: &str, tokens: &[Token], options: &ChunkOptions) -> Vec<ChunkDraft> {
    let units = segment(text);

    // Tokens assigned to each unit, as index ranges into `tokens`.
    let mut unit_tokens: Vec<(std::ops::Range<usize>, Option<String>)> = Vec::new();
    let mut idx = 0;
    for unit in units {
        while idx < tokens.len() && tokens[idx].start_byte < unit.start_byte {
            idx += 1;
        }
        let begin = idx;
        while idx < tokens.len() && tokens[idx].end_byte <= unit.end_byte {
            idx += 1;
        }
        if idx > begin {
            unit_tokens.push((begin..idx, unit.section));
        }
    }

    // Units within 1.5x of the budget are never split.
    let split_limit = options.chunk_size + options.chunk_size / 2;
    let mut drafts = Vec::new();
    let mut pending: Option<(std::ops::Range<usize>, usize, Option<String>)> = None;

    for (range, section) in unit_tokens {
        let count = range.len();
        if count > split_limit {
            if let Some((merged, _, merged_section)) = pending.take() {
                drafts.push(draft_from(text, &tokens[merged], merged_section.as_deref()));
            }
            drafts.extend(fixed_windows(
                text,
                &tokens[range],
                options,
                section.as_deref(),
            ));
            continue;
        }

        let can_merge = pending
            .as_ref()
            .map(|(_, merged_count, merged_section)| {
                *merged_section == section && merged_count + count <= options.chunk_size
            })
            .unwrap_or(false);

        if can_merge {
            if let Some((merged, merged_count, _)) = pending.as_mut() {
                merged.end = range.end;
                *merged_count += count;
            }
        } else {
            if let Some((merged, _, merged_section)) = pending.take() {
                drafts.push(draft_from(text, &tokens[merged], merged_section.as_deref()));
            }
            pending = Some((range, count, section));
        }
    }

    if let Some((merged, _, merged_section)) = pending {
        drafts.push(draft_from(text, &tokens[merged], merged_section.as_deref()));
    }

    drafts
}

fn draft_from(text: &str, tokens: &[Token], section: Option<&str>) -> ChunkDraft {
    let first = tokens[0];
    let last = tokens[tokens.len() - 1];
    ChunkDraft {
        text: text[first.start_byte..last.end_byte].to_string(),
        token_count: tokens.len(),
        char_start: first.start_char,
        char_end: last.end_char,
        section_title: section.map(str::to_string),
    }
}
