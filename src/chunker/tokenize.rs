//! Token location and model-aware chunk sizing.
//!
//! The chunker operates on whitespace-delimited tokens so that every chunk can report the
//! character range it covers in the source text. Model-aware sizing reuses the embedding
//! model's context window: derive a budget from the window and clamp it to a conservative
//! range; callers can override via `CHUNK_SIZE`.

use crate::embedding::BackendKind;
use tiktoken_rs::model::get_context_size;

const MIN_AUTOMATIC_CHUNK_SIZE: usize = 256;
const MAX_AUTOMATIC_CHUNK_SIZE: usize = 1024;

/// A whitespace-delimited token located by byte and character offsets.
///
/// Byte offsets slice the source text; character offsets are what chunk records expose.
/// `end_*` offsets are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token {
    pub(crate) start_byte: usize,
    pub(crate) end_byte: usize,
    pub(crate) start_char: usize,
    pub(crate) end_char: usize,
}

/// Split text into located tokens. Consecutive whitespace produces no empty tokens.
pub(crate) fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current: Option<Token> = None;
    let mut char_idx = 0;

    for (byte_idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(token) = current.take() {
                tokens.push(token);
            }
        } else {
            match &mut current {
                Some(token) => {
                    token.end_byte = byte_idx + ch.len_utf8();
                    token.end_char = char_idx + 1;
                }
                None => {
                    current = Some(Token {
                        start_byte: byte_idx,
                        end_byte: byte_idx + ch.len_utf8(),
                        start_char: char_idx,
                        end_char: char_idx + 1,
                    });
                }
            }
        }
        char_idx += 1;
    }

    if let Some(token) = current {
        tokens.push(token);
    }

    tokens
}

/// Determine the chunk size for an ingestion, respecting overrides and safe defaults.
///
/// Precedence:
/// 1) Explicit override (e.g., `CHUNK_SIZE`) wins and is clamped at `>= 1`.
/// 2) Otherwise, derive from the backend/model context window and divide by `4` (or `8` when
///    `use_safe_defaults` is true). The result is clamped into `[256, 1024]`.
pub fn determine_chunk_size(
    override_size: Option<usize>,
    backend: BackendKind,
    model: &str,
    use_safe_defaults: bool,
) -> usize {
    if let Some(explicit) = override_size {
        return explicit.max(1);
    }

    let window = embedding_context_window(backend, model);
    let divisor = if use_safe_defaults { 8 } else { 4 };
    let base = (window / divisor).max(1);
    let candidate = base.max(MIN_AUTOMATIC_CHUNK_SIZE);
    candidate.clamp(MIN_AUTOMATIC_CHUNK_SIZE, MAX_AUTOMATIC_CHUNK_SIZE)
}

/// Look up the embedding context window for a given backend/model combination.
pub(crate) fn embedding_context_window(backend: BackendKind, model: &str) -> usize {
    match backend {
        BackendKind::Cloud => cloud_embedding_context_window(model),
        BackendKind::Local => local_embedding_context_window(model),
    }
}

fn cloud_embedding_context_window(model: &str) -> usize {
    if model.starts_with("text-embedding-3") {
        return 8192;
    }
    if model.starts_with("text-embedding-ada-002") {
        return 8192;
    }

    let size = get_context_size(model);
    if size == 4096 && model.contains("embedding") {
        tracing::debug!(model, "Using default embedding context window fallback");
    }
    size
}

fn local_embedding_context_window(model: &str) -> usize {
    let normalized = model.to_lowercase();
    match normalized.as_str() {
        "nomic-embed-text" | "mxbai-embed-large" | "mxbai-embed-large-v1" => 8192,
        value if value.contains("all-minilm") => 512,
        value if value.contains("e5-large") => 4096,
        _ => {
            tracing::trace!(model, "Using default local context window estimate");
            4096
        }
    }
}
