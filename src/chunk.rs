//! Line-oriented text chunker.
//!
//! Splits document text into pieces that respect a `max_tokens` limit,
//! under one of two [`ChunkMode`]s:
//!
//! - **multi-line**: consecutive lines are packed into a chunk until the next
//!   line would exceed the limit. With `break_at_blank_line`, boundaries may
//!   only fall on blank lines, so whole paragraphs are packed instead and an
//!   oversized paragraph stays a single chunk.
//! - **single-line**: every non-blank line is its own chunk.
//!
//! Lines longer than the limit are hard-split at a space or char boundary,
//! except in multi-line mode with `break_at_blank_line` set.
//!
//! Chunk ids are `"{document_id}#{index}"`, so re-ingesting an unchanged
//! document produces the same ids and upserts in place.

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkMode {
    #[default]
    MultiLine,
    SingleLine,
}

/// Chunking knobs, as carried by [`BackendConfig`](crate::backend::BackendConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub max_tokens: usize,
    pub mode: ChunkMode,
    pub break_at_blank_line: bool,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            mode: ChunkMode::MultiLine,
            break_at_blank_line: true,
        }
    }
}

/// Split `text` into chunk texts. Empty or whitespace-only text yields none.
pub fn split_text(text: &str, policy: &ChunkPolicy) -> Vec<String> {
    let max_chars = policy.max_tokens.max(1) * CHARS_PER_TOKEN;

    match policy.mode {
        ChunkMode::SingleLine => text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .flat_map(|line| hard_split(line, max_chars))
            .collect(),
        ChunkMode::MultiLine if policy.break_at_blank_line => {
            pack(paragraphs(text), "\n\n", max_chars)
        }
        ChunkMode::MultiLine => {
            let lines = text
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.trim().is_empty())
                .flat_map(|line| hard_split(line, max_chars))
                .collect();
            pack(lines, "\n", max_chars)
        }
    }
}

/// Chunk a document, applying `splitter` in place of the built-in policy
/// when one is supplied.
pub fn chunk_document(
    document_id: &str,
    text: &str,
    policy: &ChunkPolicy,
    splitter: Option<&(dyn Fn(&str) -> Vec<String> + Send + Sync)>,
) -> Vec<Chunk> {
    let pieces = match splitter {
        Some(split) => split(text),
        None => split_text(text, policy),
    };

    pieces
        .into_iter()
        .filter(|piece| !piece.trim().is_empty())
        .enumerate()
        .map(|(index, piece)| make_chunk(document_id, index as i64, &piece))
        .collect()
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        id: format!("{}#{}", document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: content_hash(text),
    }
}

/// Blank-line separated paragraphs, with surrounding whitespace trimmed.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

/// Greedily pack pieces joined by `sep` into buffers of at most `max_chars`.
/// A piece that alone exceeds the limit is emitted as-is.
fn pack(pieces: Vec<String>, sep: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();

    for piece in pieces {
        let would_be = if buf.is_empty() {
            piece.len()
        } else {
            buf.len() + sep.len() + piece.len()
        };

        if would_be > max_chars && !buf.is_empty() {
            chunks.push(std::mem::take(&mut buf));
        }

        if !buf.is_empty() {
            buf.push_str(sep);
        }
        buf.push_str(&piece);
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }
    chunks
}

/// Split a single line into pieces of at most `max_chars` bytes, preferring
/// to break after a space.
fn hard_split(line: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = line;

    while remaining.len() > max_chars {
        let limit = snap_to_char_boundary(remaining, max_chars);
        let split_at = remaining[..limit]
            .rfind(' ')
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        let split_at = if split_at == 0 {
            // A single char wider than max_chars.
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }

    let tail = remaining.trim();
    if !tail.is_empty() {
        pieces.push(tail.to_string());
    }
    pieces
}

fn snap_to_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
