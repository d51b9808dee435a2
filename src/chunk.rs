//! Fixed-size overlapping text windows.
//!
//! Splits segment text into windows of `chunk_size` characters. Each window
//! after the first starts `chunk_size - chunk_overlap` characters after the
//! previous one; the final window holds whatever remains and may be shorter.
//!
//! Windows are measured in `char`s, never bytes, so multi-byte text is never
//! cut inside a code point. Dropping the first `chunk_overlap` characters of
//! every window after the first and concatenating reconstructs the input.
//!
//! # Example
//!
//! ```rust
//! use compliance_checker::chunk::split_text;
//!
//! let windows = split_text("abcdefghij", 4, 1);
//! assert_eq!(windows, vec!["abcd", "defg", "ghij"]);
//! ```

use sha2::{Digest, Sha256};

use crate::models::{Chunk, TextSegment};

/// Split `text` into overlapping windows.
///
/// Callers must pass `chunk_overlap < chunk_size` (enforced by config
/// validation); the step is clamped to at least one character regardless.
/// Empty input yields no windows.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<&str> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    // Byte offset of every char boundary, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let char_count = bounds.len() - 1;

    let step = chunk_size.saturating_sub(chunk_overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + chunk_size).min(char_count);
        windows.push(&text[bounds[start]..bounds[end]]);
        if end >= char_count {
            break;
        }
        start += step;
    }

    windows
}

/// Chunk every segment of one document.
///
/// Chunk ids are `chunk-{n}` numbered across the whole document in page
/// order, so they are stable for identical input.
pub fn chunk_segments(
    segments: &[TextSegment],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for segment in segments {
        for window in split_text(&segment.text, chunk_size, chunk_overlap) {
            let index = chunks.len();
            chunks.push(make_chunk(segment, index, window));
        }
    }
    chunks
}

fn make_chunk(segment: &TextSegment, index: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("chunk-{}", index),
        source: segment.source.clone(),
        page: segment.page,
        text: text.to_string(),
        hash,
    }
}
