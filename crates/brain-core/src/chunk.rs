//! Recursive character text splitter.
//!
//! Splits record content into overlapping windows suitable for embedding.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from `["\n\n", "\n", " ", ""]` that occurs in
//!    the text (`""` splits into single characters).
//! 2. Split the text *before* every occurrence of that separator, so the
//!    separator stays attached to the start of the following piece.
//! 3. Pieces shorter than `chunk_size` are buffered; longer pieces flush the
//!    buffer and are split again with the remaining, finer separators.
//! 4. Buffered pieces are merged greedily into windows of at most
//!    `chunk_size` characters. When a window is emitted, pieces are dropped
//!    from its front until at most `chunk_overlap` characters remain, and
//!    those carry over into the next window.
//! 5. Every window is trimmed; empty windows are dropped.
//!
//! Lengths are measured in characters, not bytes. The output depends only
//! on the text and the parameters.
//!
//! # Example
//!
//! ```rust
//! use brain_core::chunk::{split_text, ChunkParams};
//!
//! let chunks = split_text("Hello world, this is a test note.", ChunkParams::default());
//! assert_eq!(chunks, vec!["Hello world, this is a test note.".to_string()]);
//! ```

use std::collections::VecDeque;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{Chunk, MemoryRecord, Metadata, NOTE_ID_KEY, USER_ID_KEY};

/// Default window size, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between consecutive windows, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk_size must be > 0")]
    ZeroSize,
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// Window size and overlap for [`split_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkParams {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::ZeroSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkError::OverlapTooLarge {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Split `text` into overlapping windows of at most `chunk_size` characters.
pub fn split_text(text: &str, params: ChunkParams) -> Vec<String> {
    split_recursive(text, SEPARATORS, params)
}

/// Chunk a stored record for indexing.
///
/// Every chunk carries the record's metadata plus `noteId`, `userId` and a
/// `loc.lines` span (1-based, inclusive). `noteId` and `userId` always
/// override same-named keys in the record's metadata.
pub fn chunk_memory(record: &MemoryRecord, params: ChunkParams) -> Vec<Chunk> {
    let mut base = record.metadata.clone();
    base.insert(NOTE_ID_KEY.to_string(), Value::String(record.id.clone()));
    base.insert(USER_ID_KEY.to_string(), Value::String(record.user_id.clone()));
    chunk_with_metadata(&record.content, params, &base)
}

/// Split `text` and stamp `base` metadata plus a line span onto each chunk.
pub fn chunk_with_metadata(text: &str, params: ChunkParams, base: &Metadata) -> Vec<Chunk> {
    let pieces = split_text(text, params);
    let spans = line_spans(text, &pieces);

    pieces
        .into_iter()
        .zip(spans)
        .enumerate()
        .map(|(index, (piece, (from, to)))| {
            let mut metadata = base.clone();
            metadata.insert(
                "loc".to_string(),
                json!({ "lines": { "from": from, "to": to } }),
            );
            make_chunk(index, piece, metadata)
        })
        .collect()
}

fn make_chunk(index: usize, text: String, metadata: Metadata) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        index,
        text,
        hash,
        metadata,
    }
}

fn split_recursive(text: &str, separators: &[&'static str], params: ChunkParams) -> Vec<String> {
    let (separator, finer) = pick_separator(text, separators);
    let mut chunks = Vec::new();
    let mut buffered: Vec<&str> = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < params.chunk_size {
            buffered.push(piece);
            continue;
        }

        if !buffered.is_empty() {
            chunks.extend(merge_pieces(&buffered, params));
            buffered.clear();
        }

        if finer.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
        } else {
            chunks.extend(split_recursive(piece, finer, params));
        }
    }

    if !buffered.is_empty() {
        chunks.extend(merge_pieces(&buffered, params));
    }

    chunks
}

fn pick_separator<'s>(
    text: &str,
    separators: &'s [&'static str],
) -> (&'static str, &'s [&'static str]) {
    for (i, &separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return (separator, &[]);
        }
        if text.contains(separator) {
            return (separator, &separators[i + 1..]);
        }
    }
    (separators.last().copied().unwrap_or(""), &[])
}

/// Split before each (possibly overlapping) occurrence of `separator`.
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (i, _) in text.char_indices() {
        if i > start && text[i..].starts_with(separator) {
            pieces.push(&text[start..i]);
            start = i;
        }
    }
    pieces.push(&text[start..]);
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn merge_pieces(pieces: &[&str], params: ChunkParams) -> Vec<String> {
    let mut windows = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);

        if total + len > params.chunk_size && !current.is_empty() {
            if let Some(window) = join_window(&current) {
                windows.push(window);
            }
            while total > params.chunk_overlap || (total + len > params.chunk_size && total > 0) {
                match current.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }

        current.push_back(piece);
        total += len;
    }

    if let Some(window) = join_window(&current) {
        windows.push(window);
    }

    windows
}

fn join_window(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Compute the 1-based line span of each chunk inside `text`.
///
/// Chunks are located in order, each search starting just past the start
/// of the previous chunk, so overlapping windows resolve to the right
/// occurrence.
fn line_spans(text: &str, chunks: &[String]) -> Vec<(usize, usize)> {
    let mut line = 1usize;
    let mut prev: Option<(usize, usize)> = None;
    let mut spans = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let search_from = match prev {
            Some((start, _)) => next_char_boundary(text, start + 1),
            None => 0,
        };
        let index = text[search_from..]
            .find(chunk.as_str())
            .map(|offset| search_from + offset)
            .unwrap_or(search_from);

        match prev {
            None => line += count_newlines(&text[..index]),
            Some((prev_start, prev_len)) => {
                let prev_end = (prev_start + prev_len).min(text.len());
                if prev_end < index {
                    line += count_newlines(&text[prev_end..index]);
                } else if prev_end > index {
                    line = line.saturating_sub(count_newlines(&text[index..prev_end]));
                }
            }
        }

        let inner = count_newlines(chunk);
        spans.push((line, line + inner));
        line += inner;
        prev = Some((index, chunk.len()));
    }

    spans
}

fn next_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index.min(text.len())
}

fn count_newlines(text: &str) -> usize {
    text.matches('\n').count()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn params(size: usize, overlap: usize) -> ChunkParams {
        ChunkParams::new(size, overlap).unwrap()
    }

    #[test]
    fn test_short_text_single_chunk() {
        let text = "Hello world, this is a test note.";
        let chunks = split_text(text, ChunkParams::default());
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_short_text_is_trimmed() {
        let chunks = split_text("  padded note \n", ChunkParams::default());
        assert_eq!(chunks, vec!["padded note".to_string()]);
    }

    #[test]
    fn test_whitespace_only_yields_nothing() {
        assert!(split_text(" \n\n ", ChunkParams::default()).is_empty());
    }

    #[test]
    fn test_word_windows_overlap() {
        let chunks = split_text("aaa bbb ccc ddd eee", params(10, 4));
        assert_eq!(chunks, vec!["aaa bbb", "bbb ccc", "ccc ddd", "ddd eee"]);
    }

    #[test]
    fn test_zero_overlap_falls_back_to_finer_separators() {
        let chunks = split_text("line one\nline two\nline three", params(10, 0));
        assert_eq!(chunks, vec!["line one", "line two", "line", "three"]);
    }

    #[test]
    fn test_line_spans() {
        let text = "line one\nline two\nline three";
        let chunks = chunk_with_metadata(text, params(10, 0), &Metadata::new());
        let spans: Vec<(u64, u64)> = chunks
            .iter()
            .map(|c| {
                let lines = &c.metadata["loc"]["lines"];
                (lines["from"].as_u64().unwrap(), lines["to"].as_u64().unwrap())
            })
            .collect();
        assert_eq!(spans, vec![(1, 1), (2, 2), (3, 3), (3, 3)]);
    }

    #[test]
    fn test_long_text_respects_window_and_overlaps() {
        let text = (0..120)
            .map(|i| format!("Sentence number {} talks about something memorable.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text(&text, ChunkParams::default());

        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= DEFAULT_CHUNK_SIZE);
        }
        for pair in chunks.windows(2) {
            let head: String = pair[1].chars().take(40).collect();
            assert!(
                pair[0].contains(&head),
                "expected next window to start inside the previous one"
            );
        }
    }

    #[test]
    fn test_paragraphs_preferred_over_lines() {
        let para = "word ".repeat(150);
        let text = format!("{}\n\n{}\n\n{}", para.trim(), para.trim(), para.trim());
        let chunks = split_text(&text, ChunkParams::default());
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(!c.contains("\n\n"), "paragraph break should end a window");
        }
    }

    #[test]
    fn test_multibyte_counted_in_chars() {
        let text = "ééééé ééééé ééééé";
        let chunks = split_text(text, params(5, 0));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.chars().count() <= 5, "chunk too long: {:?}", c);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma.\n\nDelta epsilon.\nZeta eta theta iota kappa.";
        let a = chunk_with_metadata(text, params(12, 3), &Metadata::new());
        let b = chunk_with_metadata(text, params(12, 3), &Metadata::new());
        assert_eq!(a, b);
    }

    #[test]
    fn test_params_validation() {
        assert_eq!(ChunkParams::new(0, 0), Err(ChunkError::ZeroSize));
        assert_eq!(
            ChunkParams::new(100, 100),
            Err(ChunkError::OverlapTooLarge {
                size: 100,
                overlap: 100
            })
        );
        assert!(ChunkParams::new(1000, 200).is_ok());
    }

    #[test]
    fn test_chunk_memory_stamps_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("title".into(), json!("Test"));
        metadata.insert("noteId".into(), json!("spoofed"));
        let record = MemoryRecord {
            id: "note-1".into(),
            user_id: "user-1".into(),
            content: "Hello world, this is a test note.".into(),
            metadata,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let chunks = chunk_memory(&record, ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        let meta = &chunks[0].metadata;
        assert_eq!(meta["title"], json!("Test"));
        assert_eq!(meta[NOTE_ID_KEY], json!("note-1"));
        assert_eq!(meta[USER_ID_KEY], json!("user-1"));
        assert_eq!(chunks[0].hash.len(), 64);
    }
}
