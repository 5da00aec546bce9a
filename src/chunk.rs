//! Paragraph-boundary text chunker.
//!
//! Splits extracted text into pieces that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`)
//! to preserve semantic coherence within each chunk.
//!
//! [`ParagraphSplitter`] applies this to a sequence of content units. Each
//! piece inherits its unit's metadata and gains `chunk_index` (contiguous
//! from 0 within the unit) and `chunk_hash`, a SHA-256 of its text for
//! staleness detection. Unit order is preserved.

use sha2::{Digest, Sha256};

use crate::models::ContentUnit;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Post-processing applied to an extractor's output.
pub trait Splitter: Send + Sync {
    fn split(&self, units: Vec<ContentUnit>) -> Vec<ContentUnit>;
}

#[derive(Debug, Clone, Copy)]
pub struct ParagraphSplitter {
    pub max_tokens: usize,
}

impl ParagraphSplitter {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

impl Splitter for ParagraphSplitter {
    fn split(&self, units: Vec<ContentUnit>) -> Vec<ContentUnit> {
        let mut out = Vec::with_capacity(units.len());
        for unit in units {
            for (index, piece) in chunk_text(&unit.text, self.max_tokens)
                .into_iter()
                .enumerate()
            {
                let hash = text_hash(&piece);
                let chunk = ContentUnit {
                    text: piece,
                    metadata: unit.metadata.clone(),
                };
                out.push(chunk.with("chunk_index", index).with("chunk_hash", hash));
            }
        }
        out
    }
}

pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Largest index `<= at` that falls on a char boundary of `s`.
fn floor_boundary(s: &str, at: usize) -> usize {
    let mut at = at.min(s.len());
    while !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}

/// Split text into chunks on paragraph boundaries, respecting max_tokens.
/// Always returns at least one chunk.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;

    if text.is_empty() {
        return vec![String::new()];
    }

    let mut chunks = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len() // +2 for \n\n separator
        };

        if would_be > max_chars && !current_buf.is_empty() {
            chunks.push(std::mem::take(&mut current_buf));
        }

        // If a single paragraph exceeds max, split it by lines/words
        if trimmed.len() > max_chars {
            if !current_buf.is_empty() {
                chunks.push(std::mem::take(&mut current_buf));
            }
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_boundary(remaining, max_chars);
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                // A single char wider than the limit still has to make progress.
                let actual_split = if actual_split == 0 {
                    remaining
                        .char_indices()
                        .nth(1)
                        .map(|(i, _)| i)
                        .unwrap_or(remaining.len())
                } else {
                    actual_split
                };
                let piece = remaining[..actual_split].trim();
                if !piece.is_empty() {
                    chunks.push(piece.to_string());
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        chunks.push(current_buf);
    }

    // Guarantee at least one chunk
    if chunks.is_empty() {
        chunks.push(text.trim().to_string());
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 700);
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("", 700);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text, 700);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First paragraph."));
        assert!(chunks[0].contains("Third paragraph."));
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        // max_tokens=5 => max_chars=20
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text(text, 5);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 20));
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let text = "é".repeat(50);
        let chunks = chunk_text(&text, 2);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn splitter_preserves_order_and_metadata() {
        let units = vec![
            ContentUnit::new("Alpha\n\nBeta").with("sheet_index", 0usize),
            ContentUnit::new("Gamma").with("sheet_index", 1usize),
        ];
        let out = ParagraphSplitter::new(2).split(units);

        let texts: Vec<&str> = out.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["Alpha", "Beta", "Gamma"]);
        let indices: Vec<i64> = out
            .iter()
            .map(|u| u.meta("chunk_index").unwrap().as_int().unwrap())
            .collect();
        assert_eq!(indices, vec![0, 1, 0]);
        assert_eq!(out[1].meta("sheet_index").unwrap().as_int(), Some(0));
        assert_eq!(out[2].meta("sheet_index").unwrap().as_int(), Some(1));
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let units = || vec![ContentUnit::new(text)];
        let a = ParagraphSplitter::new(2).split(units());
        let b = ParagraphSplitter::new(2).split(units());
        assert_eq!(a, b);
        assert_eq!(
            a[0].meta("chunk_hash").unwrap().as_str(),
            Some(text_hash("Alpha").as_str())
        );
    }
}
