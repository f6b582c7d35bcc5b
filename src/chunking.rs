use crate::error::{RagError, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// Represents a text chunk with metadata
///
/// Offsets are measured in characters (Unicode scalar values) of the source text,
/// `end` exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Identifier of the document this chunk belongs to
    pub document_id: String,
    /// Position of this chunk within the document's chunk sequence
    pub index: usize,
    /// The actual text content of this chunk
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Estimated token count for this chunk
    pub token_count: usize,
}

impl TextChunk {
    /// Number of characters covered by this chunk
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Splits document text into overlapping character windows.
///
/// Windows are cut at a paragraph break, a sentence end or whitespace when one is
/// available in the back half of the window, and hard-cut at `chunk_size` otherwise.
/// Adjacent chunks always share exactly `overlap` characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

#[derive(Clone, Copy)]
enum Boundary {
    Paragraph,
    Sentence,
    Whitespace,
}

impl Chunker {
    /// Create a chunker; `overlap` must be smaller than `chunk_size`
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Chunker {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split text into chunks. Empty text produces no chunks.
    pub fn chunk(&self, document_id: &str, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();

        if total == 0 {
            return chunks;
        }

        let mut start = 0;
        loop {
            let hard_end = (start + self.chunk_size).min(total);
            let end = if hard_end == total {
                total
            } else {
                self.find_break(&chars, start, hard_end)
            };

            let chunk_text: String = chars[start..end].iter().collect();
            let token_count = estimate_token_count(&chunk_text);
            chunks.push(TextChunk {
                document_id: document_id.to_string(),
                index: chunks.len(),
                text: chunk_text,
                start,
                end,
                token_count,
            });

            if end == total {
                break;
            }
            // find_break never returns a position within the overlap, so this always advances
            start = end - self.overlap;
        }

        debug!(
            "Split {} characters of '{}' into {} chunks",
            total,
            document_id,
            chunks.len()
        );
        chunks
    }

    /// Pick the end of the window starting at `start`, no later than `hard_end`.
    fn find_break(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let floor = start + (self.overlap + 1).max(self.chunk_size / 2);
        if floor >= hard_end {
            return hard_end;
        }

        for boundary in [Boundary::Paragraph, Boundary::Sentence, Boundary::Whitespace] {
            if let Some(end) = (floor..=hard_end)
                .rev()
                .find(|&end| is_boundary(chars, end, boundary))
            {
                return end;
            }
        }

        hard_end
    }
}

/// Whether a chunk ending right before `end` closes on the given kind of boundary
fn is_boundary(chars: &[char], end: usize, boundary: Boundary) -> bool {
    if end < 2 {
        return false;
    }
    let last = chars[end - 1];
    let before = chars[end - 2];

    match boundary {
        Boundary::Paragraph => last == '\n' && before == '\n',
        Boundary::Sentence => last == '\n' || (last.is_whitespace() && ".!?".contains(before)),
        Boundary::Whitespace => last.is_whitespace(),
    }
}

/// Calculate approximate token count for a text
/// This is a very simple estimation - words plus punctuation
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}
