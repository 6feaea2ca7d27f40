//! Token-bounded chunking with overlap.
//!
//! Token counting is word-approximated: a token is a unicode word as
//! segmented by UAX #29. One scheme everywhere: the same counter sizes
//! chunks at ingestion and fills `token_count` in chunk records, so
//! thresholds stay comparable.
//!
//! Two strategies:
//!
//! - [`ChunkStrategy::ParagraphFirst`] (the service default) packs whole
//!   paragraphs greedily up to the target; a single oversized paragraph falls
//!   back to token slicing.
//! - [`ChunkStrategy::TokenStrided`] advances a fixed window by
//!   `target - overlap` tokens.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use unicode_segmentation::UnicodeSegmentation;

static PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").unwrap());

/// Chunking strategy selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    ParagraphFirst,
    TokenStrided,
}

impl Default for ChunkStrategy {
    fn default() -> Self {
        Self::ParagraphFirst
    }
}

/// Count tokens in a text fragment.
#[must_use]
pub fn count_tokens(text: &str) -> usize {
    text.unicode_words().count()
}

/// Splits text into token-bounded chunks.
#[derive(Clone, Copy, Debug)]
pub struct Chunker {
    target_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    /// Create a chunker. `overlap_tokens` must be smaller than
    /// `target_tokens`; config validation enforces this before we get here.
    #[must_use]
    pub fn new(target_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            target_tokens,
            overlap_tokens,
        }
    }

    /// Chunk a flattened document with the given strategy.
    #[must_use]
    pub fn chunk(&self, text: &str, strategy: ChunkStrategy) -> Vec<String> {
        match strategy {
            ChunkStrategy::ParagraphFirst => self.chunk_by_paragraphs(text),
            ChunkStrategy::TokenStrided => self.chunk_by_tokens(text),
        }
    }

    /// Greedily pack paragraphs until adding the next one would exceed the
    /// target; oversized paragraphs are token-sliced on their own.
    fn chunk_by_paragraphs(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = 0usize;

        for paragraph in PARAGRAPH_RE.split(text) {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            let paragraph_tokens = count_tokens(paragraph);

            if paragraph_tokens > self.target_tokens {
                if !current.is_empty() {
                    chunks.push(current.join("\n\n"));
                    current.clear();
                    current_tokens = 0;
                }
                chunks.extend(self.chunk_by_tokens(paragraph));
            } else if current_tokens + paragraph_tokens > self.target_tokens {
                if !current.is_empty() {
                    chunks.push(current.join("\n\n"));
                }
                current = vec![paragraph];
                current_tokens = paragraph_tokens;
            } else {
                current.push(paragraph);
                current_tokens += paragraph_tokens;
            }
        }

        if !current.is_empty() {
            chunks.push(current.join("\n\n"));
        }

        chunks
    }

    /// Fixed window of `target` tokens advanced by `target - overlap`.
    /// Slicing happens on word boundaries of the original text, so
    /// punctuation between words survives.
    fn chunk_by_tokens(&self, text: &str) -> Vec<String> {
        let words: Vec<(usize, &str)> = text.unicode_word_indices().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let stride = self.target_tokens.saturating_sub(self.overlap_tokens).max(1);
        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            let end = (start + self.target_tokens).min(words.len());
            let byte_start = words[start].0;
            let (last_offset, last_word) = words[end - 1];
            let byte_end = last_offset + last_word.len();
            chunks.push(text[byte_start..byte_end].to_string());

            if end == words.len() {
                break;
            }
            start += stride;
        }

        chunks
    }
}
