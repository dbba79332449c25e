//! Document chunking into bounded passages
//!
//! Splits raw document text into passages that respect a minimum word count
//! and a maximum token budget, preferring sentence and paragraph boundaries.
//! Chunks are contiguous slices of the input, so concatenating a document's
//! chunks in order reproduces the original text byte for byte.

use crate::config::ChunkingConfig;
use regex::Regex;

/// Approximate token count: one token per four characters, rounded up.
///
/// Deterministic and additive under concatenation (character counts add), so
/// the chunker does not need a model tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Whitespace-delimited word count.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Splits documents into bounded passages.
pub struct Chunker {
    min_words: usize,
    max_tokens: usize,
    boundary_tolerance: usize,
    boundary_re: Regex,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        // Sentence end (punctuation + optional closers + whitespace) or
        // paragraph break. Matches consume trailing whitespace so every unit
        // is a contiguous slice ending at a boundary.
        let boundary_re =
            Regex::new(r#"[.!?]["')\]]*\s+|\n{2,}"#).expect("static boundary pattern is valid");

        Self {
            min_words: config.min_words,
            max_tokens: config.max_tokens,
            boundary_tolerance: config.boundary_tolerance,
            boundary_re,
        }
    }

    /// Lazily chunk a document.
    ///
    /// Returns a restartable iterator over chunk texts; calling `chunk` again
    /// restarts from the beginning. An empty or whitespace-only document
    /// yields no chunks.
    pub fn chunk<'a>(&'a self, text: &'a str) -> DocumentChunks<'a> {
        let units = if text.trim().is_empty() {
            Vec::new()
        } else {
            self.unit_ends(text)
        };

        DocumentChunks {
            chunker: self,
            text,
            unit_ends: units,
            unit_idx: 0,
            cur_start: 0,
            cur_end: 0,
            cur_chars: 0,
        }
    }

    /// Byte offsets at which accumulation units (sentences, paragraphs) end.
    /// The final offset is always `text.len()`.
    fn unit_ends(&self, text: &str) -> Vec<usize> {
        let mut ends: Vec<usize> = self.boundary_re.find_iter(text).map(|m| m.end()).collect();
        if ends.last() != Some(&text.len()) {
            ends.push(text.len());
        }
        ends
    }

    /// Cut position for an overgrown chunk `text[start..end]`.
    ///
    /// Prefers the nearest preceding sentence end within the tolerance
    /// window, then the nearest preceding whitespace, then a hard character
    /// cut at the token budget. Always returns `start < cut <= end`.
    fn cut_point(&self, text: &str, start: usize, end: usize) -> usize {
        let budget_chars = self.max_tokens * 4;
        let target = char_floor(text, start, end, budget_chars);
        if target >= end {
            return end;
        }

        // Sentence end inside the tolerance window before the target.
        let window_start = target.saturating_sub(self.boundary_tolerance * 4).max(start);
        let mut best: Option<usize> = None;
        for m in self.boundary_re.find_iter(&text[start..target]) {
            let cut = start + m.end();
            if cut > window_start && cut > start {
                best = Some(cut);
            }
        }
        if let Some(cut) = best {
            return cut;
        }

        // Fall back to the last whitespace before the target, keeping the
        // whitespace with the head so the tail starts on a word.
        if let Some(pos) = text[start..target].rfind(char::is_whitespace) {
            let ws_end = start
                + pos
                + text[start + pos..]
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1);
            if ws_end > start {
                return ws_end;
            }
        }

        // Hard cut at the budget, at a char boundary, at least one char in.
        if target > start {
            target
        } else {
            start + text[start..].chars().next().map(char::len_utf8).unwrap_or(1)
        }
    }
}

/// Byte offset of the last char boundary within `max_chars` characters of
/// `text[start..end]`.
fn char_floor(text: &str, start: usize, end: usize, max_chars: usize) -> usize {
    let mut taken = 0;
    for (off, _) in text[start..end].char_indices() {
        if taken == max_chars {
            return start + off;
        }
        taken += 1;
    }
    end
}

/// Lazy iterator over a single document's chunks.
pub struct DocumentChunks<'a> {
    chunker: &'a Chunker,
    text: &'a str,
    unit_ends: Vec<usize>,
    unit_idx: usize,
    cur_start: usize,
    cur_end: usize,
    cur_chars: usize,
}

impl<'a> Iterator for DocumentChunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let max_tokens = self.chunker.max_tokens;

        loop {
            // Flush an overgrown accumulation (forced min_words merge or an
            // oversized unit) before considering more units: cut at the token
            // budget and carry the remainder forward.
            if self.cur_chars.div_ceil(4) > max_tokens {
                let cut = self
                    .chunker
                    .cut_point(self.text, self.cur_start, self.cur_end);
                let chunk = &self.text[self.cur_start..cut];
                self.cur_chars = self.text[cut..self.cur_end].chars().count();
                self.cur_start = cut;
                return Some(chunk);
            }

            if self.unit_idx >= self.unit_ends.len() {
                // Final chunk of the document, emitted regardless of word
                // count.
                if self.cur_start < self.cur_end {
                    let chunk = &self.text[self.cur_start..self.cur_end];
                    self.cur_start = self.cur_end;
                    self.cur_chars = 0;
                    return Some(chunk);
                }
                return None;
            }

            let unit_end = self.unit_ends[self.unit_idx];
            let unit_chars = self.text[self.cur_end..unit_end].chars().count();
            let would_overflow =
                self.cur_chars > 0 && (self.cur_chars + unit_chars).div_ceil(4) > max_tokens;

            if would_overflow
                && count_words(&self.text[self.cur_start..self.cur_end]) >= self.chunker.min_words
            {
                // Emit the running chunk; the unit starts the next one.
                let chunk = &self.text[self.cur_start..self.cur_end];
                self.cur_start = self.cur_end;
                self.cur_chars = 0;
                return Some(chunk);
            }

            // Merge the unit: either it fits, or the chunk is still short of
            // min_words and must keep growing.
            self.cur_end = unit_end;
            self.cur_chars += unit_chars;
            self.unit_idx += 1;
        }
    }
}
