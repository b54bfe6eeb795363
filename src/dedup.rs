// Per-tracker dedup state: word watermarks for text, reported sources for media.
// Owned by one tracker instance; never shared between trackers.

use std::collections::{HashMap, HashSet};

/// Deterministic 32-bit string hash (`h = 31·h + c`). Not for security.
pub fn hash_text(text: &str) -> u32 {
    text.chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

/// Newly read text beyond the previous watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDelta {
    pub text: String,
    pub words: usize,
}

/// Highest `words_read` reported so far, keyed by content hash.
#[derive(Debug, Default)]
pub struct WatermarkCache {
    marks: HashMap<u32, usize>,
}

impl WatermarkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watermark(&self, text: &str) -> usize {
        self.marks.get(&hash_text(text)).copied().unwrap_or(0)
    }

    /// Move the watermark for `text` up to `words_read` and return the words in between.
    /// `None` when nothing new was read. Read and write happen in this one call.
    pub fn advance(&mut self, text: &str, words_read: usize) -> Option<TextDelta> {
        if text.trim().is_empty() || words_read == 0 {
            return None;
        }

        let key = hash_text(text);
        let previous = self.marks.get(&key).copied().unwrap_or(0);
        if words_read <= previous {
            return None;
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let end = words_read.min(words.len());
        if end <= previous {
            return None;
        }

        let delta = words[previous..end].join(" ");
        if delta.is_empty() {
            return None;
        }

        self.marks.insert(key, end);
        Some(TextDelta {
            text: delta,
            words: end - previous,
        })
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

/// Media sources already reported on this page.
#[derive(Debug, Default)]
pub struct SourceSet {
    seen: HashSet<String>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once per source.
    pub fn first_sighting(&mut self, src: &str) -> bool {
        if src.is_empty() || self.seen.contains(src) {
            return false;
        }
        self.seen.insert(src.to_string())
    }

    pub fn contains(&self, src: &str) -> bool {
        self.seen.contains(src)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
