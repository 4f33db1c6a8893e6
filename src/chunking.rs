//! Chunking configuration and word-boundary windowing.
//!
//! Structural chunking happens in [`crate::structure`]; this module holds the
//! knobs it reads and the fallback splitter used when a single structural
//! piece is still larger than `max_chunk_size`.
//!
//! The default chunk size is 1024 tokens (~4K characters), which fits the
//! ColBERT document length comfortably.

use std::path::Path;

use serde::Deserialize;

use crate::rules::BoundaryProfile;

/// Approximate characters per token for English text.
const CHARS_PER_TOKEN: usize = 4;

/// Default document length in tokens
const DEFAULT_DOCUMENT_TOKENS: usize = 1024;

/// Default chunk size in characters (roughly ~1024 tokens).
pub const DEFAULT_CHUNK_SIZE: usize = DEFAULT_DOCUMENT_TOKENS * CHARS_PER_TOKEN;

/// Pieces shorter than this are merged into a neighbour.
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 40;

/// Knobs for heading classification, section boundaries and chunk sizing.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// A line is a heading candidate at `body_size * heading_size_threshold`.
    pub heading_size_threshold: f32,
    /// Bold lines below `body_size * bold_min_ratio` are never headings.
    pub bold_min_ratio: f32,
    /// Longer lines are treated as table-of-contents or paragraph artifacts.
    pub max_heading_chars: usize,
    /// Maximum chunk size in characters.
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    /// Hard cap on lines scanned for one section.
    pub max_section_lines: usize,
    /// Content lines required before a same-level heading ends a section.
    pub min_content_lines: usize,
    /// Content lines required before a transition marker ends a section.
    pub transition_min_lines: usize,
    /// Chapters with more children than this are re-checked for absorption.
    pub max_chapter_children: usize,
    /// Chapters spanning more pages than this are re-checked for absorption.
    pub max_chapter_pages: u32,
    pub profile: BoundaryProfile,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            heading_size_threshold: 1.2,
            bold_min_ratio: 0.8,
            max_heading_chars: 150,
            max_chunk_size: DEFAULT_CHUNK_SIZE,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_section_lines: 400,
            min_content_lines: 3,
            transition_min_lines: 5,
            max_chapter_children: 20,
            max_chapter_pages: 150,
            profile: BoundaryProfile::generic(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SentenceTransformersConfig {
    document_length: Option<usize>,
}

fn chars_for_tokens(tokens: usize) -> usize {
    tokens.saturating_mul(CHARS_PER_TOKEN).max(1)
}

fn load_document_length(model_dir: &Path) -> Option<usize> {
    let config_path = model_dir.join("config_sentence_transformers.json");
    let contents = std::fs::read_to_string(config_path).ok()?;
    let config: SentenceTransformersConfig =
        serde_json::from_str(&contents).ok()?;
    config.document_length
}

impl ChunkingConfig {
    /// Cap `max_chunk_size` by the embedding model's document length.
    ///
    /// For local model directories containing
    /// `config_sentence_transformers.json`, the `document_length` field is
    /// converted to characters (about 4 per token). Remote model IDs leave
    /// the configuration unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use docsift::chunking::{ChunkingConfig, DEFAULT_CHUNK_SIZE};
    ///
    /// let config = ChunkingConfig::default().capped_by_model("lightonai/ColBERT-Zero");
    /// assert_eq!(config.max_chunk_size, DEFAULT_CHUNK_SIZE);
    /// ```
    pub fn capped_by_model(mut self, model_id: &str) -> Self {
        let model_path = Path::new(model_id);
        if model_path.is_dir()
            && let Some(doc_len) = load_document_length(model_path)
        {
            self.max_chunk_size =
                self.max_chunk_size.min(chars_for_tokens(doc_len));
        }
        self
    }
}

/// A window of a larger text, produced by [`split_text`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextWindow {
    pub text: String,
    /// Zero-based window index.
    pub index: usize,
    /// Byte offset where this window starts in the original text.
    pub start_offset: usize,
}

/// Split text into consecutive, non-overlapping windows of at most
/// `max_chars` characters, breaking at whitespace where possible.
///
/// If the text is shorter than `max_chars`, returns a single window. No
/// window exceeds `max_chars`; when the last full window would leave a tail
/// shorter than a quarter window, the remainder is split into two halves.
/// Handles UTF-8 multi-byte characters.
///
/// # Examples
///
/// ```
/// use docsift::chunking::split_text;
///
/// let windows = split_text("Hello, world!", 1000);
/// assert_eq!(windows.len(), 1);
///
/// let text = "word ".repeat(500);
/// let windows = split_text(&text, 1000);
/// assert!(windows.len() >= 2);
/// ```
pub fn split_text(text: &str, max_chars: usize) -> Vec<TextWindow> {
    let max_chars = max_chars.max(1);
    let char_count = text.chars().count();

    if char_count <= max_chars {
        return vec![TextWindow {
            text: text.to_string(),
            index: 0,
            start_offset: 0,
        }];
    }

    // Build a map of char index -> byte index for O(1) lookups
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut windows = Vec::new();
    let mut start_char = 0;

    while start_char < char_count {
        let remaining = char_count - start_char;
        let end_char = if remaining <= max_chars {
            char_count
        } else {
            // A tail under a quarter window is avoided by splitting what is
            // left into two halves instead.
            let step = if remaining - max_chars < max_chars / 4 {
                remaining.div_ceil(2)
            } else {
                max_chars
            };
            find_word_boundary_char(text, &char_to_byte, start_char, start_char + step)
        };

        let start_byte = char_to_byte[start_char];
        let end_byte = char_to_byte[end_char];
        let slice = &text[start_byte..end_byte];
        if !slice.trim().is_empty() {
            windows.push(TextWindow {
                text: slice.trim().to_string(),
                index: windows.len(),
                start_offset: start_byte,
            });
        }
        start_char = end_char;
    }

    windows
}

/// Find a word boundary before `pos_char`, looking back at most 100
/// characters and never before `floor_char`.
fn find_word_boundary_char(
    text: &str,
    char_to_byte: &[usize],
    floor_char: usize,
    pos_char: usize,
) -> usize {
    let search_start_char = pos_char.saturating_sub(100).max(floor_char + 1);
    if search_start_char >= pos_char {
        return pos_char;
    }

    let start_byte = char_to_byte[search_start_char];
    let end_byte = char_to_byte[pos_char];
    let search_region = &text[start_byte..end_byte];

    if let Some(ws_byte_offset) =
        search_region.rfind(|c: char| c.is_whitespace())
    {
        let ws_byte = start_byte + ws_byte_offset;
        if let Ok(char_idx) = char_to_byte.binary_search(&ws_byte) {
            return char_idx + 1;
        }
    }

    pos_char
}
