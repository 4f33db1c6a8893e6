//! Line-level layout data produced by text extraction.
//!
//! An extractor turns a source document into an [`ExtractedDocument`]: the
//! markdown-like full text plus one [`TextLine`] per visual line with its
//! font metadata. Line order and page numbers follow the source.

use serde::{Deserialize, Serialize};

/// One line of extracted text with the typographic signals used for
/// heading classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub font_size: f32,
    #[serde(default)]
    pub is_bold: bool,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub sequence_index: usize,
}

fn first_page() -> u32 {
    1
}

impl TextLine {
    pub fn new(
        text: impl Into<String>,
        font_size: f32,
        is_bold: bool,
        page: u32,
        sequence_index: usize,
    ) -> Self {
        Self {
            text: text.into(),
            font_size,
            is_bold,
            page,
            sequence_index,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// The output of the extraction collaborator for one source document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// Full text in reading order, used for table-of-contents parsing and
    /// for recovering sections the structure pass missed.
    #[serde(default)]
    pub markdown_text: String,
    #[serde(default)]
    pub lines: Vec<TextLine>,
}

impl ExtractedDocument {
    /// Re-number `sequence_index` so it matches vector position. Extractors
    /// that emit their own indices may skip lines.
    pub fn renumber(mut self) -> Self {
        for (i, line) in self.lines.iter_mut().enumerate() {
            line.sequence_index = i;
        }
        self
    }

    pub fn page_count(&self) -> u32 {
        self.lines.iter().map(|l| l.page).max().unwrap_or(0)
    }
}
