//! Adapters from source files to [`ExtractedDocument`].
//!
//! PDF layout analysis happens outside this crate: an external tool writes
//! a layout JSON file (`{markdown_text, lines: [TextLine]}`) which
//! [`LayoutJsonExtractor`] reads. Markdown and plain text are converted
//! here, with markdown heading depth mapped onto synthetic font sizes so the
//! same classifier works on every input.

use std::{
    path::Path,
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    error::{Error, Result},
    layout::{ExtractedDocument, TextLine},
};

/// Body font size assumed for formats without typography.
pub const SYNTHETIC_BODY_SIZE: f32 = 10.0;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["json", "md", "markdown", "txt"];

static ATX_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*\s*$").unwrap());
static BOLD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\*\*(.+)\*\*|__(.+)__)$").unwrap());
static PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*<!--\s*page\s+(\d+)\s*-->\s*$").unwrap());

pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, path: &Path) -> bool;

    fn extract(&self, path: &Path) -> Result<ExtractedDocument>;
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::Extraction {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn ensure_text(path: &Path, doc: ExtractedDocument) -> Result<ExtractedDocument> {
    if doc.lines.iter().all(TextLine::is_blank) {
        return Err(Error::Extraction {
            path: path.to_path_buf(),
            reason: "no text lines".to_string(),
        });
    }
    Ok(doc.renumber())
}

/// Reads layout JSON written by an external PDF layout tool.
pub struct LayoutJsonExtractor;

impl TextExtractor for LayoutJsonExtractor {
    fn name(&self) -> &'static str {
        "layout-json"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["json"])
    }

    fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        let raw = read_text(path)?;
        let mut doc: ExtractedDocument =
            serde_json::from_str(&raw).map_err(|e| Error::Extraction {
                path: path.to_path_buf(),
                reason: format!("invalid layout JSON: {e}"),
            })?;

        if doc.lines.is_empty() && !doc.markdown_text.trim().is_empty() {
            doc.lines = markdown_to_document(&doc.markdown_text, SYNTHETIC_BODY_SIZE).lines;
        }
        if doc.markdown_text.trim().is_empty() {
            doc.markdown_text = doc
                .lines
                .iter()
                .map(|l| l.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
        }
        ensure_text(path, doc)
    }
}

pub struct MarkdownExtractor;

impl TextExtractor for MarkdownExtractor {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["md", "markdown"])
    }

    fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        ensure_text(path, markdown_to_document(&read_text(path)?, SYNTHETIC_BODY_SIZE))
    }
}

/// Every line at body size; page breaks on form feeds.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["txt"])
    }

    fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        ensure_text(path, plain_text_to_document(&read_text(path)?, SYNTHETIC_BODY_SIZE))
    }
}

pub fn default_extractors() -> Vec<Box<dyn TextExtractor>> {
    vec![
        Box::new(LayoutJsonExtractor),
        Box::new(MarkdownExtractor),
        Box::new(PlainTextExtractor),
    ]
}

/// Extract with the first extractor that supports the path.
pub fn extract_path(path: &Path) -> Result<ExtractedDocument> {
    default_extractors()
        .iter()
        .find(|e| e.supports(path))
        .ok_or_else(|| Error::Extraction {
            path: path.to_path_buf(),
            reason: "unsupported file type".to_string(),
        })?
        .extract(path)
}

/// Font size standing in for a markdown heading of depth `depth` (1-6):
/// `#` is 2.2x body, `######` 1.2x.
pub fn heading_font_size(depth: usize, body_size: f32) -> f32 {
    body_size * (1.0 + 0.2 * (7 - depth.clamp(1, 6)) as f32)
}

/// Tracks page numbers across form feeds and `<!-- page N -->` markers.
struct PageCursor {
    page: u32,
}

impl PageCursor {
    /// Advance for `raw` and return the text left once markers are removed,
    /// or `None` when the line was only a marker.
    fn advance<'t>(&mut self, raw: &'t str) -> Option<&'t str> {
        if let Some(caps) = PAGE_MARKER.captures(raw) {
            if let Some(page) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                self.page = page;
            }
            return None;
        }
        let mut text = raw;
        while let Some((_, rest)) = text.split_once('\x0c') {
            self.page += 1;
            text = rest;
        }
        Some(text)
    }
}

pub fn markdown_to_document(text: &str, body_size: f32) -> ExtractedDocument {
    let mut cursor = PageCursor { page: 1 };
    let mut lines = Vec::new();
    let mut kept = Vec::new();
    let mut in_fence = false;

    for raw in text.lines() {
        let Some(line) = cursor.advance(raw) else {
            continue;
        };
        kept.push(line);
        let trimmed = line.trim();

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }

        let seq = lines.len();
        if in_fence {
            lines.push(TextLine::new(line.trim_end(), body_size, false, cursor.page, seq));
        } else if let Some(caps) = ATX_HEADING.captures(trimmed) {
            let depth = caps[1].len();
            lines.push(TextLine::new(
                &caps[2],
                heading_font_size(depth, body_size),
                false,
                cursor.page,
                seq,
            ));
        } else if let Some(caps) = BOLD_LINE.captures(trimmed) {
            let inner = caps.get(1).or_else(|| caps.get(2)).map_or(trimmed, |m| m.as_str());
            lines.push(TextLine::new(inner.trim(), body_size, true, cursor.page, seq));
        } else {
            lines.push(TextLine::new(trimmed, body_size, false, cursor.page, seq));
        }
    }

    ExtractedDocument {
        markdown_text: kept.join("\n"),
        lines,
    }
}

pub fn plain_text_to_document(text: &str, body_size: f32) -> ExtractedDocument {
    let mut cursor = PageCursor { page: 1 };
    let mut lines = Vec::new();
    let mut kept = Vec::new();

    for raw in text.lines() {
        let Some(line) = cursor.advance(raw) else {
            continue;
        };
        kept.push(line);
        if !line.trim().is_empty() {
            let seq = lines.len();
            lines.push(TextLine::new(line.trim(), body_size, false, cursor.page, seq));
        }
    }

    ExtractedDocument {
        markdown_text: kept.join("\n"),
        lines,
    }
}
