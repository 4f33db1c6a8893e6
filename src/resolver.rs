//! Complete-content resolution for search hits.
//!
//! A hit may be one window of a longer section, or a stub whose body the
//! structure pass lost. Resolvers are tried in order and the first that
//! returns content wins.

use std::collections::HashSet;

use tracing::debug;

use crate::{
    catalog::DocumentArtifacts,
    chunk::Chunk,
    extraction::extract_path,
    normalize::{normalize_for_match, normalize_title},
    toc::IndexExtractor,
    validation::capture_section,
};

/// Content shorter than this (in characters, title excluded) is a stub.
pub const STUB_CHARS: usize = 40;

/// Lines captured at most when rescanning the source file.
pub const RESCAN_MAX_LINES: usize = 50;

pub trait ContentResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, document: &DocumentArtifacts, chunk: &Chunk) -> Option<String>;
}

fn is_stub(content: &str, min_chars: usize) -> bool {
    content.trim().chars().count() < min_chars
}

/// The chunk's own section: every window sharing its provenance key,
/// joined in ordinal order.
pub struct DirectLookup {
    pub min_chars: usize,
}

impl ContentResolver for DirectLookup {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn resolve(&self, document: &DocumentArtifacts, chunk: &Chunk) -> Option<String> {
        let mut parts: Vec<&Chunk> = document
            .chunks
            .iter()
            .map(AsRef::as_ref)
            .filter(|c| c.provenance == chunk.provenance)
            .collect();
        if parts.is_empty() {
            parts.push(chunk);
        }
        parts.sort_by_key(|c| c.ordinal);

        let content = parts
            .iter()
            .map(|c| c.content.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        (!is_stub(&content, self.min_chars)).then_some(content)
    }
}

/// Another chunk of the same document under the same normalized title,
/// preferring the longest.
pub struct TitleFallback {
    pub min_chars: usize,
}

impl ContentResolver for TitleFallback {
    fn name(&self) -> &'static str {
        "title"
    }

    fn resolve(&self, document: &DocumentArtifacts, chunk: &Chunk) -> Option<String> {
        let wanted = normalize_title(&chunk.title);
        if wanted.is_empty() {
            return None;
        }
        document
            .chunks
            .iter()
            .filter(|c| c.ordinal != chunk.ordinal && normalize_title(&c.title) == wanted)
            .map(|c| c.content.trim())
            .filter(|content| !is_stub(content, self.min_chars))
            .max_by_key(|content| content.chars().count())
            .map(str::to_string)
    }
}

/// Re-read the source file and capture from the title line to the next
/// major heading.
pub struct SourceRescan {
    pub max_lines: usize,
}

impl ContentResolver for SourceRescan {
    fn name(&self) -> &'static str {
        "rescan"
    }

    fn resolve(&self, document: &DocumentArtifacts, chunk: &Chunk) -> Option<String> {
        let extracted = match extract_path(&document.record.source_path) {
            Ok(extracted) => extracted,
            Err(e) => {
                debug!(error = %e, "source rescan unavailable");
                return None;
            }
        };
        let text = &extracted.markdown_text;
        let index = IndexExtractor::default().extract(text);
        let lines: Vec<&str> = text.lines().collect();
        let own = normalize_for_match(&chunk.title);
        let others: HashSet<String> = document
            .chunks
            .iter()
            .map(|c| normalize_for_match(&c.title))
            .filter(|t| !t.is_empty() && *t != own)
            .collect();

        capture_section(&lines, &chunk.title, &others, self.max_lines, |i| index.in_toc(i))
    }
}

/// Direct lookup, then same-title fallback, then source rescan.
pub fn default_chain() -> Vec<Box<dyn ContentResolver>> {
    vec![
        Box::new(DirectLookup {
            min_chars: STUB_CHARS,
        }),
        Box::new(TitleFallback {
            min_chars: STUB_CHARS,
        }),
        Box::new(SourceRescan {
            max_lines: RESCAN_MAX_LINES,
        }),
    ]
}

/// Complete content for `chunk`, falling back to its stored content when
/// every resolver comes up empty.
pub fn resolve_content(
    chain: &[Box<dyn ContentResolver>],
    document: &DocumentArtifacts,
    chunk: &Chunk,
) -> String {
    for resolver in chain {
        if let Some(content) = resolver.resolve(document, chunk) {
            debug!(resolver = resolver.name(), chunk = %chunk.id, "content resolved");
            return content;
        }
    }
    chunk.content.clone()
}
