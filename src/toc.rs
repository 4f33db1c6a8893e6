//! Document index extraction.
//!
//! The preferred source is the printed table of contents. When the document
//! has none, the index is derived from the section tree, and as a last resort
//! from the flat list of detected headings. Each source carries a confidence.

use std::{
    collections::{BTreeSet, HashMap},
    sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    doc_id::stable_hash,
    normalize::normalize_title,
    structure::{DetectedHeading, DocumentStructure, Section},
};

static TOC_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:#{1,6}\s*)?(?:table of contents|contents)\s*:?$").unwrap()
});
static CHAPTER_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^((?:chapter|appendix|part)\s+(?:\d+|[ivxlcdm]+|[a-z]))\b[\s.:–-]*(.*?)(?:\s*(?:[.·…_]\s*){2,}|\s+)(\d{1,4})$",
    )
    .unwrap()
});
static CHAPTER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:#{1,6}\s*)?((?:chapter|appendix|part)\s+(?:\d+|[ivxlcdm]+|[a-z]))\b[\s.:–-]*(.*)$")
        .unwrap()
});
static NUMBERED_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)*)\.?\s+(.+?)(?:\s*(?:[.·…_]\s*){2,}|\s+)(\d{1,4})$").unwrap()
});
static LEADER_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*(?:[.·…_]\s*){3,}(\d{1,4})$").unwrap()
});
static SPACED_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*\S)\s{2,}(\d{1,4})$").unwrap());
static MARKDOWN_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());

/// One entry of the document index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub title: String,
    pub page: Option<u32>,
    pub level: u8,
    pub parent_id: Option<String>,
    /// Derived from the normalized title and level, so re-extracting the
    /// same document yields the same ids.
    pub entry_id: String,
}

/// Where an index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMethod {
    TableOfContents,
    Structure,
    HeadingMap,
    None,
}

impl IndexMethod {
    pub fn confidence(&self) -> f32 {
        match self {
            IndexMethod::TableOfContents => 0.9,
            IndexMethod::Structure => 0.6,
            IndexMethod::HeadingMap => 0.4,
            IndexMethod::None => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMethod::TableOfContents => "table_of_contents",
            IndexMethod::Structure => "structure",
            IndexMethod::HeadingMap => "heading_map",
            IndexMethod::None => "none",
        }
    }
}

/// An entry with its children, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexNode {
    pub entry: IndexEntry,
    pub children: Vec<IndexNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentIndex {
    /// Entries in document order.
    pub entries: Vec<IndexEntry>,
    pub method: IndexMethod,
    /// Line range of the printed table of contents within the full text.
    pub toc_lines: Option<(usize, usize)>,
}

impl DocumentIndex {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            method: IndexMethod::None,
            toc_lines: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn confidence(&self) -> f32 {
        self.method.confidence()
    }

    /// True when `line` (0-based, in the full text) is part of the printed
    /// table of contents.
    pub fn in_toc(&self, line: usize) -> bool {
        self.toc_lines
            .is_some_and(|(start, end)| line >= start && line < end)
    }

    /// Entries arranged by `parent_id`.
    pub fn hierarchy(&self) -> Vec<IndexNode> {
        let mut children: HashMap<Option<&str>, Vec<&IndexEntry>> = HashMap::new();
        for entry in &self.entries {
            children
                .entry(entry.parent_id.as_deref())
                .or_default()
                .push(entry);
        }

        fn build<'a>(
            parent: Option<&'a str>,
            children: &HashMap<Option<&'a str>, Vec<&'a IndexEntry>>,
        ) -> Vec<IndexNode> {
            children
                .get(&parent)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|&entry| IndexNode {
                            entry: entry.clone(),
                            children: build(Some(entry.entry_id.as_str()), children),
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
        build(None, &children)
    }
}

/// A table-of-contents line before levels and parents are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub title: String,
    pub page: Option<u32>,
    pub indent: usize,
    /// Level implied by the line shape (chapter label or dotted number).
    pub explicit_level: Option<u8>,
    pub is_chapter: bool,
}

fn has_letter(s: &str) -> bool {
    s.chars().any(char::is_alphabetic)
}

/// Parse one table-of-contents line: chapter entries, numbered entries,
/// dotted-leader entries and space-separated entries, in that order.
pub fn parse_entry_line(line: &str) -> Option<RawEntry> {
    let expanded = line.replace('\t', "    ");
    let indent = expanded.len() - expanded.trim_start().len();
    let text = expanded.trim();
    if text.is_empty() || text.chars().count() > 200 {
        return None;
    }

    let page = |s: &str| s.parse::<u32>().ok();

    if let Some(caps) = CHAPTER_ENTRY.captures(text) {
        let rest = caps[2].trim();
        let title = if has_letter(rest) { rest } else { caps[1].trim() };
        return Some(RawEntry {
            title: title.to_string(),
            page: page(&caps[3]),
            indent,
            explicit_level: Some(1),
            is_chapter: true,
        });
    }

    if let Some(caps) = NUMBERED_ENTRY.captures(text)
        && has_letter(&caps[2])
    {
        let depth = caps[1].split('.').count().min(u8::MAX as usize) as u8;
        return Some(RawEntry {
            title: format!("{} {}", &caps[1], caps[2].trim()),
            page: page(&caps[3]),
            indent,
            explicit_level: Some(depth),
            is_chapter: false,
        });
    }

    let caps = LEADER_ENTRY
        .captures(text)
        .or_else(|| SPACED_ENTRY.captures(text))?;
    let title = caps[1].trim().trim_end_matches(['.', '·', '…', '_']).trim();
    if !has_letter(title) {
        return None;
    }
    Some(RawEntry {
        title: title.to_string(),
        page: page(&caps[2]),
        indent,
        explicit_level: None,
        is_chapter: false,
    })
}

/// True when the line looks like a table-of-contents entry.
pub fn looks_like_toc_entry(line: &str) -> bool {
    parse_entry_line(line).is_some()
}

/// A chapter label line without a page number ("Chapter 2 Installing").
fn chapter_line_title(line: &str) -> Option<String> {
    let text = line.trim();
    let caps = CHAPTER_LINE.captures(text)?;
    let rest = caps[2].trim();
    Some(if has_letter(rest) { rest } else { caps[1].trim() }.to_string())
}

fn entry_id(title: &str, level: u8, occurrence: usize) -> String {
    let hash = stable_hash(&[
        normalize_title(title).as_bytes(),
        &[level],
        &(occurrence as u64).to_le_bytes(),
    ]);
    format!("{hash:016x}")
}

/// Assign ids and parents with a stack: an entry's parent is the nearest
/// preceding entry with a smaller level.
fn link_entries(raw: Vec<(String, Option<u32>, u8)>) -> Vec<IndexEntry> {
    let mut occurrences: HashMap<(String, u8), usize> = HashMap::new();
    let mut stack: Vec<(u8, String)> = Vec::new();
    let mut entries = Vec::with_capacity(raw.len());

    for (title, page, level) in raw {
        let level = level.max(1);
        let occurrence = occurrences
            .entry((normalize_title(&title), level))
            .and_modify(|n| *n += 1)
            .or_insert(0);
        let id = entry_id(&title, level, *occurrence);

        while stack.last().is_some_and(|(l, _)| *l >= level) {
            stack.pop();
        }
        let parent_id = stack.last().map(|(_, id)| id.clone());
        stack.push((level, id.clone()));

        entries.push(IndexEntry {
            title,
            page,
            level,
            parent_id,
            entry_id: id,
        });
    }
    entries
}

/// Extracts the document index.
#[derive(Debug, Clone)]
pub struct IndexExtractor {
    /// Lines scanned after a contents marker.
    pub max_toc_lines: usize,
    /// Consecutive non-entry lines that end the table.
    pub max_misses: usize,
}

impl Default for IndexExtractor {
    fn default() -> Self {
        Self {
            max_toc_lines: 300,
            max_misses: 8,
        }
    }
}

impl IndexExtractor {
    /// Parse the printed table of contents. Returns an empty index when the
    /// text has none.
    pub fn extract(&self, full_text: &str) -> DocumentIndex {
        let lines: Vec<&str> = full_text.lines().collect();

        for (marker, line) in lines.iter().enumerate() {
            if !TOC_MARKER.is_match(line.trim()) {
                continue;
            }
            let (raw, end) = self.scan_region(&lines, marker + 1);
            if raw.len() >= 2 {
                let entries = link_entries(assign_levels(raw));
                return DocumentIndex {
                    entries,
                    method: IndexMethod::TableOfContents,
                    toc_lines: Some((marker, end)),
                };
            }
        }
        DocumentIndex::empty()
    }

    fn scan_region(&self, lines: &[&str], start: usize) -> (Vec<RawEntry>, usize) {
        let mut raw: Vec<RawEntry> = Vec::new();
        let mut misses = 0;
        let mut end = start;
        let limit = (start + self.max_toc_lines).min(lines.len());

        let mut i = start;
        while i < limit {
            let line = lines[i];
            if line.trim().is_empty() {
                i += 1;
                continue;
            }
            if let Some(entry) = parse_entry_line(line) {
                raw.push(entry);
                misses = 0;
                end = i + 1;
                i += 1;
                continue;
            }

            if let Some(title) = chapter_line_title(line) {
                // A chapter label without a page is an entry only when the
                // next non-blank line continues the table.
                let next = lines[i + 1..limit].iter().find(|l| !l.trim().is_empty());
                if next.is_some_and(|l| looks_like_toc_entry(l)) {
                    let expanded = line.replace('\t', "    ");
                    raw.push(RawEntry {
                        title,
                        page: None,
                        indent: expanded.len() - expanded.trim_start().len(),
                        explicit_level: Some(1),
                        is_chapter: true,
                    });
                    misses = 0;
                    end = i + 1;
                    i += 1;
                    continue;
                }
                if !raw.is_empty() {
                    break;
                }
            } else if !raw.is_empty() && MARKDOWN_HEADING.is_match(line.trim()) {
                break;
            }

            misses += 1;
            if misses > self.max_misses {
                break;
            }
            i += 1;
        }
        (raw, end)
    }

    /// Table of contents first, then the section tree, then the flat heading
    /// list.
    pub fn extract_with_fallback(
        &self,
        full_text: &str,
        structure: &DocumentStructure,
    ) -> DocumentIndex {
        let index = self.extract(full_text);
        if !index.is_empty() {
            return index;
        }

        let from_sections = index_from_sections(&structure.sections);
        if !from_sections.is_empty() {
            return from_sections;
        }

        index_from_headings(&structure.headings)
    }
}

/// Levels from line shape where available, otherwise from indentation rank.
/// Entries without an explicit level sit below chapter entries.
fn assign_levels(raw: Vec<RawEntry>) -> Vec<(String, Option<u32>, u8)> {
    let indents: BTreeSet<usize> = raw
        .iter()
        .filter(|e| e.explicit_level.is_none())
        .map(|e| e.indent)
        .collect();
    let has_chapters = raw.iter().any(|e| e.is_chapter);

    raw.into_iter()
        .map(|e| {
            let level = e.explicit_level.unwrap_or_else(|| {
                let rank = indents.iter().position(|i| *i == e.indent).unwrap_or(0);
                let base = if has_chapters { 2 } else { 1 };
                (rank + base).min(u8::MAX as usize) as u8
            });
            (e.title, e.page, level)
        })
        .collect()
}

pub fn index_from_sections(sections: &[Section]) -> DocumentIndex {
    let mut raw = Vec::new();
    for root in sections {
        root.walk(&mut |s, depth| {
            let level = (depth + 1).min(u8::MAX as usize) as u8;
            raw.push((s.title.clone(), Some(s.page_start), level));
        });
    }
    if raw.is_empty() {
        return DocumentIndex::empty();
    }
    DocumentIndex {
        entries: link_entries(raw),
        method: IndexMethod::Structure,
        toc_lines: None,
    }
}

pub fn index_from_headings(headings: &[DetectedHeading]) -> DocumentIndex {
    if headings.is_empty() {
        return DocumentIndex::empty();
    }
    let raw = headings
        .iter()
        .map(|h| (h.title.clone(), Some(h.page), h.level))
        .collect();
    DocumentIndex {
        entries: link_entries(raw),
        method: IndexMethod::HeadingMap,
        toc_lines: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heading::FontStats;

    const TOC: &str = "\
VMware Site Recovery Manager Administration

Contents

Chapter 1 Installing ............ 5
    Preparing the Host .......... 6
    Running the Installer ....... 9
Chapter 2 Protection Groups ..... 12
    Creating a Group ............ 14
Chapter 3 Recovery Plans ........ 20

Chapter 1 Installing

Installing needs a host.
";

    #[test]
    fn parses_entry_shapes() {
        let chapter = parse_entry_line("Chapter 4 Reprotect . . . . . 31").unwrap();
        assert_eq!(chapter.title, "Reprotect");
        assert_eq!(chapter.page, Some(31));
        assert_eq!(chapter.explicit_level, Some(1));

        let numbered = parse_entry_line("2.1 Configure Mappings 42").unwrap();
        assert_eq!(numbered.title, "2.1 Configure Mappings");
        assert_eq!(numbered.explicit_level, Some(2));

        let leader = parse_entry_line("    Creating a Group ..... 14").unwrap();
        assert_eq!(leader.title, "Creating a Group");
        assert_eq!(leader.indent, 4);
        assert_eq!(leader.explicit_level, None);

        let spaced = parse_entry_line("Glossary\t\t88").unwrap();
        assert_eq!(spaced.title, "Glossary");
        assert_eq!(spaced.page, Some(88));

        assert!(parse_entry_line("Installing needs a host.").is_none());
        assert!(parse_entry_line("..... 12").is_none());
    }

    #[test]
    fn extracts_hierarchy_from_toc() {
        let index = IndexExtractor::default().extract(TOC);
        assert_eq!(index.method, IndexMethod::TableOfContents);
        let titles: Vec<&str> = index.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Installing",
                "Preparing the Host",
                "Running the Installer",
                "Protection Groups",
                "Creating a Group",
                "Recovery Plans"
            ]
        );
        assert_eq!(index.entries[1].level, 2);
        assert_eq!(
            index.entries[1].parent_id.as_deref(),
            Some(index.entries[0].entry_id.as_str())
        );
        assert_eq!(index.entries[5].parent_id, None);
        for entry in &index.entries {
            if let Some(parent) = &entry.parent_id {
                let parent = index.entries.iter().find(|e| &e.entry_id == parent).unwrap();
                assert!(entry.level > parent.level);
            }
        }

        let tree = index.hierarchy();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[0].children.len(), 2);
    }

    #[test]
    fn toc_region_stops_at_body_chapter() {
        let index = IndexExtractor::default().extract(TOC);
        let (start, end) = index.toc_lines.unwrap();
        let lines: Vec<&str> = TOC.lines().collect();
        assert_eq!(lines[start], "Contents");
        assert!(index.in_toc(start + 2));
        assert!(!index.in_toc(end));
        let body_chapter = lines.iter().rposition(|l| *l == "Chapter 1 Installing").unwrap();
        assert!(!index.in_toc(body_chapter));
    }

    #[test]
    fn entry_ids_are_stable() {
        let a = IndexExtractor::default().extract(TOC);
        let b = IndexExtractor::default().extract(TOC);
        assert_eq!(a, b);
        let mut ids: Vec<&str> = a.entries.iter().map(|e| e.entry_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), a.entries.len());
    }

    #[test]
    fn chapter_labels_without_pages_group_entries() {
        let text = "Contents\nChapter 1 Installing\n  Preparing ..... 3\n  Running ..... 4\nChapter 2 Upgrading\n  Planning ..... 9\n";
        let index = IndexExtractor::default().extract(text);
        let levels: Vec<u8> = index.entries.iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![1, 2, 2, 1, 2]);
        assert_eq!(index.entries[0].page, None);
    }

    #[test]
    fn no_toc_yields_empty_index() {
        let index = IndexExtractor::default().extract("Just a paragraph.\nAnother one.");
        assert!(index.is_empty());
        assert_eq!(index.confidence(), 0.0);
    }

    fn section(title: &str, children: Vec<Section>) -> Section {
        Section {
            id: String::new(),
            title: title.to_string(),
            level: 1,
            content: "text".to_string(),
            body: "text".to_string(),
            page_start: 1,
            page_end: 1,
            body_page_end: 1,
            confidence: 1.0,
            is_chapter: true,
            children,
        }
    }

    #[test]
    fn falls_back_to_structure_then_headings() {
        let structure = DocumentStructure {
            sections: vec![section("Installing", vec![section("Ports", vec![])])],
            headings: vec![],
            stats: FontStats {
                body_size: 10.0,
                heading_sizes: vec![],
            },
        };
        let extractor = IndexExtractor::default();
        let index = extractor.extract_with_fallback("no table here", &structure);
        assert_eq!(index.method, IndexMethod::Structure);
        assert_eq!(index.entries[1].level, 2);

        let headings_only = DocumentStructure {
            sections: vec![],
            headings: vec![DetectedHeading {
                title: "Installing".to_string(),
                level: 1,
                page: 2,
                line: 0,
            }],
            stats: structure.stats.clone(),
        };
        let index = extractor.extract_with_fallback("no table here", &headings_only);
        assert_eq!(index.method, IndexMethod::HeadingMap);
        assert!(index.confidence() < IndexMethod::Structure.confidence());
    }
}
