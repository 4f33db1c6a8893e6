//! Section hierarchy assembly and structural chunking.
//!
//! [`StructureBuilder`] walks the classified lines once, keeping an explicit
//! [`BuilderState`] (open-section stack, seen titles) instead of nested
//! loops. Each heading's extent is decided by [`find_section_end`], which
//! evaluates the boundary rule table line by line. After the pass, chapters
//! that swallowed unrelated material are repaired, and the result is
//! materialized into a [`Section`] tree.
//!
//! [`sections_to_chunks`] then turns the tree into retrievable chunks,
//! subdividing chapters that exceed `max_chunk_size`.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::{
    chunk::{Chunk, ChunkType, Provenance},
    chunking::{ChunkingConfig, split_text},
    error::Result,
    heading::{FontStats, HeadingClassifier, HeadingDecision},
    layout::TextLine,
    normalize::{collapse_whitespace, normalize_for_match, normalize_title},
    rules::{CompiledRules, RuleAction},
};

/// A node of the document hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Preorder identifier, `s0`, `s1`, ...
    pub id: String,
    pub title: String,
    pub level: u8,
    /// Complete text of the section, including its descendants.
    pub content: String,
    /// Text owned by this section alone, up to the next heading.
    pub body: String,
    pub page_start: u32,
    pub page_end: u32,
    /// Last page of `body`.
    pub body_page_end: u32,
    pub confidence: f32,
    /// Roots are chapters unless they were demoted by absorption repair.
    pub is_chapter: bool,
    pub children: Vec<Section>,
}

impl Section {
    /// Preorder walk over this section and its descendants.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Section, usize)) {
        fn go<'a>(s: &'a Section, depth: usize, visit: &mut impl FnMut(&'a Section, usize)) {
            visit(s, depth);
            for child in &s.children {
                go(child, depth + 1, visit);
            }
        }
        go(self, 0, visit);
    }

    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_, _| count += 1);
        count - 1
    }
}

/// A heading as detected by the classifier, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedHeading {
    pub title: String,
    pub level: u8,
    pub page: u32,
    pub line: usize,
}

/// Everything the structure pass learned about a document.
#[derive(Debug, Clone)]
pub struct DocumentStructure {
    pub sections: Vec<Section>,
    pub headings: Vec<DetectedHeading>,
    pub stats: FontStats,
}

impl DocumentStructure {
    pub fn section_count(&self) -> usize {
        self.sections.iter().map(|s| s.descendant_count() + 1).sum()
    }
}

/// Why a section scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Heading,
    StrongBoundary,
    WeakBoundary,
    Transition,
    LineCap,
    EndOfDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionEnd {
    /// Exclusive line index where the section stops.
    pub line: usize,
    pub reason: EndReason,
}

/// Find where the section whose heading sits at `start` ends.
///
/// Rules, evaluated per line in order:
/// (a) a strong boundary always ends the section;
/// (b) a heading at a higher level always ends it, a heading at the same
///     level ends it once `min_content_lines` content lines were seen;
/// (c) a weak boundary ends it only when it is a same-level heading;
/// (d) a transition marker ends it after `transition_min_lines`;
/// (e) procedural labels never end it.
/// A `max_section_lines` cap ends the scan right after the last content
/// line.
pub fn find_section_end(
    lines: &[TextLine],
    decisions: &[HeadingDecision],
    start: usize,
    level: u8,
    config: &ChunkingConfig,
    rules: &CompiledRules,
) -> SectionEnd {
    let mut content_lines = 0usize;
    let mut last_content = start;

    for i in (start + 1)..lines.len() {
        if i - start > config.max_section_lines {
            return SectionEnd {
                line: last_content + 1,
                reason: EndReason::LineCap,
            };
        }

        let text = lines[i].text.trim();
        if text.is_empty() {
            continue;
        }
        let decision = decisions[i];

        match rules.first_match(text, decision.is_heading) {
            Some(RuleAction::Continue) => {
                content_lines += 1;
                last_content = i;
                continue;
            }
            Some(RuleAction::Stop) => {
                return SectionEnd {
                    line: i,
                    reason: EndReason::StrongBoundary,
                };
            }
            Some(RuleAction::StopAtSameLevel)
                if decision.is_heading && decision.level == level =>
            {
                return SectionEnd {
                    line: i,
                    reason: EndReason::WeakBoundary,
                };
            }
            Some(RuleAction::StopAfterContent)
                if content_lines >= config.transition_min_lines =>
            {
                return SectionEnd {
                    line: i,
                    reason: EndReason::Transition,
                };
            }
            _ => {}
        }

        if decision.is_heading
            && (decision.level < level
                || (decision.level == level
                    && content_lines >= config.min_content_lines))
        {
            return SectionEnd {
                line: i,
                reason: EndReason::Heading,
            };
        }

        content_lines += 1;
        last_content = i;
    }

    SectionEnd {
        line: lines.len(),
        reason: EndReason::EndOfDocument,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    /// First line of content (after the heading line).
    start: usize,
    end: usize,
    /// End of the text owned by the section alone.
    own_end: usize,
}

#[derive(Debug)]
struct Draft {
    title: String,
    norm_title: String,
    level: u8,
    heading_line: Option<usize>,
    spans: Vec<Span>,
    confidence: f32,
    children: Vec<usize>,
    demoted: bool,
    skipped: bool,
}

impl Draft {
    fn new(title: String, level: u8, heading_line: Option<usize>, span: Span, confidence: f32) -> Self {
        Self {
            norm_title: normalize_title(&title),
            title,
            level,
            heading_line,
            spans: vec![span],
            confidence,
            children: Vec::new(),
            demoted: false,
            skipped: false,
        }
    }

    fn first_line(&self) -> usize {
        self.heading_line
            .unwrap_or_else(|| self.spans.first().map(|s| s.start).unwrap_or(0))
    }
}

/// Mutable state of the single pass over the lines.
#[derive(Debug, Default)]
struct BuilderState {
    arena: Vec<Draft>,
    roots: Vec<usize>,
    /// Currently open sections, outermost first.
    stack: Vec<usize>,
    /// `(parent, normalized title)` of every placed section.
    seen: HashMap<(Option<usize>, String), usize>,
}

impl BuilderState {
    /// Place a heading's draft in the tree. A title already used by a
    /// sibling is merged into that sibling instead. Returns the index of the
    /// section that now owns the span.
    fn place(&mut self, draft: Draft) -> usize {
        while let Some(&top) = self.stack.last() {
            if self.arena[top].level >= draft.level {
                self.stack.pop();
            } else {
                break;
            }
        }
        let parent = self.stack.last().copied();
        let key = (parent, draft.norm_title.clone());

        if let Some(&prior) = self.seen.get(&key) {
            self.arena[prior].spans.extend(draft.spans);
            self.stack.push(prior);
            return prior;
        }

        let idx = self.push_child(parent, draft);
        self.stack.push(idx);
        idx
    }

    fn push_child(&mut self, parent: Option<usize>, draft: Draft) -> usize {
        let idx = self.arena.len();
        self.seen.insert((parent, draft.norm_title.clone()), idx);
        self.arena.push(draft);
        match parent {
            Some(p) => self.arena[p].children.push(idx),
            None => self.roots.push(idx),
        }
        idx
    }
}

/// Assembles the section hierarchy of one document.
pub struct StructureBuilder<'a> {
    config: &'a ChunkingConfig,
    rules: CompiledRules,
}

impl<'a> StructureBuilder<'a> {
    pub fn new(config: &'a ChunkingConfig) -> Result<Self> {
        Ok(Self {
            rules: config.profile.compile()?,
            config,
        })
    }

    pub fn classifier(&self) -> HeadingClassifier<'_> {
        HeadingClassifier::new(self.config, &self.rules)
    }

    /// Build the hierarchy. `fallback_title` names the single root section
    /// of documents without detectable headings, and any preamble text
    /// before the first heading.
    pub fn build(&self, lines: &[TextLine], fallback_title: &str) -> DocumentStructure {
        let classifier = self.classifier();
        let stats = classifier.analyze(lines);
        let decisions = classifier.classify_all(lines, &stats);

        let heading_lines: Vec<usize> = (0..lines.len())
            .filter(|&i| decisions[i].is_heading && !heading_title(&lines[i].text).is_empty())
            .collect();
        let headings = heading_lines
            .iter()
            .map(|&i| DetectedHeading {
                title: heading_title(&lines[i].text),
                level: decisions[i].level,
                page: lines[i].page,
                line: i,
            })
            .collect();

        let mut state = BuilderState::default();

        let first_heading = heading_lines.first().copied().unwrap_or(lines.len());
        if has_content(lines, 0, first_heading) {
            let span = Span {
                start: 0,
                end: first_heading,
                own_end: first_heading,
            };
            let confidence = if heading_lines.is_empty() { 0.3 } else { 0.5 };
            let draft = Draft::new(fallback_title.to_string(), 1, None, span, confidence);
            state.push_child(None, draft);
        }

        for (k, &h) in heading_lines.iter().enumerate() {
            let decision = decisions[h];
            let title = heading_title(&lines[h].text);
            let next_heading = heading_lines.get(k + 1).copied().unwrap_or(lines.len());

            if self.rules.is_skipped_title(&normalize_title(&title)) {
                let span = Span {
                    start: h + 1,
                    end: next_heading,
                    own_end: next_heading,
                };
                let mut draft = Draft::new(title, decision.level, Some(h), span, decision.confidence);
                draft.skipped = true;
                state.place(draft);
                continue;
            }

            let end = find_section_end(lines, &decisions, h, decision.level, self.config, &self.rules);
            let span = Span {
                start: h + 1,
                end: end.line,
                own_end: next_heading.min(end.line),
            };
            let draft = Draft::new(title.clone(), decision.level, Some(h), span, decision.confidence);
            let owner = state.place(draft);

            if end.line < next_heading && has_content(lines, end.line, next_heading) {
                let (label, start) = match end.reason {
                    EndReason::LineCap => ("continued".to_string(), end.line),
                    _ => (heading_title(&lines[end.line].text), end.line + 1),
                };
                debug!(section = %title, %label, line = end.line, "section continues after boundary");
                let span = Span {
                    start,
                    end: next_heading,
                    own_end: next_heading,
                };
                let continuation = Draft::new(
                    format!("{title}: {label}"),
                    decision.level.saturating_add(1),
                    Some(end.line),
                    span,
                    0.5,
                );
                state.push_child(Some(owner), continuation);
            }
        }

        self.repair_absorbed_chapters(&mut state, lines);

        let mut counter = 0;
        let sections = state
            .roots
            .iter()
            .filter_map(|&root| materialize(&state, root, lines, true, &mut counter))
            .collect();

        DocumentStructure {
            sections,
            headings,
            stats,
        }
    }

    /// A root with too many children, or spanning too many pages, has
    /// probably swallowed the chapters after it. Cut it at the first child
    /// that shares no title words with it and promote the rest to roots.
    fn repair_absorbed_chapters(&self, state: &mut BuilderState, lines: &[TextLine]) {
        let mut i = 0;
        while i < state.roots.len() {
            let root = state.roots[i];
            let child_count = state.arena[root].children.len();
            let (first_page, last_page) = draft_pages(&state.arena[root], lines, false);
            let oversized = child_count > self.config.max_chapter_children
                || last_page.saturating_sub(first_page) > self.config.max_chapter_pages;

            if oversized && child_count > 0 {
                let root_words = significant_words(&state.arena[root].title);
                let children = &state.arena[root].children;
                let cut = children
                    .iter()
                    .position(|&c| significant_words(&state.arena[c].title).is_disjoint(&root_words))
                    .or_else(|| {
                        children.iter().position(|&c| {
                            let page = lines[state.arena[c].first_line().min(lines.len().saturating_sub(1))].page;
                            page.saturating_sub(first_page) > self.config.max_chapter_pages
                        })
                    })
                    .or_else(|| {
                        (child_count > self.config.max_chapter_children)
                            .then_some(self.config.max_chapter_children)
                    });

                if let Some(cut) = cut {
                    let promoted = state.arena[root].children.split_off(cut);
                    let cut_line = state.arena[promoted[0]].first_line();
                    let draft = &mut state.arena[root];
                    draft.spans.retain(|s| s.start < cut_line);
                    for span in &mut draft.spans {
                        span.end = span.end.min(cut_line);
                        span.own_end = span.own_end.min(cut_line);
                    }
                    draft.demoted = true;
                    debug!(
                        chapter = %draft.title,
                        promoted = promoted.len(),
                        "split absorbed chapter"
                    );
                    for (offset, idx) in promoted.into_iter().enumerate() {
                        state.roots.insert(i + 1 + offset, idx);
                    }
                }
            }
            i += 1;
        }
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "about", "your", "using", "into", "from", "of", "a", "an",
    "to", "in", "on",
];

fn significant_words(title: &str) -> HashSet<String> {
    normalize_for_match(title)
        .split_whitespace()
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Heading text as a title: trimmed, whitespace collapsed, trailing colon
/// removed.
fn heading_title(text: &str) -> String {
    collapse_whitespace(text).trim_end_matches(':').trim().to_string()
}

fn has_content(lines: &[TextLine], start: usize, end: usize) -> bool {
    lines
        .get(start..end.min(lines.len()))
        .is_some_and(|slice| slice.iter().any(|l| !l.is_blank()))
}

/// Union of line ranges, sorted.
fn merged_ranges(spans: &[Span], own: bool) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = spans
        .iter()
        .map(|s| (s.start, if own { s.own_end } else { s.end }))
        .filter(|(a, b)| a < b)
        .collect();
    ranges.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn draft_pages(draft: &Draft, lines: &[TextLine], own: bool) -> (u32, u32) {
    let start_page = lines
        .get(draft.first_line())
        .map(|l| l.page)
        .unwrap_or(1);
    let end_page = merged_ranges(&draft.spans, own)
        .into_iter()
        .flat_map(|(a, b)| lines[a.min(lines.len())..b.min(lines.len())].iter())
        .filter(|l| !l.is_blank())
        .map(|l| l.page)
        .max()
        .unwrap_or(start_page);
    (start_page, end_page.max(start_page))
}

/// Join the non-blank lines of the ranges, dropping lines that only repeat
/// the section's own heading.
fn assemble(lines: &[TextLine], ranges: &[(usize, usize)], norm_title: &str) -> String {
    ranges
        .iter()
        .flat_map(|&(a, b)| lines[a.min(lines.len())..b.min(lines.len())].iter())
        .map(|l| l.text.trim())
        .filter(|t| !t.is_empty() && normalize_title(t) != norm_title)
        .collect::<Vec<_>>()
        .join("\n")
}

fn materialize(
    state: &BuilderState,
    idx: usize,
    lines: &[TextLine],
    is_root: bool,
    counter: &mut usize,
) -> Option<Section> {
    let draft = &state.arena[idx];
    if draft.skipped {
        return None;
    }

    let id = format!("s{counter}");
    *counter += 1;

    let children: Vec<Section> = draft
        .children
        .iter()
        .filter_map(|&c| materialize(state, c, lines, false, counter))
        .collect();

    let content = assemble(lines, &merged_ranges(&draft.spans, false), &draft.norm_title);
    let body = assemble(lines, &merged_ranges(&draft.spans, true), &draft.norm_title);
    if content.is_empty() && children.is_empty() {
        return None;
    }

    let (page_start, page_end) = draft_pages(draft, lines, false);
    let (_, body_page_end) = draft_pages(draft, lines, true);
    let page_end = children
        .iter()
        .map(|c| c.page_end)
        .fold(page_end, u32::max);

    Some(Section {
        id,
        title: draft.title.clone(),
        level: draft.level,
        content,
        body,
        page_start,
        page_end,
        body_page_end,
        confidence: draft.confidence,
        is_chapter: is_root && !draft.demoted,
        children,
    })
}

/// One structural piece of an oversized chapter, before windowing.
struct Piece<'s> {
    section: &'s Section,
    chunk_type: ChunkType,
    text: String,
    page_end: u32,
    titles: Vec<String>,
}

fn chunk_type_for(section: &Section, depth: usize) -> ChunkType {
    match depth {
        0 if section.is_chapter => ChunkType::Chapter,
        0 | 1 => ChunkType::Section,
        _ => ChunkType::Subsection,
    }
}

/// Turn the section tree into chunks.
///
/// A root whose complete content fits `max_chunk_size` becomes one chunk
/// answering for all its descendants' titles; a root shorter than
/// `min_chunk_size` is appended to the previous chunk when it fits there.
/// A leading short root has no neighbour to join and stays whole. Larger roots are cut at their
/// descendants up to three levels down; deeper descendants stay inside their
/// ancestor's piece. Pieces shorter than `min_chunk_size` are merged into the
/// previous piece, and pieces still above the maximum are windowed.
pub fn sections_to_chunks(sections: &[Section], config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();

    for root in sections {
        let root_chars = root.content.chars().count();
        if root_chars <= config.max_chunk_size {
            if root.content.trim().chars().count() < config.min_chunk_size
                && let Some(previous) = chunks.last_mut()
                && previous.content.chars().count() + root.title.chars().count() + root_chars + 2
                    <= config.max_chunk_size
            {
                append_titled(&mut previous.content, &root.title, &root.content);
                previous.page_end = previous.page_end.max(root.page_end);
                root.walk(&mut |s, _| previous.add_searchable_title(&s.title));
                continue;
            }

            let mut chunk = section_chunk(root, 0, root.content.clone(), root.page_end);
            root.walk(&mut |s, depth| {
                if depth > 0 {
                    chunk.add_searchable_title(&s.title);
                }
            });
            chunks.push(chunk);
            continue;
        }

        let mut pieces: Vec<Piece<'_>> = Vec::new();
        root.walk(&mut |s, depth| {
            if depth <= 3 || pieces.is_empty() {
                pieces.push(Piece {
                    section: s,
                    chunk_type: chunk_type_for(s, depth),
                    text: s.body.clone(),
                    page_end: s.body_page_end,
                    titles: vec![s.title.clone()],
                });
            } else if let Some(current) = pieces.last_mut() {
                append_titled(&mut current.text, &s.title, &s.body);
                current.page_end = current.page_end.max(s.body_page_end);
                current.titles.push(s.title.clone());
            }
        });

        let mut merged: Vec<Piece<'_>> = Vec::new();
        let mut carried_titles: Vec<String> = Vec::new();
        for mut piece in pieces {
            let short = piece.text.trim().chars().count() < config.min_chunk_size;
            if short {
                if let Some(previous) = merged.last_mut() {
                    append_titled(&mut previous.text, &piece.section.title, &piece.text);
                    previous.page_end = previous.page_end.max(piece.page_end);
                    previous.titles.append(&mut piece.titles);
                    continue;
                }
                if piece.text.trim().is_empty() {
                    // Nothing to merge into yet: the next piece answers for it.
                    carried_titles.append(&mut piece.titles);
                    continue;
                }
            }
            if !carried_titles.is_empty() {
                let mut titles = std::mem::take(&mut carried_titles);
                titles.append(&mut piece.titles);
                piece.titles = titles;
            }
            merged.push(piece);
        }

        for piece in merged {
            let windows = split_text(&piece.text, config.max_chunk_size);
            for window in windows {
                let mut chunk = section_chunk(piece.section, 0, window.text, piece.page_end);
                chunk.chunk_type = piece.chunk_type;
                for title in &piece.titles {
                    chunk.add_searchable_title(title);
                }
                chunks.push(chunk);
            }
        }
    }

    chunks
}

fn append_titled(text: &mut String, title: &str, body: &str) {
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(title);
    if !body.is_empty() {
        text.push('\n');
        text.push_str(body);
    }
}

fn section_chunk(section: &Section, depth: usize, content: String, page_end: u32) -> Chunk {
    Chunk::new(
        section.title.clone(),
        content,
        chunk_type_for(section, depth),
        section.level,
        section.page_start,
        page_end,
        section.confidence,
        Provenance::FontDerived {
            section_id: section.id.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::BoundaryProfile;

    fn h1(text: &str, page: u32) -> TextLine {
        TextLine::new(text, 20.0, false, page, 0)
    }

    fn h2(text: &str, page: u32) -> TextLine {
        TextLine::new(text, 14.0, false, page, 0)
    }

    fn h3(text: &str, page: u32) -> TextLine {
        TextLine::new(text, 12.0, false, page, 0)
    }

    fn p(text: &str, page: u32) -> TextLine {
        TextLine::new(text, 10.0, false, page, 0)
    }

    fn paragraph(page: u32, n: usize) -> Vec<TextLine> {
        (0..n)
            .map(|i| p(&format!("Body sentence number {i} describing the feature in detail."), page))
            .collect()
    }

    fn build(lines: &[TextLine]) -> DocumentStructure {
        build_with(lines, ChunkingConfig::default())
    }

    fn build_with(lines: &[TextLine], config: ChunkingConfig) -> DocumentStructure {
        let builder = StructureBuilder::new(&config).unwrap();
        builder.build(lines, "guide")
    }

    fn titles(sections: &[Section]) -> Vec<String> {
        sections.iter().map(|s| s.title.clone()).collect()
    }

    #[test]
    fn chapters_and_sections_nest() {
        let mut lines = vec![h1("Installing", 1)];
        lines.extend(paragraph(1, 3));
        lines.push(h2("Preparing the Host", 2));
        lines.extend(paragraph(2, 4));
        lines.push(h2("Running the Installer", 3));
        lines.extend(paragraph(3, 4));
        lines.push(h1("Upgrading", 4));
        lines.extend(paragraph(4, 4));

        let structure = build(&lines);
        assert_eq!(titles(&structure.sections), vec!["Installing", "Upgrading"]);
        let install = &structure.sections[0];
        assert!(install.is_chapter);
        assert_eq!(titles(&install.children), vec!["Preparing the Host", "Running the Installer"]);
        assert_eq!(install.page_start, 1);
        assert_eq!(install.page_end, 3);
        assert!(install.content.contains("Running the Installer"));
        assert!(!install.body.contains("Preparing the Host"));
        assert!(!install.content.contains("Upgrading"));
        assert_eq!(structure.headings.len(), 4);
    }

    #[test]
    fn document_without_headings_is_one_section() {
        let lines = paragraph(1, 5);
        let structure = build(&lines);
        assert_eq!(structure.sections.len(), 1);
        assert_eq!(structure.sections[0].title, "guide");
        assert_eq!(structure.sections[0].content.lines().count(), 5);
    }

    #[test]
    fn empty_document_has_no_sections() {
        assert!(build(&[]).sections.is_empty());
    }

    #[test]
    fn strong_boundary_ends_section_and_keeps_remainder() {
        let mut config = ChunkingConfig::default();
        config.profile = BoundaryProfile::srm();
        let mut lines = vec![h1("Protection Groups", 1)];
        lines.extend(paragraph(1, 2));
        lines.push(p("Prerequisites", 1));
        lines.push(p("Pair the sites before creating a group.", 1));
        lines.push(h1("Recovery Plans", 2));
        lines.extend(paragraph(2, 3));

        let structure = build_with(&lines, config);
        let groups = &structure.sections[0];
        assert!(!groups.body.contains("Pair the sites"));
        assert_eq!(groups.children.len(), 1);
        assert_eq!(groups.children[0].title, "Protection Groups: Prerequisites");
        assert!(groups.children[0].content.contains("Pair the sites"));
    }

    #[test]
    fn stub_heading_absorbs_until_enough_content() {
        let mut lines = vec![h2("Ports", 1), p("Port 443.", 1)];
        lines.push(h2("Firewall", 1));
        lines.extend(paragraph(1, 3));
        lines.push(h2("Certificates", 2));
        lines.extend(paragraph(2, 3));

        let structure = build(&lines);
        let ports = &structure.sections[0];
        assert!(ports.content.contains("Firewall"));
        assert!(!ports.content.contains("Certificates"));
        // Owned text stops at the next heading either way.
        assert_eq!(ports.body, "Port 443.");
    }

    #[test]
    fn higher_level_heading_always_ends_section() {
        let lines = vec![h2("Ports", 1), p("Port 443.", 1), h1("Upgrading", 2), p("Text.", 2)];
        let structure = build(&lines);
        assert!(!structure.sections[0].content.contains("Upgrading"));
    }

    #[test]
    fn duplicate_sibling_titles_are_merged() {
        let mut lines = vec![h1("Recovery Plans", 1)];
        lines.extend(paragraph(1, 3));
        lines.push(h1("Recovery Plans", 2));
        lines.push(p("Continued on the next page.", 2));
        lines.extend(paragraph(2, 2));
        lines.push(h1("Reprotect", 3));
        lines.extend(paragraph(3, 3));

        let structure = build(&lines);
        assert_eq!(titles(&structure.sections), vec!["Recovery Plans", "Reprotect"]);
        let plans = &structure.sections[0];
        assert!(plans.content.contains("Continued on the next page."));
        assert_eq!(plans.page_end, 2);
    }

    #[test]
    fn siblings_differing_in_case_and_spacing_are_merged() {
        let mut lines = vec![h1("Install Agent", 1)];
        lines.extend(paragraph(1, 3));
        lines.push(h1("install   agent", 2));
        lines.push(p("Continued on the next page.", 2));
        lines.extend(paragraph(2, 2));
        lines.push(h1("Reprotect", 3));
        lines.extend(paragraph(3, 3));

        let structure = build(&lines);
        assert_eq!(titles(&structure.sections), vec!["Install Agent", "Reprotect"]);
        let agent = &structure.sections[0];
        assert!(agent.content.contains("Continued on the next page."));
        assert_eq!(agent.page_end, 2);
    }

    #[test]
    fn section_holds_its_subsection_and_stops_at_next_sibling() {
        let mut lines = vec![h1("Installing", 1), h2("Preparing the Host", 1)];
        lines.extend(paragraph(1, 3));
        lines.push(h3("Verifying the Host", 1));
        lines.push(p("Open the console and check the host status.", 1));
        lines.push(h2("Running the Installer", 2));
        lines.push(p("Launch setup from the mounted image.", 2));
        lines.extend(paragraph(2, 2));

        let structure = build(&lines);
        let install = &structure.sections[0];
        assert_eq!(
            titles(&install.children),
            vec!["Preparing the Host", "Running the Installer"]
        );
        let preparing = &install.children[0];
        assert_eq!(titles(&preparing.children), vec!["Verifying the Host"]);
        assert!(preparing.content.contains("Verifying the Host"));
        assert!(preparing.content.contains("Open the console"));
        assert!(!preparing.content.contains("Running the Installer"));
        assert!(!preparing.content.contains("Launch setup"));
    }

    #[test]
    fn same_title_in_different_chapters_is_kept() {
        let mut lines = vec![h1("Installing", 1), h2("Overview", 1)];
        lines.extend(paragraph(1, 3));
        lines.push(h1("Upgrading", 2));
        lines.push(h2("Overview", 2));
        lines.extend(paragraph(2, 3));

        let structure = build(&lines);
        assert_eq!(structure.sections.len(), 2);
        assert_eq!(structure.sections[1].children[0].title, "Overview");
    }

    #[test]
    fn contents_section_is_skipped() {
        let mut lines = vec![h1("Contents", 1)];
        lines.push(p("Installing ........ 3", 1));
        lines.push(p("Upgrading ......... 9", 1));
        lines.push(h1("Installing", 3));
        lines.extend(paragraph(3, 3));

        let structure = build(&lines);
        assert_eq!(titles(&structure.sections), vec!["Installing"]);
    }

    #[test]
    fn absorbed_chapters_are_promoted() {
        let mut config = ChunkingConfig::default();
        config.max_chapter_children = 2;
        let mut lines = vec![h1("Installing the Server", 1)];
        lines.extend(paragraph(1, 3));
        lines.push(h2("Server Requirements", 1));
        lines.extend(paragraph(1, 3));
        lines.push(h2("Installing on Windows", 2));
        lines.extend(paragraph(2, 3));
        lines.push(h2("Recovery Plans", 3));
        lines.extend(paragraph(3, 3));

        let structure = build_with(&lines, config);
        assert_eq!(
            titles(&structure.sections),
            vec!["Installing the Server", "Recovery Plans"]
        );
        assert!(!structure.sections[0].is_chapter);
        assert!(!structure.sections[0].content.contains("Recovery Plans"));
    }

    #[test]
    fn line_cap_splits_runaway_section() {
        let mut config = ChunkingConfig::default();
        config.max_section_lines = 5;
        let mut lines = vec![h1("Reference", 1)];
        lines.extend(paragraph(1, 12));

        let structure = build_with(&lines, config);
        let reference = &structure.sections[0];
        assert_eq!(reference.body.lines().count(), 5);
        assert_eq!(reference.children[0].title, "Reference: continued");
        assert_eq!(reference.children[0].content.lines().count(), 7);
    }

    #[test]
    fn preamble_becomes_leading_section() {
        let mut lines = vec![p("Copyright notice for the guide.", 1)];
        lines.push(h1("Installing", 2));
        lines.extend(paragraph(2, 3));
        let structure = build(&lines);
        assert_eq!(titles(&structure.sections), vec!["guide", "Installing"]);
    }

    #[test]
    fn small_chapter_is_one_chunk_with_nested_titles() {
        let mut lines = vec![h1("Installing", 1)];
        lines.extend(paragraph(1, 3));
        lines.push(h2("Preparing the Host", 1));
        lines.extend(paragraph(1, 3));

        let structure = build(&lines);
        let chunks = sections_to_chunks(&structure.sections, &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::Chapter);
        assert!(chunks[0].searchable_titles.contains(&"Preparing the Host".to_string()));
        assert_eq!(chunks[0].extraction_method(), "font_analysis");
    }

    #[test]
    fn large_chapter_splits_at_sections_without_overlap() {
        let mut config = ChunkingConfig::default();
        config.max_chunk_size = 800;
        let mut lines = vec![h1("Installing", 1)];
        lines.extend(paragraph(1, 4));
        lines.push(h2("Preparing the Host", 2));
        lines.extend(paragraph(2, 8));
        lines.push(h2("Running the Installer", 3));
        lines.extend(paragraph(3, 8));
        lines.push(h2("Tiny", 3));
        lines.push(p("Short.", 3));

        let structure = build_with(&lines, config.clone());
        let chunks = sections_to_chunks(&structure.sections, &config);
        let chunk_titles: Vec<&str> = chunks.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(
            chunk_titles,
            vec!["Installing", "Preparing the Host", "Running the Installer"]
        );
        assert_eq!(chunks[0].chunk_type, ChunkType::Chapter);
        assert_eq!(chunks[1].chunk_type, ChunkType::Section);
        assert!(chunks[2].content.contains("Short."));
        assert!(chunks[2].searchable_titles.contains(&"Tiny".to_string()));
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= config.max_chunk_size);
        }
        let total: usize = chunks
            .iter()
            .map(|c| c.content.matches("Body sentence number").count())
            .sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn slightly_oversized_section_stays_within_limit() {
        let mut config = ChunkingConfig::default();
        config.max_chunk_size = 1000;
        let mut lines = vec![h1("Reference", 1)];
        lines.extend(paragraph(1, 19));

        let structure = build_with(&lines, config.clone());
        assert!(structure.sections[0].content.chars().count() > 1000);
        let chunks = sections_to_chunks(&structure.sections, &config);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 1000, "chunk of {} chars", chunk.content.len());
        }
        let words: usize = chunks.iter().map(|c| c.content.split_whitespace().count()).sum();
        assert_eq!(words, 19 * 9);
    }

    #[test]
    fn short_root_joins_previous_chunk() {
        let mut lines = vec![p("Copyright notice for the guide.", 1)];
        lines.push(h1("Installing", 1));
        lines.extend(paragraph(1, 3));
        lines.push(h1("Licensing", 2));
        lines.push(p("See the license file.", 2));

        let structure = build(&lines);
        assert_eq!(titles(&structure.sections), vec!["guide", "Installing", "Licensing"]);
        let chunks = sections_to_chunks(&structure.sections, &ChunkingConfig::default());

        let chunk_titles: Vec<&str> = chunks.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(chunk_titles, vec!["guide", "Installing"]);
        let installing = &chunks[1];
        assert!(installing.content.ends_with("Licensing\nSee the license file."));
        assert!(installing.searchable_titles.contains(&"Licensing".to_string()));
        assert_eq!(installing.page_end, 2);
    }

    #[test]
    fn oversized_piece_is_windowed() {
        let mut config = ChunkingConfig::default();
        config.max_chunk_size = 300;
        let mut lines = vec![h1("Reference", 1)];
        lines.extend(paragraph(1, 20));

        let structure = build_with(&lines, config.clone());
        let chunks = sections_to_chunks(&structure.sections, &config);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.title == "Reference"));
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 300));
    }
}
