//! Cross-checking chunks against the document index.
//!
//! Every chunk title is matched against the index entries with the blended
//! title similarity from [`crate::normalize`]. Entries that no chunk answers
//! for are missing sections; the validator tries to rebuild each one from the
//! full text. The outcome is summarized by a 0-100 quality score.

use std::{
    collections::HashSet,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    chunk::{Chunk, ChunkType, Provenance},
    normalize::{normalize_for_match, string_ratio, token_set_overlap},
    toc::{DocumentIndex, IndexEntry, looks_like_toc_entry},
};

static MARKDOWN_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());
static CHAPTER_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:chapter|appendix|part)\s+(?:\d+|[ivxlcdm]+|[a-z])\b").unwrap()
});
static NUMBERED_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+\.\d+(?:\.\d+)*\.?|\d+)\s+[A-Z]").unwrap()
});

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Minimum similarity for a chunk to count as matching an entry.
    pub similarity_threshold: f32,
    /// Matches at or above this similarity are exact.
    pub exact_threshold: f32,
    /// Lines captured at most when recovering a missing section.
    pub recovery_max_lines: usize,
    pub recovered_confidence: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            exact_threshold: 0.9,
            recovery_max_lines: 50,
            recovered_confidence: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Partial,
    Inferred,
}

/// The pairing of one chunk with its best index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMatch {
    pub chunk_id: String,
    pub entry_id: Option<String>,
    pub similarity: f32,
    pub match_type: MatchType,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub validated_chunks: Vec<Chunk>,
    pub orphaned_chunks: Vec<Chunk>,
    pub missing_sections: Vec<IndexEntry>,
    /// Chunks rebuilt from the full text for missing sections.
    pub recovered_chunks: Vec<Chunk>,
    pub matches: Vec<ChunkMatch>,
    pub score: f32,
    /// Set when validation failed internally and a neutral result was
    /// substituted.
    pub fallback: bool,
}

impl ValidationResult {
    /// All chunks in emission order followed by the recovered ones.
    pub fn into_chunks(self) -> Vec<Chunk> {
        let mut chunks = self.validated_chunks;
        chunks.extend(self.orphaned_chunks);
        chunks.sort_by_key(|c| c.ordinal);
        chunks.extend(self.recovered_chunks);
        chunks
    }
}

/// `(validated/total - 0.05*missing - 0.02*orphaned) * 100`, clamped to
/// `[0, 100]`. An empty chunk set scores zero.
pub fn validation_score(total: usize, validated: usize, missing: usize, orphaned: usize) -> f32 {
    if total == 0 {
        return 0.0;
    }
    let raw = validated as f32 / total as f32 - 0.05 * missing as f32 - 0.02 * orphaned as f32;
    (raw * 100.0).clamp(0.0, 100.0)
}

/// Scores how well one title names another, in `[0, 1]`.
///
/// Titles are prepared once (index entries are compared against every
/// chunk), then compared pairwise.
pub trait TitleMatcher {
    type Prepared;

    fn prepare(&self, title: &str) -> Self::Prepared;

    /// `floor` is the score the caller cares about; an implementation may
    /// return any value below it once the pair cannot reach it.
    fn similarity(&self, a: &Self::Prepared, b: &Self::Prepared, floor: f32) -> f32;
}

/// The blended similarity of [`crate::normalize::title_similarity`]:
/// `0.4 * edit ratio + 0.6 * token-set overlap` over match-normalized titles.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlendedTitles;

/// A normalized title with its token set, reused across comparisons.
pub struct PreparedTitle {
    normalized: String,
    tokens: HashSet<String>,
}

impl TitleMatcher for BlendedTitles {
    type Prepared = PreparedTitle;

    fn prepare(&self, title: &str) -> PreparedTitle {
        let normalized = normalize_for_match(title);
        let tokens = normalized.split_whitespace().map(str::to_string).collect();
        PreparedTitle { normalized, tokens }
    }

    /// Skips the edit distance when token overlap alone rules out `floor`.
    fn similarity(&self, a: &PreparedTitle, b: &PreparedTitle, floor: f32) -> f32 {
        if a.normalized.is_empty() || b.normalized.is_empty() {
            return 0.0;
        }
        let intersection = a.tokens.intersection(&b.tokens).count();
        let union = a.tokens.union(&b.tokens).count().max(1);
        let overlap = intersection as f32 / union as f32;
        if 0.4 + 0.6 * overlap < floor {
            return 0.6 * overlap;
        }
        debug_assert!((overlap - token_set_overlap(&a.normalized, &b.normalized)).abs() < 1e-6);
        0.4 * string_ratio(&a.normalized, &b.normalized) + 0.6 * overlap
    }
}

/// What matching found, before any chunk is moved.
struct Assessment {
    /// Per chunk, in input order: best entry index and its similarity, when
    /// at or above the threshold.
    best: Vec<Option<(usize, f32)>>,
    missing: Vec<IndexEntry>,
    recovered: Vec<Chunk>,
}

pub struct ChunkValidator<'a, M = BlendedTitles> {
    config: &'a ValidationConfig,
    matcher: M,
}

impl<'a> ChunkValidator<'a, BlendedTitles> {
    pub fn new(config: &'a ValidationConfig) -> Self {
        Self {
            config,
            matcher: BlendedTitles,
        }
    }
}

impl<'a, M: TitleMatcher> ChunkValidator<'a, M> {
    pub fn with_matcher<N: TitleMatcher>(self, matcher: N) -> ChunkValidator<'a, N> {
        ChunkValidator {
            config: self.config,
            matcher,
        }
    }

    /// Validate `chunks` against `index` and recover missing sections from
    /// `full_text`. Never fails: an internal error yields a neutral result
    /// with score 50 and every chunk orphaned.
    pub fn validate(&self, chunks: Vec<Chunk>, index: &DocumentIndex, full_text: &str) -> ValidationResult {
        let attempt = catch_unwind(AssertUnwindSafe(|| self.assess(&chunks, index, full_text)));
        match attempt {
            Ok(assessment) => self.apply(chunks, index, assessment),
            Err(_) => {
                warn!("index validation failed, keeping chunks unvalidated");
                ValidationResult {
                    validated_chunks: Vec::new(),
                    orphaned_chunks: chunks,
                    missing_sections: Vec::new(),
                    recovered_chunks: Vec::new(),
                    matches: Vec::new(),
                    score: 50.0,
                    fallback: true,
                }
            }
        }
    }

    fn assess(&self, chunks: &[Chunk], index: &DocumentIndex, full_text: &str) -> Assessment {
        let threshold = self.config.similarity_threshold;
        let entries: Vec<M::Prepared> = index
            .entries
            .iter()
            .map(|e| self.matcher.prepare(&e.title))
            .collect();

        let mut covered = vec![false; entries.len()];
        let mut best = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let own = self.matcher.prepare(&chunk.title);
            let top = entries
                .iter()
                .enumerate()
                .map(|(i, entry)| (i, self.matcher.similarity(&own, entry, threshold)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .filter(|(_, similarity)| *similarity >= threshold);
            if let Some((i, _)) = top {
                covered[i] = true;
            }

            for title in &chunk.searchable_titles {
                let prepared = self.matcher.prepare(title);
                for (i, entry) in entries.iter().enumerate() {
                    if self.matcher.similarity(&prepared, entry, threshold) >= threshold {
                        covered[i] = true;
                    }
                }
            }
            best.push(top);
        }

        let missing: Vec<IndexEntry> = index
            .entries
            .iter()
            .zip(&covered)
            .filter(|(_, covered)| !**covered)
            .map(|(e, _)| e.clone())
            .collect();
        let recovered = self.recover_missing(&missing, index, full_text);

        Assessment {
            best,
            missing,
            recovered,
        }
    }

    fn apply(&self, chunks: Vec<Chunk>, index: &DocumentIndex, assessment: Assessment) -> ValidationResult {
        let Assessment {
            best,
            missing,
            recovered,
        } = assessment;

        let total = chunks.len();
        let mut validated = Vec::new();
        let mut orphaned = Vec::new();
        let mut matches = Vec::new();

        for (mut chunk, top) in chunks.into_iter().zip(best) {
            let Some((entry, similarity)) = top.and_then(|(i, s)| Some((index.entries.get(i)?, s)))
            else {
                orphaned.push(chunk);
                continue;
            };
            let match_type = if similarity >= self.config.exact_threshold {
                MatchType::Exact
            } else {
                MatchType::Partial
            };
            chunk.hierarchy_level = entry.level;
            chunk.add_searchable_title(&entry.title);
            matches.push(ChunkMatch {
                chunk_id: chunk.id.clone(),
                entry_id: Some(entry.entry_id.clone()),
                similarity,
                match_type,
            });
            validated.push(chunk);
        }

        for chunk in &recovered {
            matches.push(ChunkMatch {
                chunk_id: chunk.id.clone(),
                entry_id: Some(chunk.provenance.source_key().to_string()),
                similarity: self.config.recovered_confidence,
                match_type: MatchType::Inferred,
            });
        }

        let score = validation_score(total, validated.len(), missing.len(), orphaned.len());
        debug!(
            validated = validated.len(),
            orphaned = orphaned.len(),
            missing = missing.len(),
            recovered = recovered.len(),
            score,
            "validated chunks against index"
        );

        ValidationResult {
            validated_chunks: validated,
            orphaned_chunks: orphaned,
            missing_sections: missing,
            recovered_chunks: recovered,
            matches,
            score,
            fallback: false,
        }
    }

    fn recover_missing(&self, missing: &[IndexEntry], index: &DocumentIndex, full_text: &str) -> Vec<Chunk> {
        if missing.is_empty() {
            return Vec::new();
        }
        let lines: Vec<&str> = full_text.lines().collect();
        let all_titles: HashSet<String> = index
            .entries
            .iter()
            .map(|e| normalize_for_match(&e.title))
            .collect();

        missing
            .iter()
            .filter_map(|entry| {
                let chunk = self.recover_entry(entry, index, &lines, &all_titles);
                if chunk.is_none() {
                    debug!(title = %entry.title, "missing section not found in text");
                }
                chunk
            })
            .collect()
    }

    fn recover_entry(
        &self,
        entry: &IndexEntry,
        index: &DocumentIndex,
        lines: &[&str],
        all_titles: &HashSet<String>,
    ) -> Option<Chunk> {
        let content = capture_section(
            lines,
            &entry.title,
            all_titles,
            self.config.recovery_max_lines,
            |i| index.in_toc(i),
        )?;

        let chunk_type = match entry.level {
            0 | 1 => ChunkType::Chapter,
            2 => ChunkType::Section,
            _ => ChunkType::Subsection,
        };
        let page = entry.page.unwrap_or(0);
        Some(Chunk::new(
            entry.title.clone(),
            content,
            chunk_type,
            entry.level,
            page,
            page,
            self.config.recovered_confidence,
            Provenance::IndexRecovered {
                entry_id: entry.entry_id.clone(),
            },
        ))
    }
}

/// Capture the text under `title` from raw document lines.
///
/// The title line is searched outside the table of contents: an exact
/// normalized match first, then a short line containing the title. Capture
/// stops at the next major heading (markdown heading, chapter label, numbered
/// heading, or another index title) or after `max_lines` lines.
pub fn capture_section(
    lines: &[&str],
    title: &str,
    other_titles: &HashSet<String>,
    max_lines: usize,
    skip_line: impl Fn(usize) -> bool,
) -> Option<String> {
    let wanted = normalize_for_match(title);
    if wanted.is_empty() {
        return None;
    }
    let candidate = |i: usize, line: &str| {
        !skip_line(i) && !line.trim().is_empty() && !looks_like_toc_entry(line)
    };

    let start = lines
        .iter()
        .enumerate()
        .position(|(i, line)| candidate(i, line) && normalize_for_match(line) == wanted)
        .or_else(|| {
            lines.iter().enumerate().position(|(i, line)| {
                candidate(i, line)
                    && line.trim().chars().count() <= title.chars().count() + 40
                    && normalize_for_match(line).contains(&wanted)
            })
        })?;

    let mut captured = Vec::new();
    for line in lines.iter().skip(start + 1).take(max_lines) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_major_heading(trimmed, &wanted, other_titles) {
            break;
        }
        captured.push(trimmed);
    }

    (!captured.is_empty()).then(|| captured.join("\n"))
}

fn is_major_heading(line: &str, own_title: &str, other_titles: &HashSet<String>) -> bool {
    if MARKDOWN_HEADING.is_match(line)
        || CHAPTER_HEADING.is_match(line)
        || NUMBERED_HEADING.is_match(line)
    {
        return true;
    }
    let normalized = normalize_for_match(line);
    normalized != own_title && other_titles.contains(&normalized)
}
