//! Typographic heading classification.
//!
//! [`HeadingClassifier`] decides, line by line, whether a [`TextLine`] is a
//! heading and at what level. Decisions use document-wide font statistics
//! ([`FontStats`]) plus an ordered list of rejection rules that filter the
//! usual false positives of technical manuals: table-of-contents lines,
//! numbered procedure steps, procedural labels and bullet items.
//!
//! The classifier never fails; ambiguous lines are not headings.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;

use crate::{chunking::ChunkingConfig, layout::TextLine, rules::CompiledRules};

static LEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\.\s*){4,}|[·…_]{3,}|-{4,}").unwrap());
static SPACED_PAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S(?: {2,}|\t+)\d{1,4}\s*$").unwrap());
static BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,4}$").unwrap());
static NUMBERED_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)]\s+([A-Za-z][\w-]*)").unwrap());
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[•●▪◦○■□➢►*–—-])\s*").unwrap());
static CROSS_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:see|refer to|as described in|for more information|for details)\b")
        .unwrap()
});

/// Why a line was rejected before the font checks ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Blank,
    TocArtifact,
    ProcedureStep,
    ProceduralLabel,
    ListItem,
}

/// Classification of a single line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadingDecision {
    pub is_heading: bool,
    /// Heading level, 1 = chapter. Zero when `is_heading` is false.
    pub level: u8,
    pub confidence: f32,
}

impl HeadingDecision {
    pub const fn not_heading() -> Self {
        Self {
            is_heading: false,
            level: 0,
            confidence: 0.0,
        }
    }

    fn heading(level: u8, confidence: f32) -> Self {
        Self {
            is_heading: true,
            level: level.max(1),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Document-wide font statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct FontStats {
    /// The dominant (body text) font size.
    pub body_size: f32,
    /// Heading candidate sizes, largest first. Level = position + 1.
    pub heading_sizes: Vec<f32>,
}

const FALLBACK_BODY_SIZE: f32 = 10.0;

/// Sizes are compared at half-point resolution.
fn bucket(size: f32) -> f32 {
    (size * 2.0).round() / 2.0
}

impl FontStats {
    /// Body size is the mode of line sizes weighted by character count.
    pub fn body_size(lines: &[TextLine]) -> f32 {
        let mut weights: HashMap<u32, (usize, usize)> = HashMap::new();
        for (order, line) in lines.iter().enumerate() {
            let chars = line.text.trim().chars().count();
            if chars == 0 || !line.font_size.is_finite() || line.font_size <= 0.0 {
                continue;
            }
            let key = (bucket(line.font_size) * 2.0) as u32;
            let entry = weights.entry(key).or_insert((0, order));
            entry.0 += chars;
        }
        // Ties go to the size seen first.
        weights
            .into_iter()
            .max_by(|(_, (wa, oa)), (_, (wb, ob))| wa.cmp(wb).then(ob.cmp(oa)))
            .map(|(key, _)| key as f32 / 2.0)
            .unwrap_or(FALLBACK_BODY_SIZE)
    }

    /// Level for a font size, if the size is one of the heading sizes.
    pub fn level_for(&self, size: f32) -> Option<u8> {
        let size = bucket(size);
        self.heading_sizes
            .iter()
            .position(|s| (*s - size).abs() < f32::EPSILON)
            .map(|pos| (pos + 1).min(u8::MAX as usize) as u8)
    }

    /// Level assigned to bold-only headings: one below the smallest
    /// size-based level.
    pub fn bold_level(&self) -> u8 {
        (self.heading_sizes.len() + 1).min(u8::MAX as usize) as u8
    }
}

/// Classifies lines as headings.
pub struct HeadingClassifier<'a> {
    config: &'a ChunkingConfig,
    rules: &'a CompiledRules,
}

impl<'a> HeadingClassifier<'a> {
    pub fn new(config: &'a ChunkingConfig, rules: &'a CompiledRules) -> Self {
        Self { config, rules }
    }

    /// Compute font statistics for a document.
    ///
    /// Heading sizes are the distinct sizes of lines that pass the rejection
    /// rules and reach the size threshold, ranked largest first (stable in
    /// first-seen order for equal sizes).
    pub fn analyze(&self, lines: &[TextLine]) -> FontStats {
        let body_size = FontStats::body_size(lines);
        let threshold = body_size * self.config.heading_size_threshold;

        let mut heading_sizes: Vec<f32> = Vec::new();
        for line in lines {
            let size = bucket(line.font_size);
            if size + f32::EPSILON < threshold || self.rejection(&line.text).is_some() {
                continue;
            }
            if !heading_sizes.iter().any(|s| (*s - size).abs() < f32::EPSILON) {
                heading_sizes.push(size);
            }
        }
        heading_sizes.sort_by(|a, b| b.total_cmp(a));

        FontStats {
            body_size,
            heading_sizes,
        }
    }

    /// Rules 1-4: lines that are never headings regardless of font.
    pub fn rejection(&self, text: &str) -> Option<Rejection> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Some(Rejection::Blank);
        }

        if LEADER.is_match(trimmed)
            || SPACED_PAGE.is_match(text.trim_start())
            || BARE_NUMBER.is_match(trimmed)
            || trimmed.matches('|').count() >= 2
            || trimmed.chars().count() > self.config.max_heading_chars
        {
            return Some(Rejection::TocArtifact);
        }

        if let Some(caps) = NUMBERED_STEP.captures(trimmed)
            && self.rules.is_action_verb(&caps[1])
        {
            return Some(Rejection::ProcedureStep);
        }

        if self.rules.is_procedural_label(trimmed) {
            return Some(Rejection::ProceduralLabel);
        }

        if BULLET.is_match(trimmed) || CROSS_REFERENCE.is_match(trimmed) {
            return Some(Rejection::ListItem);
        }

        None
    }

    /// Classify one line. First matching rule wins.
    pub fn classify(&self, line: &TextLine, stats: &FontStats) -> HeadingDecision {
        if self.rejection(&line.text).is_some() {
            return HeadingDecision::not_heading();
        }

        let size = bucket(line.font_size);
        let body = stats.body_size.max(f32::EPSILON);
        let threshold = self.config.heading_size_threshold;
        let ratio = size / body;

        if ratio + f32::EPSILON >= threshold {
            let level = stats.level_for(size).unwrap_or_else(|| stats.bold_level());
            // 0.7 at the threshold, 1.0 at twice the body size and above.
            let span = (2.0 - threshold).max(0.1);
            let confidence = 0.7 + 0.3 * ((ratio - threshold) / span).clamp(0.0, 1.0);
            return HeadingDecision::heading(level, confidence);
        }

        if line.is_bold
            && ratio + f32::EPSILON >= self.config.bold_min_ratio
            && !is_sentence_like(&line.text)
        {
            return HeadingDecision::heading(stats.bold_level(), 0.6);
        }

        HeadingDecision::not_heading()
    }

    pub fn classify_all(&self, lines: &[TextLine], stats: &FontStats) -> Vec<HeadingDecision> {
        lines.iter().map(|line| self.classify(line, stats)).collect()
    }
}

/// Long, period-terminated runs are emphasized prose, not headings.
fn is_sentence_like(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.ends_with('.') && trimmed.split_whitespace().count() >= 6
}
