//! Title normalization and fuzzy string similarity.
//!
//! Every component that compares titles (deduplication, index matching,
//! exact-title lookup) goes through these functions so that both sides of a
//! comparison are normalized identically.

use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;

static LEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\s*[.·…_]\s*){2,}").unwrap());
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[•●▪◦·*–—-]|\d+[)])\s+").unwrap());
static TRAILING_PAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\d{1,4}\s*$").unwrap());
static NUMBERING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+(?:\.\d+)*|[A-Z](?:\.\d+)+)[.)]?\s+").unwrap()
});
static CHAPTER_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:chapter|appendix|part)\s+(?:\d+|[ivxlcdm]+|[a-z])\b[\s.:–-]*")
        .unwrap()
});

/// Lowercase, replace punctuation with spaces and collapse whitespace.
///
/// `"Install   Agent:"` and `"install agent"` normalize to the same string.
pub fn normalize_title(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    collapse_whitespace(&mapped)
}

/// Lowercase and collapse whitespace, keeping punctuation.
pub fn collapse_lower(text: &str) -> String {
    collapse_whitespace(&text.to_lowercase())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalization applied before fuzzy matching: strips dot leaders, bullet
/// markers, chapter labels, section numbers and trailing page numbers, then
/// applies [`normalize_title`].
pub fn normalize_for_match(text: &str) -> String {
    let without_bullet = BULLET.replace(text, "");
    let without_leader = LEADER.replace_all(&without_bullet, " ");
    let without_page = TRAILING_PAGE.replace(without_leader.trim_end(), "");
    let without_label = CHAPTER_LABEL.replace(&without_page, "");
    let without_number = NUMBERING.replace(&without_label, "");
    let normalized = normalize_title(&without_number);
    if normalized.is_empty() {
        // A bare label such as "Appendix A": keep it rather than matching nothing.
        normalize_title(&without_page)
    } else {
        normalized
    }
}

/// Remove a leading section number such as `3.2.1` or `A.1`.
pub fn strip_numbering(text: &str) -> String {
    NUMBERING.replace(text, "").trim().to_string()
}

/// Word tokens of the normalized text.
pub fn tokens(text: &str) -> Vec<String> {
    normalize_title(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Character-level similarity in `[0, 1]` based on Levenshtein distance.
pub fn string_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f32 / longest as f32
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Jaccard overlap of the two token sets.
pub fn token_set_overlap(a: &str, b: &str) -> f32 {
    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f32 / union as f32
}

/// Blended title similarity: 40% string similarity + 60% token-set overlap,
/// computed on [`normalize_for_match`] output of both sides.
pub fn title_similarity(a: &str, b: &str) -> f32 {
    let a = normalize_for_match(a);
    let b = normalize_for_match(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    0.4 * string_ratio(&a, &b) + 0.6 * token_set_overlap(&a, &b)
}
