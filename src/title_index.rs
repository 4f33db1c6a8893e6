//! Exact-title lookup consulted before hybrid search.
//!
//! Every chunk title is expanded into a handful of normalized variants at
//! build time; a query is normalized the same way and, failing a direct
//! hit, retried under a few mechanical rewrites. A hit means the user named
//! a section verbatim, so the caller returns that section whole.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    chunk::Chunk,
    normalize::{collapse_lower, normalize_title, strip_numbering},
};

static DESCRIPTIVE_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:this|the following)\s+(?:section|chapter|topic|appendix)\s+(?:describes|explains|covers|shows|lists|provides)\s+(?:how\s+to\s+)?(.+?)\s*\.?\s*$",
    )
    .unwrap()
});
static QUESTION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:what|how|where|when|why|which|who)(?:\s+(?:is|are|was|were|does|do|can|should|to|i|we|you))*\s+(?:the\s+|a\s+|an\s+)?",
    )
    .unwrap()
});
static REQUEST_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:show|give|tell)\s+(?:me\s+)?(?:about\s+)?(?:the\s+)?").unwrap()
});

/// A chunk reference: owning document and ordinal within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkRef {
    pub document: u64,
    pub ordinal: usize,
}

/// The normalized forms a title is reachable under.
pub fn title_variants(title: &str) -> Vec<String> {
    let mut variants = Vec::with_capacity(5);
    let mut push = |v: String| {
        if !v.is_empty() && !variants.contains(&v) {
            variants.push(v);
        }
    };

    push(collapse_lower(title.trim()));
    push(normalize_title(title));
    push(normalize_title(&strip_numbering(title)));
    if let Some(topic) = DESCRIPTIVE_TITLE.captures(title).and_then(|c| c.get(1)) {
        push(normalize_title(topic.as_str()));
    }

    variants
}

/// Query forms tried after the literal one, in order.
pub fn query_rewrites(query: &str) -> Vec<String> {
    let base = normalize_title(query);
    let mut rewrites = Vec::new();
    let mut push = |v: String| {
        if !v.is_empty() && v != base && !rewrites.contains(&v) {
            rewrites.push(v);
        }
    };

    let stripped = REQUEST_PREFIX
        .replace(&QUESTION_PREFIX.replace(&base, ""), "")
        .trim()
        .to_string();
    push(stripped.clone());

    for form in [&base, &stripped] {
        if let Some(swapped) = swap_number(form) {
            push(swapped);
        }
    }

    let lowered = collapse_lower(query.trim());
    if lowered.contains('-') {
        push(collapse_lower(&lowered.replace('-', " ")));
    } else if lowered.contains(' ') {
        push(lowered.replace(' ', "-"));
    }

    rewrites
}

/// Singular/plural swap on the last word.
fn swap_number(normalized: &str) -> Option<String> {
    let (head, last) = match normalized.rsplit_once(' ') {
        Some((head, last)) => (Some(head), last),
        None => (None, normalized),
    };
    if last.len() < 3 {
        return None;
    }
    let swapped = if let Some(stem) = last.strip_suffix("ies") {
        format!("{stem}y")
    } else if last.ends_with("ss") {
        format!("{last}es")
    } else if let Some(stem) = last.strip_suffix('s') {
        stem.to_string()
    } else if let Some(stem) = last.strip_suffix('y') {
        format!("{stem}ies")
    } else {
        format!("{last}s")
    };
    Some(match head {
        Some(head) => format!("{head} {swapped}"),
        None => swapped,
    })
}

/// Normalized title variants mapped to chunks, plus the title list behind
/// suggestions. Immutable once built; reindexing builds a fresh one.
#[derive(Debug, Default, Clone)]
pub struct ExactTitleIndex {
    /// Variants of each chunk's own title.
    primary: HashMap<String, Vec<ChunkRef>>,
    /// Variants of titles a chunk answers for beyond its own (merged or
    /// contained sub-sections).
    secondary: HashMap<String, Vec<ChunkRef>>,
    /// normalized title -> display title
    titles: BTreeMap<String, String>,
}

impl ExactTitleIndex {
    pub fn build<'a>(chunks: impl IntoIterator<Item = (u64, &'a Chunk)>) -> Self {
        let mut index = Self::default();
        for (document, chunk) in chunks {
            let target = ChunkRef {
                document,
                ordinal: chunk.ordinal,
            };
            for variant in title_variants(&chunk.title) {
                insert(&mut index.primary, variant, target);
            }
            for title in &chunk.searchable_titles {
                if title != &chunk.title {
                    for variant in title_variants(title) {
                        insert(&mut index.secondary, variant, target);
                    }
                }
                let key = normalize_title(title);
                if !key.is_empty() {
                    index.titles.entry(key).or_insert_with(|| title.trim().to_string());
                }
            }
        }
        index
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Chunks whose title the query names, optionally limited to one
    /// document. Empty when nothing matches.
    pub fn lookup(&self, query: &str, document: Option<u64>) -> Vec<ChunkRef> {
        // Trailing numbers and chapter labels stay significant here:
        // "Replication 8" must not answer for "Replication 9".
        let literal = [collapse_lower(query.trim()), normalize_title(query)];
        let candidates = literal.into_iter().chain(query_rewrites(query));

        for candidate in candidates {
            for table in [&self.primary, &self.secondary] {
                let hits: Vec<ChunkRef> = table
                    .get(&candidate)
                    .into_iter()
                    .flatten()
                    .copied()
                    .filter(|r| document.is_none_or(|d| r.document == d))
                    .collect();
                if !hits.is_empty() {
                    return hits;
                }
            }
        }
        Vec::new()
    }

    /// Titles starting with `prefix`, then titles containing it, each group
    /// shortest first.
    pub fn suggestions(&self, prefix: &str, limit: usize) -> Vec<String> {
        let key = normalize_title(prefix);
        if key.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut starts: Vec<&String> = self
            .titles
            .range(key.clone()..)
            .take_while(|(k, _)| k.starts_with(&key))
            .map(|(_, display)| display)
            .collect();
        let mut contains: Vec<&String> = self
            .titles
            .iter()
            .filter(|(k, _)| !k.starts_with(&key) && k.contains(&key))
            .map(|(_, display)| display)
            .collect();
        starts.sort_by_key(|t| t.len());
        contains.sort_by_key(|t| t.len());

        let mut seen = HashSet::new();
        starts
            .into_iter()
            .chain(contains)
            .filter(|t| seen.insert(t.to_lowercase()))
            .take(limit)
            .cloned()
            .collect()
    }
}

fn insert(table: &mut HashMap<String, Vec<ChunkRef>>, variant: String, target: ChunkRef) {
    let refs = table.entry(variant).or_default();
    if !refs.contains(&target) {
        refs.push(target);
    }
}
