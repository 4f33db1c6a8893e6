//! Declarative boundary and heading rule tables.
//!
//! A [`BoundaryProfile`] is the per-document-type vocabulary used by the
//! heading classifier and by section boundary detection. Profiles are plain
//! data: the built-in ones can be swapped for a JSON file without touching
//! code, and [`CompiledRules`] evaluates the ordered `(pattern, action)`
//! table once per line, first match wins.

use std::{collections::HashSet, path::Path};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    normalize::normalize_title,
};

/// What a matching line does to the section currently being scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Procedural sub-structure ("Steps"): never ends the section.
    Continue,
    /// Strong boundary: always ends the section.
    Stop,
    /// Weak boundary: ends the section only on a heading at the same level.
    StopAtSameLevel,
    /// Transition marker: ends the section once enough content was seen.
    StopAfterContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryRule {
    /// Case-insensitive regex matched against the trimmed line text.
    pub pattern: String,
    pub action: RuleAction,
    /// Only apply the rule to lines classified as headings.
    #[serde(default)]
    pub headings_only: bool,
}

impl BoundaryRule {
    fn new(pattern: &str, action: RuleAction, headings_only: bool) -> Self {
        Self {
            pattern: pattern.to_string(),
            action,
            headings_only,
        }
    }
}

/// Vocabulary for one document type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryProfile {
    pub name: String,
    /// Ordered boundary table; the first matching rule decides.
    pub rules: Vec<BoundaryRule>,
    /// Labels that look like headings but belong to the enclosing body.
    #[serde(default)]
    pub procedural_labels: Vec<String>,
    /// A procedural label containing one of these substrings is still
    /// allowed to be a heading.
    #[serde(default)]
    pub content_keywords: Vec<String>,
    /// Verbs that mark `"<n>. <verb> ..."` lines as procedure steps.
    #[serde(default)]
    pub action_verbs: Vec<String>,
    /// Front-matter headings whose sections are not emitted.
    #[serde(default)]
    pub skip_titles: Vec<String>,
}

const ACTION_VERBS: &[&str] = &[
    "add", "apply", "check", "choose", "click", "close", "configure",
    "confirm", "copy", "create", "delete", "disable", "double-click",
    "download", "edit", "enable", "ensure", "enter", "execute", "expand",
    "go", "install", "launch", "log", "navigate", "open", "provide",
    "remove", "repeat", "restart", "return", "review", "right-click", "run",
    "save", "select", "set", "specify", "start", "stop", "type", "upload",
    "use", "verify", "wait",
];

const PROCEDURAL_LABELS: &[&str] = &[
    "steps",
    "procedure",
    "prerequisites",
    "notes",
    "note",
    "example",
    "examples",
    "tip",
    "tips",
    "important",
    "caution",
    "warning",
    "before you begin",
    "about this task",
    "results",
    "result",
];

const CONTENT_KEYWORDS: &[&str] = &[
    "install", "configur", "upgrad", "replicat", "recover", "network",
    "storage", "security", "certificate", "database",
];

impl BoundaryProfile {
    /// Vocabulary that fits most technical manuals.
    pub fn generic() -> Self {
        Self {
            name: "generic".to_string(),
            rules: vec![
                BoundaryRule::new(
                    r"^(?:steps|procedure)\s*:?$",
                    RuleAction::Continue,
                    false,
                ),
                BoundaryRule::new(
                    r"^(?:chapter|appendix|part)\s+(?:\d+|[ivxlcdm]+|[a-z])\b",
                    RuleAction::Stop,
                    false,
                ),
                BoundaryRule::new(
                    r"^(?:next steps|what to do next|related (?:information|topics|links)|see also)\s*:?$",
                    RuleAction::StopAfterContent,
                    false,
                ),
                BoundaryRule::new(
                    r"^(?:overview|introduction|summary|about this (?:guide|book|document))\s*$",
                    RuleAction::StopAtSameLevel,
                    true,
                ),
            ],
            procedural_labels: PROCEDURAL_LABELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            content_keywords: CONTENT_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            action_verbs: ACTION_VERBS.iter().map(|s| s.to_string()).collect(),
            skip_titles: vec![
                "contents".to_string(),
                "table of contents".to_string(),
            ],
        }
    }

    /// Site Recovery Manager administration and installation guides. Task
    /// topics there open with "Prerequisites" and close with "Results", so
    /// those labels end the preceding concept text.
    pub fn srm() -> Self {
        let mut profile = Self::generic();
        profile.name = "srm".to_string();
        profile.rules.insert(
            1,
            BoundaryRule::new(
                r"^(?:prerequisites|results?)\s*:?$",
                RuleAction::Stop,
                false,
            ),
        );
        profile.rules.push(BoundaryRule::new(
            r"^(?:protection groups?|recovery plans?|array[- ]based replication|vsphere replication|site pairing)\b",
            RuleAction::StopAtSameLevel,
            true,
        ));
        profile.content_keywords.extend(
            ["protection group", "recovery plan", "placeholder", "inventory mapping"]
                .iter()
                .map(|s| s.to_string()),
        );
        profile
    }

    /// Look up a built-in profile by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "generic" => Some(Self::generic()),
            "srm" => Some(Self::srm()),
            _ => None,
        }
    }

    /// Load a profile from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let profile: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!(
                "invalid boundary profile {}: {e}",
                path.display()
            ))
        })?;
        Ok(profile)
    }

    pub fn compile(&self) -> Result<CompiledRules> {
        let rules = self
            .rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&format!("(?i){}", rule.pattern))?;
                Ok(CompiledRule {
                    regex,
                    action: rule.action,
                    headings_only: rule.headings_only,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledRules {
            rules,
            procedural_labels: self
                .procedural_labels
                .iter()
                .map(|l| normalize_title(l))
                .collect(),
            content_keywords: self
                .content_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            action_verbs: self
                .action_verbs
                .iter()
                .map(|v| v.to_lowercase())
                .collect(),
            skip_titles: self
                .skip_titles
                .iter()
                .map(|t| normalize_title(t))
                .collect(),
        })
    }
}

impl Default for BoundaryProfile {
    fn default() -> Self {
        Self::generic()
    }
}

#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    action: RuleAction,
    headings_only: bool,
}

/// A [`BoundaryProfile`] with its patterns compiled.
#[derive(Debug)]
pub struct CompiledRules {
    rules: Vec<CompiledRule>,
    procedural_labels: HashSet<String>,
    content_keywords: Vec<String>,
    action_verbs: HashSet<String>,
    skip_titles: HashSet<String>,
}

impl CompiledRules {
    /// Evaluate the boundary table against one line.
    pub fn first_match(&self, text: &str, is_heading: bool) -> Option<RuleAction> {
        let text = text.trim();
        self.rules
            .iter()
            .filter(|rule| is_heading || !rule.headings_only)
            .find(|rule| rule.regex.is_match(text))
            .map(|rule| rule.action)
    }

    /// True when the line is a procedural label ("Steps", "Notes:") without
    /// any content-bearing keyword.
    pub fn is_procedural_label(&self, text: &str) -> bool {
        let normalized = normalize_title(text);
        if normalized.is_empty() {
            return false;
        }
        let words = normalized.split_whitespace().count();
        let is_label = self.procedural_labels.iter().any(|label| {
            normalized == *label
                || (normalized.starts_with(label.as_str())
                    && normalized[label.len()..].starts_with(' ')
                    && words <= label.split_whitespace().count() + 3)
        });
        is_label
            && !self
                .content_keywords
                .iter()
                .any(|k| normalized.contains(k.as_str()))
    }

    pub fn is_action_verb(&self, word: &str) -> bool {
        self.action_verbs.contains(&word.to_lowercase())
    }

    pub fn is_skipped_title(&self, normalized_title: &str) -> bool {
        self.skip_titles.contains(normalized_title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic() -> CompiledRules {
        BoundaryProfile::generic().compile().unwrap()
    }

    #[test]
    fn first_match_respects_order() {
        let rules = generic();
        assert_eq!(rules.first_match("Steps", true), Some(RuleAction::Continue));
        assert_eq!(
            rules.first_match("Chapter 4 Recovery Plans", true),
            Some(RuleAction::Stop)
        );
        assert_eq!(
            rules.first_match("What to do next", false),
            Some(RuleAction::StopAfterContent)
        );
        assert_eq!(rules.first_match("Replicating virtual machines", true), None);
    }

    #[test]
    fn headings_only_rules_skip_body_lines() {
        let rules = generic();
        assert_eq!(
            rules.first_match("Overview", true),
            Some(RuleAction::StopAtSameLevel)
        );
        assert_eq!(rules.first_match("Overview", false), None);
    }

    #[test]
    fn srm_profile_adds_strong_labels() {
        let generic = generic();
        let srm = BoundaryProfile::srm().compile().unwrap();
        assert_eq!(generic.first_match("Prerequisites", false), None);
        assert_eq!(srm.first_match("Prerequisites", false), Some(RuleAction::Stop));
    }

    #[test]
    fn procedural_labels_with_keywords_are_allowed() {
        let rules = generic();
        assert!(rules.is_procedural_label("Steps"));
        assert!(rules.is_procedural_label("Notes:"));
        assert!(rules.is_procedural_label("Before you begin"));
        assert!(!rules.is_procedural_label("Prerequisites for Installing the Server"));
        assert!(!rules.is_procedural_label("Stepping Through Failover"));
    }

    #[test]
    fn profile_roundtrips_through_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rules.json");
        let profile = BoundaryProfile::srm();
        std::fs::write(&path, serde_json::to_string(&profile).unwrap()).unwrap();

        let loaded = BoundaryProfile::from_file(&path).unwrap();
        assert_eq!(loaded, profile);
    }

    #[test]
    fn invalid_pattern_fails_to_compile() {
        let mut profile = BoundaryProfile::generic();
        profile.rules.push(BoundaryRule::new("(unclosed", RuleAction::Stop, false));
        assert!(profile.compile().is_err());
    }

    #[test]
    fn builtin_lookup() {
        assert!(BoundaryProfile::builtin("srm").is_some());
        assert!(BoundaryProfile::builtin("unknown").is_none());
    }
}
