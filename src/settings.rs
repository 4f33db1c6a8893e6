//! Typed engine settings over the string key/value settings table.
//!
//! Every key has a default; the table only records overrides. Malformed
//! values are configuration errors, reported when the engine opens.

use std::{
    fmt,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use tracing::warn;

use crate::{
    chunking::ChunkingConfig,
    config_db::ConfigDb,
    error::{Error, Result},
    rules::BoundaryProfile,
    search::{DiversityMode, RankingMode, SearchConfig},
    validation::ValidationConfig,
};

/// Which embedding backend computes chunk and query vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedderKind {
    /// The ColBERT model, also used as reranker.
    #[default]
    Colbert,
    /// Feature hashing; no model download, no reranker.
    Hashing,
    /// Lexical search only.
    None,
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colbert" => Ok(Self::Colbert),
            "hashing" => Ok(Self::Hashing),
            "none" | "off" => Ok(Self::None),
            other => Err(Error::Config(format!(
                "unknown embedder {other:?} (expected colbert, hashing or none)"
            ))),
        }
    }
}

impl fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Colbert => "colbert",
            Self::Hashing => "hashing",
            Self::None => "none",
        })
    }
}

/// Keys accepted by `config set`, with a short description.
pub const KNOWN_KEYS: &[(&str, &str)] = &[
    ("chunking.heading_size_threshold", "heading font size as a multiple of body size"),
    ("chunking.max_heading_chars", "longer lines are never headings"),
    ("chunking.max_chunk_size", "maximum chunk size in characters"),
    ("chunking.min_chunk_size", "shorter pieces merge into their predecessor"),
    ("chunking.max_section_lines", "lines scanned at most for one section"),
    ("chunking.min_content_lines", "content lines before a same-level heading ends a section"),
    ("chunking.transition_min_lines", "content lines before a transition marker ends a section"),
    ("chunking.max_chapter_children", "chapters with more children are re-checked"),
    ("chunking.max_chapter_pages", "chapters spanning more pages are re-checked"),
    ("chunking.document_type", "built-in boundary profile: generic or srm"),
    ("chunking.rules_file", "JSON boundary profile overriding document_type"),
    ("validation.similarity_threshold", "minimum title similarity for an index match"),
    ("search.alpha", "lexical weight in the hybrid merge"),
    ("search.top_k_lexical", "lexical candidates per document"),
    ("search.top_k_vector", "vector candidates per document"),
    ("search.rerank", "rerank merged candidates"),
    ("search.ranking", "weighted or rerank_only"),
    ("search.diversity", "title, embedding or off"),
    ("search.fuzzy", "fuzzy lexical matching"),
    ("search.exact_title", "answer exact title queries directly"),
    ("models.timeout_ms", "embedding and rerank time limit"),
    ("models.generation_timeout_ms", "answer generation time limit"),
    ("answer.max_passages", "passages given to the generator"),
    ("embedder", "colbert, hashing or none"),
    ("model_name", "ColBERT model id or local path"),
];

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub chunking: ChunkingConfig,
    pub document_type: String,
    pub rules_file: Option<PathBuf>,
    pub validation: ValidationConfig,
    pub search: SearchConfig,
    pub model_timeout: Duration,
    pub generation_timeout: Duration,
    pub max_passages: usize,
    pub embedder: EmbedderKind,
    pub model_name: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let search = SearchConfig::default();
        Self {
            chunking: ChunkingConfig::default(),
            document_type: "generic".to_string(),
            rules_file: None,
            validation: ValidationConfig::default(),
            model_timeout: search.model_timeout,
            search,
            generation_timeout: Duration::from_secs(60),
            max_passages: 5,
            embedder: EmbedderKind::default(),
            model_name: None,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}: invalid value {value:?}: {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::Config(format!("{key}: expected true or false, got {value:?}"))),
    }
}

fn in_range(key: &str, value: f32, min: f32, max: f32) -> Result<f32> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(Error::Config(format!("{key}: {value} is outside {min}..={max}")))
    }
}

fn positive(key: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(Error::Config(format!("{key}: must be greater than zero")));
    }
    Ok(value)
}

impl EngineSettings {
    /// Defaults overlaid with every stored setting. Unknown keys are
    /// ignored with a warning.
    pub fn load(db: &ConfigDb) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in db.list_settings()? {
            if !is_known(&key) {
                warn!(%key, "ignoring unknown setting");
                continue;
            }
            settings.apply(&key, &value)?;
        }
        settings.finish()
    }

    /// Check one key/value pair before it is stored.
    pub fn validate(key: &str, value: &str) -> Result<()> {
        if !is_known(key) {
            return Err(Error::Config(format!("unknown setting {key:?}")));
        }
        let mut settings = Self::default();
        settings.apply(key, value)?;
        settings.finish().map(|_| ())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "chunking.heading_size_threshold" => {
                self.chunking.heading_size_threshold = in_range(key, parse(key, value)?, 1.0, 10.0)?;
            }
            "chunking.max_heading_chars" => self.chunking.max_heading_chars = positive(key, parse(key, value)?)?,
            "chunking.max_chunk_size" => self.chunking.max_chunk_size = positive(key, parse(key, value)?)?,
            "chunking.min_chunk_size" => self.chunking.min_chunk_size = parse(key, value)?,
            "chunking.max_section_lines" => self.chunking.max_section_lines = positive(key, parse(key, value)?)?,
            "chunking.min_content_lines" => self.chunking.min_content_lines = parse(key, value)?,
            "chunking.transition_min_lines" => self.chunking.transition_min_lines = parse(key, value)?,
            "chunking.max_chapter_children" => self.chunking.max_chapter_children = positive(key, parse(key, value)?)?,
            "chunking.max_chapter_pages" => self.chunking.max_chapter_pages = parse(key, value)?,
            "chunking.document_type" => self.document_type = value.trim().to_string(),
            "chunking.rules_file" => self.rules_file = Some(PathBuf::from(value.trim())),
            "validation.similarity_threshold" => {
                self.validation.similarity_threshold = in_range(key, parse(key, value)?, 0.0, 1.0)?;
            }
            "search.alpha" => self.search.alpha = in_range(key, parse(key, value)?, 0.0, 1.0)?,
            "search.top_k_lexical" => self.search.top_k_lexical = positive(key, parse(key, value)?)?,
            "search.top_k_vector" => self.search.top_k_vector = positive(key, parse(key, value)?)?,
            "search.rerank" => self.search.rerank = parse_bool(key, value)?,
            "search.ranking" => self.search.ranking = value.trim().parse()?,
            "search.diversity" => self.search.diversity = value.trim().parse()?,
            "search.fuzzy" => self.search.fuzzy = parse_bool(key, value)?,
            "search.exact_title" => self.search.exact_title = parse_bool(key, value)?,
            "models.timeout_ms" => {
                self.model_timeout = Duration::from_millis(positive(key, parse(key, value)?)? as u64);
            }
            "models.generation_timeout_ms" => {
                self.generation_timeout = Duration::from_millis(positive(key, parse(key, value)?)? as u64);
            }
            "answer.max_passages" => self.max_passages = positive(key, parse(key, value)?)?,
            "embedder" => self.embedder = value.parse()?,
            "model_name" => {
                let name = value.trim();
                self.model_name = (!name.is_empty()).then(|| name.to_string());
            }
            _ => return Err(Error::Config(format!("unknown setting {key:?}"))),
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Self> {
        self.chunking.profile = match &self.rules_file {
            Some(path) => BoundaryProfile::from_file(path)?,
            None => BoundaryProfile::builtin(&self.document_type).ok_or_else(|| {
                Error::Config(format!(
                    "unknown document type {:?} (expected generic or srm)",
                    self.document_type
                ))
            })?,
        };
        // Compile once here so a bad pattern fails at startup, not mid-batch.
        self.chunking.profile.compile()?;
        if self.chunking.min_chunk_size >= self.chunking.max_chunk_size {
            return Err(Error::Config(
                "chunking.min_chunk_size must be below chunking.max_chunk_size".to_string(),
            ));
        }
        self.search.model_timeout = self.model_timeout;
        Ok(self)
    }

    /// Effective value of every known key, for display.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        let c = &self.chunking;
        let s = &self.search;
        let ranking = match s.ranking {
            RankingMode::Weighted => "weighted",
            RankingMode::RerankOnly => "rerank_only",
        };
        let diversity = match s.diversity {
            DiversityMode::Off => "off",
            DiversityMode::Title => "title",
            DiversityMode::Embedding => "embedding",
        };
        vec![
            ("chunking.heading_size_threshold", c.heading_size_threshold.to_string()),
            ("chunking.max_heading_chars", c.max_heading_chars.to_string()),
            ("chunking.max_chunk_size", c.max_chunk_size.to_string()),
            ("chunking.min_chunk_size", c.min_chunk_size.to_string()),
            ("chunking.max_section_lines", c.max_section_lines.to_string()),
            ("chunking.min_content_lines", c.min_content_lines.to_string()),
            ("chunking.transition_min_lines", c.transition_min_lines.to_string()),
            ("chunking.max_chapter_children", c.max_chapter_children.to_string()),
            ("chunking.max_chapter_pages", c.max_chapter_pages.to_string()),
            ("chunking.document_type", self.document_type.clone()),
            (
                "chunking.rules_file",
                self.rules_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            ("validation.similarity_threshold", self.validation.similarity_threshold.to_string()),
            ("search.alpha", s.alpha.to_string()),
            ("search.top_k_lexical", s.top_k_lexical.to_string()),
            ("search.top_k_vector", s.top_k_vector.to_string()),
            ("search.rerank", s.rerank.to_string()),
            ("search.ranking", ranking.to_string()),
            ("search.diversity", diversity.to_string()),
            ("search.fuzzy", s.fuzzy.to_string()),
            ("search.exact_title", s.exact_title.to_string()),
            ("models.timeout_ms", self.model_timeout.as_millis().to_string()),
            ("models.generation_timeout_ms", self.generation_timeout.as_millis().to_string()),
            ("answer.max_passages", self.max_passages.to_string()),
            ("embedder", self.embedder.to_string()),
            ("model_name", self.model_name.clone().unwrap_or_default()),
        ]
    }
}

fn is_known(key: &str) -> bool {
    KNOWN_KEYS.iter().any(|(k, _)| *k == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> (tempfile::TempDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn defaults_without_overrides() {
        let (_tmp, db) = db();
        let settings = EngineSettings::load(&db).unwrap();
        assert_eq!(settings.chunking.max_chunk_size, ChunkingConfig::default().max_chunk_size);
        assert_eq!(settings.search.alpha, 0.5);
        assert_eq!(settings.embedder, EmbedderKind::Colbert);
        assert_eq!(settings.chunking.profile.name, "generic");
    }

    #[test]
    fn overrides_are_typed() {
        let (_tmp, db) = db();
        db.set_setting("search.alpha", "0.25").unwrap();
        db.set_setting("search.ranking", "rerank_only").unwrap();
        db.set_setting("chunking.document_type", "srm").unwrap();
        db.set_setting("models.timeout_ms", "1500").unwrap();
        db.set_setting("embedder", "hashing").unwrap();

        let settings = EngineSettings::load(&db).unwrap();
        assert_eq!(settings.search.alpha, 0.25);
        assert_eq!(settings.search.ranking, RankingMode::RerankOnly);
        assert_eq!(settings.chunking.profile.name, "srm");
        assert_eq!(settings.search.model_timeout, Duration::from_millis(1500));
        assert_eq!(settings.embedder, EmbedderKind::Hashing);
    }

    #[test]
    fn malformed_value_is_config_error() {
        let (_tmp, db) = db();
        db.set_setting("search.alpha", "lots").unwrap();
        assert!(matches!(EngineSettings::load(&db), Err(Error::Config(_))));
    }

    #[test]
    fn unknown_keys_are_ignored_on_load_but_rejected_on_set() {
        let (_tmp, db) = db();
        db.set_setting("legacy.key", "1").unwrap();
        assert!(EngineSettings::load(&db).is_ok());
        assert!(EngineSettings::validate("legacy.key", "1").is_err());
    }

    #[test]
    fn validate_checks_ranges_and_profiles() {
        assert!(EngineSettings::validate("search.alpha", "0.7").is_ok());
        assert!(EngineSettings::validate("search.alpha", "1.5").is_err());
        assert!(EngineSettings::validate("chunking.document_type", "legal").is_err());
        assert!(EngineSettings::validate("chunking.max_chunk_size", "0").is_err());
        assert!(EngineSettings::validate("search.diversity", "embedding").is_ok());
    }

    #[test]
    fn rules_file_replaces_builtin_profile() {
        let (tmp, db) = db();
        let path = tmp.path().join("rules.json");
        let mut profile = BoundaryProfile::generic();
        profile.name = "custom".to_string();
        std::fs::write(&path, serde_json::to_string(&profile).unwrap()).unwrap();
        db.set_setting("chunking.rules_file", path.to_str().unwrap()).unwrap();

        let settings = EngineSettings::load(&db).unwrap();
        assert_eq!(settings.chunking.profile.name, "custom");
    }

    #[test]
    fn describe_covers_known_keys() {
        let described = EngineSettings::default().describe();
        assert_eq!(described.len(), KNOWN_KEYS.len());
        for ((key, _), (known, _)) in described.iter().zip(KNOWN_KEYS) {
            assert_eq!(key, known);
        }
    }
}
