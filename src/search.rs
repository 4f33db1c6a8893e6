use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    catalog::{DocumentArtifacts, Snapshot},
    chunk::Chunk,
    embedding::{Embedder, dot, embed_query},
    error::{Error, Result},
    normalize::normalize_title,
    reranker::{CrossEncoder, rerank_bounded},
    resolver::{ContentResolver, resolve_content},
    tantivy_index::{LexicalHit, SearchIndex},
};

/// Weight of the cross-encoder score in weighted ranking.
pub const RERANK_WEIGHT: f32 = 0.3;
/// Cosine similarity at which two results count as near duplicates.
pub const EMBEDDING_DIVERSITY_THRESHOLD: f32 = 0.8;

/// How rerank scores enter the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    /// `0.7 * combined + 0.3 * rerank`
    #[default]
    Weighted,
    /// The rerank score alone.
    RerankOnly,
}

impl FromStr for RankingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "weighted" => Ok(Self::Weighted),
            "rerank_only" => Ok(Self::RerankOnly),
            other => Err(Error::Config(format!(
                "unknown ranking mode '{other}' (expected weighted or rerank_only)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiversityMode {
    Off,
    /// One result per normalized title.
    #[default]
    Title,
    /// Additionally skip results whose vector is too close to one already
    /// kept.
    Embedding,
}

impl FromStr for DiversityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "off" => Ok(Self::Off),
            "title" => Ok(Self::Title),
            "embedding" => Ok(Self::Embedding),
            other => Err(Error::Config(format!(
                "unknown diversity mode '{other}' (expected off, title or embedding)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Lexical weight in the combined score; vectors get `1 - alpha`.
    pub alpha: f32,
    pub top_k_lexical: usize,
    pub top_k_vector: usize,
    pub rerank: bool,
    pub ranking: RankingMode,
    pub diversity: DiversityMode,
    /// OR fuzzy term matches into the lexical query.
    pub fuzzy: bool,
    /// Consult the exact-title index before anything else.
    pub exact_title: bool,
    /// Bound on each embedding or rerank call.
    pub model_timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            top_k_lexical: 50,
            top_k_vector: 50,
            rerank: true,
            ranking: RankingMode::Weighted,
            diversity: DiversityMode::Title,
            fuzzy: false,
            exact_title: true,
            model_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    /// Restrict the search to one document.
    pub document: Option<u64>,
    /// Skip the vector and rerank stages.
    pub lexical_only: bool,
    pub rerank: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
            document: None,
            lexical_only: false,
            rerank: true,
        }
    }

    pub fn in_document(mut self, document: u64) -> Self {
        self.document = Some(document);
        self
    }

    pub fn lexical_only(mut self) -> Self {
        self.lexical_only = true;
        self
    }

    pub fn without_rerank(mut self) -> Self {
        self.rerank = false;
        self
    }
}

/// Which stages produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ExactTitle,
    Hybrid,
    Lexical,
    Vector,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Arc<DocumentArtifacts>,
    pub chunk: Arc<Chunk>,
    /// Lexical score normalized to `[0, 1]` within its document.
    pub lexical_score: Option<f32>,
    pub vector_score: Option<f32>,
    pub rerank_score: Option<f32>,
    pub final_score: f32,
    pub match_type: MatchKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchStatus {
    Complete,
    /// Some stage fell back to lexical-only scoring.
    Degraded { reasons: Vec<String> },
    /// Nothing could be searched; results are empty.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub status: SearchStatus,
    /// True when the exact-title index answered and no other stage ran.
    pub short_circuited: bool,
}

impl SearchOutcome {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            status: SearchStatus::Failed {
                reason: reason.into(),
            },
            short_circuited: false,
        }
    }
}

/// `alpha * lexical + (1 - alpha) * vector`, a missing term contributing
/// nothing.
pub fn combine_scores(alpha: f32, lexical: Option<f32>, vector: Option<f32>) -> f32 {
    alpha * lexical.unwrap_or(0.0) + (1.0 - alpha) * vector.unwrap_or(0.0)
}

/// Divide by the batch maximum. All-zero batches stay zero.
pub fn normalize_by_max(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|s| s / max).collect()
}

#[derive(Debug, Clone)]
struct Candidate {
    chunk: Arc<Chunk>,
    lexical: Option<f32>,
    vector: Option<f32>,
    rerank: Option<f32>,
    score: f32,
}

impl Candidate {
    fn match_kind(&self) -> MatchKind {
        match (self.lexical, self.vector) {
            (Some(_), Some(_)) => MatchKind::Hybrid,
            (None, Some(_)) => MatchKind::Vector,
            _ => MatchKind::Lexical,
        }
    }
}

/// Scored candidates of one document.
struct DocumentScores {
    document: Arc<DocumentArtifacts>,
    candidates: Vec<Candidate>,
    degraded: Vec<String>,
}

/// Query-time pipeline: exact-title short-circuit, then per-document lexical
/// and vector scoring, merge, optional rerank, diversity.
pub struct HybridSearchEngine<'a> {
    index: &'a SearchIndex,
    config: &'a SearchConfig,
    embedder: Option<Arc<dyn Embedder>>,
    reranker: Option<Arc<dyn CrossEncoder>>,
    /// Completes exact-title hits; empty keeps stored content.
    resolvers: &'a [Box<dyn ContentResolver>],
}

impl<'a> HybridSearchEngine<'a> {
    pub fn new(index: &'a SearchIndex, config: &'a SearchConfig) -> Self {
        Self {
            index,
            config,
            embedder: None,
            reranker: None,
            resolvers: &[],
        }
    }

    pub fn with_resolvers(mut self, resolvers: &'a [Box<dyn ContentResolver>]) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn with_embedder(mut self, embedder: Option<Arc<dyn Embedder>>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_reranker(mut self, reranker: Option<Arc<dyn CrossEncoder>>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn search(&self, snapshot: &Snapshot, request: &SearchRequest) -> SearchOutcome {
        let query = request.query.trim();
        if query.is_empty() || request.top_k == 0 {
            return SearchOutcome {
                results: Vec::new(),
                status: SearchStatus::Complete,
                short_circuited: false,
            };
        }

        if let Some(outcome) = self.exact_title(snapshot, request) {
            return outcome;
        }

        let documents: Vec<Arc<DocumentArtifacts>> = match request.document {
            Some(id) => match snapshot.documents.get(&id) {
                Some(doc) => vec![Arc::clone(doc)],
                None => return SearchOutcome::failed(format!("document {id:016x} is not indexed")),
            },
            None => snapshot.documents.values().cloned().collect(),
        };
        if documents.is_empty() {
            return SearchOutcome::failed("no documents are indexed");
        }

        let mut degraded = Vec::new();
        let query_vector = if request.lexical_only {
            None
        } else {
            self.embed_query(query, &mut degraded)
        };
        let reranker = self
            .reranker
            .as_ref()
            .filter(|_| self.config.rerank && request.rerank && !request.lexical_only);

        let per_document: Vec<Result<DocumentScores>> = documents
            .par_iter()
            .map(|doc| self.score_document(doc, query, query_vector.as_deref(), reranker))
            .collect();

        let mut candidates: Vec<(Arc<DocumentArtifacts>, Candidate)> = Vec::new();
        let mut failures = Vec::new();
        for (doc, scored) in documents.iter().zip(per_document) {
            match scored {
                Ok(scores) => {
                    degraded.extend(scores.degraded);
                    candidates.extend(
                        scores
                            .candidates
                            .into_iter()
                            .map(|c| (Arc::clone(&scores.document), c)),
                    );
                }
                Err(e) => {
                    warn!(document = %doc.id, error = %e, "document search failed");
                    failures.push(format!("{}: {e}", doc.record.file_name));
                }
            }
        }

        if failures.len() == documents.len() {
            return SearchOutcome::failed(failures.join("; "));
        }
        degraded.extend(failures);

        // Stable: equal scores keep document order, then lexical-then-vector
        // insertion order.
        candidates.sort_by(|a, b| b.1.score.total_cmp(&a.1.score));
        let kept = diversify(candidates, request.top_k, self.config.diversity);
        debug!(query, results = kept.len(), "hybrid search finished");

        SearchOutcome {
            results: kept
                .into_iter()
                .map(|(document, c)| SearchResult {
                    match_type: c.match_kind(),
                    document,
                    chunk: c.chunk,
                    lexical_score: c.lexical,
                    vector_score: c.vector,
                    rerank_score: c.rerank,
                    final_score: c.score,
                })
                .collect(),
            status: if degraded.is_empty() {
                SearchStatus::Complete
            } else {
                SearchStatus::Degraded { reasons: degraded }
            },
            short_circuited: false,
        }
    }

    fn exact_title(&self, snapshot: &Snapshot, request: &SearchRequest) -> Option<SearchOutcome> {
        if !self.config.exact_title {
            return None;
        }
        let hits = snapshot.titles.lookup(&request.query, request.document);
        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|target| snapshot.resolve(target))
            .take(request.top_k)
            .map(|(document, chunk)| SearchResult {
                document: Arc::clone(document),
                chunk: self.complete(document, chunk),
                lexical_score: None,
                vector_score: None,
                rerank_score: None,
                final_score: 1.0,
                match_type: MatchKind::ExactTitle,
            })
            .collect();
        if results.is_empty() {
            return None;
        }
        debug!(query = %request.query, hits = results.len(), "exact title match");
        Some(SearchOutcome {
            results,
            status: SearchStatus::Complete,
            short_circuited: true,
        })
    }

    /// The hit with its whole section's content when the resolver chain
    /// finds more than the stored window or stub.
    fn complete(&self, document: &DocumentArtifacts, chunk: &Arc<Chunk>) -> Arc<Chunk> {
        if self.resolvers.is_empty() {
            return Arc::clone(chunk);
        }
        let content = resolve_content(self.resolvers, document, chunk);
        if content == chunk.content {
            return Arc::clone(chunk);
        }
        let mut resolved = Chunk::clone(chunk);
        resolved.content = content;
        Arc::new(resolved)
    }

    fn embed_query(&self, query: &str, degraded: &mut Vec<String>) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embed_query(embedder, query, self.config.model_timeout) {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "query embedding unavailable, using lexical scores only");
                degraded.push(format!("query embedding unavailable: {e}"));
                None
            }
        }
    }

    fn lexical_hits(&self, query: &str, doc: &DocumentArtifacts) -> Result<Vec<LexicalHit>> {
        let hex = doc.id.hex();
        if self.config.fuzzy {
            self.index
                .search_fuzzy(query, Some(&hex), self.config.top_k_lexical)
        } else {
            self.index
                .search_in_document(query, &hex, self.config.top_k_lexical)
        }
    }

    fn score_document(
        &self,
        doc: &Arc<DocumentArtifacts>,
        query: &str,
        query_vector: Option<&[f32]>,
        reranker: Option<&Arc<dyn CrossEncoder>>,
    ) -> Result<DocumentScores> {
        let mut degraded = Vec::new();

        let lexical = match self.lexical_hits(query, doc) {
            Ok(hits) => Some(hits),
            Err(e) if query_vector.is_some() => {
                warn!(document = %doc.id, error = %e, "lexical stage failed");
                degraded.push(format!("{}: lexical stage failed: {e}", doc.record.file_name));
                None
            }
            Err(e) => return Err(e),
        };

        let vector = query_vector.and_then(|q| match vector_scores(doc, q, self.config.top_k_vector) {
            Ok(scores) => Some(scores),
            Err(reason) => {
                debug!(document = %doc.id, %reason, "vector stage skipped");
                degraded.push(format!("{}: {reason}", doc.record.file_name));
                None
            }
        });

        let mut candidates = merge(doc, lexical.as_deref(), vector.as_deref(), self.config.alpha);

        if let Some(reranker) = reranker
            && !candidates.is_empty()
        {
            let passages: Vec<String> = candidates.iter().map(|c| c.chunk.embedding_text()).collect();
            match rerank_bounded(reranker, query, passages, self.config.model_timeout) {
                Ok(scores) if scores.len() == candidates.len() => {
                    for (candidate, score) in candidates.iter_mut().zip(scores) {
                        candidate.rerank = Some(score);
                        candidate.score = match self.config.ranking {
                            RankingMode::Weighted => {
                                (1.0 - RERANK_WEIGHT) * candidate.score + RERANK_WEIGHT * score
                            }
                            RankingMode::RerankOnly => score,
                        };
                    }
                }
                Ok(scores) => {
                    degraded.push(format!(
                        "{}: reranker returned {} scores for {} passages",
                        doc.record.file_name,
                        scores.len(),
                        candidates.len()
                    ));
                    candidates = merge(doc, lexical.as_deref(), None, self.config.alpha);
                }
                Err(e) => {
                    warn!(document = %doc.id, error = %e, "rerank failed, using lexical scores");
                    degraded.push(format!("{}: rerank unavailable: {e}", doc.record.file_name));
                    candidates = merge(doc, lexical.as_deref(), None, self.config.alpha);
                }
            }
        }

        Ok(DocumentScores {
            document: Arc::clone(doc),
            candidates,
            degraded,
        })
    }
}

/// Top `limit` chunks of a document by inner product with the query,
/// clamped at zero. Ties keep chunk order.
fn vector_scores(
    doc: &DocumentArtifacts,
    query: &[f32],
    limit: usize,
) -> std::result::Result<Vec<(usize, f32)>, String> {
    let vectors = doc
        .vectors
        .as_ref()
        .ok_or_else(|| "no stored vectors".to_string())?;
    if vectors.dimension as usize != query.len() {
        return Err(format!(
            "stored vectors have dimension {}, query has {}",
            vectors.dimension,
            query.len()
        ));
    }
    if vectors.rows as usize != doc.chunks.len() {
        return Err(format!(
            "{} stored vectors for {} chunks",
            vectors.rows,
            doc.chunks.len()
        ));
    }

    let mut scored: Vec<(usize, f32)> = doc
        .chunks
        .iter()
        .enumerate()
        .filter_map(|(position, chunk)| {
            vectors
                .row(position)
                .map(|row| (chunk.ordinal, dot(query, row).max(0.0)))
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(limit);
    Ok(scored)
}

/// Union lexical and vector candidates, lexical first, deduplicated by
/// chunk. When the vector stage did not run the lexical score stands alone.
fn merge(
    doc: &DocumentArtifacts,
    lexical: Option<&[LexicalHit]>,
    vector: Option<&[(usize, f32)]>,
    alpha: f32,
) -> Vec<Candidate> {
    let lexical = lexical.unwrap_or_default();
    let raw: Vec<f32> = lexical.iter().map(|h| h.score).collect();
    let normalized = normalize_by_max(&raw);

    let mut order: Vec<usize> = Vec::new();
    let mut lexical_by_ordinal: HashMap<usize, f32> = HashMap::new();
    for (hit, score) in lexical.iter().zip(normalized) {
        if lexical_by_ordinal.insert(hit.ordinal, score).is_none() {
            order.push(hit.ordinal);
        }
    }

    let mut vector_by_ordinal: HashMap<usize, f32> = HashMap::new();
    for &(ordinal, score) in vector.unwrap_or_default() {
        if vector_by_ordinal.insert(ordinal, score).is_none() && !lexical_by_ordinal.contains_key(&ordinal) {
            order.push(ordinal);
        }
    }

    order
        .into_iter()
        .filter_map(|ordinal| {
            let chunk = doc.chunk(ordinal)?;
            let lexical = lexical_by_ordinal.get(&ordinal).copied();
            let vector_score = vector_by_ordinal.get(&ordinal).copied();
            let score = match vector {
                Some(_) => combine_scores(alpha, lexical, vector_score),
                None => lexical.unwrap_or(0.0),
            };
            Some(Candidate {
                chunk: Arc::clone(chunk),
                lexical,
                vector: vector_score,
                rerank: None,
                score,
            })
        })
        .collect()
}

/// Greedy near-duplicate suppression over a ranked list, backfilled from
/// the excluded results in rank order when fewer than `top_k` survive.
fn diversify(
    ranked: Vec<(Arc<DocumentArtifacts>, Candidate)>,
    top_k: usize,
    mode: DiversityMode,
) -> Vec<(Arc<DocumentArtifacts>, Candidate)> {
    if mode == DiversityMode::Off {
        return ranked.into_iter().take(top_k).collect();
    }

    let mut seen_titles: HashSet<String> = HashSet::new();
    let mut kept_vectors: Vec<Vec<f32>> = Vec::new();
    let mut kept = Vec::new();
    let mut excluded = Vec::new();

    for (doc, candidate) in ranked {
        if kept.len() >= top_k {
            break;
        }
        let title = normalize_title(&candidate.chunk.title);
        let vector = doc.vector(candidate.chunk.ordinal);
        let duplicate_title = seen_titles.contains(&title);
        let duplicate_vector = mode == DiversityMode::Embedding
            && vector.is_some_and(|v| {
                kept_vectors
                    .iter()
                    .any(|k| dot(k, v) >= EMBEDDING_DIVERSITY_THRESHOLD)
            });

        if duplicate_title || duplicate_vector {
            excluded.push((doc, candidate));
            continue;
        }
        seen_titles.insert(title);
        if let Some(v) = vector {
            kept_vectors.push(v.to_vec());
        }
        kept.push((doc, candidate));
    }

    let missing = top_k.saturating_sub(kept.len());
    kept.extend(excluded.into_iter().take(missing));
    kept
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{
        catalog::Catalog,
        chunk::{ChunkType, Provenance, assign_identity},
        doc_id::DocumentId,
        embedding::{HashingEmbedder, VectorMatrix, embed_chunks},
        incremental::{DocumentRecord, Fingerprint},
    };

    fn artifacts(
        file: &str,
        sections: &[(&str, &str)],
        embedder: Option<&Arc<dyn Embedder>>,
    ) -> DocumentArtifacts {
        let chunks: Vec<Chunk> = sections
            .iter()
            .enumerate()
            .map(|(i, (title, body))| {
                Chunk::new(
                    *title,
                    *body,
                    ChunkType::Section,
                    2,
                    i as u32 + 1,
                    i as u32 + 1,
                    1.0,
                    Provenance::FontDerived {
                        section_id: format!("s{i}"),
                    },
                )
            })
            .collect();
        artifacts_from(file, chunks, embedder)
    }

    fn artifacts_from(
        file: &str,
        mut chunks: Vec<Chunk>,
        embedder: Option<&Arc<dyn Embedder>>,
    ) -> DocumentArtifacts {
        let id = DocumentId::new(file);
        assign_identity(&mut chunks, &id, 0);
        let vectors = embedder.map(|e| embed_chunks(e, &chunks, Duration::from_secs(5)).unwrap());
        let record = DocumentRecord {
            document_id: id.numeric,
            file_name: file.to_string(),
            source_path: PathBuf::from(file),
            fingerprint: Fingerprint::new(0, b""),
            chunk_count: chunks.len(),
        };
        DocumentArtifacts::new(record, chunks, vectors, None)
    }

    struct Fixture {
        index: SearchIndex,
        catalog: Catalog,
    }

    impl Fixture {
        fn new(docs: Vec<DocumentArtifacts>) -> Self {
            let index = SearchIndex::open_in_ram().unwrap();
            for doc in &docs {
                let chunks: Vec<Chunk> = doc.chunks.iter().map(|c| (**c).clone()).collect();
                index.replace_document(&doc.id.hex(), &chunks).unwrap();
            }
            let catalog = Catalog::new();
            catalog.install_all(docs);
            Self { index, catalog }
        }
    }

    fn manual(embedder: Option<&Arc<dyn Embedder>>) -> DocumentArtifacts {
        artifacts(
            "srm.pdf",
            &[
                ("Installing the Server", "Run the installer and accept the license agreement."),
                ("Protection Groups", "A protection group collects virtual machines replicated together."),
                ("Recovery Plans", "A recovery plan orders the power on of protected virtual machines."),
                ("Testing Recovery Plans", "Run a test recovery plan in an isolated network."),
            ],
            embedder,
        )
    }

    struct FixedScores(Vec<(&'static str, f32)>);

    impl CrossEncoder for FixedScores {
        fn name(&self) -> &str {
            "fixed"
        }

        fn score(&self, _query: &str, passage: &str) -> Result<f32> {
            Ok(self
                .0
                .iter()
                .find(|(title, _)| passage.starts_with(title))
                .map(|(_, s)| *s)
                .unwrap_or(0.0))
        }
    }

    struct Unavailable;

    impl CrossEncoder for Unavailable {
        fn name(&self) -> &str {
            "unavailable"
        }

        fn score(&self, _query: &str, _passage: &str) -> Result<f32> {
            Err(Error::ModelUnavailable {
                model: "reranker",
                reason: "offline".to_string(),
            })
        }
    }

    impl Embedder for Unavailable {
        fn name(&self) -> &str {
            "unavailable"
        }

        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::ModelUnavailable {
                model: "embedder",
                reason: "offline".to_string(),
            })
        }
    }

    #[test]
    fn combine_uses_only_present_terms() {
        assert!((combine_scores(0.5, Some(0.8), Some(0.4)) - 0.6).abs() < 1e-6);
        assert!((combine_scores(0.5, Some(0.8), None) - 0.4).abs() < 1e-6);
        assert!((combine_scores(0.5, None, Some(0.4)) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn normalize_by_max_scales_to_unit() {
        assert_eq!(normalize_by_max(&[2.0, 1.0, 0.5]), vec![1.0, 0.5, 0.25]);
        assert_eq!(normalize_by_max(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn exact_title_short_circuits() {
        let fixture = Fixture::new(vec![manual(None)]);
        let config = SearchConfig::default();
        let engine = HybridSearchEngine::new(&fixture.index, &config)
            .with_reranker(Some(Arc::new(Unavailable)));

        let outcome = engine.search(&fixture.catalog.snapshot(), &SearchRequest::new("recovery plans", 5));
        assert!(outcome.short_circuited);
        assert_eq!(outcome.status, SearchStatus::Complete);
        assert_eq!(outcome.results.len(), 1);
        let hit = &outcome.results[0];
        assert_eq!(hit.final_score, 1.0);
        assert_eq!(hit.match_type, MatchKind::ExactTitle);
        assert_eq!(
            hit.chunk.content,
            "A recovery plan orders the power on of protected virtual machines."
        );
        assert!(hit.lexical_score.is_none() && hit.rerank_score.is_none());
    }

    #[test]
    fn exact_title_hit_carries_whole_section() {
        let window = |content: &str| {
            Chunk::new(
                "Reference",
                content,
                ChunkType::Section,
                2,
                7,
                7,
                1.0,
                Provenance::FontDerived {
                    section_id: "s0".to_string(),
                },
            )
        };
        let doc = artifacts_from(
            "ref.pdf",
            vec![
                window("Port 443 carries the web client traffic."),
                window("Port 9086 carries replication traffic between sites."),
            ],
            None,
        );
        let fixture = Fixture::new(vec![doc]);
        let config = SearchConfig::default();
        let resolvers = crate::resolver::default_chain();

        let plain = HybridSearchEngine::new(&fixture.index, &config);
        let outcome = plain.search(&fixture.catalog.snapshot(), &SearchRequest::new("reference", 5));
        assert_eq!(outcome.results[0].chunk.content, "Port 443 carries the web client traffic.");

        let engine = HybridSearchEngine::new(&fixture.index, &config).with_resolvers(&resolvers);
        let outcome = engine.search(&fixture.catalog.snapshot(), &SearchRequest::new("reference", 5));
        assert!(outcome.short_circuited);
        assert_eq!(outcome.results.len(), 2);
        for hit in &outcome.results {
            assert_eq!(
                hit.chunk.content,
                "Port 443 carries the web client traffic.\nPort 9086 carries replication traffic between sites."
            );
            assert_eq!(hit.match_type, MatchKind::ExactTitle);
        }
    }

    #[test]
    fn lexical_only_ranking() {
        let fixture = Fixture::new(vec![manual(None)]);
        let config = SearchConfig {
            exact_title: false,
            ..SearchConfig::default()
        };
        let engine = HybridSearchEngine::new(&fixture.index, &config);

        let outcome = engine.search(&fixture.catalog.snapshot(), &SearchRequest::new("isolated network test", 5));
        assert_eq!(outcome.status, SearchStatus::Complete);
        assert_eq!(outcome.results[0].chunk.title, "Testing Recovery Plans");
        assert_eq!(outcome.results[0].final_score, 1.0);
        assert_eq!(outcome.results[0].match_type, MatchKind::Lexical);
    }

    #[test]
    fn hybrid_merges_lexical_and_vector() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
        let fixture = Fixture::new(vec![manual(Some(&embedder))]);
        let config = SearchConfig {
            exact_title: false,
            diversity: DiversityMode::Off,
            ..SearchConfig::default()
        };
        let engine = HybridSearchEngine::new(&fixture.index, &config).with_embedder(Some(embedder));

        let outcome = engine.search(&fixture.catalog.snapshot(), &SearchRequest::new("protection group virtual machines", 10));
        assert_eq!(outcome.status, SearchStatus::Complete);
        let top = &outcome.results[0];
        assert_eq!(top.chunk.title, "Protection Groups");
        assert_eq!(top.match_type, MatchKind::Hybrid);
        let expected = combine_scores(0.5, top.lexical_score, top.vector_score);
        assert!((top.final_score - expected).abs() < 1e-6);
        for pair in outcome.results.windows(2) {
            assert!(pair[0].final_score >= pair[1].final_score);
        }
    }

    #[test]
    fn weighted_rerank_blends_scores() {
        let fixture = Fixture::new(vec![manual(None)]);
        let config = SearchConfig {
            exact_title: false,
            diversity: DiversityMode::Off,
            ..SearchConfig::default()
        };
        let reranker: Arc<dyn CrossEncoder> = Arc::new(FixedScores(vec![("Recovery Plans", 1.0)]));
        let engine = HybridSearchEngine::new(&fixture.index, &config).with_reranker(Some(reranker));

        let outcome = engine.search(&fixture.catalog.snapshot(), &SearchRequest::new("recovery plan", 10));
        let recovery = outcome
            .results
            .iter()
            .find(|r| r.chunk.title == "Recovery Plans")
            .unwrap();
        let lexical = recovery.lexical_score.unwrap();
        assert!((recovery.final_score - (0.7 * lexical + 0.3)).abs() < 1e-5);
        assert_eq!(outcome.results[0].chunk.title, "Recovery Plans");
    }

    #[test]
    fn rerank_only_uses_cross_encoder_order() {
        let fixture = Fixture::new(vec![manual(None)]);
        let config = SearchConfig {
            exact_title: false,
            ranking: RankingMode::RerankOnly,
            ..SearchConfig::default()
        };
        let reranker: Arc<dyn CrossEncoder> =
            Arc::new(FixedScores(vec![("Installing the Server", 0.9), ("Recovery Plans", 0.1)]));
        let engine = HybridSearchEngine::new(&fixture.index, &config).with_reranker(Some(reranker));

        let outcome = engine.search(&fixture.catalog.snapshot(), &SearchRequest::new("run", 10));
        assert_eq!(outcome.results[0].chunk.title, "Installing the Server");
        assert_eq!(outcome.results[0].final_score, 0.9);
    }

    #[test]
    fn rerank_failure_degrades_to_lexical() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
        let fixture = Fixture::new(vec![manual(Some(&embedder))]);
        let config = SearchConfig {
            exact_title: false,
            ..SearchConfig::default()
        };
        let engine = HybridSearchEngine::new(&fixture.index, &config)
            .with_embedder(Some(embedder))
            .with_reranker(Some(Arc::new(Unavailable)));

        let outcome = engine.search(&fixture.catalog.snapshot(), &SearchRequest::new("recovery plan", 10));
        assert!(matches!(outcome.status, SearchStatus::Degraded { .. }));
        assert!(!outcome.results.is_empty());
        assert!(outcome.results.iter().all(|r| r.match_type == MatchKind::Lexical));
    }

    #[test]
    fn embedding_failure_degrades_whole_query() {
        let fixture = Fixture::new(vec![manual(None)]);
        let config = SearchConfig {
            exact_title: false,
            ..SearchConfig::default()
        };
        let engine = HybridSearchEngine::new(&fixture.index, &config).with_embedder(Some(Arc::new(Unavailable)));

        let outcome = engine.search(&fixture.catalog.snapshot(), &SearchRequest::new("protection group", 3));
        match &outcome.status {
            SearchStatus::Degraded { reasons } => {
                assert!(reasons[0].contains("query embedding unavailable"))
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(outcome.results[0].chunk.title, "Protection Groups");
    }

    #[test]
    fn one_document_degrades_without_affecting_another() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
        let with_vectors = manual(Some(&embedder));
        let without = artifacts("other.pdf", &[("Recovery Plan Checklist", "recovery plan steps")], None);
        let fixture = Fixture::new(vec![with_vectors, without]);
        let config = SearchConfig {
            exact_title: false,
            ..SearchConfig::default()
        };
        let engine = HybridSearchEngine::new(&fixture.index, &config).with_embedder(Some(embedder));

        let outcome = engine.search(&fixture.catalog.snapshot(), &SearchRequest::new("recovery plan", 10));
        match &outcome.status {
            SearchStatus::Degraded { reasons } => {
                assert_eq!(reasons.len(), 1);
                assert!(reasons[0].starts_with("other.pdf"));
            }
            other => panic!("unexpected status {other:?}"),
        }
        let files: HashSet<&str> = outcome
            .results
            .iter()
            .map(|r| r.document.record.file_name.as_str())
            .collect();
        assert!(files.contains("srm.pdf") && files.contains("other.pdf"));
    }

    #[test]
    fn title_diversity_prefers_distinct_titles_then_backfills() {
        let doc = artifacts(
            "dup.pdf",
            &[
                ("Ports", "firewall ports for the firewall"),
                ("Ports", "firewall ports again"),
                ("Certificates", "firewall certificates"),
            ],
            None,
        );
        let fixture = Fixture::new(vec![doc]);
        let config = SearchConfig {
            exact_title: false,
            ..SearchConfig::default()
        };
        let engine = HybridSearchEngine::new(&fixture.index, &config);
        let snapshot = fixture.catalog.snapshot();

        let two = engine.search(&snapshot, &SearchRequest::new("firewall", 2));
        let titles: Vec<&str> = two.results.iter().map(|r| r.chunk.title.as_str()).collect();
        assert_eq!(titles.len(), 2);
        assert!(titles.contains(&"Ports") && titles.contains(&"Certificates"));

        let three = engine.search(&snapshot, &SearchRequest::new("firewall", 3));
        assert_eq!(three.results.len(), 3);
    }

    #[test]
    fn embedding_diversity_drops_near_duplicates() {
        let mut a = artifacts("a.pdf", &[("A", "x"), ("B", "y"), ("C", "z")], None);
        a.vectors = Some(
            VectorMatrix::from_rows(vec![vec![1.0, 0.0], vec![0.99, 0.141], vec![0.0, 1.0]]).unwrap(),
        );
        let doc = Arc::new(a);
        let ranked: Vec<(Arc<DocumentArtifacts>, Candidate)> = doc
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                (
                    Arc::clone(&doc),
                    Candidate {
                        chunk: Arc::clone(chunk),
                        lexical: Some(1.0 - i as f32 * 0.1),
                        vector: None,
                        rerank: None,
                        score: 1.0 - i as f32 * 0.1,
                    },
                )
            })
            .collect();

        let kept = diversify(ranked.clone(), 2, DiversityMode::Embedding);
        let titles: Vec<&str> = kept.iter().map(|(_, c)| c.chunk.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "C"]);

        let kept = diversify(ranked, 2, DiversityMode::Title);
        let titles: Vec<&str> = kept.iter().map(|(_, c)| c.chunk.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[test]
    fn unknown_document_filter_fails() {
        let fixture = Fixture::new(vec![manual(None)]);
        let config = SearchConfig::default();
        let engine = HybridSearchEngine::new(&fixture.index, &config);
        let outcome = engine.search(&fixture.catalog.snapshot(), &SearchRequest::new("plans", 5).in_document(7));
        assert!(outcome.results.is_empty());
        assert!(matches!(outcome.status, SearchStatus::Failed { .. }));
    }

    #[test]
    fn empty_catalog_fails_explicitly() {
        let fixture = Fixture::new(Vec::new());
        let config = SearchConfig::default();
        let engine = HybridSearchEngine::new(&fixture.index, &config);
        let outcome = engine.search(&fixture.catalog.snapshot(), &SearchRequest::new("plans", 5));
        assert!(matches!(outcome.status, SearchStatus::Failed { .. }));
    }

    #[test]
    fn results_are_reproducible() {
        let fixture = Fixture::new(vec![manual(None)]);
        let config = SearchConfig {
            exact_title: false,
            ..SearchConfig::default()
        };
        let engine = HybridSearchEngine::new(&fixture.index, &config);
        let snapshot = fixture.catalog.snapshot();
        let ids = |o: SearchOutcome| o.results.iter().map(|r| r.chunk.id.clone()).collect::<Vec<_>>();
        let first = ids(engine.search(&snapshot, &SearchRequest::new("virtual machines", 10)));
        let second = ids(engine.search(&snapshot, &SearchRequest::new("virtual machines", 10)));
        assert_eq!(first, second);
    }

    #[test]
    fn parses_modes() {
        assert_eq!("rerank_only".parse::<RankingMode>().unwrap(), RankingMode::RerankOnly);
        assert_eq!("embedding".parse::<DiversityMode>().unwrap(), DiversityMode::Embedding);
        assert!("fast".parse::<DiversityMode>().is_err());
    }
}
