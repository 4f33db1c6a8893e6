//! The engine: stores, serving catalog, models and the operations the CLI
//! and MCP server call.

use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    answer::{Answer, AnswerConfig, Generator, answer},
    artifact_store::ArtifactStore,
    catalog::{Catalog, DocumentArtifacts},
    chunk::Chunk,
    config_db::ConfigDb,
    data_dir::{DataDir, StoreUsage},
    embedding::{DEFAULT_HASHING_DIMENSION, Embedder, HashingEmbedder},
    error::{Error, Result},
    incremental::DocumentRecord,
    model_manager::{ColbertModel, resolve_model_id},
    pipeline::{DocumentOutcome, IndexReport, Indexer},
    reranker::CrossEncoder,
    resolver::{ContentResolver, default_chain, resolve_content},
    search::{HybridSearchEngine, SearchOutcome, SearchRequest},
    settings::{EmbedderKind, EngineSettings},
    tantivy_index::SearchIndex,
    walker::{DiscoveredFile, compile_globs, discover_files},
};

/// The external models the engine calls.
#[derive(Clone, Default)]
pub struct Models {
    pub embedder: Option<Arc<dyn Embedder>>,
    pub reranker: Option<Arc<dyn CrossEncoder>>,
}

impl Models {
    /// Models for the configured embedder kind. The ColBERT model is shared
    /// between embedding and reranking and loads on first use.
    pub fn from_settings(settings: &EngineSettings, model_override: Option<&str>) -> Self {
        match settings.embedder {
            EmbedderKind::Colbert => {
                let model_id = resolve_model_id(model_override, settings.model_name.as_deref());
                let model = Arc::new(ColbertModel::new(model_id));
                let embedder: Arc<dyn Embedder> = model.clone();
                let reranker: Arc<dyn CrossEncoder> = model;
                Self {
                    embedder: Some(embedder),
                    reranker: Some(reranker),
                }
            }
            EmbedderKind::Hashing => Self {
                embedder: Some(Arc::new(HashingEmbedder::new(DEFAULT_HASHING_DIMENSION))),
                reranker: None,
            },
            EmbedderKind::None => Self::default(),
        }
    }

    fn describe(&self) -> (Option<String>, Option<String>) {
        (
            self.embedder.as_ref().map(|e| e.name().to_string()),
            self.reranker.as_ref().map(|r| r.name().to_string()),
        )
    }
}

impl std::fmt::Debug for Models {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (embedder, reranker) = self.describe();
        f.debug_struct("Models")
            .field("embedder", &embedder)
            .field("reranker", &reranker)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub data_dir: String,
    pub documents: usize,
    pub chunks: usize,
    pub lexical_chunks: u64,
    pub documents_with_vectors: usize,
    pub embedder: Option<String>,
    pub reranker: Option<String>,
    pub storage: Vec<StoreUsage>,
}

pub struct Engine {
    data_dir: DataDir,
    config_db: ConfigDb,
    artifacts: ArtifactStore,
    lexical: SearchIndex,
    catalog: Catalog,
    settings: EngineSettings,
    models: Models,
    resolvers: Vec<Box<dyn ContentResolver>>,
    /// Serializes writers; readers never take it.
    writes: Mutex<()>,
}

impl Engine {
    /// Open every store under `data_dir` and load stored documents into the
    /// serving catalog.
    pub fn open(data_dir: DataDir, model_override: Option<&str>) -> Result<Self> {
        let config_db = ConfigDb::open(&data_dir.config_db())?;
        let mut settings = EngineSettings::load(&config_db)?;
        let models = Models::from_settings(&settings, model_override);
        if settings.embedder == EmbedderKind::Colbert {
            let model_id = resolve_model_id(model_override, settings.model_name.as_deref());
            settings.chunking = settings.chunking.clone().capped_by_model(&model_id);
        }
        let artifacts = ArtifactStore::open(&data_dir.artifacts_db())?;
        let lexical = SearchIndex::open(&data_dir.tantivy_dir()?)?;
        Self::from_parts(data_dir, config_db, artifacts, lexical, settings, models)
    }

    pub fn from_parts(
        data_dir: DataDir,
        config_db: ConfigDb,
        artifacts: ArtifactStore,
        lexical: SearchIndex,
        settings: EngineSettings,
        models: Models,
    ) -> Result<Self> {
        let engine = Self {
            data_dir,
            config_db,
            artifacts,
            lexical,
            catalog: Catalog::new(),
            settings,
            models,
            resolvers: default_chain(),
            writes: Mutex::new(()),
        };
        let loaded = engine.load_catalog()?;
        debug!(documents = loaded, "catalog loaded");
        Ok(engine)
    }

    fn load_catalog(&self) -> Result<usize> {
        let mut bundles = Vec::new();
        for record in self.artifacts.list_records()? {
            if let Some(stored) = self.artifacts.load_document(record.document_id)? {
                bundles.push(DocumentArtifacts::new(
                    stored.record,
                    stored.chunks,
                    stored.vectors,
                    stored.report,
                ));
            }
        }
        let count = bundles.len();
        self.catalog.install_all(bundles);
        Ok(count)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn config_db(&self) -> &ConfigDb {
        &self.config_db
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn models(&self) -> &Models {
        &self.models
    }

    pub fn discover(&self, path: &Path, include: &[String]) -> Result<Vec<DiscoveredFile>> {
        let globs = compile_globs(include)?;
        discover_files(path, globs.as_ref())
    }

    /// Index already discovered files. `progress` sees each file's outcome.
    pub fn index_files(
        &self,
        files: &[DiscoveredFile],
        force: bool,
        progress: impl Fn(&DocumentOutcome) + Sync,
    ) -> IndexReport {
        let _guard = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let indexer = Indexer {
            artifacts: &self.artifacts,
            lexical: &self.lexical,
            catalog: &self.catalog,
            chunking: &self.settings.chunking,
            validation: &self.settings.validation,
            embedder: self.models.embedder.clone(),
            model_timeout: self.settings.model_timeout,
        };
        indexer.index_files(files, force, progress)
    }

    /// Discover and index everything at `path`.
    pub fn index_documents(&self, path: &Path, force: bool) -> Result<IndexReport> {
        let files = self.discover(path, &[])?;
        info!(path = %path.display(), files = files.len(), "indexing");
        Ok(self.index_files(&files, force, |_| {}))
    }

    fn search_engine(&self) -> HybridSearchEngine<'_> {
        HybridSearchEngine::new(&self.lexical, &self.settings.search)
            .with_embedder(self.models.embedder.clone())
            .with_reranker(self.models.reranker.clone())
            .with_resolvers(&self.resolvers)
    }

    pub fn search(&self, request: &SearchRequest) -> SearchOutcome {
        self.search_engine().search(&self.catalog.snapshot(), request)
    }

    pub fn title_suggestions(&self, prefix: &str, limit: usize) -> Vec<String> {
        self.catalog.snapshot().titles.suggestions(prefix, limit)
    }

    pub fn answer(&self, question: &str, generator: Option<&Arc<dyn Generator>>) -> Answer {
        let config = AnswerConfig {
            max_passages: self.settings.max_passages,
            generation_timeout: self.settings.generation_timeout,
            ..AnswerConfig::default()
        };
        answer(
            &self.search_engine(),
            &self.catalog.snapshot(),
            question,
            generator,
            &self.resolvers,
            &config,
        )
    }

    /// Complete content for one chunk, through the resolver chain.
    pub fn full_content(&self, document: &DocumentArtifacts, chunk: &Chunk) -> String {
        resolve_content(&self.resolvers, document, chunk)
    }

    /// Look a document up by file name or id.
    pub fn document(&self, reference: &str) -> Result<Arc<DocumentArtifacts>> {
        self.catalog.find(reference).ok_or_else(|| Error::NotFound {
            kind: "document",
            name: reference.to_string(),
        })
    }

    /// Drop a document from every store and from serving.
    pub fn remove_document(&self, reference: &str) -> Result<DocumentRecord> {
        let _guard = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let doc = self.document(reference)?;
        self.artifacts.remove_document(doc.id.numeric)?;
        self.lexical.remove_document(&doc.id.hex())?;
        self.catalog.remove(doc.id.numeric);
        info!(document = %doc.id, file = %doc.record.file_name, "removed document");
        Ok(doc.record.clone())
    }

    /// Rebuild the lexical index from stored chunks.
    pub fn rebuild_lexical(&self) -> Result<usize> {
        let _guard = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut chunks = Vec::new();
        for record in self.artifacts.list_records()? {
            chunks.extend(self.artifacts.load_chunks(record.document_id)?);
        }
        let count = self.lexical.rebuild(&chunks)?;
        info!(chunks = count, "lexical index rebuilt");
        Ok(count)
    }

    pub fn status(&self) -> Result<EngineStatus> {
        let snapshot = self.catalog.snapshot();
        let (embedder, reranker) = self.models.describe();
        Ok(EngineStatus {
            data_dir: self.data_dir.root().display().to_string(),
            documents: snapshot.documents.len(),
            chunks: snapshot.documents.values().map(|d| d.chunks.len()).sum(),
            lexical_chunks: self.lexical.num_chunks()?,
            documents_with_vectors: snapshot
                .documents
                .values()
                .filter(|d| d.vectors.is_some())
                .count(),
            embedder,
            reranker,
            storage: self.data_dir.usage(),
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.data_dir)
            .field("documents", &self.catalog.len())
            .field("models", &self.models)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pipeline::DocumentStatus, search::MatchKind};

    const GUIDE: &str = "\
# Installing

Install the replication server on a supported Windows host.
The installer checks the database connection first.
Restart the host when the installer finishes.

# Firewall Ports

Open port 443 for the web client.
Open port 902 for ESXi hosts.
Port 9086 carries replication traffic between sites.
";

    fn engine(tmp: &Path) -> Engine {
        let data_dir = DataDir::resolve(Some(&tmp.join("data"))).unwrap();
        let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
        config_db.set_setting("embedder", "hashing").unwrap();
        drop(config_db);
        Engine::open(data_dir, None).unwrap()
    }

    fn write_guide(tmp: &Path) -> std::path::PathBuf {
        let docs = tmp.join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("guide.md"), GUIDE).unwrap();
        docs
    }

    #[test]
    fn index_then_search() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let docs = write_guide(tmp.path());

        let report = engine.index_documents(&docs, false).unwrap();
        assert_eq!(report.indexed(), 1);
        assert!(matches!(
            report.documents[0].status,
            DocumentStatus::Indexed { embedded: true, .. }
        ));

        let outcome = engine.search(&SearchRequest::new("replication traffic port", 3));
        assert_eq!(outcome.results[0].chunk.title, "Firewall Ports");
        assert_eq!(outcome.results[0].match_type, MatchKind::Hybrid);

        let status = engine.status().unwrap();
        assert!(status.storage.iter().all(|u| u.bytes > 0));

        let exact = engine.search(&SearchRequest::new("firewall ports", 3));
        assert!(exact.short_circuited);
        assert_eq!(exact.results[0].final_score, 1.0);
    }

    #[test]
    fn reindex_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let docs = write_guide(tmp.path());

        engine.index_documents(&docs, false).unwrap();
        let chunks = engine.status().unwrap().chunks;

        let again = engine.index_documents(&docs, false).unwrap();
        assert_eq!(again.up_to_date(), 1);
        assert_eq!(engine.status().unwrap().chunks, chunks);

        let forced = engine.index_documents(&docs, true).unwrap();
        assert_eq!(forced.indexed(), 1);
        assert_eq!(engine.status().unwrap().chunks, chunks);
    }

    #[test]
    fn reopen_restores_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = write_guide(tmp.path());
        {
            let engine = engine(tmp.path());
            engine.index_documents(&docs, false).unwrap();
        }
        let engine = engine(tmp.path());
        assert_eq!(engine.catalog().len(), 1);
        assert_eq!(engine.title_suggestions("fire", 5), vec!["Firewall Ports"]);
        assert!(engine.document("guide.md").is_ok());
    }

    #[test]
    fn remove_and_rebuild() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let docs = write_guide(tmp.path());
        engine.index_documents(&docs, false).unwrap();

        let rebuilt = engine.rebuild_lexical().unwrap();
        assert_eq!(rebuilt as u64, engine.status().unwrap().lexical_chunks);

        let removed = engine.remove_document("guide.md").unwrap();
        assert_eq!(removed.file_name, "guide.md");
        assert!(engine.catalog().is_empty());
        assert_eq!(engine.status().unwrap().lexical_chunks, 0);
        assert!(matches!(
            engine.remove_document("guide.md"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn failed_documents_do_not_stop_the_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let docs = write_guide(tmp.path());
        std::fs::write(docs.join("broken.json"), "{ not json").unwrap();

        let report = engine.index_documents(&docs, false).unwrap();
        assert_eq!(report.indexed(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(engine.catalog().len(), 1);
    }

    #[test]
    fn search_on_empty_engine_fails_explicitly() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let outcome = engine.search(&SearchRequest::new("ports", 5));
        assert!(outcome.results.is_empty());
        assert!(matches!(outcome.status, crate::search::SearchStatus::Failed { .. }));
    }
}
