//! Document processing and batch indexing.
//!
//! Processing one document is strictly sequential: structure, chunks,
//! document index, validation. Documents are independent of each other, so a
//! batch extracts and processes them in parallel and then persists them one
//! at a time. A failure in one document is reported and the batch moves on.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    artifact_store::{ArtifactStore, StoredDocument},
    catalog::{Catalog, DocumentArtifacts},
    chunk::{Chunk, assign_identity},
    chunking::ChunkingConfig,
    doc_id::DocumentId,
    embedding::{Embedder, VectorMatrix, embed_chunks},
    error::Result,
    extraction::extract_path,
    incremental::{DocumentRecord, Fingerprint, needs_processing},
    layout::ExtractedDocument,
    structure::{StructureBuilder, sections_to_chunks},
    tantivy_index::SearchIndex,
    toc::{IndexExtractor, IndexMethod},
    validation::{ChunkValidator, MatchType, ValidationConfig},
    walker::DiscoveredFile,
};

/// What the structure and validation passes found in one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureReport {
    pub body_font_size: f32,
    /// Heading font sizes, largest first.
    pub heading_sizes: Vec<f32>,
    pub heading_count: usize,
    pub section_count: usize,
    pub page_count: u32,
    pub index_method: IndexMethod,
    pub index_confidence: f32,
    pub index_entries: usize,
    /// Chunks produced by the font-driven pass, before recovery.
    pub font_chunks: usize,
    pub validated_chunks: usize,
    pub orphaned_chunks: usize,
    pub recovered_chunks: usize,
    /// Index entries no chunk answered for.
    pub missing_sections: Vec<String>,
    pub exact_matches: usize,
    pub partial_matches: usize,
    pub validation_score: f32,
    pub validation_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub chunks: Vec<Chunk>,
    pub report: StructureReport,
}

/// Run the structure, chunking, index and validation passes over one
/// extracted document. Final chunks carry ordinals `0..n` in emission order
/// with recovered chunks last.
pub fn process_document(
    extracted: &ExtractedDocument,
    id: &DocumentId,
    chunking: &ChunkingConfig,
    validation: &ValidationConfig,
    fallback_title: &str,
) -> Result<ProcessedDocument> {
    let builder = StructureBuilder::new(chunking)?;
    let structure = builder.build(&extracted.lines, fallback_title);

    let mut chunks = sections_to_chunks(&structure.sections, chunking);
    assign_identity(&mut chunks, id, 0);
    let font_chunks = chunks.len();

    let index = IndexExtractor::default().extract_with_fallback(&extracted.markdown_text, &structure);
    let result = ChunkValidator::new(validation).validate(chunks, &index, &extracted.markdown_text);

    let count_matches = |kind: MatchType| result.matches.iter().filter(|m| m.match_type == kind).count();
    let report = StructureReport {
        body_font_size: structure.stats.body_size,
        heading_sizes: structure.stats.heading_sizes.clone(),
        heading_count: structure.headings.len(),
        section_count: structure.section_count(),
        page_count: extracted.page_count(),
        index_method: index.method,
        index_confidence: index.confidence(),
        index_entries: index.entries.len(),
        font_chunks,
        validated_chunks: result.validated_chunks.len(),
        orphaned_chunks: result.orphaned_chunks.len(),
        recovered_chunks: result.recovered_chunks.len(),
        missing_sections: result.missing_sections.iter().map(|e| e.title.clone()).collect(),
        exact_matches: count_matches(MatchType::Exact),
        partial_matches: count_matches(MatchType::Partial),
        validation_score: result.score,
        validation_fallback: result.fallback,
    };

    let mut chunks = result.into_chunks();
    assign_identity(&mut chunks, id, 0);

    debug!(
        document = %id,
        chunks = chunks.len(),
        missing = report.missing_sections.len(),
        score = report.validation_score,
        "processed document"
    );
    Ok(ProcessedDocument { chunks, report })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    Indexed {
        chunks: usize,
        validation_score: f32,
        /// False when no embedder was configured or embedding failed.
        embedded: bool,
    },
    UpToDate,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub file_name: String,
    pub path: PathBuf,
    pub document: String,
    #[serde(flatten)]
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub documents: Vec<DocumentOutcome>,
}

impl IndexReport {
    fn count(&self, pred: impl Fn(&DocumentStatus) -> bool) -> usize {
        self.documents.iter().filter(|d| pred(&d.status)).count()
    }

    pub fn indexed(&self) -> usize {
        self.count(|s| matches!(s, DocumentStatus::Indexed { .. }))
    }

    pub fn up_to_date(&self) -> usize {
        self.count(|s| matches!(s, DocumentStatus::UpToDate))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, DocumentStatus::Failed { .. }))
    }
}

/// A document that passed processing and waits to be persisted.
struct Ready {
    id: DocumentId,
    file: DiscoveredFile,
    fingerprint: Fingerprint,
    processed: ProcessedDocument,
}

enum Stage {
    Ready(Box<Ready>),
    Done(DocumentOutcome),
}

/// Writes processed documents to every store and publishes them.
pub struct Indexer<'a> {
    pub artifacts: &'a ArtifactStore,
    pub lexical: &'a SearchIndex,
    pub catalog: &'a Catalog,
    pub chunking: &'a ChunkingConfig,
    pub validation: &'a ValidationConfig,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub model_timeout: Duration,
}

fn outcome(file: &DiscoveredFile, id: &DocumentId, status: DocumentStatus) -> DocumentOutcome {
    DocumentOutcome {
        file_name: file.file_name(),
        path: file.absolute_path.clone(),
        document: id.short.clone(),
        status,
    }
}

fn fallback_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Document".to_string())
}

impl Indexer<'_> {
    /// Index `files`, skipping unchanged ones unless `force`. `progress` is
    /// called once per file with its final outcome.
    pub fn index_files(
        &self,
        files: &[DiscoveredFile],
        force: bool,
        progress: impl Fn(&DocumentOutcome) + Sync,
    ) -> IndexReport {
        // Ids come from file names; the first file with a name wins.
        let mut seen = HashSet::new();
        let planned: Vec<(&DiscoveredFile, bool, DocumentId)> = files
            .iter()
            .map(|file| {
                let id = DocumentId::from_path(&file.absolute_path);
                (file, seen.insert(id.numeric), id)
            })
            .collect();

        let staged: Vec<Stage> = planned
            .into_par_iter()
            .map(|(file, first, id)| {
                let stage = if first {
                    self.prepare(file, id, force)
                } else {
                    Stage::Done(outcome(
                        file,
                        &id,
                        DocumentStatus::Failed {
                            reason: "another file with the same name is in this batch".to_string(),
                        },
                    ))
                };
                if let Stage::Done(done) = &stage {
                    progress(done);
                }
                stage
            })
            .collect();

        let mut report = IndexReport::default();
        for stage in staged {
            let done = match stage {
                Stage::Done(done) => done,
                Stage::Ready(ready) => {
                    let done = self.persist(*ready);
                    progress(&done);
                    done
                }
            };
            report.documents.push(done);
        }

        info!(
            indexed = report.indexed(),
            up_to_date = report.up_to_date(),
            failed = report.failed(),
            "indexing finished"
        );
        report
    }

    fn prepare(&self, file: &DiscoveredFile, id: DocumentId, force: bool) -> Stage {
        let fail = |reason: String| {
            warn!(file = %file.absolute_path.display(), %reason, "skipping document");
            Stage::Done(outcome(file, &id, DocumentStatus::Failed { reason }))
        };

        let fingerprint = match Fingerprint::of_file(&file.absolute_path) {
            Ok(fp) => fp,
            Err(e) => return fail(e.to_string()),
        };
        let existing = match self.artifacts.load_record(id.numeric) {
            Ok(record) => record,
            Err(e) => return fail(e.to_string()),
        };
        if !needs_processing(existing.as_ref(), &fingerprint, force) {
            debug!(file = %file.relative_path.display(), "up to date");
            return Stage::Done(outcome(file, &id, DocumentStatus::UpToDate));
        }

        let extracted = match extract_path(&file.absolute_path) {
            Ok(doc) => doc,
            Err(e) => return fail(e.to_string()),
        };
        match process_document(
            &extracted,
            &id,
            self.chunking,
            self.validation,
            &fallback_title(&file.absolute_path),
        ) {
            Ok(processed) => Stage::Ready(Box::new(Ready {
                id,
                file: file.clone(),
                fingerprint,
                processed,
            })),
            Err(e) => fail(e.to_string()),
        }
    }

    fn embed(&self, id: &DocumentId, chunks: &[Chunk]) -> Option<VectorMatrix> {
        let embedder = self.embedder.as_ref()?;
        match embed_chunks(embedder, chunks, self.model_timeout) {
            Ok(vectors) => Some(vectors),
            Err(e) => {
                warn!(document = %id, error = %e, "embedding unavailable, storing lexical artifacts only");
                None
            }
        }
    }

    fn persist(&self, ready: Ready) -> DocumentOutcome {
        let Ready {
            id,
            file,
            fingerprint,
            processed,
        } = ready;
        let ProcessedDocument { chunks, report } = processed;

        let vectors = self.embed(&id, &chunks);
        let embedded = vectors.is_some();
        let stored = StoredDocument {
            record: DocumentRecord {
                document_id: id.numeric,
                file_name: file.file_name(),
                source_path: file.absolute_path.clone(),
                fingerprint,
                chunk_count: chunks.len(),
            },
            chunks,
            vectors,
            report: Some(report),
        };

        if let Err(e) = self.write(&id, &stored) {
            warn!(document = %id, error = %e, "could not store document");
            return outcome(&file, &id, DocumentStatus::Failed { reason: e.to_string() });
        }

        let status = DocumentStatus::Indexed {
            chunks: stored.chunks.len(),
            validation_score: stored.report.as_ref().map_or(0.0, |r| r.validation_score),
            embedded,
        };
        info!(
            document = %id,
            file = %stored.record.file_name,
            chunks = stored.chunks.len(),
            embedded,
            "indexed document"
        );
        let StoredDocument {
            record,
            chunks,
            vectors,
            report,
        } = stored;
        self.catalog.install(DocumentArtifacts::new(record, chunks, vectors, report));
        outcome(&file, &id, status)
    }

    fn write(&self, id: &DocumentId, stored: &StoredDocument) -> Result<()> {
        self.artifacts.replace_document(stored)?;
        self.lexical.replace_document(&id.hex(), &stored.chunks)
    }
}
