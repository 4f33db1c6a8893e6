use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    chunk::Chunk,
    doc_id::DocumentId,
    embedding::VectorMatrix,
    incremental::DocumentRecord,
    pipeline::StructureReport,
    title_index::{ChunkRef, ExactTitleIndex},
};

/// One document's serving artifacts. Built completely before it is
/// installed and never mutated afterwards.
#[derive(Debug)]
pub struct DocumentArtifacts {
    pub id: DocumentId,
    pub record: DocumentRecord,
    pub chunks: Vec<Arc<Chunk>>,
    pub vectors: Option<VectorMatrix>,
    pub report: Option<StructureReport>,
}

impl DocumentArtifacts {
    pub fn new(
        record: DocumentRecord,
        chunks: Vec<Chunk>,
        vectors: Option<VectorMatrix>,
        report: Option<StructureReport>,
    ) -> Self {
        Self {
            id: DocumentId::from_numeric(record.document_id),
            record,
            chunks: chunks.into_iter().map(Arc::new).collect(),
            vectors,
            report,
        }
    }

    pub fn chunk(&self, ordinal: usize) -> Option<&Arc<Chunk>> {
        self.chunks.iter().find(|c| c.ordinal == ordinal)
    }

    /// The chunk's unit vector, if vectors exist and line up with chunks.
    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        let vectors = self.vectors.as_ref()?;
        let position = self.chunks.iter().position(|c| c.ordinal == ordinal)?;
        vectors.row(position)
    }
}

/// What queries read: every installed document plus the title index built
/// over all of them.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub documents: BTreeMap<u64, Arc<DocumentArtifacts>>,
    pub titles: Arc<ExactTitleIndex>,
}

impl Snapshot {
    pub fn resolve(&self, target: ChunkRef) -> Option<(&Arc<DocumentArtifacts>, &Arc<Chunk>)> {
        let doc = self.documents.get(&target.document)?;
        let chunk = doc.chunk(target.ordinal)?;
        Some((doc, chunk))
    }
}

/// The in-memory serving state.
///
/// Writers replace a whole document bundle and rebuild the title index
/// before publishing; readers clone the current [`Snapshot`] and never see
/// a document half replaced.
#[derive(Debug, Default)]
pub struct Catalog {
    current: RwLock<Arc<Snapshot>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn publish(&self, update: impl FnOnce(&mut BTreeMap<u64, Arc<DocumentArtifacts>>)) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut documents = guard.documents.clone();
        update(&mut documents);
        let titles = Arc::new(ExactTitleIndex::build(documents.iter().flat_map(
            |(id, doc)| doc.chunks.iter().map(move |c| (*id, c.as_ref())),
        )));
        *guard = Arc::new(Snapshot { documents, titles });
    }

    pub fn install(&self, artifacts: DocumentArtifacts) {
        self.install_all(vec![artifacts]);
    }

    /// Install several bundles with one title-index rebuild.
    pub fn install_all(&self, bundles: Vec<DocumentArtifacts>) {
        if bundles.is_empty() {
            return;
        }
        self.publish(|documents| {
            for artifacts in bundles {
                documents.insert(artifacts.id.numeric, Arc::new(artifacts));
            }
        });
    }

    pub fn remove(&self, id: u64) -> bool {
        let mut removed = false;
        self.publish(|documents| removed = documents.remove(&id).is_some());
        removed
    }

    pub fn get(&self, id: u64) -> Option<Arc<DocumentArtifacts>> {
        self.snapshot().documents.get(&id).cloned()
    }

    /// Find a document by file name, short id, full hex id or `#short`.
    pub fn find(&self, reference: &str) -> Option<Arc<DocumentArtifacts>> {
        let reference = reference.trim().trim_start_matches('#');
        let snapshot = self.snapshot();
        snapshot
            .documents
            .values()
            .find(|doc| {
                doc.record.file_name == reference
                    || doc.id.short == reference
                    || doc.id.hex() == reference
            })
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
