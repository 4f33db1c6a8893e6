use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    chunk::Chunk,
    embedding::VectorMatrix,
    error::Result,
    incremental::DocumentRecord,
    pipeline::StructureReport,
};

const DOCUMENTS: TableDefinition<u64, &str> = TableDefinition::new("documents");
const CHUNKS: TableDefinition<u64, &str> = TableDefinition::new("chunks");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const REPORTS: TableDefinition<u64, &str> = TableDefinition::new("reports");

/// Header size: 4 bytes row count + 4 bytes dimension.
const HEADER_SIZE: usize = 8;

/// Everything persisted for one document.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub record: DocumentRecord,
    pub chunks: Vec<Chunk>,
    pub vectors: Option<VectorMatrix>,
    pub report: Option<StructureReport>,
}

/// Per-document artifacts keyed by numeric document id.
///
/// Records, chunk lists and structure reports are JSON. Vector matrices use
/// a binary layout:
/// - 4 bytes: row count N (u32 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - N * D * 4 bytes: f32 LE values in row-major order
pub struct ArtifactStore {
    db: Database,
}

impl ArtifactStore {
    /// Open or create an artifact database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docsift::artifact_store::ArtifactStore;
    ///
    /// let store = ArtifactStore::open(&tmp.path().join("artifacts.redb")).unwrap();
    /// assert!(store.list_records().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(CHUNKS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(REPORTS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Replace every artifact of one document in a single write
    /// transaction. Readers see either the previous set or the new one.
    pub fn replace_document(&self, doc: &StoredDocument) -> Result<()> {
        let id = doc.record.document_id;
        let record_json = serde_json::to_string(&doc.record)?;
        let chunks_json = serde_json::to_string(&doc.chunks)?;
        let report_json = doc
            .report
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let txn = self.db.begin_write()?;
        {
            let mut documents = txn.open_table(DOCUMENTS)?;
            documents.insert(id, record_json.as_str())?;

            let mut chunks = txn.open_table(CHUNKS)?;
            chunks.insert(id, chunks_json.as_str())?;

            let mut vectors = txn.open_table(VECTORS)?;
            match &doc.vectors {
                Some(matrix) => write_matrix(&mut vectors, id, matrix)?,
                None => {
                    vectors.remove(id)?;
                }
            }

            let mut reports = txn.open_table(REPORTS)?;
            match &report_json {
                Some(json) => {
                    reports.insert(id, json.as_str())?;
                }
                None => {
                    reports.remove(id)?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn load_record(&self, id: u64) -> Result<Option<DocumentRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        match table.get(id)? {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn load_chunks(&self, id: u64) -> Result<Vec<Chunk>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        match table.get(id)? {
            Some(guard) => Ok(serde_json::from_str(guard.value())?),
            None => Ok(Vec::new()),
        }
    }

    pub fn load_report(&self, id: u64) -> Result<Option<StructureReport>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REPORTS)?;
        match table.get(id)? {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Returns `None` if absent or if the stored bytes are malformed.
    pub fn load_vectors(&self, id: u64) -> Result<Option<VectorMatrix>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;

        let Some(guard) = table.get(id)? else {
            return Ok(None);
        };
        Ok(decode_matrix(guard.value()))
    }

    /// Load all artifacts of one document from a single read snapshot.
    pub fn load_document(&self, id: u64) -> Result<Option<StoredDocument>> {
        let txn = self.db.begin_read()?;
        let documents = txn.open_table(DOCUMENTS)?;
        let Some(record) = documents.get(id)? else {
            return Ok(None);
        };
        let record: DocumentRecord = serde_json::from_str(record.value())?;

        let chunks = match txn.open_table(CHUNKS)?.get(id)? {
            Some(guard) => serde_json::from_str(guard.value())?,
            None => Vec::new(),
        };
        let vectors = txn
            .open_table(VECTORS)?
            .get(id)?
            .and_then(|guard| decode_matrix(guard.value()));
        let report = match txn.open_table(REPORTS)?.get(id)? {
            Some(guard) => Some(serde_json::from_str(guard.value())?),
            None => None,
        };

        Ok(Some(StoredDocument {
            record,
            chunks,
            vectors,
            report,
        }))
    }

    /// Remove every artifact of a document. Returns whether it existed.
    pub fn remove_document(&self, id: u64) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut documents = txn.open_table(DOCUMENTS)?;
            let existed = documents.remove(id)?.is_some();
            let mut chunks = txn.open_table(CHUNKS)?;
            chunks.remove(id)?;
            let mut vectors = txn.open_table(VECTORS)?;
            vectors.remove(id)?;
            let mut reports = txn.open_table(REPORTS)?;
            reports.remove(id)?;
            existed
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_records(&self) -> Result<Vec<DocumentRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(serde_json::from_str(value.value())?);
        }
        Ok(records)
    }
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore").finish_non_exhaustive()
    }
}

/// Uses `insert_reserve` to write the matrix in place.
fn write_matrix(
    table: &mut redb::Table<'_, u64, &'static [u8]>,
    id: u64,
    matrix: &VectorMatrix,
) -> Result<()> {
    let data = matrix.data.as_slice();
    let byte_len = HEADER_SIZE + std::mem::size_of_val(data);
    let mut guard = table.insert_reserve(id, byte_len)?;
    let dest = guard.as_mut();

    dest[0..4].copy_from_slice(&matrix.rows.to_le_bytes());
    dest[4..8].copy_from_slice(&matrix.dimension.to_le_bytes());
    dest[HEADER_SIZE..].copy_from_slice(bytemuck::cast_slice(data));
    Ok(())
}

fn decode_matrix(bytes: &[u8]) -> Option<VectorMatrix> {
    let rows = u32::from_le_bytes(bytes.get(0..4)?.try_into().ok()?);
    let dimension = u32::from_le_bytes(bytes.get(4..8)?.try_into().ok()?);

    let expected_len = HEADER_SIZE + (rows as usize) * (dimension as usize) * 4;
    if bytes.len() != expected_len {
        return None;
    }

    // redb gives no alignment guarantee for values.
    let data: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[HEADER_SIZE..]);

    Some(VectorMatrix {
        rows,
        dimension,
        data,
    })
}
