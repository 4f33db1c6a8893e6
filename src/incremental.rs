use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::{doc_id::stable_hash, error::Result};

/// What a source file looked like when it was last processed.
///
/// The content hash catches edits that keep the modification time (copies
/// with preserved timestamps, coarse filesystem clocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub mtime: u64,
    pub content_hash: u64,
}

impl Fingerprint {
    pub fn of_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let mtime = std::fs::metadata(path)?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Ok(Self::new(mtime, &bytes))
    }

    pub fn new(mtime: u64, content: &[u8]) -> Self {
        Self {
            mtime,
            content_hash: stable_hash(&[content]),
        }
    }
}

/// Per-document metadata persisted next to the chunks.
///
/// # Examples
///
/// ```
/// use docsift::incremental::{DocumentRecord, Fingerprint};
///
/// let record = DocumentRecord {
///     document_id: 42,
///     file_name: "guide.md".to_string(),
///     source_path: "/manuals/guide.md".into(),
///     fingerprint: Fingerprint::new(1700000000, b"text"),
///     chunk_count: 3,
/// };
/// assert!(record.is_up_to_date(&Fingerprint::new(1700000000, b"text")));
/// assert!(!record.is_up_to_date(&Fingerprint::new(1700000000, b"edited")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: u64,
    pub file_name: String,
    pub source_path: PathBuf,
    pub fingerprint: Fingerprint,
    pub chunk_count: usize,
}

impl DocumentRecord {
    pub fn is_up_to_date(&self, current: &Fingerprint) -> bool {
        self.fingerprint == *current
    }
}

/// Decide whether a document must be (re)processed.
pub fn needs_processing(
    stored: Option<&DocumentRecord>,
    current: &Fingerprint,
    force: bool,
) -> bool {
    force || stored.is_none_or(|record| !record.is_up_to_date(current))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fingerprint: Fingerprint) -> DocumentRecord {
        DocumentRecord {
            document_id: 1,
            file_name: "a.md".to_string(),
            source_path: PathBuf::from("/abs/a.md"),
            fingerprint,
            chunk_count: 2,
        }
    }

    #[test]
    fn new_document_needs_processing() {
        let fp = Fingerprint::new(100, b"hello");
        assert!(needs_processing(None, &fp, false));
    }

    #[test]
    fn unchanged_document_is_skipped() {
        let fp = Fingerprint::new(100, b"hello");
        assert!(!needs_processing(Some(&record(fp)), &fp, false));
    }

    #[test]
    fn force_reprocesses_unchanged_document() {
        let fp = Fingerprint::new(100, b"hello");
        assert!(needs_processing(Some(&record(fp)), &fp, true));
    }

    #[test]
    fn content_change_with_same_mtime_is_detected() {
        let stored = Fingerprint::new(100, b"hello");
        let current = Fingerprint::new(100, b"hello, world");
        assert!(needs_processing(Some(&record(stored)), &current, false));
    }

    #[test]
    fn mtime_change_is_detected() {
        let stored = Fingerprint::new(100, b"hello");
        let current = Fingerprint::new(200, b"hello");
        assert!(needs_processing(Some(&record(stored)), &current, false));
    }

    #[test]
    fn fingerprint_of_file_reads_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("doc.md");
        std::fs::write(&path, "# Title").unwrap();
        let fp = Fingerprint::of_file(&path).unwrap();
        assert!(fp.mtime > 0);
        assert_eq!(fp.content_hash, Fingerprint::new(0, b"# Title").content_hash);
    }

    #[test]
    fn content_hash_is_toolchain_independent() {
        assert_eq!(Fingerprint::new(0, b"").content_hash, 0xa6a1_f9f5_b949_13af);
        assert_ne!(
            Fingerprint::new(0, b"# Title").content_hash,
            Fingerprint::new(0, b"# Title\n").content_hash
        );
    }

    #[test]
    fn record_serializes_as_json() {
        let rec = record(Fingerprint::new(5, b"x"));
        let json = serde_json::to_string(&rec).unwrap();
        let back: DocumentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }
}
