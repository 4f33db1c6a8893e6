use std::path::Path;

/// A 64-bit hash that stays fixed across builds and toolchains, for values
/// that are persisted (document keys, content fingerprints, entry ids).
///
/// Parts are hashed with a separator between them.
pub fn stable_hash(parts: &[&[u8]]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(&[0x1f]);
        }
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// A stable document identifier derived from the source file name.
///
/// Only the file name takes part in the hash, so moving a manual between
/// directories keeps its identity and re-processing replaces its artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId {
    /// The numeric ID used as the key in redb tables.
    pub numeric: u64,
    /// The short hex string for human display (e.g. "a1b2c3").
    pub short: String,
}

impl DocumentId {
    /// Generate a stable document ID from a file name.
    pub fn new(file_name: &str) -> Self {
        let numeric = Self::hash_name(file_name);
        let short = Self::short_hex(numeric, 6);
        Self { numeric, short }
    }

    /// Derive the ID from a source path (its final component).
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self::new(&name)
    }

    /// Rebuild an ID from its numeric value (e.g. a redb key).
    pub fn from_numeric(numeric: u64) -> Self {
        Self {
            numeric,
            short: Self::short_hex(numeric, 6),
        }
    }

    fn hash_name(file_name: &str) -> u64 {
        stable_hash(&[file_name.as_bytes()])
    }

    fn short_hex(value: u64, len: usize) -> String {
        let full = format!("{value:016x}");
        full[..len].to_string()
    }

    /// The full 16-character hex form, used as the per-document key in the
    /// lexical index and in chunk identifiers.
    pub fn hex(&self) -> String {
        format!("{:016x}", self.numeric)
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = DocumentId::new("srm-admin.pdf");
        let b = DocumentId::new("srm-admin.pdf");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let a = DocumentId::new("srm-admin.pdf");
        let b = DocumentId::new("srm-install.pdf");
        assert_ne!(a.numeric, b.numeric);
    }

    #[test]
    fn path_uses_file_name_only() {
        let a = DocumentId::from_path(Path::new("/manuals/v1/guide.json"));
        let b = DocumentId::from_path(Path::new("/other/guide.json"));
        assert_eq!(a, b);
    }

    #[test]
    fn numeric_roundtrip() {
        let id = DocumentId::new("guide.md");
        assert_eq!(DocumentId::from_numeric(id.numeric), id);
        assert!(id.hex().starts_with(&id.short));
        assert_eq!(id.hex().len(), 16);
    }

    #[test]
    fn stable_hash_is_pinned() {
        // First eight bytes of BLAKE3("") read little-endian.
        assert_eq!(stable_hash(&[b"".as_slice()]), 0xa6a1_f9f5_b949_13af);
        assert_eq!(stable_hash(&[]), 0xa6a1_f9f5_b949_13af);
        assert_ne!(stable_hash(&[b"ab".as_slice(), b"c"]), stable_hash(&[b"a".as_slice(), b"bc"]));
        assert_eq!(
            DocumentId::new("guide.md").numeric,
            stable_hash(&["guide.md".as_bytes()])
        );
    }

    #[test]
    fn display_has_hash_prefix() {
        let id = DocumentId::new("guide.md");
        let s = id.to_string();
        assert!(s.starts_with('#'));
        assert_eq!(s.len(), 7);
    }
}
