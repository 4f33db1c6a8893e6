use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::{
    error::{Error, Result},
    extraction::SUPPORTED_EXTENSIONS,
};

/// A source file eligible for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the walked root (the file name for single files).
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
}

impl DiscoveredFile {
    pub fn file_name(&self) -> String {
        self.absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.relative_path.to_string_lossy().to_string())
    }
}

/// Compile `--include` style patterns into one matcher.
pub fn compile_globs(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid glob pattern {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob patterns: {e}")))?;
    Ok(Some(set))
}

/// Find indexable files at `root`.
///
/// A file path yields itself when its type is supported. A directory is
/// walked recursively, skipping hidden entries (names starting with `.`);
/// `include`, when given, filters on the path relative to `root`.
pub fn discover_files(root: &Path, include: Option<&GlobSet>) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;

    if canonical_root.is_file() {
        if !is_supported(&canonical_root) {
            return Err(Error::Extraction {
                path: canonical_root,
                reason: format!("unsupported file type (expected one of {SUPPORTED_EXTENSIONS:?})"),
            });
        }
        let name = canonical_root
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| canonical_root.clone());
        return Ok(vec![DiscoveredFile {
            relative_path: name,
            absolute_path: canonical_root,
        }]);
    }

    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, include, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    include: Option<&GlobSet>,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, include, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue; // broken link
            };
            // Directory links could loop back into the tree.
            if resolved.is_file() && is_supported(&resolved) {
                push_file(root, &path, resolved, include, results);
            }
        } else if file_type.is_file() && is_supported(&path) {
            let absolute = path.canonicalize()?;
            push_file(root, &path, absolute, include, results);
        }
    }

    Ok(())
}

fn push_file(
    root: &Path,
    path: &Path,
    absolute_path: PathBuf,
    include: Option<&GlobSet>,
    results: &mut Vec<DiscoveredFile>,
) {
    let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    if include.is_none_or(|set| set.is_match(&relative_path)) {
        results.push(DiscoveredFile {
            relative_path,
            absolute_path,
        });
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| ext.eq_ignore_ascii_case(s))
        })
}
