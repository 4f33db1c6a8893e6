//! Where docsift keeps its stores.
//!
//! ```text
//! <root>/config.redb     engine settings
//! <root>/artifacts.redb  per-document chunks, vectors, reports
//! <root>/tantivy/        lexical index
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "DOCSIFT_DATA_DIR";

/// One of the stores under the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Store {
    Settings,
    Artifacts,
    Lexical,
}

impl Store {
    pub const ALL: [Store; 3] = [Store::Settings, Store::Artifacts, Store::Lexical];

    fn entry_name(self) -> &'static str {
        match self {
            Store::Settings => "config.redb",
            Store::Artifacts => "artifacts.redb",
            Store::Lexical => "tantivy",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreUsage {
    pub store: Store,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// `explicit` (the `--data-dir` flag), else `DOCSIFT_DATA_DIR`, else
    /// the XDG data home. The directory is created when missing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let (root, origin) = match explicit {
            Some(path) => (path.to_path_buf(), "flag"),
            None => match std::env::var_os(DATA_DIR_ENV_VAR) {
                Some(val) => (PathBuf::from(val), "environment"),
                None => (xdg_data_home()?, "xdg"),
            },
        };

        std::fs::create_dir_all(&root).map_err(|_| Error::DataDir(root.clone()))?;
        debug!(root = %root.display(), origin, "data directory");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, store: Store) -> PathBuf {
        self.root.join(store.entry_name())
    }

    pub fn config_db(&self) -> PathBuf {
        self.path(Store::Settings)
    }

    pub fn artifacts_db(&self) -> PathBuf {
        self.path(Store::Artifacts)
    }

    /// The lexical index directory, created when missing.
    pub fn tantivy_dir(&self) -> Result<PathBuf> {
        let path = self.path(Store::Lexical);
        std::fs::create_dir_all(&path).map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }

    /// Bytes on disk per store. Missing stores count as zero.
    pub fn usage(&self) -> Vec<StoreUsage> {
        Store::ALL
            .into_iter()
            .map(|store| StoreUsage {
                store,
                bytes: size_on_disk(&self.path(store)),
            })
            .collect()
    }
}

fn xdg_data_home() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix("docsift")
        .get_data_home()
        .ok_or_else(|| Error::Config("could not determine XDG data home directory".into()))
}

fn size_on_disk(path: &Path) -> u64 {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return 0;
    };
    if !meta.is_dir() {
        return meta.len();
    }
    std::fs::read_dir(path)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| size_on_disk(&entry.path()))
        .sum()
}
