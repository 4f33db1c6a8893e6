use std::{path::PathBuf, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("could not open database: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("search index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("tensor computation error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("could not extract text from {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("{model} is unavailable: {reason}")]
    ModelUnavailable { model: &'static str, reason: String },

    #[error("{what} did not finish within {after:?}")]
    Timeout { what: &'static str, after: Duration },
}

impl Error {
    /// True for errors that mean an external model could not answer, as
    /// opposed to a local storage or configuration fault.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::ModelUnavailable { .. }
                | Error::Timeout { .. }
                | Error::Candle(_)
        )
    }
}
