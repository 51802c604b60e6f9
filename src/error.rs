use std::path::PathBuf;

use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{0}")]
    Validation(String),

    #[error("embedding model error: {0}")]
    Model(String),

    #[error("language model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("language model error: {0}")]
    Upstream(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

/// Coarse classification of an [`Error`], reported to tool callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Storage,
    Upstream,
}

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            Self::Validation(_) | Self::Config(_) => ErrorKind::Validation,
            Self::Model(_) | Self::Http(_) | Self::Upstream(_) => {
                ErrorKind::Upstream
            }
            Self::Io(_)
            | Self::Redb(_)
            | Self::RedbStorage(_)
            | Self::RedbTransaction(_)
            | Self::RedbTable(_)
            | Self::RedbCommit(_)
            | Self::RedbDatabase(_)
            | Self::Json(_)
            | Self::DataDir(_) => ErrorKind::Storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_io_error_is_not_found() {
        let err = Error::from(std::io::Error::from(
            std::io::ErrorKind::NotFound,
        ));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = Error::from(std::io::Error::from(
            std::io::ErrorKind::PermissionDenied,
        ));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn not_found_message_names_kind() {
        let err = Error::not_found("collection", "travel");
        assert_eq!(err.to_string(), "collection not found: travel");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
