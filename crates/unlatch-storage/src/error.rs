use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{op} {path}: {source}")]
    Backend {
        op: &'static str,
        path: String,
        #[source]
        source: opendal::Error,
    },

    #[error("invalid include pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid locator: {0}")]
    InvalidLocator(String),
}

impl StorageError {
    /// Classify an OpenDAL error for `op` on `path`.
    pub fn backend(op: &'static str, path: &str, source: opendal::Error) -> Self {
        if source.kind() == opendal::ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Backend {
                op,
                path: path.to_string(),
                source,
            }
        }
    }
}

impl From<StorageError> for unlatch_core::UnlatchError {
    fn from(e: StorageError) -> Self {
        unlatch_core::UnlatchError::Storage(e.to_string())
    }
}
