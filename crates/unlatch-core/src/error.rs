use thiserror::Error;

pub type UnlatchResult<T> = Result<T, UnlatchError>;

#[derive(Debug, Error)]
pub enum UnlatchError {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
