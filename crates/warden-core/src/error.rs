use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    #[error("watched root does not exist: {0}")]
    RootMissing(PathBuf),
    #[error("watched root is not a directory: {0}")]
    RootNotDirectory(PathBuf),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("cannot read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WardenError>;
