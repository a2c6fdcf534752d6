use thiserror::Error;

use vaultfs_api::ApiError;

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("object not found: '{0}'")]
    ObjectNotFound(String),

    #[error("directory not found: '{0}'")]
    DirNotFound(String),

    #[error("'{0}' is a directory")]
    IsDir(String),

    #[error("'{0}' is not a directory")]
    NotDir(String),

    #[error("directory not empty: '{0}'")]
    DirNotEmpty(String),

    #[error("destination already exists: '{0}'")]
    AlreadyExists(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("path rejected by archive naming rules: '{0}'")]
    PathInvalid(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("deposit failed: {0}")]
    Deposit(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
