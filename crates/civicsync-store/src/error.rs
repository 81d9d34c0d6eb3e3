use thiserror::Error;

use civicsync_core::CoreError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid row: {0}")]
    Invalid(#[from] CoreError),

    #[error("fixture not found: {0}")]
    FixtureNotFound(std::path::PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
