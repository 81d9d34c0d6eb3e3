use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("sync record `{id}` is complete but has no last_synced_at")]
    CompleteWithoutTimestamp { id: String },

    #[error("invalid completeness percentage: {0}")]
    InvalidPercentage(String),
}
