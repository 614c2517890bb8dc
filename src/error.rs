use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Key-value store operation failed: {reason}")]
    Store { reason: String },
    #[error("Failed to serialize/deserialize experiment record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid experiment: {reason}")]
    InvalidExperiment { reason: String },
    #[error("Ramp counter at '{key}' is not a decimal integer: {value:?}")]
    MalformedCounter { key: String, value: String },
    #[error("Aggregation query failed: {reason}")]
    Aggregation { reason: String },
    #[error("Evaluation deadline exceeded before a decision was persisted")]
    DeadlineExceeded,
}
