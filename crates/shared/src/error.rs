use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the library API (`{"detail": "..."}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub detail: String,
}

impl ApiError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// A stream record that parsed as JSON but does not carry what its step promises.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("record has neither a step nor an error")]
    MissingStep,
    #[error("step {step} carries no data")]
    MissingData { step: String },
    #[error("step {step} has an invalid payload: {source}")]
    InvalidData {
        step: String,
        source: serde_json::Error,
    },
}
