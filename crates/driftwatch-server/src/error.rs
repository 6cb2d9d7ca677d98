use serde::Serialize;

/// Why a single entity's check did not complete this cycle.
///
/// None of these are fatal to the orchestrator; the entity is retried on
/// the next cycle and its history is left untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CheckError {
    /// The extractor call failed.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The extractor did not answer within the per-entity timeout.
    #[error("extraction timed out after {0}ms")]
    Timeout(u64),

    /// The extractor returned a value that is not a valid snapshot.
    #[error("malformed snapshot: {0}")]
    Malformed(String),

    /// The history store could not be read or written.
    #[error("history store failure: {0}")]
    Persistence(String),

    /// The check task panicked.
    #[error("internal error: {0}")]
    Internal(String),

    /// The cycle was cancelled before the check committed.
    #[error("check cancelled")]
    Cancelled,
}

impl CheckError {
    pub fn is_persistence(&self) -> bool {
        matches!(self, CheckError::Persistence(_))
    }
}

impl From<driftwatch_storage::error::StorageError> for CheckError {
    fn from(e: driftwatch_storage::error::StorageError) -> Self {
        CheckError::Persistence(e.to_string())
    }
}
