/// Errors that can occur within the history store.
///
/// # Examples
///
/// ```rust
/// use driftwatch_storage::error::StorageError;
///
/// let err = StorageError::Corrupt {
///     entity_id: "laptop-x1".to_string(),
///     reason: "bad timestamp".to_string(),
/// };
/// assert!(err.to_string().contains("laptop-x1"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure of a stored column.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error preparing the data directory.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be turned back into a history record.
    #[error("Storage: corrupt history for '{entity_id}': {reason}")]
    Corrupt { entity_id: String, reason: String },

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
