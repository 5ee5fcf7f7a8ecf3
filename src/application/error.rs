use thiserror::Error;

/// Closed error taxonomy for ledger operations. Every failure leaves the
/// persisted collection unchanged, and each variant maps to a distinct
/// response category at the transport layer.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or out-of-range input; no state change.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The referenced entry does not exist.
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// The entry already has a recorded return time.
    #[error("Entry already closed: {0}")]
    Conflict(String),

    /// The store failed to load or save the collection.
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable kind for this error, exposed alongside the
    /// human-readable message so callers can discriminate categories.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Storage(_) => "storage",
        }
    }
}
