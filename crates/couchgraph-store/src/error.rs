/// Errors from document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested document was not found.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The supplied revision does not match the store's current revision.
    #[error("document update conflict: {id}")]
    Conflict { id: String },

    /// An attachment stub or lookup named an attachment the store does not hold.
    #[error("attachment `{name}` missing on {id}")]
    MissingAttachment { id: String, name: String },

    /// The document is malformed (missing `_id`, bad `_attachments`, ...).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend could not complete the request.
    #[error("transport error: {0}")]
    Transport(String),

    /// Storage backend is read-only or otherwise unavailable.
    #[error("store is read-only")]
    ReadOnly,
}

impl StoreError {
    /// Returns `true` for revision conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
