use thiserror::Error;

/// Errors produced while reading or populating runtime objects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("field `{field}` expects {expected}, got {actual}")]
    FieldType {
        field: String,
        expected: &'static str,
        actual: String,
    },

    #[error("unknown field `{field}`")]
    UnknownField { field: String },

    #[error("object does not support a {kind} backing store")]
    BackingUnsupported { kind: &'static str },

    #[error("invalid object state: {0}")]
    Invalid(String),
}

/// Result alias for object-model operations.
pub type TypeResult<T> = Result<T, TypeError>;
