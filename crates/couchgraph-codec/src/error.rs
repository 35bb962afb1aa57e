use couchgraph_store::StoreError;
use couchgraph_types::TypeError;
use thiserror::Error;

/// Errors raised while packing or unpacking object graphs.
#[derive(Debug, Error)]
pub enum CodecError {
    /// An object was reached again while its own fields were being packed.
    #[error("reference cycle through {type_name} at {path}")]
    Cycle { type_name: String, path: String },

    /// The value has no handler, no field map, and no opaque form, or its
    /// type was registered as uncouchable.
    #[error("cannot store {type_name} at {path}")]
    UnsupportedType { type_name: String, path: String },

    /// The value cannot be represented in, or read back from, a document.
    #[error("encoding error at {path}: {reason}")]
    Encoding { path: String, reason: String },

    /// A `custom:` token named a type with no registered decoder.
    #[error("no custom decoder registered for {type_name}")]
    MissingCustomHandler { type_name: String },

    /// An object rejected the fields or arguments it was given.
    #[error("object error at {path}: {source}")]
    Object {
        path: String,
        #[source]
        source: TypeError,
    },

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// The opaque-blob jar could not be written or read.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A hook or user codec failed.
    #[error("{0}")]
    Callback(String),

    /// The document store failed while resolving a reference.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CodecError {
    pub fn encoding(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Encoding {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(type_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
            path: path.into(),
        }
    }

    pub fn object(path: impl Into<String>, source: TypeError) -> Self {
        Self::Object {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
