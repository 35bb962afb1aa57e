use couchgraph_codec::CodecError;
use couchgraph_store::StoreError;
use couchgraph_types::TypeError;
use thiserror::Error;

/// Errors surfaced by [`crate::CouchGraph`].
#[derive(Debug, Error)]
pub enum Error {
    /// A reference cycle that does not pass through a document.
    #[error("reference cycle through {type_name} at {path}")]
    Cycle { type_name: String, path: String },

    #[error("cannot store {type_name} at {path}")]
    UnsupportedType { type_name: String, path: String },

    #[error("encoding error at {path}: {reason}")]
    Encoding { path: String, reason: String },

    /// The document changed since this process last saw it. Reload and
    /// retry.
    #[error("concurrent update of {type_name} {id}")]
    ConcurrencyConflict { id: String, type_name: String },

    #[error("no custom decoder registered for {type_name}")]
    MissingCustomHandler { type_name: String },

    #[error("object error at {path}: {source}")]
    Object {
        path: String,
        #[source]
        source: TypeError,
    },

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("invalid load target: {0}")]
    InvalidTarget(String),

    /// A hook or mutation callback failed.
    #[error("{0}")]
    Callback(String),

    #[error("config error: {0}")]
    Config(String),

    /// The document store failed.
    #[error("transport error: {0}")]
    Transport(#[source] StoreError),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict { .. })
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Error::NotFound(id),
            other => Error::Transport(other),
        }
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Cycle { type_name, path } => Error::Cycle { type_name, path },
            CodecError::UnsupportedType { type_name, path } => {
                Error::UnsupportedType { type_name, path }
            }
            CodecError::Encoding { path, reason } => Error::Encoding { path, reason },
            CodecError::MissingCustomHandler { type_name } => {
                Error::MissingCustomHandler { type_name }
            }
            CodecError::Object { path, source } => Error::Object { path, source },
            CodecError::CompressionFailed(reason)
            | CodecError::DecompressionFailed(reason)
            | CodecError::Serialization(reason) => Error::Encoding {
                path: couchgraph_codec::PICKLE_ATTACHMENT.to_string(),
                reason,
            },
            CodecError::Callback(reason) => Error::Callback(reason),
            CodecError::Store(err) => err.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_errors_keep_their_kind() {
        let err: Error = CodecError::Cycle {
            type_name: "app.Node".into(),
            path: "self.next".into(),
        }
        .into();
        assert!(matches!(err, Error::Cycle { ref path, .. } if path == "self.next"));

        let err: Error = CodecError::MissingCustomHandler {
            type_name: "app.Money".into(),
        }
        .into();
        assert_eq!(err.to_string(), "no custom decoder registered for app.Money");
    }

    #[test]
    fn store_errors_become_transport() {
        let err: Error = CodecError::Store(StoreError::Transport("reset".into())).into();
        assert!(matches!(err, Error::Transport(_)));
        let err: Error = StoreError::NotFound("doc".into()).into();
        assert!(matches!(err, Error::NotFound(ref id) if id == "doc"));
        assert!(!err.is_conflict());
    }
}
