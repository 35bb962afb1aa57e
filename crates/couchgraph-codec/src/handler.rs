use std::fmt;
use std::sync::Arc;

use couchgraph_types::{ObjRef, Value};

use crate::error::CodecResult;

/// How the pack engine encodes values of a registered type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackHandler {
    /// Generic object: fields, private fields, and backing contents.
    Object,
    /// Text, escaped or routed to the jar when needed.
    Text,
    /// Null, booleans, and numbers.
    Scalar,
    /// Raw bytes; always go to the jar.
    Bytes,
    List,
    Tuple,
    Map,
    Module,
    /// Serialized into a named attachment.
    Attachment,
    /// Encoded by a registered custom codec.
    Custom,
    /// Forced into the opaque-blob jar.
    Pickle,
    /// Refused with an unsupported-type error.
    Uncouchable,
    /// Stored as null.
    Null,
}

/// Callback run against a document object.
pub type DocHook = Arc<dyn Fn(&ObjRef) -> CodecResult<()> + Send + Sync>;

/// Lifecycle hooks of a document type.
#[derive(Clone, Default)]
pub struct DocHooks {
    /// Called before the object is packed as a document root.
    pub pre_store: Option<DocHook>,
    /// Called after the object has been loaded or refreshed.
    pub post_load: Option<DocHook>,
}

impl DocHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre_store(
        mut self,
        hook: impl Fn(&ObjRef) -> CodecResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.pre_store = Some(Arc::new(hook));
        self
    }

    pub fn post_load(
        mut self,
        hook: impl Fn(&ObjRef) -> CodecResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.post_load = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for DocHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocHooks")
            .field("pre_store", &self.pre_store.is_some())
            .field("post_load", &self.post_load.is_some())
            .finish()
    }
}

type Serialize = Arc<dyn Fn(&Value) -> CodecResult<Vec<u8>> + Send + Sync>;
type Deserialize = Arc<dyn Fn(&[u8]) -> CodecResult<Value> + Send + Sync>;

/// Byte codec for values stored as attachments.
#[derive(Clone)]
pub struct AttachmentCodec {
    pub serialize: Serialize,
    pub deserialize: Deserialize,
    pub content_type: String,
    /// Run the serialized bytes through zstd.
    pub compress: bool,
}

impl AttachmentCodec {
    pub fn new(
        content_type: impl Into<String>,
        serialize: impl Fn(&Value) -> CodecResult<Vec<u8>> + Send + Sync + 'static,
        deserialize: impl Fn(&[u8]) -> CodecResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            serialize: Arc::new(serialize),
            deserialize: Arc::new(deserialize),
            content_type: content_type.into(),
            compress: false,
        }
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }
}

impl fmt::Debug for AttachmentCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentCodec")
            .field("content_type", &self.content_type)
            .field("compress", &self.compress)
            .finish()
    }
}

/// Text codec for values encoded as `custom:` tokens.
#[derive(Clone)]
pub struct CustomCodec {
    pub pack: Arc<dyn Fn(&Value) -> CodecResult<String> + Send + Sync>,
    pub unpack: Arc<dyn Fn(&str) -> CodecResult<Value> + Send + Sync>,
}

impl CustomCodec {
    pub fn new(
        pack: impl Fn(&Value) -> CodecResult<String> + Send + Sync + 'static,
        unpack: impl Fn(&str) -> CodecResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            pack: Arc::new(pack),
            unpack: Arc::new(unpack),
        }
    }
}

impl fmt::Debug for CustomCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomCodec")
    }
}
