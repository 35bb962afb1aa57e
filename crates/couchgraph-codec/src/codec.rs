use std::fmt;

use couchgraph_types::{builtins, Fieldable, Type, Value, ValueMap};
use serde::{Deserialize, Serialize};

use crate::classes::ClassTable;
use crate::compress::DEFAULT_LEVEL;
use crate::error::CodecResult;
use crate::handler::{AttachmentCodec, CustomCodec, DocHooks, PackHandler};
use crate::registry::TypeRegistry;

/// Codec tuning knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Longest text, in bytes, stored inline; longer text goes to the jar.
    pub max_inline_text: usize,
    /// zstd level for the jar and compressed attachments.
    pub compression_level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_inline_text: 1024,
            compression_level: DEFAULT_LEVEL,
        }
    }
}

/// Type registries and class table shared by every pack and unpack.
///
/// Built once at startup; registration takes `&mut self`, after which the
/// codec is shared read-only (typically behind an `Arc`).
pub struct Codec {
    config: CodecConfig,
    handlers: TypeRegistry<PackHandler>,
    docs: TypeRegistry<DocHooks>,
    attachments: TypeRegistry<AttachmentCodec>,
    customs: TypeRegistry<CustomCodec>,
    classes: ClassTable,
}

impl Codec {
    pub fn new(config: CodecConfig) -> Self {
        let mut handlers = TypeRegistry::new();
        // Registered first so every other registration outranks it.
        handlers.register(Type::object(), PackHandler::Object);
        handlers.register(builtins::none(), PackHandler::Scalar);
        handlers.register(builtins::boolean(), PackHandler::Scalar);
        handlers.register(builtins::int(), PackHandler::Scalar);
        handlers.register(builtins::float(), PackHandler::Scalar);
        handlers.register(builtins::text(), PackHandler::Text);
        handlers.register(builtins::bytes(), PackHandler::Bytes);
        handlers.register(builtins::list(), PackHandler::List);
        handlers.register(builtins::tuple(), PackHandler::Tuple);
        handlers.register(builtins::dict(), PackHandler::Map);
        handlers.register(builtins::module(), PackHandler::Module);

        Self {
            config,
            handlers,
            docs: TypeRegistry::new(),
            attachments: TypeRegistry::new(),
            customs: TypeRegistry::new(),
            classes: ClassTable::new(),
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Replace the tuning knobs; registrations are kept.
    pub fn set_config(&mut self, config: CodecConfig) {
        self.config = config;
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    // ---- Registration ----

    /// Objects of `ty` (and its descendants) are stored as their own
    /// documents and referenced by id.
    pub fn register_doc_type(&mut self, ty: Type, hooks: DocHooks) {
        self.classes.remember(ty.clone());
        self.docs.register(ty, hooks);
    }

    /// Values of `ty` are serialized into named attachments.
    pub fn register_attachment_type(&mut self, ty: Type, codec: AttachmentCodec) {
        self.handlers.register(ty.clone(), PackHandler::Attachment);
        self.attachments.register(ty, codec);
    }

    /// Values of `ty` are encoded as `custom:` tokens.
    pub fn register_custom_type(&mut self, ty: Type, codec: CustomCodec) {
        self.handlers.register(ty.clone(), PackHandler::Custom);
        self.customs.register(ty, codec);
    }

    /// Values of `ty` always go to the opaque-blob jar.
    pub fn register_pickle_type(&mut self, ty: Type) {
        self.handlers.register(ty, PackHandler::Pickle);
    }

    /// Storing a value of `ty` fails.
    pub fn register_uncouchable_type(&mut self, ty: Type) {
        self.handlers.register(ty, PackHandler::Uncouchable);
    }

    /// Values of `ty` are stored as null.
    pub fn register_null_type(&mut self, ty: Type) {
        self.handlers.register(ty, PackHandler::Null);
    }

    pub fn define_class<T: Fieldable + Default>(&mut self, ty: Type) {
        self.classes.define_class::<T>(ty);
    }

    pub fn define_record(&mut self, ty: Type) {
        self.classes.define_record(ty);
    }

    pub fn define_opaque(
        &mut self,
        ty: Type,
        from_blob: impl Fn(&[u8]) -> CodecResult<Box<dyn Fieldable>> + Send + Sync + 'static,
    ) {
        self.classes.define_opaque(ty, from_blob);
    }

    pub fn define_constructed(
        &mut self,
        ty: Type,
        construct: impl Fn(Vec<Value>, ValueMap) -> CodecResult<Value> + Send + Sync + 'static,
    ) {
        self.classes.define_constructed(ty, construct);
    }

    // ---- Lookup ----

    /// Handler for `value` and the type it was registered under.
    pub fn handler_for(&self, value: &Value) -> (Type, PackHandler) {
        self.handlers
            .resolve(&value.type_of())
            .unwrap_or_else(|| (Type::object(), PackHandler::Object))
    }

    pub fn is_document_type(&self, ty: &Type) -> bool {
        self.docs.resolve(ty).is_some()
    }

    pub fn doc_hooks(&self, ty: &Type) -> Option<DocHooks> {
        self.docs.resolve(ty).map(|(_, hooks)| hooks)
    }

    pub fn attachment_codec(&self, ty: &Type) -> Option<(Type, AttachmentCodec)> {
        self.attachments.resolve(ty)
    }

    pub fn attachment_codec_named(&self, qualified: &str) -> Option<AttachmentCodec> {
        self.attachments.by_name(qualified).map(|(_, codec)| codec)
    }

    pub fn custom_codec(&self, ty: &Type) -> Option<(Type, CustomCodec)> {
        self.customs.resolve(ty)
    }

    pub fn custom_codec_named(&self, qualified: &str) -> Option<CustomCodec> {
        self.customs.by_name(qualified).map(|(_, codec)| codec)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("config", &self.config)
            .field("handlers", &self.handlers.len())
            .field("doc_types", &self.docs.len())
            .field("attachment_types", &self.attachments.len())
            .field("custom_types", &self.customs.len())
            .field("classes", &self.classes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchgraph_types::{Fields, ObjRef};

    #[test]
    fn builtins_have_handlers() {
        let codec = Codec::default();
        let cases = [
            (Value::Null, PackHandler::Scalar),
            (Value::Int(1), PackHandler::Scalar),
            (Value::from("x"), PackHandler::Text),
            (Value::Bytes(vec![]), PackHandler::Bytes),
            (Value::Tuple(vec![]), PackHandler::Tuple),
            (Value::Map(ValueMap::new()), PackHandler::Map),
            (Value::Module("m".into()), PackHandler::Module),
        ];
        for (value, expected) in cases {
            assert_eq!(codec.handler_for(&value).1, expected, "{value:?}");
        }
    }

    #[test]
    fn set_config_keeps_registrations() {
        let mut codec = Codec::default();
        let user = Type::new("app", "User");
        codec.register_doc_type(user.clone(), DocHooks::new());
        codec.set_config(CodecConfig {
            max_inline_text: 8,
            compression_level: 1,
        });
        assert_eq!(codec.config().max_inline_text, 8);
        assert!(codec.is_document_type(&user));
    }

    #[test]
    fn unregistered_objects_fall_back_to_object() {
        let codec = Codec::default();
        let obj = ObjRef::record(Type::new("app", "Thing"), Fields::new());
        let (ty, handler) = codec.handler_for(&Value::from(obj));
        assert_eq!(handler, PackHandler::Object);
        assert_eq!(ty, Type::object());
    }

    #[test]
    fn doc_types_cover_descendants() {
        let base = Type::new("app", "Doc");
        let child = Type::extends("app", "Page", &base);
        let mut codec = Codec::default();
        codec.register_doc_type(base.clone(), DocHooks::new());
        assert!(codec.is_document_type(&base));
        assert!(codec.is_document_type(&child));
        assert!(!codec.is_document_type(&Type::new("app", "Other")));
        // The class table keeps the registered type's ancestry.
        assert_eq!(codec.classes().type_for("app.Doc").depth(), 1);
    }

    #[test]
    fn later_registration_overrides() {
        let ty = Type::new("app", "Secret");
        let mut codec = Codec::default();
        codec.register_pickle_type(ty.clone());
        codec.register_uncouchable_type(ty.clone());
        let obj = ObjRef::record(ty, Fields::new());
        assert_eq!(codec.handler_for(&Value::from(obj)).1, PackHandler::Uncouchable);
    }

    #[test]
    fn custom_codecs_by_name() {
        let ty = Type::new("app", "Money");
        let mut codec = Codec::default();
        codec.register_custom_type(
            ty.clone(),
            CustomCodec::new(|v| Ok(v.repr()), |s| Ok(Value::from(s))),
        );
        assert!(codec.custom_codec_named("app.Money").is_some());
        assert!(codec.custom_codec_named("app.Other").is_none());
        assert!(codec.custom_codec(&ty).is_some());
    }
}
