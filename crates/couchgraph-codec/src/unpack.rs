//! Unpack engine: documents → live object graphs.

use couchgraph_store::RawDocument;
use couchgraph_types::{builtins, Backing, Fields, ObjRef, Value, ValueMap};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::codec::Codec;
use crate::compress;
use crate::encoding::{
    field_path, index_path, info, key_path, parse_repr, qualified, value_path, Token, INFO_KEY,
    PICKLE_ATTACHMENT, ROOT_PATH,
};
use crate::error::{CodecError, CodecResult};
use crate::pickle::PickleJar;

/// Bridge from the unpack engine back to the load session.
pub trait Resolver {
    /// Live object for document `id`, loading it if needed.
    fn resolve_id(&mut self, id: &str) -> CodecResult<ObjRef>;

    /// Payload of attachment `name` on document `doc_id`.
    fn fetch_attachment(&mut self, doc_id: &str, name: &str) -> CodecResult<Vec<u8>>;

    /// Called once a document's instance exists, before any field is
    /// decoded, so references back to it resolve to the same instance.
    fn register(&mut self, id: &str, rev: Option<&str>, obj: &ObjRef);
}

/// State scoped to the document being unpacked.
struct DocFrame<'d> {
    doc: &'d RawDocument,
    keys: Option<&'d Map<String, JsonValue>>,
    jar: Option<PickleJar>,
}

pub struct Unpacker<'a> {
    codec: &'a Codec,
    resolver: &'a mut dyn Resolver,
}

impl<'a> Unpacker<'a> {
    pub fn new(codec: &'a Codec, resolver: &'a mut dyn Resolver) -> Self {
        Self { codec, resolver }
    }

    /// Decode `doc` into `existing`, or into a fresh instance of the stored
    /// class.
    pub fn unpack_document(
        &mut self,
        doc: &RawDocument,
        existing: Option<ObjRef>,
    ) -> CodecResult<ObjRef> {
        let meta = doc
            .body
            .get(INFO_KEY)
            .and_then(JsonValue::as_object)
            .ok_or_else(|| CodecError::encoding(&doc.id, "document has no couchgraph metadata"))?;
        let class = read_class(meta, &doc.id)?;
        debug!(id = %doc.id, type_name = %class, "unpacking document");

        let mut frame = DocFrame {
            doc,
            keys: meta.get(info::KEYS).and_then(JsonValue::as_object),
            jar: None,
        };

        if meta.contains_key(info::ARGS) {
            let Value::Object(obj) = self.construct(&mut frame, meta, &class, ROOT_PATH)? else {
                return Err(CodecError::encoding(&doc.id, "constructed root is not an object"));
            };
            self.adopt(doc, &obj);
            return Ok(obj);
        }

        let obj = existing.unwrap_or_else(|| self.codec.classes().allocate(&class));
        self.adopt(doc, &obj);

        let mut fields = Fields::new();
        if let Some(private) = meta.get(info::PRIVATE).and_then(JsonValue::as_object) {
            for (name, value) in private {
                let value = self.unpack(&mut frame, value, &field_path(ROOT_PATH, name))?;
                fields.insert(name.clone(), value);
            }
        }
        self.populate(&mut frame, &obj, &doc.body, meta, ROOT_PATH, fields)?;
        Ok(obj)
    }

    fn adopt(&mut self, doc: &RawDocument, obj: &ObjRef) {
        obj.set_id(doc.id.clone());
        if let Some(rev) = &doc.rev {
            obj.set_rev(rev.clone());
        }
        self.resolver.register(&doc.id, doc.rev.as_deref(), obj);
    }

    fn populate(
        &mut self,
        frame: &mut DocFrame<'_>,
        obj: &ObjRef,
        body: &Map<String, JsonValue>,
        meta: &Map<String, JsonValue>,
        path: &str,
        mut fields: Fields,
    ) -> CodecResult<()> {
        for (key, value) in body {
            if key == INFO_KEY {
                continue;
            }
            let name = match Token::parse(key)? {
                None => key.clone(),
                Some(Token::Append { text, .. }) => text,
                Some(_) => {
                    return Err(CodecError::encoding(
                        field_path(path, key),
                        "field name is not text",
                    ))
                }
            };
            let value = self.unpack(frame, value, &field_path(path, &name))?;
            fields.insert(name, value);
        }
        obj.populate(fields)
            .map_err(|e| CodecError::object(path, e))?;

        let backing = match (meta.get(info::LIST), meta.get(info::DICT)) {
            (Some(JsonValue::Array(items)), _) => Some(Backing::List(self.unpack_items(frame, items, path)?)),
            (_, Some(JsonValue::Object(map))) => Some(Backing::Map(self.unpack_map(frame, map, path)?)),
            (None, None) => None,
            _ => return Err(CodecError::encoding(path, "malformed backing contents")),
        };
        if let Some(backing) = backing {
            obj.state_mut()
                .restore_backing(backing)
                .map_err(|e| CodecError::object(path, e))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    fn unpack(&mut self, frame: &mut DocFrame<'_>, value: &JsonValue, path: &str) -> CodecResult<Value> {
        match value {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .ok_or_else(|| CodecError::encoding(path, format!("unreadable number {n}"))),
            JsonValue::String(s) => self.unpack_text(frame, s, path),
            JsonValue::Array(items) => Ok(Value::List(self.unpack_items(frame, items, path)?)),
            JsonValue::Object(map) => match map.get(INFO_KEY) {
                Some(JsonValue::Object(meta)) => self.unpack_object(frame, map, meta, path),
                Some(_) => Err(CodecError::encoding(path, "malformed object metadata")),
                None => Ok(Value::Map(self.unpack_map(frame, map, path)?)),
            },
        }
    }

    fn unpack_text(&mut self, frame: &mut DocFrame<'_>, text: &str, path: &str) -> CodecResult<Value> {
        let Some(token) = Token::parse(text)? else {
            return Ok(Value::Text(text.to_string()));
        };
        match token {
            Token::Id(id) => Ok(Value::Object(self.resolver.resolve_id(&id)?)),
            Token::Module(name) => Ok(Value::Module(name)),
            Token::Repr { type_name, literal } => parse_repr(&type_name, &literal),
            Token::Append { text, .. } => Ok(Value::Text(text)),
            Token::Key { .. } => {
                let keys = frame.keys;
                let packed = keys
                    .and_then(|keys| keys.get(text))
                    .ok_or_else(|| CodecError::encoding(path, format!("{text} missing from key table")))?;
                self.unpack(frame, packed, path)
            }
            Token::Pickle(name) => {
                if frame.jar.is_none() {
                    let data = self.attachment_bytes(frame, PICKLE_ATTACHMENT)?;
                    frame.jar = Some(PickleJar::from_bytes(&data)?);
                }
                let pickled = frame
                    .jar
                    .as_ref()
                    .and_then(|jar| jar.get(&name))
                    .ok_or_else(|| CodecError::encoding(path, format!("no pickle named {name}")))?;
                pickled.to_value(self.codec.classes(), path)
            }
            Token::Attachment { type_name, name } => {
                let codec = self
                    .codec
                    .attachment_codec_named(&type_name)
                    .ok_or_else(|| CodecError::unsupported(&type_name, path))?;
                let mut data = self.attachment_bytes(frame, &name)?;
                if codec.compress {
                    data = compress::decompress(&data)?;
                }
                (codec.deserialize)(&data)
            }
            Token::Custom { type_name, payload } => {
                let codec = self
                    .codec
                    .custom_codec_named(&type_name)
                    .ok_or(CodecError::MissingCustomHandler { type_name })?;
                (codec.unpack)(&payload)
            }
        }
    }

    fn unpack_items(
        &mut self,
        frame: &mut DocFrame<'_>,
        items: &[JsonValue],
        path: &str,
    ) -> CodecResult<Vec<Value>> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| self.unpack(frame, item, &index_path(path, i)))
            .collect()
    }

    fn unpack_map(
        &mut self,
        frame: &mut DocFrame<'_>,
        map: &Map<String, JsonValue>,
        path: &str,
    ) -> CodecResult<ValueMap> {
        let mut out = ValueMap::with_capacity(map.len());
        for (key, value) in map {
            let k = self.unpack_text(frame, key, &key_path(path, key))?;
            let v = self.unpack(frame, value, &value_path(path, key))?;
            out.insert(k, v);
        }
        Ok(out)
    }

    fn unpack_object(
        &mut self,
        frame: &mut DocFrame<'_>,
        map: &Map<String, JsonValue>,
        meta: &Map<String, JsonValue>,
        path: &str,
    ) -> CodecResult<Value> {
        let class = read_class(meta, path)?;
        if meta.contains_key(info::ARGS) {
            return self.construct(frame, meta, &class, path);
        }
        let obj = self.codec.classes().allocate(&class);
        self.populate(frame, &obj, map, meta, path, Fields::new())?;
        Ok(Value::Object(obj))
    }

    fn construct(
        &mut self,
        frame: &mut DocFrame<'_>,
        meta: &Map<String, JsonValue>,
        class: &str,
        path: &str,
    ) -> CodecResult<Value> {
        let args = match meta.get(info::ARGS) {
            Some(JsonValue::Array(items)) => self.unpack_items(frame, items, path)?,
            _ => return Err(CodecError::encoding(path, "constructor args must be a list")),
        };
        let kwargs = match meta.get(info::KWARGS) {
            Some(JsonValue::Object(map)) => self.unpack_map(frame, map, path)?,
            None => ValueMap::new(),
            Some(_) => return Err(CodecError::encoding(path, "constructor kwargs must be a map")),
        };

        if class == builtins::tuple().qualified_name() {
            return match args.into_iter().next() {
                Some(Value::List(items)) => Ok(Value::Tuple(items)),
                None => Ok(Value::Tuple(Vec::new())),
                Some(_) => Err(CodecError::encoding(path, "tuple args must hold a list")),
            };
        }
        self.codec.classes().construct(class, args, kwargs, path)
    }

    fn attachment_bytes(&mut self, frame: &DocFrame<'_>, name: &str) -> CodecResult<Vec<u8>> {
        let info = frame.doc.attachments.get(name).ok_or_else(|| {
            CodecError::encoding(name, format!("{} has no such attachment", frame.doc.id))
        })?;
        match info.decode_data()? {
            Some(data) => Ok(data),
            None => self.resolver.fetch_attachment(&frame.doc.id, name),
        }
    }
}

fn read_class(meta: &Map<String, JsonValue>, path: &str) -> CodecResult<String> {
    let class = meta
        .get(info::CLASS)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| CodecError::encoding(path, "object metadata has no class"))?;
    let module = meta.get(info::MODULE).and_then(JsonValue::as_str).unwrap_or("");
    Ok(qualified(class, module))
}

/// Ids of the documents `doc` references, in first-seen order.
///
/// Covers field data and metadata (private fields, key table, backing), so
/// a loader can fetch a document's neighbours before unpacking it.
pub fn referenced_ids(doc: &RawDocument) -> Vec<String> {
    let mut ids = Vec::new();
    for value in doc.body.values() {
        collect_ids(value, &mut ids);
    }
    ids
}

fn collect_ids(value: &JsonValue, ids: &mut Vec<String>) {
    match value {
        JsonValue::String(text) => {
            if let Ok(Some(Token::Id(id))) = Token::parse(text) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        JsonValue::Array(items) => items.iter().for_each(|item| collect_ids(item, ids)),
        JsonValue::Object(map) => map.values().for_each(|item| collect_ids(item, ids)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use couchgraph_store::StoreError;
    use couchgraph_types::{ConstructorArgs, Fieldable, Record, Type, TypeResult};
    use serde_json::json;

    use crate::handler::{AttachmentCodec, CustomCodec, DocHooks};
    use crate::pack::{Packer, PendingWrite};

    /// Resolver over an in-test document set.
    #[derive(Default)]
    struct TestResolver {
        docs: HashMap<String, RawDocument>,
        live: HashMap<String, ObjRef>,
        fetched: HashMap<String, Vec<u8>>,
        fetches: usize,
    }

    impl TestResolver {
        fn with_writes(writes: Vec<PendingWrite>) -> Self {
            let mut resolver = Self::default();
            for write in writes {
                let mut doc = write.document;
                for (name, blob) in write.blobs {
                    doc.attachments.insert(name, blob.to_inline());
                }
                resolver.docs.insert(doc.id.clone(), doc);
            }
            resolver
        }

        fn load(&mut self, codec: &Codec, id: &str) -> CodecResult<ObjRef> {
            self.resolve_with(codec, id)
        }

        fn resolve_with(&mut self, codec: &Codec, id: &str) -> CodecResult<ObjRef> {
            if let Some(obj) = self.live.get(id) {
                return Ok(obj.clone());
            }
            let doc = self
                .docs
                .get(id)
                .cloned()
                .ok_or_else(|| CodecError::Store(StoreError::NotFound(id.to_string())))?;
            // Nested ids resolve through a codec-aware wrapper.
            let mut session = Session { codec, inner: self };
            Unpacker::new(codec, &mut session).unpack_document(&doc, None)
        }
    }

    struct Session<'a> {
        codec: &'a Codec,
        inner: &'a mut TestResolver,
    }

    impl Resolver for Session<'_> {
        fn resolve_id(&mut self, id: &str) -> CodecResult<ObjRef> {
            self.inner.resolve_with(self.codec, id)
        }

        fn fetch_attachment(&mut self, doc_id: &str, name: &str) -> CodecResult<Vec<u8>> {
            self.inner.fetches += 1;
            self.inner
                .fetched
                .get(&format!("{doc_id}/{name}"))
                .cloned()
                .ok_or_else(|| {
                    CodecError::Store(StoreError::MissingAttachment {
                        id: doc_id.into(),
                        name: name.into(),
                    })
                })
        }

        fn register(&mut self, id: &str, _rev: Option<&str>, obj: &ObjRef) {
            self.inner.live.insert(id.to_string(), obj.clone());
        }
    }

    fn roundtrip(codec: &Codec, root: &ObjRef) -> ObjRef {
        let mut packer = Packer::new(codec);
        let id = packer.store_object(root).unwrap();
        let mut resolver = TestResolver::with_writes(packer.finish());
        resolver.load(codec, &id).unwrap()
    }

    fn thing(fields: Fields) -> ObjRef {
        ObjRef::record(Type::new("app", "Thing"), fields)
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    #[test]
    fn values_survive() {
        let codec = Codec::default();
        let mut map = ValueMap::new();
        map.insert("plain", 1);
        map.insert(Value::Null, "none");
        map.insert(true, 2.5);
        map.insert(-3, Value::List(vec![]));
        map.insert(Value::Tuple(vec![1.into(), "a".into()]), "tuple key");
        map.insert("couchgraph:repr:int:1", "escaped key");

        let values = vec![
            Value::Null,
            Value::Bool(false),
            Value::Int(i64::MIN),
            Value::Float(1.0),
            Value::from("couchgraph:id:not-a-ref"),
            Value::from("nul\0inside"),
            Value::from("z".repeat(5000)),
            Value::Bytes(vec![0, 1, 254, 255]),
            Value::Tuple(vec![Value::Tuple(vec![]), Value::Tuple(vec![1.into()])]),
            Value::Module("std.collections".into()),
            Value::Map(map),
        ];
        let root = thing(Fields::new().with("values", Value::List(values.clone())));
        let back = roundtrip(&codec, &root);

        assert!(!back.ptr_eq(&root));
        assert_eq!(back.get("values"), Some(Value::List(values)));
    }

    #[test]
    fn nested_objects_and_private_fields() {
        let codec = Codec::default();
        let child = ObjRef::record(Type::new("app", "Child"), Fields::new().with("n", 1));
        let root = thing(
            Fields::new()
                .with("_token", "secret")
                .with("child", &child)
                .with("couchgraph:odd", "field"),
        );
        let back = roundtrip(&codec, &root);

        assert_eq!(back.get("_token"), Some(Value::from("secret")));
        assert_eq!(back.get("couchgraph:odd"), Some(Value::from("field")));
        let child_back = back.get("child").unwrap();
        let child_back = child_back.as_object().unwrap();
        assert_eq!(child_back.ty().qualified_name(), "app.Child");
        assert_eq!(child_back.get("n"), Some(Value::Int(1)));
        assert_eq!(child_back.id(), None);
    }

    #[test]
    fn backing_contents_are_restored() {
        let codec = Codec::default();
        let bag = ObjRef::new(
            Type::new("app", "Bag"),
            Record::from_fields(Fields::new().with("label", "x"))
                .with_backing(Backing::List(vec![1.into(), "two".into()])),
        );
        let back = roundtrip(&codec, &bag);
        assert_eq!(
            back.state().backing(),
            Some(Backing::List(vec![1.into(), "two".into()]))
        );
    }

    // -----------------------------------------------------------------------
    // Documents and identity
    // -----------------------------------------------------------------------

    #[test]
    fn self_reference_resolves_to_same_instance() {
        let node = Type::new("app", "Node");
        let mut codec = Codec::default();
        codec.register_doc_type(node.clone(), DocHooks::new());

        let a = ObjRef::record(node.clone(), Fields::new());
        let b = ObjRef::record(node, Fields::new().with("peer", &a));
        a.set("peer", &b).unwrap();
        a.set("me", &a).unwrap();

        let back = roundtrip(&codec, &a);
        let me = back.get("me").unwrap();
        assert!(me.as_object().unwrap().ptr_eq(&back));
        let peer = back.get("peer").unwrap();
        let peer_of_peer = peer.as_object().unwrap().get("peer").unwrap();
        assert!(peer_of_peer.as_object().unwrap().ptr_eq(&back));
        assert_eq!(back.id(), a.id());
    }

    #[test]
    fn existing_instance_is_refreshed_in_place() {
        let codec = Codec::default();
        let root = thing(Fields::new().with("v", 2));
        let mut packer = Packer::new(&codec);
        let id = packer.store_object(&root).unwrap();
        let mut writes = packer.finish();
        let mut doc = writes.remove(0).document;
        doc.rev = Some("5-abc".into());

        let stale = thing(Fields::new().with("v", 1).with("extra", true));
        let mut resolver = TestResolver::default();
        let mut session = Session {
            codec: &codec,
            inner: &mut resolver,
        };
        let back = Unpacker::new(&codec, &mut session)
            .unpack_document(&doc, Some(stale.clone()))
            .unwrap();

        assert!(back.ptr_eq(&stale));
        assert_eq!(stale.get("v"), Some(Value::Int(2)));
        assert_eq!(stale.get("extra"), Some(Value::Bool(true)));
        assert_eq!(stale.id(), Some(id));
        assert_eq!(stale.rev().as_deref(), Some("5-abc"));
    }

    #[test]
    fn referenced_ids_cover_fields_and_metadata() {
        let doc = RawDocument::new("root").with_body(
            json!({
                "couchgraph:": {
                    "class": "Thing",
                    "private": {"_owner": "couchgraph:id:user:1"},
                    "list": ["couchgraph:id:item:2", "couchgraph:id:user:1"],
                },
                "child": {"deep": ["couchgraph:id:node:3"]},
                "note": "couchgraph:append:str:couchgraph:id:not-a-ref",
                "plain": "node:4",
            })
            .as_object()
            .cloned()
            .unwrap(),
        );
        assert_eq!(referenced_ids(&doc), ["user:1", "item:2", "node:3"]);
    }

    #[test]
    fn document_without_metadata_is_rejected() {
        let codec = Codec::default();
        let doc = RawDocument::new("plain").with_field("a", json!(1));
        let mut resolver = TestResolver::default();
        let mut session = Session {
            codec: &codec,
            inner: &mut resolver,
        };
        let err = Unpacker::new(&codec, &mut session)
            .unpack_document(&doc, None)
            .unwrap_err();
        assert!(matches!(err, CodecError::Encoding { .. }));
    }

    // -----------------------------------------------------------------------
    // Registered handlers
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct Point {
        x: i64,
        y: i64,
    }

    impl Fieldable for Point {
        fn fields(&self) -> Option<Fields> {
            Some(Fields::new().with("x", self.x).with("y", self.y))
        }

        fn populate(&mut self, fields: Fields) -> TypeResult<()> {
            for (name, value) in fields {
                let v = value.as_int().unwrap_or_default();
                match name.as_str() {
                    "x" => self.x = v,
                    "y" => self.y = v,
                    _ => {}
                }
            }
            Ok(())
        }
    }

    struct Span(i64, i64);

    impl Fieldable for Span {
        fn fields(&self) -> Option<Fields> {
            None
        }

        fn populate(&mut self, _fields: Fields) -> TypeResult<()> {
            Ok(())
        }

        fn constructor_args(&self) -> Option<ConstructorArgs> {
            Some(ConstructorArgs::positional(vec![self.0.into(), self.1.into()]))
        }
    }

    #[test]
    fn defined_and_constructed_classes() {
        let point = Type::new("geo", "Point");
        let span = Type::new("geo", "Span");
        let mut codec = Codec::default();
        codec.define_class::<Point>(point.clone());
        let span_ty = span.clone();
        codec.define_constructed(span.clone(), move |args, _| {
            let start = args.first().and_then(Value::as_int).unwrap_or_default();
            let end = args.get(1).and_then(Value::as_int).unwrap_or_default();
            Ok(Value::Object(ObjRef::new(span_ty.clone(), Span(start, end))))
        });

        let root = thing(
            Fields::new()
                .with("p", ObjRef::new(point, Point { x: 3, y: 4 }))
                .with("s", ObjRef::new(span, Span(10, 20))),
        );
        let back = roundtrip(&codec, &root);

        let p = back.get("p").unwrap();
        assert_eq!(p.as_object().unwrap().with(|p: &Point| (p.x, p.y)), Some((3, 4)));
        let s = back.get("s").unwrap();
        assert_eq!(s.as_object().unwrap().with(|s: &Span| (s.0, s.1)), Some((10, 20)));
    }

    #[test]
    fn attachments_decode_inline_and_fetched() {
        let blob_ty = Type::new("app", "Blob");
        let mut codec = Codec::default();
        let ty = blob_ty.clone();
        codec.register_attachment_type(
            blob_ty.clone(),
            AttachmentCodec::new(
                "application/octet-stream",
                |v| {
                    Ok(v.as_object()
                        .and_then(|o| o.get("data"))
                        .and_then(|d| d.as_text().map(|t| t.as_bytes().to_vec()))
                        .unwrap_or_default())
                },
                move |bytes| {
                    let text = String::from_utf8_lossy(bytes).into_owned();
                    Ok(Value::Object(ObjRef::record(ty.clone(), Fields::new().with("data", text))))
                },
            )
            .compressed(),
        );

        let blob = ObjRef::record(blob_ty, Fields::new().with("data", "payload ".repeat(100)));
        let root = thing(Fields::new().with("b", &blob));
        let back = roundtrip(&codec, &root);
        let b = back.get("b").unwrap();
        assert_eq!(
            b.as_object().unwrap().get("data"),
            Some(Value::from("payload ".repeat(100)))
        );

        // Same document with the attachment reported as a stub.
        let mut packer = Packer::new(&codec);
        let id = packer.store_object(&root).unwrap();
        let write = packer.finish().remove(0);
        let stored = write.blobs["self.b"].clone();
        let mut doc = write.document;
        doc.attachments.insert("self.b".into(), stored.to_stub());

        let mut resolver = TestResolver::default();
        resolver.fetched.insert(format!("{id}/self.b"), stored.data);
        resolver.docs.insert(id.clone(), doc);
        let back = resolver.load(&codec, &id).unwrap();
        assert!(back.get("b").is_some());
        assert_eq!(resolver.fetches, 1);
    }

    #[test]
    fn pickle_jar_is_fetched_once() {
        let codec = Codec::default();
        let root = thing(
            Fields::new()
                .with("a", Value::Bytes(vec![1]))
                .with("b", Value::Bytes(vec![2])),
        );
        let mut packer = Packer::new(&codec);
        let id = packer.store_object(&root).unwrap();
        let write = packer.finish().remove(0);
        let jar = write.blobs[PICKLE_ATTACHMENT].clone();
        let mut doc = write.document;
        doc.attachments.insert(PICKLE_ATTACHMENT.into(), jar.to_stub());

        let mut resolver = TestResolver::default();
        resolver.fetched.insert(format!("{id}/{PICKLE_ATTACHMENT}"), jar.data);
        resolver.docs.insert(id.clone(), doc);
        let back = resolver.load(&codec, &id).unwrap();
        assert_eq!(back.get("b"), Some(Value::Bytes(vec![2])));
        assert_eq!(resolver.fetches, 1);
    }

    #[test]
    fn custom_tokens_need_a_decoder() {
        let money = Type::new("app", "Money");
        let mut codec = Codec::default();
        let ty = money.clone();
        codec.register_custom_type(
            money.clone(),
            CustomCodec::new(
                |v| {
                    Ok(v.as_object()
                        .and_then(|o| o.get("cents"))
                        .map(|c| c.repr())
                        .unwrap_or_default())
                },
                move |payload| {
                    let cents: i64 = payload
                        .parse()
                        .map_err(|_| CodecError::Callback(format!("bad cents {payload}")))?;
                    Ok(Value::Object(ObjRef::record(ty.clone(), Fields::new().with("cents", cents))))
                },
            ),
        );
        let root = thing(Fields::new().with("price", ObjRef::record(money, Fields::new().with("cents", 99))));
        let back = roundtrip(&codec, &root);
        let price = back.get("price").unwrap();
        assert_eq!(price.as_object().unwrap().get("cents"), Some(Value::Int(99)));

        let doc = RawDocument::new("x").with_field(
            INFO_KEY,
            json!({"class": "Thing", "module": "app"}),
        )
        .with_field("price", json!("couchgraph:custom:app.Gone:1"));
        let mut resolver = TestResolver::default();
        resolver.docs.insert("x".into(), doc);
        let err = resolver.load(&codec, "x").unwrap_err();
        assert!(matches!(err, CodecError::MissingCustomHandler { ref type_name } if type_name == "app.Gone"));
    }

    #[test]
    fn missing_key_table_entry_is_an_error() {
        let codec = Codec::default();
        let doc = RawDocument::new("k")
            .with_field(INFO_KEY, json!({"class": "Thing", "module": "app", "keys": {}}))
            .with_field("m", json!({"couchgraph:key:tuple:(1,)": 1}));
        let mut resolver = TestResolver::default();
        resolver.docs.insert("k".into(), doc);
        assert!(matches!(
            resolver.load(&codec, "k"),
            Err(CodecError::Encoding { .. })
        ));
    }
}
