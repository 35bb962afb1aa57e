//! Pack engine: live object graphs → documents.
//!
//! A [`Packer`] lives for one store call. Each root handed to
//! [`Packer::store_object`] becomes a document; objects of registered
//! document types reached along the way are packed into documents of their
//! own and referenced by `id:` token. Everything else is inlined by value
//! into the document that reaches it.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use couchgraph_store::{AttachmentBlob, RawDocument};
use couchgraph_types::{builtins, Backing, ConstructorArgs, ObjRef, Value, ValueMap};
use serde_json::{Map, Number, Value as JsonValue};
use tracing::debug;

use crate::codec::Codec;
use crate::compress;
use crate::encoding::{
    class_and_module, collides, field_path, index_path, info, key_path, value_path, Token,
    INFO_KEY, PICKLE_ATTACHMENT, PICKLE_CONTENT_TYPE, RESERVED_FIELDS, ROOT_PATH,
};
use crate::error::{CodecError, CodecResult};
use crate::handler::PackHandler;
use crate::ids::{new_id, IdOptions};
use crate::pickle::{PickleJar, Pickled};

/// One document ready to be written.
#[derive(Debug)]
pub struct PendingWrite {
    pub obj: ObjRef,
    /// Body, id, and the revision the write is based on. Attachments are
    /// carried separately in `blobs`.
    pub document: RawDocument,
    pub blobs: BTreeMap<String, AttachmentBlob>,
}

impl PendingWrite {
    pub fn id(&self) -> &str {
        &self.document.id
    }

    pub fn type_name(&self) -> String {
        self.obj.ty().qualified_name()
    }

    /// Total attachment payload in bytes.
    pub fn attachment_bytes(&self) -> usize {
        self.blobs.values().map(AttachmentBlob::len).sum()
    }
}

/// State scoped to the document being packed.
#[derive(Default)]
struct Frame {
    keys: Map<String, JsonValue>,
    private: Map<String, JsonValue>,
    blobs: BTreeMap<String, AttachmentBlob>,
    jar: PickleJar,
    /// Packed form per object address. The handle is held so the address
    /// cannot be reused by another object while the document is packed.
    memo: HashMap<usize, (ObjRef, JsonValue)>,
    /// Key-table token per non-primitive key already packed.
    key_tokens: Vec<(Value, String)>,
}

/// Call-scoped graph walker.
pub struct Packer<'c> {
    codec: &'c Codec,
    /// Objects whose fields are being packed in the current document.
    open: HashSet<usize>,
    /// Ids claimed by this call, finished or in progress.
    reserved: HashSet<String>,
    done: Vec<PendingWrite>,
    skip: HashMap<usize, ObjRef>,
    additive_only: bool,
    pid: u32,
    time: String,
}

impl<'c> Packer<'c> {
    pub fn new(codec: &'c Codec) -> Self {
        Self {
            codec,
            open: HashSet::new(),
            reserved: HashSet::new(),
            done: Vec::new(),
            skip: HashMap::new(),
            additive_only: false,
            pid: std::process::id(),
            time: Utc::now().to_rfc3339(),
        }
    }

    /// Reference these objects but never write them. Objects that have not
    /// been persisted yet are ignored.
    pub fn skip(mut self, objects: &[ObjRef]) -> Self {
        self.skip = objects
            .iter()
            .filter(|obj| obj.meta().is_persisted())
            .map(|obj| (obj.addr(), obj.clone()))
            .collect();
        self
    }

    /// Leave already-persisted nested documents untouched.
    pub fn additive_only(mut self, additive_only: bool) -> Self {
        self.additive_only = additive_only;
        self
    }

    /// Pack `obj` as a document root and return its id.
    ///
    /// Runs the type's `pre_store` hook and assigns an id if the object has
    /// none. Objects already packed by this call are not packed again.
    pub fn store_object(&mut self, obj: &ObjRef) -> CodecResult<String> {
        if let Some(id) = obj.id() {
            if self.reserved.contains(&id) {
                return Ok(id);
            }
        }
        if let Some(hook) = self.codec.doc_hooks(obj.ty()).and_then(|h| h.pre_store) {
            hook(obj)?;
        }
        let id = new_id(obj, &IdOptions::default())?;
        if !self.reserved.insert(id.clone()) {
            return Ok(id);
        }
        debug!(id = %id, type_name = %obj.ty(), "packing document");

        // Non-document values are copied per document, so the cycle guard
        // restarts at each document boundary.
        let outer = std::mem::take(&mut self.open);
        let mut frame = Frame::default();
        let packed = self.pack_object(&mut frame, obj, ROOT_PATH, true);
        self.open = outer;

        let JsonValue::Object(mut body) = packed? else {
            return Err(CodecError::unsupported(obj.ty().qualified_name(), ROOT_PATH));
        };
        if let Some(JsonValue::Object(meta)) = body.get_mut(INFO_KEY) {
            meta.insert(info::KEYS.into(), JsonValue::Object(frame.keys));
            meta.insert(info::PRIVATE.into(), JsonValue::Object(frame.private));
        }
        if !frame.jar.is_empty() {
            if frame.blobs.contains_key(PICKLE_ATTACHMENT) {
                return Err(CodecError::encoding(
                    PICKLE_ATTACHMENT,
                    "attachment name already in use",
                ));
            }
            let data = frame.jar.to_bytes(self.codec.config().compression_level)?;
            frame.blobs.insert(
                PICKLE_ATTACHMENT.to_string(),
                AttachmentBlob::new(PICKLE_CONTENT_TYPE, data),
            );
        }

        let mut document = RawDocument::new(id.clone()).with_body(body);
        document.rev = obj.rev();
        self.done.push(PendingWrite {
            obj: obj.clone(),
            document,
            blobs: frame.blobs,
        });
        Ok(id)
    }

    /// Documents to write, in completion order, without skipped objects.
    pub fn finish(self) -> Vec<PendingWrite> {
        let Packer { done, skip, .. } = self;
        done.into_iter()
            .filter(|write| !skip.contains_key(&write.obj.addr()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    fn pack(&mut self, frame: &mut Frame, value: &Value, path: &str) -> CodecResult<JsonValue> {
        let (_, handler) = self.codec.handler_for(value);
        match (handler, value) {
            (PackHandler::Null, _) => Ok(JsonValue::Null),
            (PackHandler::Uncouchable, _) => Err(CodecError::unsupported(
                value.type_of().qualified_name(),
                path,
            )),
            (PackHandler::Attachment, _) => self.pack_attachment(frame, value, path),
            (PackHandler::Custom, _) => self.pack_custom(value, path),
            (PackHandler::Pickle | PackHandler::Bytes, _) | (_, Value::Bytes(_)) => {
                self.pickle(frame, value, path)
            }
            (_, Value::Null) => Ok(JsonValue::Null),
            (_, Value::Bool(b)) => Ok(JsonValue::Bool(*b)),
            (_, Value::Int(i)) => Ok(JsonValue::from(*i)),
            (_, Value::Float(f)) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| CodecError::encoding(path, format!("non-finite float {f}"))),
            (_, Value::Text(s)) => self.pack_text(frame, s, path),
            (_, Value::List(items)) => Ok(JsonValue::Array(self.pack_items(frame, items, path)?)),
            (_, Value::Tuple(items)) => self.pack_tuple(frame, items, path),
            (_, Value::Map(map)) => self.pack_map(frame, map, path),
            (_, Value::Module(name)) => Ok(JsonValue::String(Token::Module(name.clone()).to_string())),
            (_, Value::Object(obj)) => self.pack_object(frame, obj, path, false),
        }
    }

    fn pack_text(&mut self, frame: &mut Frame, text: &str, path: &str) -> CodecResult<JsonValue> {
        if text.contains('\0') || text.len() > self.codec.config().max_inline_text {
            return self.pickle(frame, &Value::Text(text.to_string()), path);
        }
        if collides(text) {
            return Ok(JsonValue::String(append_token(text)));
        }
        Ok(JsonValue::String(text.to_string()))
    }

    fn pack_items(
        &mut self,
        frame: &mut Frame,
        items: &[Value],
        path: &str,
    ) -> CodecResult<Vec<JsonValue>> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| self.pack(frame, item, &index_path(path, i)))
            .collect()
    }

    fn pack_tuple(&mut self, frame: &mut Frame, items: &[Value], path: &str) -> CodecResult<JsonValue> {
        let packed = self.pack_items(frame, items, path)?;
        let (class, module) = class_and_module(&builtins::tuple());
        let mut meta = Map::new();
        meta.insert(info::CLASS.into(), JsonValue::String(class));
        meta.insert(info::MODULE.into(), JsonValue::String(module));
        meta.insert(
            info::ARGS.into(),
            JsonValue::Array(vec![JsonValue::Array(packed)]),
        );
        meta.insert(info::KWARGS.into(), JsonValue::Object(Map::new()));
        Ok(info_only(meta))
    }

    fn pack_map(&mut self, frame: &mut Frame, map: &ValueMap, path: &str) -> CodecResult<JsonValue> {
        let mut out = Map::with_capacity(map.len());
        for (key, value) in map.iter() {
            let (encoded, key_repr) = self.pack_key(frame, key, path)?;
            let packed = self.pack(frame, value, &value_path(path, &key_repr))?;
            if out.insert(encoded, packed).is_some() {
                return Err(CodecError::encoding(
                    value_path(path, &key_repr),
                    "two keys share one encoding",
                ));
            }
        }
        Ok(JsonValue::Object(out))
    }

    /// Encoded key plus the literal used for paths below it.
    ///
    /// Non-primitive keys go through the key table. Distinct keys that print
    /// alike get an ordinal suffix so each keeps its own entry.
    fn pack_key(
        &mut self,
        frame: &mut Frame,
        key: &Value,
        parent: &str,
    ) -> CodecResult<(String, String)> {
        let key_repr = key.repr();
        let type_name = key.type_of().qualified_name();
        let encoded = match key {
            Value::Text(s) if collides(s) => append_token(s),
            Value::Text(s) => s.clone(),
            Value::Float(f) if !f.is_finite() => {
                return Err(CodecError::encoding(
                    key_path(parent, &key_repr),
                    format!("non-finite float {f}"),
                ))
            }
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => Token::Repr {
                type_name,
                literal: key_repr.clone(),
            }
            .to_string(),
            _ => return self.pack_table_key(frame, key, parent, type_name, key_repr),
        };
        Ok((encoded, key_repr))
    }

    fn pack_table_key(
        &mut self,
        frame: &mut Frame,
        key: &Value,
        parent: &str,
        type_name: String,
        key_repr: String,
    ) -> CodecResult<(String, String)> {
        if let Some((_, token)) = frame.key_tokens.iter().find(|(k, _)| k == key) {
            let literal = match Token::parse(token)? {
                Some(Token::Key { literal, .. }) => literal,
                _ => key_repr,
            };
            return Ok((token.clone(), literal));
        }

        let mut literal = key_repr.clone();
        let mut ordinal = 1;
        let token = loop {
            let token = Token::Key {
                type_name: type_name.clone(),
                literal: literal.clone(),
            }
            .to_string();
            if !frame.keys.contains_key(&token) {
                break token;
            }
            ordinal += 1;
            literal = format!("{key_repr}#{ordinal}");
        };

        let packed = self.pack(frame, key, &key_path(parent, &literal))?;
        frame.keys.insert(token.clone(), packed);
        frame.key_tokens.push((key.clone(), token.clone()));
        Ok((token, literal))
    }

    fn pickle(&mut self, frame: &mut Frame, value: &Value, path: &str) -> CodecResult<JsonValue> {
        frame.jar.put(path, Pickled::from_value(value, path)?)?;
        Ok(JsonValue::String(Token::Pickle(path.to_string()).to_string()))
    }

    fn pack_attachment(
        &mut self,
        frame: &mut Frame,
        value: &Value,
        path: &str,
    ) -> CodecResult<JsonValue> {
        let ty = value.type_of();
        let (matched, codec) = self
            .codec
            .attachment_codec(&ty)
            .ok_or_else(|| CodecError::unsupported(ty.qualified_name(), path))?;
        let mut data = (codec.serialize)(value)?;
        if codec.compress {
            data = compress::compress(&data, self.codec.config().compression_level)?;
        }
        if frame.blobs.contains_key(path) {
            return Err(CodecError::encoding(path, "attachment name already in use"));
        }
        frame
            .blobs
            .insert(path.to_string(), AttachmentBlob::new(codec.content_type.clone(), data));
        Ok(JsonValue::String(
            Token::Attachment {
                type_name: matched.qualified_name(),
                name: path.to_string(),
            }
            .to_string(),
        ))
    }

    fn pack_custom(&mut self, value: &Value, path: &str) -> CodecResult<JsonValue> {
        let ty = value.type_of();
        let (matched, codec) = self
            .codec
            .custom_codec(&ty)
            .ok_or_else(|| CodecError::unsupported(ty.qualified_name(), path))?;
        let payload = (codec.pack)(value)?;
        Ok(JsonValue::String(
            Token::Custom {
                type_name: matched.qualified_name(),
                payload,
            }
            .to_string(),
        ))
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    fn pack_object(
        &mut self,
        frame: &mut Frame,
        obj: &ObjRef,
        path: &str,
        top: bool,
    ) -> CodecResult<JsonValue> {
        if !top && self.codec.is_document_type(obj.ty()) {
            let id = self.promote(obj)?;
            return Ok(JsonValue::String(Token::Id(id).to_string()));
        }
        if let Some((_, packed)) = frame.memo.get(&obj.addr()) {
            return Ok(packed.clone());
        }
        if !self.open.insert(obj.addr()) {
            return Err(CodecError::Cycle {
                type_name: obj.ty().qualified_name(),
                path: path.to_string(),
            });
        }
        let packed = self.pack_object_state(frame, obj, path, top);
        self.open.remove(&obj.addr());

        let packed = packed?;
        frame.memo.insert(obj.addr(), (obj.clone(), packed.clone()));
        Ok(packed)
    }

    /// Queue a nested document and return its id.
    fn promote(&mut self, obj: &ObjRef) -> CodecResult<String> {
        let meta = obj.meta();
        if self.additive_only && !meta.multipart_pending {
            if let (Some(id), Some(_)) = (&meta.id, &meta.rev) {
                return Ok(id.clone());
            }
        }
        if self.skip.contains_key(&obj.addr()) {
            return new_id(obj, &IdOptions::default());
        }
        self.store_object(obj)
    }

    fn pack_object_state(
        &mut self,
        frame: &mut Frame,
        obj: &ObjRef,
        path: &str,
        top: bool,
    ) -> CodecResult<JsonValue> {
        // Snapshot first; the walk may read this object again.
        let (fields, backing, ctor) = {
            let state = obj.state();
            (state.fields(), state.backing(), state.constructor_args())
        };

        let (class, module) = class_and_module(obj.ty());
        let mut meta = Map::new();
        meta.insert(info::CLASS.into(), JsonValue::String(class));
        meta.insert(info::MODULE.into(), JsonValue::String(module));

        if let Some(ConstructorArgs { args, kwargs }) = ctor {
            let args = self.pack_items(frame, &args, path)?;
            let kwargs = self.pack_map(frame, &kwargs, path)?;
            meta.insert(info::ARGS.into(), JsonValue::Array(args));
            meta.insert(info::KWARGS.into(), kwargs);
            return Ok(info_only(meta));
        }

        let Some(fields) = fields else {
            return self.pickle(frame, &Value::Object(obj.clone()), path);
        };

        meta.insert(info::PID.into(), JsonValue::from(self.pid));
        meta.insert(info::TIME.into(), JsonValue::String(self.time.clone()));

        let mut data = Map::with_capacity(fields.len());
        for (name, value) in fields.iter() {
            if RESERVED_FIELDS.contains(&name) {
                continue;
            }
            let path = field_path(path, name);
            if name.starts_with('_') {
                if top {
                    let packed = self.pack(frame, value, &path)?;
                    frame.private.insert(name.to_string(), packed);
                }
                continue;
            }
            let key = if collides(name) {
                append_token(name)
            } else {
                name.to_string()
            };
            data.insert(key, self.pack(frame, value, &path)?);
        }

        match backing {
            Some(Backing::List(items)) => {
                let items = self.pack_items(frame, &items, path)?;
                meta.insert(info::LIST.into(), JsonValue::Array(items));
            }
            Some(Backing::Map(map)) => {
                let map = self.pack_map(frame, &map, path)?;
                meta.insert(info::DICT.into(), map);
            }
            None => {}
        }

        let mut out = Map::with_capacity(data.len() + 1);
        out.insert(INFO_KEY.to_string(), JsonValue::Object(meta));
        out.extend(data);
        Ok(JsonValue::Object(out))
    }
}

fn append_token(text: &str) -> String {
    Token::Append {
        type_name: builtins::text().qualified_name(),
        text: text.to_string(),
    }
    .to_string()
}

fn info_only(meta: Map<String, JsonValue>) -> JsonValue {
    let mut out = Map::with_capacity(1);
    out.insert(INFO_KEY.to_string(), JsonValue::Object(meta));
    JsonValue::Object(out)
}
