//! Locating values a document cannot hold.
//!
//! The pack engine stops at the first value it cannot encode. When a store
//! fails, [`find_unstorable`] walks the same graph without stopping and
//! reports every offending path, each as the error packing it would raise.

use std::collections::{HashMap, HashSet};

use couchgraph_types::{Backing, ConstructorArgs, ObjRef, Value, ValueMap};

use crate::codec::Codec;
use crate::encoding::{field_path, index_path, key_path, value_path, RESERVED_FIELDS, ROOT_PATH};
use crate::error::CodecError;
use crate::handler::PackHandler;
use crate::pickle::Pickled;

/// Every value reachable from `root` that would fail to pack, in walk order.
///
/// Nested documents are walked once each, with paths rooted at the
/// document that reaches them first. Registered attachment and custom
/// callbacks are not run.
pub fn find_unstorable(codec: &Codec, root: &ObjRef) -> Vec<CodecError> {
    let mut walk = Walk {
        codec,
        open: HashSet::new(),
        documents: HashMap::new(),
        found: Vec::new(),
    };
    walk.document(root, ROOT_PATH);
    walk.found
}

struct Walk<'c> {
    codec: &'c Codec,
    /// Generic objects on the current path.
    open: HashSet<usize>,
    /// Documents already walked; the handle pins the address.
    documents: HashMap<usize, ObjRef>,
    found: Vec<CodecError>,
}

impl Walk<'_> {
    fn document(&mut self, obj: &ObjRef, path: &str) {
        if self.documents.insert(obj.addr(), obj.clone()).is_some() {
            return;
        }
        let outer = std::mem::take(&mut self.open);
        self.object_state(obj, path, true);
        self.open = outer;
    }

    fn value(&mut self, value: &Value, path: &str) {
        let (_, handler) = self.codec.handler_for(value);
        match (handler, value) {
            (PackHandler::Null | PackHandler::Attachment | PackHandler::Custom, _) => {}
            (PackHandler::Uncouchable, _) => self.found.push(CodecError::unsupported(
                value.type_of().qualified_name(),
                path,
            )),
            (PackHandler::Pickle | PackHandler::Bytes, _) | (_, Value::Bytes(_)) => {
                self.pickled(value, path)
            }
            (_, Value::Float(f)) if !f.is_finite() => self
                .found
                .push(CodecError::encoding(path, format!("non-finite float {f}"))),
            (_, Value::List(items) | Value::Tuple(items)) => self.items(items, path),
            (_, Value::Map(map)) => self.map(map, path),
            (_, Value::Object(obj)) => self.object(obj, path),
            _ => {}
        }
    }

    fn items(&mut self, items: &[Value], path: &str) {
        for (i, item) in items.iter().enumerate() {
            self.value(item, &index_path(path, i));
        }
    }

    fn map(&mut self, map: &ValueMap, path: &str) {
        for (key, value) in map.iter() {
            let key_repr = key.repr();
            match key {
                Value::Float(f) if !f.is_finite() => self.found.push(CodecError::encoding(
                    key_path(path, &key_repr),
                    format!("non-finite float {f}"),
                )),
                Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Text(_) => {}
                _ => self.value(key, &key_path(path, &key_repr)),
            }
            self.value(value, &value_path(path, &key_repr));
        }
    }

    fn object(&mut self, obj: &ObjRef, path: &str) {
        if self.codec.is_document_type(obj.ty()) {
            self.document(obj, path);
            return;
        }
        if !self.open.insert(obj.addr()) {
            self.found.push(CodecError::Cycle {
                type_name: obj.ty().qualified_name(),
                path: path.to_string(),
            });
            return;
        }
        self.object_state(obj, path, false);
        self.open.remove(&obj.addr());
    }

    fn object_state(&mut self, obj: &ObjRef, path: &str, top: bool) {
        let (fields, backing, ctor) = {
            let state = obj.state();
            (state.fields(), state.backing(), state.constructor_args())
        };

        if let Some(ConstructorArgs { args, kwargs }) = ctor {
            self.items(&args, path);
            self.map(&kwargs, path);
            return;
        }
        let Some(fields) = fields else {
            self.pickled(&Value::Object(obj.clone()), path);
            return;
        };
        for (name, value) in fields.iter() {
            if RESERVED_FIELDS.contains(&name) || (name.starts_with('_') && !top) {
                continue;
            }
            self.value(value, &field_path(path, name));
        }
        match backing {
            Some(Backing::List(items)) => self.items(&items, path),
            Some(Backing::Map(map)) => self.map(&map, path),
            None => {}
        }
    }

    fn pickled(&mut self, value: &Value, path: &str) {
        if let Err(err) = Pickled::from_value(value, path) {
            self.found.push(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchgraph_types::{Fieldable, Fields, Type, TypeResult};

    use crate::handler::DocHooks;

    fn thing(fields: Fields) -> ObjRef {
        ObjRef::record(Type::new("app", "Thing"), fields)
    }

    fn paths(found: &[CodecError]) -> Vec<String> {
        found
            .iter()
            .map(|err| match err {
                CodecError::Encoding { path, .. }
                | CodecError::UnsupportedType { path, .. }
                | CodecError::Cycle { path, .. } => path.clone(),
                other => panic!("unexpected {other}"),
            })
            .collect()
    }

    /// Neither fields nor a byte form.
    struct Sealed;

    impl Fieldable for Sealed {
        fn fields(&self) -> Option<Fields> {
            None
        }

        fn populate(&mut self, _fields: Fields) -> TypeResult<()> {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Reports
    // -----------------------------------------------------------------------

    #[test]
    fn storable_graph_reports_nothing() {
        let codec = Codec::default();
        let mut map = ValueMap::new();
        map.insert(1.5, "float key");
        map.insert(Value::Tuple(vec![1.into()]), "tuple key");
        let root = thing(
            Fields::new()
                .with("n", 1)
                .with("m", map)
                .with("bytes", Value::Bytes(vec![0; 4]))
                .with("child", thing(Fields::new().with("x", "y"))),
        );
        assert!(find_unstorable(&codec, &root).is_empty());
    }

    #[test]
    fn every_bad_path_is_reported() {
        let mut codec = Codec::default();
        let secret = Type::new("app", "Secret");
        codec.register_uncouchable_type(secret.clone());

        let mut map = ValueMap::new();
        map.insert(f64::INFINITY, 1);
        map.insert("ok", f64::NAN);
        let root = thing(
            Fields::new()
                .with("bad", f64::NAN)
                .with("list", Value::List(vec![1.into(), f64::NEG_INFINITY.into()]))
                .with("k", ObjRef::record(secret, Fields::new()))
                .with("m", map)
                .with("sealed", ObjRef::new(Type::new("app", "Sealed"), Sealed)),
        );

        let found = find_unstorable(&codec, &root);
        assert_eq!(
            paths(&found),
            [
                "self.bad",
                "self.list[1]",
                "self.k",
                "self.m>inf",
                "self.m[\"ok\"]",
                "self.sealed",
            ]
        );
        assert!(matches!(
            found[2],
            CodecError::UnsupportedType { ref type_name, .. } if type_name == "app.Secret"
        ));
    }

    #[test]
    fn non_document_cycle_is_reported_once() {
        let codec = Codec::default();
        let x = thing(Fields::new());
        let y = thing(Fields::new().with("peer", &x));
        x.set("peer", &y).unwrap();
        let root = thing(Fields::new().with("x", &x));

        let found = find_unstorable(&codec, &root);
        assert_eq!(paths(&found), ["self.x.peer.peer"]);
        assert!(matches!(found[0], CodecError::Cycle { .. }));
    }

    #[test]
    fn documents_are_walked_once() {
        let mut codec = Codec::default();
        let node = Type::new("app", "Node");
        codec.register_doc_type(node.clone(), DocHooks::new());
        let a = ObjRef::record(node.clone(), Fields::new().with("bad", f64::NAN));
        let b = ObjRef::record(node, Fields::new().with("next", &a));
        a.set("next", &b).unwrap();
        let root = thing(Fields::new().with("a", &a).with("again", &a));

        assert_eq!(paths(&find_unstorable(&codec, &root)), ["self.a.bad"]);
    }

    #[test]
    fn nested_private_fields_are_not_walked() {
        let codec = Codec::default();
        let inner = thing(Fields::new().with("_scratch", f64::NAN));
        let root = thing(Fields::new().with("_top", f64::NAN).with("inner", inner));
        assert_eq!(paths(&find_unstorable(&codec, &root)), ["self._top"]);
    }
}
