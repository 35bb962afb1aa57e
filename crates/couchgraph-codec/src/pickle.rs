//! Opaque-blob jar.
//!
//! Values with no JSON form are copied into a per-document jar, which is
//! stored as a single compressed attachment. Copies are by value: objects
//! inside the jar lose their identity and come back as fresh instances.

use std::collections::{BTreeMap, HashSet};

use couchgraph_types::{Backing, ConstructorArgs, Fields, Value, ValueMap};
use serde::{Deserialize, Serialize};

use crate::classes::ClassTable;
use crate::compress;
use crate::encoding::{field_path, index_path};
use crate::error::{CodecError, CodecResult};

/// By-value image of a [`Value`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Pickled {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Pickled>),
    Tuple(Vec<Pickled>),
    Map(Vec<(Pickled, Pickled)>),
    Module(String),
    Object {
        class: String,
        fields: Vec<(String, Pickled)>,
        backing: Option<PickledBacking>,
    },
    Constructed {
        class: String,
        args: Vec<Pickled>,
        kwargs: Vec<(Pickled, Pickled)>,
    },
    Opaque {
        class: String,
        blob: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PickledBacking {
    Map(Vec<(Pickled, Pickled)>),
    List(Vec<Pickled>),
}

impl Pickled {
    /// Copy `value` into its by-value image.
    ///
    /// Fails with a cycle error if an object contains itself.
    pub fn from_value(value: &Value, path: &str) -> CodecResult<Pickled> {
        Copier::default().copy(value, path)
    }

    /// Rebuild a live value, allocating objects through `classes`.
    pub fn to_value(&self, classes: &ClassTable, path: &str) -> CodecResult<Value> {
        Ok(match self {
            Pickled::Null => Value::Null,
            Pickled::Bool(b) => Value::Bool(*b),
            Pickled::Int(i) => Value::Int(*i),
            Pickled::Float(f) => Value::Float(*f),
            Pickled::Text(s) => Value::Text(s.clone()),
            Pickled::Bytes(b) => Value::Bytes(b.clone()),
            Pickled::List(items) => Value::List(rebuild_items(items, classes, path)?),
            Pickled::Tuple(items) => Value::Tuple(rebuild_items(items, classes, path)?),
            Pickled::Map(entries) => Value::Map(rebuild_map(entries, classes, path)?),
            Pickled::Module(name) => Value::Module(name.clone()),
            Pickled::Object {
                class,
                fields,
                backing,
            } => {
                let obj = classes.allocate(class);
                let mut rebuilt = Fields::new();
                for (name, value) in fields {
                    rebuilt.insert(name.clone(), value.to_value(classes, &field_path(path, name))?);
                }
                obj.populate(rebuilt)
                    .map_err(|e| CodecError::object(path, e))?;
                if let Some(backing) = backing {
                    let backing = match backing {
                        PickledBacking::Map(entries) => {
                            Backing::Map(rebuild_map(entries, classes, path)?)
                        }
                        PickledBacking::List(items) => {
                            Backing::List(rebuild_items(items, classes, path)?)
                        }
                    };
                    obj.state_mut()
                        .restore_backing(backing)
                        .map_err(|e| CodecError::object(path, e))?;
                }
                Value::Object(obj)
            }
            Pickled::Constructed {
                class,
                args,
                kwargs,
            } => {
                let args = rebuild_items(args, classes, path)?;
                let kwargs = rebuild_map(kwargs, classes, path)?;
                classes.construct(class, args, kwargs, path)?
            }
            Pickled::Opaque { class, blob } => Value::Object(classes.from_blob(class, blob, path)?),
        })
    }
}

fn rebuild_items(items: &[Pickled], classes: &ClassTable, path: &str) -> CodecResult<Vec<Value>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| item.to_value(classes, &index_path(path, i)))
        .collect()
}

fn rebuild_map(
    entries: &[(Pickled, Pickled)],
    classes: &ClassTable,
    path: &str,
) -> CodecResult<ValueMap> {
    let mut map = ValueMap::with_capacity(entries.len());
    for (key, value) in entries {
        let key = key.to_value(classes, path)?;
        let value = value.to_value(classes, path)?;
        map.insert(key, value);
    }
    Ok(map)
}

#[derive(Default)]
struct Copier {
    open: HashSet<usize>,
}

impl Copier {
    fn copy(&mut self, value: &Value, path: &str) -> CodecResult<Pickled> {
        Ok(match value {
            Value::Null => Pickled::Null,
            Value::Bool(b) => Pickled::Bool(*b),
            Value::Int(i) => Pickled::Int(*i),
            Value::Float(f) => Pickled::Float(*f),
            Value::Text(s) => Pickled::Text(s.clone()),
            Value::Bytes(b) => Pickled::Bytes(b.clone()),
            Value::List(items) => Pickled::List(self.copy_items(items, path)?),
            Value::Tuple(items) => Pickled::Tuple(self.copy_items(items, path)?),
            Value::Map(map) => Pickled::Map(self.copy_map(map, path)?),
            Value::Module(name) => Pickled::Module(name.clone()),
            Value::Object(obj) => {
                let class = obj.ty().qualified_name();
                if !self.open.insert(obj.addr()) {
                    return Err(CodecError::Cycle {
                        type_name: class,
                        path: path.to_string(),
                    });
                }
                let (fields, backing, ctor, blob) = {
                    let state = obj.state();
                    (
                        state.fields(),
                        state.backing(),
                        state.constructor_args(),
                        state.to_blob(),
                    )
                };
                let copied = if let Some(ConstructorArgs { args, kwargs }) = ctor {
                    Pickled::Constructed {
                        class,
                        args: self.copy_items(&args, path)?,
                        kwargs: self.copy_map(&kwargs, path)?,
                    }
                } else if let Some(fields) = fields {
                    let mut copied = Vec::with_capacity(fields.len());
                    for (name, value) in fields.iter() {
                        copied.push((name.to_string(), self.copy(value, &field_path(path, name))?));
                    }
                    let backing = match backing {
                        Some(Backing::Map(map)) => Some(PickledBacking::Map(self.copy_map(&map, path)?)),
                        Some(Backing::List(items)) => {
                            Some(PickledBacking::List(self.copy_items(&items, path)?))
                        }
                        None => None,
                    };
                    Pickled::Object {
                        class,
                        fields: copied,
                        backing,
                    }
                } else if let Some(blob) = blob {
                    Pickled::Opaque { class, blob }
                } else {
                    return Err(CodecError::unsupported(class, path));
                };
                self.open.remove(&obj.addr());
                copied
            }
        })
    }

    fn copy_items(&mut self, items: &[Value], path: &str) -> CodecResult<Vec<Pickled>> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| self.copy(item, &index_path(path, i)))
            .collect()
    }

    fn copy_map(&mut self, map: &ValueMap, path: &str) -> CodecResult<Vec<(Pickled, Pickled)>> {
        map.iter()
            .map(|(k, v)| Ok((self.copy(k, path)?, self.copy(v, path)?)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// PickleJar
// ---------------------------------------------------------------------------

/// Named by-value entries belonging to one document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PickleJar {
    entries: BTreeMap<String, Pickled>,
}

impl PickleJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Fails if `name` is already taken.
    pub fn put(&mut self, name: impl Into<String>, value: Pickled) -> CodecResult<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(CodecError::encoding(name, "pickle name already in use"));
        }
        self.entries.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Pickled> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// bincode, then zstd.
    pub fn to_bytes(&self, level: i32) -> CodecResult<Vec<u8>> {
        let raw = bincode::serialize(self).map_err(|e| CodecError::Serialization(e.to_string()))?;
        compress::compress(&raw, level)
    }

    pub fn from_bytes(data: &[u8]) -> CodecResult<Self> {
        let raw = compress::decompress(data)?;
        bincode::deserialize(&raw).map_err(|e| CodecError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchgraph_types::{Fieldable, ObjRef, Record, Type, TypeResult};

    struct Handle(u32);

    impl Fieldable for Handle {
        fn fields(&self) -> Option<Fields> {
            None
        }

        fn populate(&mut self, _fields: Fields) -> TypeResult<()> {
            Ok(())
        }

        fn to_blob(&self) -> Option<Vec<u8>> {
            Some(self.0.to_le_bytes().to_vec())
        }
    }

    struct Socket;

    impl Fieldable for Socket {
        fn fields(&self) -> Option<Fields> {
            None
        }

        fn populate(&mut self, _fields: Fields) -> TypeResult<()> {
            Ok(())
        }
    }

    #[test]
    fn primitives_survive_the_jar() {
        let mut map = ValueMap::new();
        map.insert(Value::Tuple(vec![1.into(), 2.into()]), "pair");
        let value = Value::List(vec![
            Value::Bytes(vec![0, 255]),
            Value::Text("a\0b".into()),
            Value::Map(map),
            Value::Module("std.io".into()),
        ]);

        let mut jar = PickleJar::new();
        jar.put("self.x", Pickled::from_value(&value, "self.x").unwrap())
            .unwrap();
        let bytes = jar.to_bytes(compress::DEFAULT_LEVEL).unwrap();
        let back = PickleJar::from_bytes(&bytes).unwrap();

        let restored = back
            .get("self.x")
            .unwrap()
            .to_value(&ClassTable::new(), "self.x")
            .unwrap();
        assert_eq!(restored, value);
    }

    #[test]
    fn objects_are_copied() {
        let ty = Type::new("app", "Note");
        let obj = ObjRef::record(ty, Fields::new().with("text", "hi"));
        let pickled = Pickled::from_value(&Value::from(&obj), "self.n").unwrap();
        let restored = pickled.to_value(&ClassTable::new(), "self.n").unwrap();

        let copy = restored.as_object().unwrap();
        assert!(!copy.ptr_eq(&obj));
        assert_eq!(copy.ty().qualified_name(), "app.Note");
        assert_eq!(copy.get("text"), Some(Value::from("hi")));
    }

    #[test]
    fn record_backing_is_kept() {
        let record = Record::new().with_backing(Backing::List(vec![1.into(), 2.into()]));
        let obj = ObjRef::new(Type::new("app", "Bag"), record);
        let pickled = Pickled::from_value(&Value::from(&obj), "self").unwrap();
        let restored = pickled.to_value(&ClassTable::new(), "self").unwrap();
        let backing = restored.as_object().unwrap().state().backing();
        assert_eq!(backing, Some(Backing::List(vec![1.into(), 2.into()])));
    }

    #[test]
    fn opaque_objects_use_their_blob() {
        let ty = Type::new("app", "Handle");
        let obj = ObjRef::new(ty.clone(), Handle(7));
        let pickled = Pickled::from_value(&Value::from(&obj), "self.h").unwrap();
        assert_eq!(
            pickled,
            Pickled::Opaque {
                class: "app.Handle".into(),
                blob: 7u32.to_le_bytes().to_vec()
            }
        );

        let mut classes = ClassTable::new();
        classes.define_opaque(ty, |b| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(b);
            Ok(Box::new(Handle(u32::from_le_bytes(raw))))
        });
        let restored = pickled.to_value(&classes, "self.h").unwrap();
        let n = restored.as_object().unwrap().with(|h: &Handle| h.0);
        assert_eq!(n, Some(7));
    }

    #[test]
    fn objects_without_any_form_are_unsupported() {
        let obj = ObjRef::new(Type::new("net", "Socket"), Socket);
        let err = Pickled::from_value(&Value::from(&obj), "self.s").unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedType { .. }));
    }

    #[test]
    fn self_containing_object_is_a_cycle() {
        let obj = ObjRef::record(Type::new("app", "Loop"), Fields::new());
        obj.set("me", &obj).unwrap();
        let err = Pickled::from_value(&Value::from(&obj), "self.l").unwrap_err();
        assert!(matches!(err, CodecError::Cycle { .. }));
    }

    #[test]
    fn shared_object_twice_is_not_a_cycle() {
        let leaf = ObjRef::record(Type::new("app", "Leaf"), Fields::new());
        let value = Value::List(vec![Value::from(&leaf), Value::from(&leaf)]);
        assert!(Pickled::from_value(&value, "self").is_ok());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut jar = PickleJar::new();
        jar.put("a", Pickled::Null).unwrap();
        assert!(matches!(
            jar.put("a", Pickled::Int(1)),
            Err(CodecError::Encoding { .. })
        ));
    }
}
