use std::fmt::Write as _;

use crate::map::ValueMap;
use crate::object::ObjRef;
use crate::types::{builtins, Type};

/// A runtime value in an object graph.
///
/// Scalars and collections are owned trees; only [`Value::Object`] carries
/// shared identity, so reference cycles can only pass through objects.
///
/// ## Equality
///
/// - Different variants are never equal (`Int(1) != Float(1.0)`).
/// - Floats use IEEE-754 comparison (`NaN != NaN`).
/// - Maps compare as dictionaries (order ignored).
/// - Objects compare by identity.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Immutable sequence, rebuilt from constructor arguments on load.
    Tuple(Vec<Value>),
    Map(ValueMap),
    /// Reference to a named runtime module.
    Module(String),
    Object(ObjRef),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Value {
    /// The runtime type used for handler dispatch.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Null => builtins::none(),
            Value::Bool(_) => builtins::boolean(),
            Value::Int(_) => builtins::int(),
            Value::Float(_) => builtins::float(),
            Value::Text(_) => builtins::text(),
            Value::Bytes(_) => builtins::bytes(),
            Value::List(_) => builtins::list(),
            Value::Tuple(_) => builtins::tuple(),
            Value::Map(_) => builtins::dict(),
            Value::Module(_) => builtins::module(),
            Value::Object(obj) => obj.ty().clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` for null, booleans, and numbers.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Literal form used in key tokens and field paths.
    ///
    /// Nested objects are shown by type only, so the output is finite even
    /// for cyclic graphs.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0);
        out
    }

    fn write_repr(&self, out: &mut String, depth: usize) {
        match self {
            Value::Null => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Value::Float(f) => {
                let _ = write!(out, "{f:?}");
            }
            Value::Text(s) => {
                let _ = write!(out, "{s:?}");
            }
            Value::Bytes(b) => {
                out.push_str("b\"");
                for byte in b {
                    let _ = write!(out, "\\x{byte:02x}");
                }
                out.push('"');
            }
            Value::List(items) => {
                out.push('[');
                write_items(out, items, depth);
                out.push(']');
            }
            Value::Tuple(items) => {
                out.push('(');
                write_items(out, items, depth);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Map(map) => {
                out.push('{');
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, depth);
                    out.push_str(": ");
                    v.write_repr(out, depth);
                }
                out.push('}');
            }
            Value::Module(name) => {
                let _ = write!(out, "<module {name}>");
            }
            Value::Object(obj) => {
                out.push_str(&obj.ty().qualified_name());
                out.push('(');
                if depth == 0 {
                    if let Some(fields) = obj.fields() {
                        for (i, (name, value)) in fields.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            out.push_str(name);
                            out.push('=');
                            value.write_repr(out, depth + 1);
                        }
                    }
                } else {
                    out.push_str("...");
                }
                out.push(')');
            }
        }
    }
}

fn write_items(out: &mut String, items: &[Value], depth: usize) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, depth);
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Map(map)
    }
}

impl From<ObjRef> for Value {
    fn from(obj: ObjRef) -> Self {
        Value::Object(obj)
    }
}

impl From<&ObjRef> for Value {
    fn from(obj: &ObjRef) -> Self {
        Value::Object(obj.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Fields;
    use crate::types::Type;

    #[test]
    fn different_variants_never_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::List(vec![]), Value::Tuple(vec![]));
        assert_ne!(Value::Text("a".into()), Value::Bytes(b"a".to_vec()));
    }

    #[test]
    fn nan_is_not_equal_to_itself() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn objects_compare_by_identity() {
        let ty = Type::new("app", "Thing");
        let a = ObjRef::record(ty.clone(), Fields::new().with("x", 1));
        let b = ObjRef::record(ty, Fields::new().with("x", 1));
        assert_eq!(Value::from(&a), Value::from(&a));
        assert_ne!(Value::from(&a), Value::from(&b));
    }

    #[test]
    fn repr_of_scalars_and_collections() {
        assert_eq!(Value::Null.repr(), "None");
        assert_eq!(Value::Int(42).repr(), "42");
        assert_eq!(Value::Float(2.0).repr(), "2.0");
        assert_eq!(Value::from("a b").repr(), "\"a b\"");
        assert_eq!(
            Value::Tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)]).repr(),
            "(1, 2, 3)"
        );
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::Bytes(vec![0, 255]).repr(), "b\"\\x00\\xff\"");
    }

    #[test]
    fn repr_of_object_is_finite_for_cycles() {
        let ty = Type::new("app", "Node");
        let a = ObjRef::record(ty.clone(), Fields::new());
        let b = ObjRef::record(ty, Fields::new().with("a", &a));
        a.set("b", &b).unwrap();
        assert_eq!(Value::from(&a).repr(), "app.Node(b=app.Node(...))");
    }

    #[test]
    fn type_of_variants() {
        assert_eq!(Value::Null.type_of().qualified_name(), "NoneType");
        assert_eq!(Value::Tuple(vec![]).type_of().qualified_name(), "tuple");
        let obj = ObjRef::record(Type::new("app", "Thing"), Fields::new());
        assert_eq!(Value::from(obj).type_of().qualified_name(), "app.Thing");
    }
}
