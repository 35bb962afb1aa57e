//! Canonical encoding vocabulary.
//!
//! Documents stay plain JSON except where a value has no JSON form. Those
//! values are written as text tokens of the form
//! `couchgraph:<method>:<payload>`, and object-shaped values carry a
//! reserved `couchgraph:` key holding their type metadata.

use std::fmt;

use couchgraph_types::{Type, Value, BUILTIN_MODULE};

use crate::error::{CodecError, CodecResult};

/// Namespace prefix shared by every token.
pub const PREFIX: &str = "couchgraph:";

/// Reserved key holding type metadata inside object-shaped values.
pub const INFO_KEY: &str = PREFIX;

/// Attachment holding a document's opaque-blob jar.
pub const PICKLE_ATTACHMENT: &str = "pickles";

/// Content type of the opaque-blob jar.
pub const PICKLE_CONTENT_TYPE: &str = "application/x-couchgraph-pickle";

/// Metadata keys inside the `couchgraph:` map.
pub mod info {
    pub const CLASS: &str = "class";
    pub const MODULE: &str = "module";
    pub const PID: &str = "pid";
    pub const TIME: &str = "time";
    pub const KEYS: &str = "keys";
    pub const PRIVATE: &str = "private";
    pub const ARGS: &str = "args";
    pub const KWARGS: &str = "kwargs";
    pub const LIST: &str = "list";
    pub const DICT: &str = "dict";
}

/// Field names owned by the document store; never packed as fields.
pub const RESERVED_FIELDS: &[&str] = &["_id", "_rev", "_attachments"];

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// A decoded `couchgraph:` text token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// Reference to a top-level document.
    Id(String),
    /// Non-text, non-primitive map key; the full token indexes the key table.
    Key { type_name: String, literal: String },
    /// Primitive map key in literal form.
    Repr { type_name: String, literal: String },
    /// Text that collided with the prefix, kept verbatim.
    Append { type_name: String, text: String },
    /// Entry in the document's opaque-blob jar.
    Pickle(String),
    /// Value stored as a named attachment.
    Attachment { type_name: String, name: String },
    /// Named runtime module.
    Module(String),
    /// Value produced by a user-registered custom codec.
    Custom { type_name: String, payload: String },
}

impl Token {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Id(_) => "id",
            Self::Key { .. } => "key",
            Self::Repr { .. } => "repr",
            Self::Append { .. } => "append",
            Self::Pickle(_) => "pickle",
            Self::Attachment { .. } => "attachment",
            Self::Module(_) => "module",
            Self::Custom { .. } => "custom",
        }
    }

    /// Parse `text` as a token.
    ///
    /// Returns `Ok(None)` for text outside the namespace and an error for
    /// namespaced text that does not form a valid token.
    pub fn parse(text: &str) -> CodecResult<Option<Token>> {
        let Some(rest) = text.strip_prefix(PREFIX) else {
            return Ok(None);
        };
        let malformed = || CodecError::encoding(text, "malformed token");
        let (method, payload) = rest.split_once(':').ok_or_else(malformed)?;

        let token = match method {
            "id" => Token::Id(payload.to_string()),
            "pickle" => Token::Pickle(payload.to_string()),
            "module" => Token::Module(payload.to_string()),
            _ => {
                let (type_name, payload) = payload.split_once(':').ok_or_else(malformed)?;
                let type_name = type_name.to_string();
                let payload = payload.to_string();
                match method {
                    "key" => Token::Key {
                        type_name,
                        literal: payload,
                    },
                    "repr" => Token::Repr {
                        type_name,
                        literal: payload,
                    },
                    "append" => Token::Append {
                        type_name,
                        text: payload,
                    },
                    "attachment" => Token::Attachment {
                        type_name,
                        name: payload,
                    },
                    "custom" => Token::Custom { type_name, payload },
                    other => {
                        return Err(CodecError::encoding(
                            text,
                            format!("unknown token method `{other}`"),
                        ))
                    }
                }
            }
        };
        Ok(Some(token))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}:", self.method())?;
        match self {
            Self::Id(payload) | Self::Pickle(payload) | Self::Module(payload) => f.write_str(payload),
            Self::Key { type_name, literal } | Self::Repr { type_name, literal } => {
                write!(f, "{type_name}:{literal}")
            }
            Self::Append { type_name, text } => write!(f, "{type_name}:{text}"),
            Self::Attachment { type_name, name } => write!(f, "{type_name}:{name}"),
            Self::Custom { type_name, payload } => write!(f, "{type_name}:{payload}"),
        }
    }
}

/// Returns `true` if `text` would be read back as a token.
pub fn collides(text: &str) -> bool {
    text.starts_with(PREFIX)
}

// ---------------------------------------------------------------------------
// Literals
// ---------------------------------------------------------------------------

/// Rebuild a primitive from a `repr:` literal.
pub fn parse_repr(type_name: &str, literal: &str) -> CodecResult<Value> {
    let bad = || CodecError::encoding(literal, format!("bad {type_name} literal"));
    match type_name {
        "NoneType" => Ok(Value::Null),
        "bool" => match literal {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            _ => Err(bad()),
        },
        "int" => literal.parse().map(Value::Int).map_err(|_| bad()),
        "float" => literal.parse().map(Value::Float).map_err(|_| bad()),
        other => Err(CodecError::encoding(
            literal,
            format!("`{other}` has no literal form"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Type names
// ---------------------------------------------------------------------------

/// Split a type into the `(class, module)` pair written to metadata.
pub fn class_and_module(ty: &Type) -> (String, String) {
    (ty.name().to_string(), ty.module().to_string())
}

/// Rebuild the qualified name from metadata.
pub fn qualified(class: &str, module: &str) -> String {
    if module == BUILTIN_MODULE || module.is_empty() {
        class.to_string()
    } else {
        format!("{module}.{class}")
    }
}

// ---------------------------------------------------------------------------
// Field paths
// ---------------------------------------------------------------------------

/// Path of the root object of a document.
pub const ROOT_PATH: &str = "self";

pub fn field_path(parent: &str, field: &str) -> String {
    format!("{parent}.{field}")
}

pub fn index_path(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

pub fn value_path(parent: &str, key_repr: &str) -> String {
    format!("{parent}[{key_repr}]")
}

pub fn key_path(parent: &str, key_repr: &str) -> String {
    format!("{parent}>{key_repr}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_token() {
        assert_eq!(Token::parse("hello").unwrap(), None);
        assert_eq!(Token::parse("couchgraph").unwrap(), None);
    }

    #[test]
    fn parse_and_display_agree() {
        let cases = [
            "couchgraph:id:app.Node:0191-abc",
            "couchgraph:key:tuple:(1, 2, 3)",
            "couchgraph:repr:int:7",
            "couchgraph:append:str:couchgraph:literal",
            "couchgraph:pickle:self.blob[0]",
            "couchgraph:attachment:app.Image:self.image",
            "couchgraph:module:std.collections",
            "couchgraph:custom:app.Decimal:3.14",
        ];
        for text in cases {
            let token = Token::parse(text).unwrap().expect("token");
            assert_eq!(token.to_string(), text);
        }
    }

    #[test]
    fn id_payload_keeps_colons() {
        let token = Token::parse("couchgraph:id:a:b:c").unwrap().unwrap();
        assert_eq!(token, Token::Id("a:b:c".into()));
    }

    #[test]
    fn append_splits_type_once() {
        let token = Token::parse("couchgraph:append:str:couchgraph:").unwrap().unwrap();
        assert_eq!(
            token,
            Token::Append {
                type_name: "str".into(),
                text: "couchgraph:".into()
            }
        );
    }

    #[test]
    fn malformed_tokens_are_errors() {
        assert!(Token::parse("couchgraph:").is_err());
        assert!(Token::parse("couchgraph:repr").is_err());
        assert!(Token::parse("couchgraph:repr:int").is_err());
        assert!(Token::parse("couchgraph:bogus:x:y").is_err());
    }

    #[test]
    fn repr_literals() {
        assert_eq!(parse_repr("NoneType", "None").unwrap(), Value::Null);
        assert_eq!(parse_repr("bool", "True").unwrap(), Value::Bool(true));
        assert_eq!(parse_repr("int", "-12").unwrap(), Value::Int(-12));
        assert_eq!(parse_repr("float", "2.5").unwrap(), Value::Float(2.5));
        assert!(parse_repr("bool", "yes").is_err());
        assert!(parse_repr("tuple", "(1,)").is_err());
    }

    #[test]
    fn repr_matches_value_repr() {
        for value in [Value::Null, Value::Bool(false), Value::Int(42), Value::Float(0.1)] {
            let type_name = value.type_of().qualified_name();
            assert_eq!(parse_repr(&type_name, &value.repr()).unwrap(), value);
        }
    }

    #[test]
    fn qualified_names() {
        assert_eq!(qualified("tuple", BUILTIN_MODULE), "tuple");
        assert_eq!(qualified("Point", "geo"), "geo.Point");
        let (class, module) = class_and_module(&Type::new("geo", "Point"));
        assert_eq!((class.as_str(), module.as_str()), ("Point", "geo"));
    }

    #[test]
    fn paths() {
        let p = field_path(ROOT_PATH, "items");
        assert_eq!(index_path(&p, 2), "self.items[2]");
        assert_eq!(value_path(&p, "\"k\""), "self.items[\"k\"]");
        assert_eq!(key_path(&p, "\"k\""), "self.items>\"k\"");
    }
}
