use couchgraph_types::ObjRef;
use uuid::Uuid;

use crate::error::{CodecError, CodecResult};

/// Shape of a generated document id.
#[derive(Clone, Debug)]
pub struct IdOptions {
    /// Extra segment placed between the type and the uuid.
    pub label: Option<String>,
    pub no_uuid: bool,
    pub no_type: bool,
    pub sep: String,
}

impl Default for IdOptions {
    fn default() -> Self {
        Self {
            label: None,
            no_uuid: false,
            no_type: false,
            sep: ":".to_string(),
        }
    }
}

impl IdOptions {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Assign an id to `obj` unless it already has one, and return the id.
///
/// Generated ids look like `app.Node:<label>:<uuid v7>`; leading
/// underscores are stripped because the store reserves them.
pub fn new_id(obj: &ObjRef, opts: &IdOptions) -> CodecResult<String> {
    if let Some(id) = obj.id() {
        return Ok(id);
    }

    let mut parts = Vec::with_capacity(3);
    if !opts.no_type {
        parts.push(obj.ty().qualified_name());
    }
    if let Some(label) = &opts.label {
        parts.push(label.clone());
    }
    if !opts.no_uuid {
        parts.push(Uuid::now_v7().to_string());
    }

    let id = parts.join(&opts.sep).trim_start_matches('_').to_string();
    if id.is_empty() {
        return Err(CodecError::encoding(
            obj.ty().qualified_name(),
            "id options produce an empty id",
        ));
    }
    obj.set_id(id.clone());
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchgraph_types::{Fields, Type};

    fn node() -> ObjRef {
        ObjRef::record(Type::new("app", "Node"), Fields::new())
    }

    #[test]
    fn default_id_has_type_and_uuid() {
        let obj = node();
        let id = new_id(&obj, &IdOptions::default()).unwrap();
        let (ty, uuid) = id.split_once(':').unwrap();
        assert_eq!(ty, "app.Node");
        assert!(Uuid::parse_str(uuid).is_ok());
        assert_eq!(obj.id(), Some(id));
    }

    #[test]
    fn existing_id_is_kept() {
        let obj = node();
        obj.set_id("fixed");
        assert_eq!(new_id(&obj, &IdOptions::default()).unwrap(), "fixed");
    }

    #[test]
    fn label_only() {
        let obj = node();
        let opts = IdOptions {
            no_uuid: true,
            no_type: true,
            ..IdOptions::default()
        }
        .label("__config");
        assert_eq!(new_id(&obj, &opts).unwrap(), "config");
    }

    #[test]
    fn custom_separator() {
        let obj = node();
        let opts = IdOptions {
            no_uuid: true,
            sep: "/".into(),
            ..IdOptions::default()
        }
        .label("main");
        assert_eq!(new_id(&obj, &opts).unwrap(), "app.Node/main");
    }

    #[test]
    fn empty_id_is_rejected() {
        let opts = IdOptions {
            no_uuid: true,
            no_type: true,
            ..IdOptions::default()
        };
        assert!(new_id(&node(), &opts).is_err());
    }

    #[test]
    fn ids_are_unique() {
        let a = new_id(&node(), &IdOptions::default()).unwrap();
        let b = new_id(&node(), &IdOptions::default()).unwrap();
        assert_ne!(a, b);
    }
}
