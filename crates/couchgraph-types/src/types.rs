use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Module name used for the built-in types.
pub const BUILTIN_MODULE: &str = "builtins";

/// Runtime type descriptor.
///
/// A `Type` names a class by `module` and `name` and links to its parent,
/// forming a single-inheritance chain that always ends at the root
/// [`Type::object`]. Handlers registered for a type also apply to its
/// descendants, so the chain is what the registry walks when resolving.
///
/// Equality and hashing use the qualified name only; two independently built
/// descriptors for `app.Point` are the same type.
#[derive(Clone)]
pub struct Type(Arc<TypeDef>);

struct TypeDef {
    module: String,
    name: String,
    parent: Option<Type>,
}

impl Type {
    /// The root type every other type descends from.
    pub fn object() -> Self {
        Self(Arc::new(TypeDef {
            module: BUILTIN_MODULE.to_string(),
            name: "object".to_string(),
            parent: None,
        }))
    }

    /// A new type directly below [`Type::object`].
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::extends(module, name, &Self::object())
    }

    /// A new type whose parent is `parent`.
    pub fn extends(module: impl Into<String>, name: impl Into<String>, parent: &Type) -> Self {
        Self(Arc::new(TypeDef {
            module: module.into(),
            name: name.into(),
            parent: Some(parent.clone()),
        }))
    }

    /// A type in the built-in module.
    pub fn builtin(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == "object" {
            return Self::object();
        }
        Self::new(BUILTIN_MODULE, name)
    }

    /// Build a detached type from a qualified name (`pkg.mod.Class`).
    ///
    /// Names without a dot are treated as built-ins. The result has no
    /// ancestry beyond [`Type::object`].
    pub fn parse(qualified: &str) -> Self {
        match qualified.rsplit_once('.') {
            Some((module, name)) => Self::new(module, name),
            None => Self::builtin(qualified),
        }
    }

    pub fn module(&self) -> &str {
        &self.0.module
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&Type> {
        self.0.parent.as_ref()
    }

    /// Returns `true` for types in [`BUILTIN_MODULE`].
    pub fn is_builtin(&self) -> bool {
        self.0.module == BUILTIN_MODULE
    }

    /// `module.name`, or just `name` for built-ins.
    pub fn qualified_name(&self) -> String {
        if self.is_builtin() {
            self.0.name.clone()
        } else {
            format!("{}.{}", self.0.module, self.0.name)
        }
    }

    /// Iterate this type and then each ancestor up to the root.
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: Some(self.clone()),
        }
    }

    /// Returns `true` if `other` is this type or one of its ancestors.
    pub fn is_subtype_of(&self, other: &Type) -> bool {
        self.ancestors().any(|ty| ty == *other)
    }

    /// Number of links between this type and the root.
    pub fn depth(&self) -> usize {
        self.ancestors().count() - 1
    }
}

/// Iterator over a type and its ancestors, nearest first.
pub struct Ancestors {
    next: Option<Type>,
}

impl Iterator for Ancestors {
    type Item = Type;

    fn next(&mut self) -> Option<Type> {
        let current = self.next.take()?;
        self.next = current.parent().cloned();
        Some(current)
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.module == other.0.module && self.0.name == other.0.name)
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.module.hash(state);
        self.0.name.hash(state);
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.qualified_name())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// Descriptors for the types backing each [`crate::Value`] variant.
pub mod builtins {
    use super::Type;

    pub fn none() -> Type {
        Type::builtin("NoneType")
    }

    pub fn boolean() -> Type {
        Type::builtin("bool")
    }

    pub fn int() -> Type {
        Type::builtin("int")
    }

    pub fn float() -> Type {
        Type::builtin("float")
    }

    pub fn text() -> Type {
        Type::builtin("str")
    }

    pub fn bytes() -> Type {
        Type::builtin("bytes")
    }

    pub fn list() -> Type {
        Type::builtin("list")
    }

    pub fn tuple() -> Type {
        Type::builtin("tuple")
    }

    pub fn dict() -> Type {
        Type::builtin("dict")
    }

    pub fn module() -> Type {
        Type::builtin("module")
    }

    /// All built-in value types, excluding the root `object`.
    pub fn all() -> Vec<Type> {
        vec![
            none(),
            boolean(),
            int(),
            float(),
            text(),
            bytes(),
            list(),
            tuple(),
            dict(),
            module(),
        ]
    }
}
