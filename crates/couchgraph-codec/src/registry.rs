use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use couchgraph_types::Type;

/// Ordered type → handler table with nearest-ancestor resolution.
///
/// Later registrations are preferred over earlier ones. Resolution results,
/// misses included, are memoized per concrete type until the next
/// registration.
pub struct TypeRegistry<H: Clone> {
    entries: Vec<(Type, H)>,
    memo: RwLock<HashMap<Type, Option<(Type, H)>>>,
}

impl<H: Clone> TypeRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            memo: RwLock::new(HashMap::new()),
        }
    }

    /// Append a registration and invalidate the memo.
    pub fn register(&mut self, ty: Type, handler: H) {
        self.entries.push((ty, handler));
        self.memo
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Find the handler for `ty`.
    ///
    /// An exact registration wins; otherwise the most recent registration
    /// whose type is an ancestor of `ty`. Returns the matched type with the
    /// handler.
    pub fn resolve(&self, ty: &Type) -> Option<(Type, H)> {
        if let Some(hit) = self
            .memo
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ty)
        {
            return hit.clone();
        }

        let found = self
            .entries
            .iter()
            .rev()
            .find(|(registered, _)| registered == ty)
            .or_else(|| {
                self.entries
                    .iter()
                    .rev()
                    .find(|(registered, _)| ty.is_subtype_of(registered))
            })
            .cloned();

        self.memo
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ty.clone(), found.clone());
        found
    }

    /// Exact lookup by qualified name, most recent registration first.
    pub fn by_name(&self, qualified: &str) -> Option<(Type, H)> {
        self.entries
            .iter()
            .rev()
            .find(|(registered, _)| registered.qualified_name() == qualified)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn memo_len(&self) -> usize {
        self.memo.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<H: Clone> Default for TypeRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Clone> fmt::Debug for TypeRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("entries", &self.entries.len())
            .field("memoized", &self.memo_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Type, Type, Type) {
        let base = Type::new("app", "Base");
        let mid = Type::extends("app", "Mid", &base);
        let leaf = Type::extends("app", "Leaf", &mid);
        (base, mid, leaf)
    }

    #[test]
    fn exact_match_wins() {
        let (base, mid, _) = chain();
        let mut reg = TypeRegistry::new();
        reg.register(mid.clone(), "mid");
        reg.register(base.clone(), "base");
        assert_eq!(reg.resolve(&mid), Some((mid, "mid")));
    }

    #[test]
    fn nearest_registration_in_reverse_order() {
        let (base, mid, leaf) = chain();
        let mut reg = TypeRegistry::new();
        reg.register(mid.clone(), "mid");
        reg.register(base.clone(), "base");
        // Both are ancestors of leaf; the later registration is preferred.
        assert_eq!(reg.resolve(&leaf), Some((base, "base")));
    }

    #[test]
    fn unrelated_type_misses() {
        let (base, _, _) = chain();
        let mut reg = TypeRegistry::new();
        reg.register(base, 1);
        assert_eq!(reg.resolve(&Type::new("other", "Thing")), None);
    }

    #[test]
    fn object_registration_catches_everything() {
        let mut reg = TypeRegistry::new();
        reg.register(Type::object(), "object");
        assert_eq!(reg.resolve(&Type::new("x", "Y")).map(|(_, h)| h), Some("object"));
    }

    #[test]
    fn registration_invalidates_memo() {
        let (base, mid, leaf) = chain();
        let mut reg = TypeRegistry::new();
        reg.register(base, "base");
        assert_eq!(reg.resolve(&leaf).map(|(_, h)| h), Some("base"));
        assert_eq!(reg.memo_len(), 1);

        reg.register(mid.clone(), "mid");
        assert_eq!(reg.memo_len(), 0);
        assert_eq!(reg.resolve(&leaf), Some((mid, "mid")));
    }

    #[test]
    fn misses_are_memoized() {
        let mut reg: TypeRegistry<u8> = TypeRegistry::new();
        let ty = Type::new("a", "B");
        assert_eq!(reg.resolve(&ty), None);
        assert_eq!(reg.memo_len(), 1);
        reg.register(ty.clone(), 7);
        assert_eq!(reg.resolve(&ty).map(|(_, h)| h), Some(7));
    }

    #[test]
    fn by_name_is_exact() {
        let (base, mid, _) = chain();
        let mut reg = TypeRegistry::new();
        reg.register(base, 1);
        reg.register(mid, 2);
        assert_eq!(reg.by_name("app.Mid").map(|(_, h)| h), Some(2));
        assert_eq!(reg.by_name("app.Leaf"), None);
        assert_eq!(reg.len(), 2);
    }
}
