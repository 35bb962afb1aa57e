use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use couchgraph_types::{Fieldable, ObjRef, Record, Type, Value, ValueMap};

use crate::error::{CodecError, CodecResult};

type Alloc = Arc<dyn Fn() -> Box<dyn Fieldable> + Send + Sync>;
type FromBlob = Arc<dyn Fn(&[u8]) -> CodecResult<Box<dyn Fieldable>> + Send + Sync>;
type Construct = Arc<dyn Fn(Vec<Value>, ValueMap) -> CodecResult<Value> + Send + Sync>;

/// How to bring one class back to life on load.
#[derive(Clone)]
pub struct ClassEntry {
    pub ty: Type,
    /// Allocate an empty instance without running a constructor.
    alloc: Option<Alloc>,
    /// Rebuild an opaque instance from its blob.
    from_blob: Option<FromBlob>,
    /// Build a value from stored constructor arguments.
    construct: Option<Construct>,
}

impl fmt::Debug for ClassEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassEntry")
            .field("ty", &self.ty)
            .field("alloc", &self.alloc.is_some())
            .field("from_blob", &self.from_blob.is_some())
            .field("construct", &self.construct.is_some())
            .finish()
    }
}

/// Qualified class name → [`ClassEntry`].
///
/// Names missing from the table still load: they become [`Record`]s whose
/// type is rebuilt from the stored name.
#[derive(Clone, Debug, Default)]
pub struct ClassTable {
    entries: HashMap<String, ClassEntry>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_mut(&mut self, ty: Type) -> &mut ClassEntry {
        let entry = self
            .entries
            .entry(ty.qualified_name())
            .or_insert_with(|| ClassEntry {
                ty: ty.clone(),
                alloc: None,
                from_blob: None,
                construct: None,
            });
        entry.ty = ty;
        entry
    }

    /// Record `ty` so loads keep its ancestry, without changing how
    /// instances are allocated.
    pub fn remember(&mut self, ty: Type) {
        self.entry_mut(ty);
    }

    /// Load `ty` into fresh `T::default()` instances.
    pub fn define_class<T: Fieldable + Default>(&mut self, ty: Type) {
        self.entry_mut(ty).alloc = Some(Arc::new(|| Box::new(T::default())));
    }

    /// Load `ty` into [`Record`]s that keep the full type ancestry.
    pub fn define_record(&mut self, ty: Type) {
        self.entry_mut(ty).alloc = Some(Arc::new(|| Box::new(Record::new())));
    }

    /// Rebuild opaque instances of `ty` from their blobs.
    pub fn define_opaque(
        &mut self,
        ty: Type,
        from_blob: impl Fn(&[u8]) -> CodecResult<Box<dyn Fieldable>> + Send + Sync + 'static,
    ) {
        self.entry_mut(ty).from_blob = Some(Arc::new(from_blob));
    }

    /// Rebuild values of `ty` from stored constructor arguments.
    pub fn define_constructed(
        &mut self,
        ty: Type,
        construct: impl Fn(Vec<Value>, ValueMap) -> CodecResult<Value> + Send + Sync + 'static,
    ) {
        self.entry_mut(ty).construct = Some(Arc::new(construct));
    }

    pub fn get(&self, qualified: &str) -> Option<&ClassEntry> {
        self.entries.get(qualified)
    }

    /// The registered type for `qualified`, or a detached one.
    pub fn type_for(&self, qualified: &str) -> Type {
        self.entries
            .get(qualified)
            .map(|entry| entry.ty.clone())
            .unwrap_or_else(|| Type::parse(qualified))
    }

    /// A new, unpopulated instance of `qualified`.
    pub fn allocate(&self, qualified: &str) -> ObjRef {
        match self.entries.get(qualified) {
            Some(ClassEntry {
                ty,
                alloc: Some(alloc),
                ..
            }) => ObjRef::from_boxed(ty.clone(), alloc()),
            Some(entry) => ObjRef::new(entry.ty.clone(), Record::new()),
            None => ObjRef::new(Type::parse(qualified), Record::new()),
        }
    }

    /// Rebuild an opaque instance of `qualified`.
    pub fn from_blob(&self, qualified: &str, blob: &[u8], path: &str) -> CodecResult<ObjRef> {
        let entry = self.entries.get(qualified);
        let Some((ty, from_blob)) =
            entry.and_then(|e| e.from_blob.as_ref().map(|f| (e.ty.clone(), f)))
        else {
            return Err(CodecError::unsupported(qualified, path));
        };
        Ok(ObjRef::from_boxed(ty, from_blob(blob)?))
    }

    /// Build a value of `qualified` from constructor arguments.
    pub fn construct(
        &self,
        qualified: &str,
        args: Vec<Value>,
        kwargs: ValueMap,
        path: &str,
    ) -> CodecResult<Value> {
        match self.entries.get(qualified).and_then(|e| e.construct.as_ref()) {
            Some(construct) => construct(args, kwargs),
            None => Err(CodecError::unsupported(qualified, path)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
