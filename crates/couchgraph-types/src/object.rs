use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::error::{TypeError, TypeResult};
use crate::fields::Fields;
use crate::map::ValueMap;
use crate::types::Type;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Fieldable
// ---------------------------------------------------------------------------

/// Upcast helper so trait objects can be downcast to their concrete type.
///
/// Implemented for every `'static` type; implementors of [`Fieldable`] never
/// write it by hand.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Capability trait for objects that can be packed into documents.
///
/// An object exposes its visible state as an ordered [`Fields`] map and
/// accepts the same shape back on load. Objects that cannot describe
/// themselves as fields return `None` from [`fields`](Fieldable::fields) and
/// may instead offer an opaque byte form through
/// [`to_blob`](Fieldable::to_blob).
pub trait Fieldable: AsAny + Send + Sync {
    /// The object's visible state, or `None` if it has no field map.
    fn fields(&self) -> Option<Fields>;

    /// Apply decoded fields to this object.
    ///
    /// Called with the fields of a freshly allocated instance on first load
    /// and with an existing instance when a newer revision is loaded. Fields
    /// absent from `fields` are left as they are.
    fn populate(&mut self, fields: Fields) -> TypeResult<()>;

    /// Map or list contents held in addition to the fields.
    fn backing(&self) -> Option<Backing> {
        None
    }

    /// Replace the map or list contents.
    fn restore_backing(&mut self, backing: Backing) -> TypeResult<()> {
        Err(TypeError::BackingUnsupported {
            kind: backing.kind(),
        })
    }

    /// Opaque byte form for objects without a field map.
    fn to_blob(&self) -> Option<Vec<u8>> {
        None
    }

    /// Arguments that rebuild this object through its registered
    /// constructor. Objects that return `Some` are stored as arguments only.
    fn constructor_args(&self) -> Option<ConstructorArgs> {
        None
    }
}

impl dyn Fieldable {
    pub fn is<T: Fieldable>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Fieldable>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Fieldable>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Positional and keyword arguments for a registered constructor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstructorArgs {
    pub args: Vec<Value>,
    pub kwargs: ValueMap,
}

impl ConstructorArgs {
    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: ValueMap::new(),
        }
    }
}

/// Container contents for objects that also behave like a map or a list.
#[derive(Clone, Debug, PartialEq)]
pub enum Backing {
    Map(ValueMap),
    List(Vec<Value>),
}

impl Backing {
    pub fn kind(&self) -> &'static str {
        match self {
            Backing::Map(_) => "dict",
            Backing::List(_) => "list",
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Dynamic object: a bag of fields plus optional container contents.
///
/// Used for application objects that do not need a dedicated Rust type and
/// for documents whose class is not defined in the running process.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: Fields,
    backing: Option<Backing>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Fields) -> Self {
        Self {
            fields,
            backing: None,
        }
    }

    pub fn with_backing(mut self, backing: Backing) -> Self {
        self.backing = Some(backing);
        self
    }

    pub fn field_map(&self) -> &Fields {
        &self.fields
    }

    pub fn field_map_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }

    pub fn backing_ref(&self) -> Option<&Backing> {
        self.backing.as_ref()
    }
}

impl Fieldable for Record {
    fn fields(&self) -> Option<Fields> {
        Some(self.fields.clone())
    }

    fn populate(&mut self, fields: Fields) -> TypeResult<()> {
        self.fields.merge(fields);
        Ok(())
    }

    fn backing(&self) -> Option<Backing> {
        self.backing.clone()
    }

    fn restore_backing(&mut self, backing: Backing) -> TypeResult<()> {
        self.backing = Some(backing);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DocMeta
// ---------------------------------------------------------------------------

/// Persistence metadata carried by every object handle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocMeta {
    /// Document id, assigned once.
    pub id: Option<String>,
    /// Last revision this process wrote or loaded.
    pub rev: Option<String>,
    /// Set while a placeholder exists but its multipart upload has not landed.
    pub multipart_pending: bool,
}

impl DocMeta {
    /// Returns `true` if the object has both an id and a revision.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some() && self.rev.is_some()
    }
}

// ---------------------------------------------------------------------------
// ObjRef
// ---------------------------------------------------------------------------

struct ObjectCell {
    ty: Type,
    meta: RwLock<DocMeta>,
    state: RwLock<Box<dyn Fieldable>>,
}

/// Shared handle to a live object.
///
/// Cloning an `ObjRef` clones the handle, not the object. Equality and
/// hashing use the handle's address, which is the object's identity for
/// cycle detection and deduplication.
#[derive(Clone)]
pub struct ObjRef(Arc<ObjectCell>);

impl ObjRef {
    pub fn new<T: Fieldable>(ty: Type, value: T) -> Self {
        Self::from_boxed(ty, Box::new(value))
    }

    pub fn from_boxed(ty: Type, state: Box<dyn Fieldable>) -> Self {
        Self(Arc::new(ObjectCell {
            ty,
            meta: RwLock::new(DocMeta::default()),
            state: RwLock::new(state),
        }))
    }

    /// A [`Record`]-backed object with the given fields.
    pub fn record(ty: Type, fields: Fields) -> Self {
        Self::new(ty, Record::from_fields(fields))
    }

    pub fn ty(&self) -> &Type {
        &self.0.ty
    }

    /// Stable address of the shared cell, unique among live objects.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &ObjRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObjRef {
        WeakObjRef(Arc::downgrade(&self.0))
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    // ---- Metadata ----

    pub fn meta(&self) -> DocMeta {
        self.0.meta.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn id(&self) -> Option<String> {
        self.0.meta.read().unwrap_or_else(PoisonError::into_inner).id.clone()
    }

    pub fn rev(&self) -> Option<String> {
        self.0.meta.read().unwrap_or_else(PoisonError::into_inner).rev.clone()
    }

    pub fn multipart_pending(&self) -> bool {
        self.0
            .meta
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .multipart_pending
    }

    pub fn set_id(&self, id: impl Into<String>) {
        self.0.meta.write().unwrap_or_else(PoisonError::into_inner).id = Some(id.into());
    }

    pub fn set_rev(&self, rev: impl Into<String>) {
        self.0.meta.write().unwrap_or_else(PoisonError::into_inner).rev = Some(rev.into());
    }

    pub fn set_multipart_pending(&self, pending: bool) {
        self.0
            .meta
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .multipart_pending = pending;
    }

    // ---- State ----

    pub fn state(&self) -> RwLockReadGuard<'_, Box<dyn Fieldable>> {
        self.0.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state_mut(&self) -> RwLockWriteGuard<'_, Box<dyn Fieldable>> {
        self.0.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fields(&self) -> Option<Fields> {
        self.state().fields()
    }

    /// Read one field. Returns `None` for missing fields and opaque objects.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields().and_then(|fields| fields.get(name).cloned())
    }

    /// Write one field through [`Fieldable::populate`].
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> TypeResult<()> {
        self.state_mut().populate(Fields::new().with(name, value))
    }

    pub fn populate(&self, fields: Fields) -> TypeResult<()> {
        self.state_mut().populate(fields)
    }

    /// Borrow the concrete state. Returns `None` if it is not a `T`.
    pub fn with<T: Fieldable, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let state = self.state();
        let inner: &dyn Fieldable = &**state;
        inner.downcast_ref::<T>().map(f)
    }

    /// Mutably borrow the concrete state. Returns `None` if it is not a `T`.
    pub fn with_mut<T: Fieldable, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut state = self.state_mut();
        let inner: &mut dyn Fieldable = &mut **state;
        inner.downcast_mut::<T>().map(f)
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjRef {}

impl Hash for ObjRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Fields are left out: they may lead back to this object.
        let meta = self.meta();
        f.debug_struct("ObjRef")
            .field("type", &self.0.ty.qualified_name())
            .field("id", &meta.id)
            .field("rev", &meta.rev)
            .finish()
    }
}

/// Non-owning handle; does not keep the object alive.
#[derive(Clone)]
pub struct WeakObjRef(Weak<ObjectCell>);

impl WeakObjRef {
    pub fn upgrade(&self) -> Option<ObjRef> {
        self.0.upgrade().map(ObjRef)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for WeakObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObjRef(alive: {})", self.is_alive())
    }
}
