//! Runtime object model for couchgraph.
//!
//! This crate provides the in-memory side of the object-graph codec: the
//! values an application builds, the type descriptors used to dispatch on
//! them, and the shared handles that give objects an identity. Every other
//! couchgraph crate depends on `couchgraph-types`.
//!
//! # Key Types
//!
//! - [`Type`] -- Single-inheritance type descriptor (`module` + `name` + parent)
//! - [`Value`] -- Tagged runtime value: scalars, collections, modules, objects
//! - [`ValueMap`] -- Ordered map whose keys may be any [`Value`]
//! - [`Fields`] -- Ordered field-name map describing an object's visible state
//! - [`Fieldable`] -- Capability trait: expose fields for packing, accept them back on load
//! - [`Record`] -- Dynamic [`Fieldable`] used for generic objects
//! - [`ObjRef`] -- Shared, identity-bearing handle to a live object

pub mod error;
pub mod fields;
pub mod map;
pub mod object;
pub mod types;
pub mod value;

pub use error::{TypeError, TypeResult};
pub use fields::Fields;
pub use map::ValueMap;
pub use object::{
    AsAny, Backing, ConstructorArgs, DocMeta, Fieldable, ObjRef, Record, WeakObjRef,
};
pub use types::{builtins, Type, BUILTIN_MODULE};
pub use value::Value;
