//! # couchgraph
//!
//! Persist live object graphs in a CouchDB-style document store.
//!
//! Objects of registered document types become documents of their own and
//! keep their identity across documents and across loads; everything else
//! they reach is stored by value inside the document that reaches it.
//! Stored documents stay plain JSON wherever the data allows, so other
//! clients can read and edit them.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use couchgraph::{Codec, CouchGraph, CouchGraphConfig, DocHooks, Fields, ObjRef, Type};
//! use couchgraph::InMemoryDocumentStore;
//!
//! let config = CouchGraphConfig::default();
//! let mut codec = Codec::new(config.codec_config());
//! let user = Type::new("app", "User");
//! codec.register_doc_type(user.clone(), DocHooks::new());
//!
//! let db = CouchGraph::new(Arc::new(InMemoryDocumentStore::new()), codec, config);
//! let alice = ObjRef::record(user, Fields::new().with("name", "alice"));
//! let id = db.store_one(&alice)?;
//! let again = db.load_one(id)?;
//! assert!(again.ptr_eq(&alice));
//! # Ok::<(), couchgraph::Error>(())
//! ```

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod plan;

pub use cache::IdentityCache;
pub use config::CouchGraphConfig;
pub use db::{CouchGraph, LoadTarget, ObjectState, StoreOptions};
pub use error::{Error, Result};

pub use couchgraph_codec::{
    new_id, AttachmentCodec, Codec, CodecConfig, CustomCodec, DocHooks, IdOptions,
};
pub use couchgraph_store::{DocumentStore, InMemoryDocumentStore, RawDocument};
pub use couchgraph_types::{
    Backing, ConstructorArgs, Fieldable, Fields, ObjRef, Record, Type, Value, ValueMap,
};
