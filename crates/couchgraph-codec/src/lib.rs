//! Object-graph codec for couchgraph.
//!
//! Maps live object graphs to JSON documents and back. Documents stay as
//! close to plain JSON as the data allows; anything without a JSON form is
//! written as a `couchgraph:` token (see [`encoding`]).
//!
//! # Components
//!
//! - [`Codec`] -- type registries and class table, built once at startup
//! - [`TypeRegistry`] -- ordered type → handler table, nearest-ancestor lookup
//! - [`Packer`] -- call-scoped walker producing [`PendingWrite`]s
//! - [`Unpacker`] -- inverse walker; resolves references through a [`Resolver`]
//! - [`PickleJar`] -- per-document store for values with no JSON form
//!
//! # Design Rules
//!
//! 1. Only objects of registered document types keep identity across
//!    documents; everything else is copied into the document that reaches it.
//! 2. A reference cycle that does not pass through a document is an error.
//! 3. Plain text, numbers, booleans, and null are stored unchanged.

pub mod classes;
pub mod codec;
pub mod compress;
pub mod diagnose;
pub mod encoding;
pub mod error;
pub mod handler;
pub mod ids;
pub mod pack;
pub mod pickle;
pub mod registry;
pub mod unpack;

pub use classes::{ClassEntry, ClassTable};
pub use codec::{Codec, CodecConfig};
pub use diagnose::find_unstorable;
pub use encoding::{Token, INFO_KEY, PICKLE_ATTACHMENT, PREFIX};
pub use error::{CodecError, CodecResult};
pub use handler::{AttachmentCodec, CustomCodec, DocHook, DocHooks, PackHandler};
pub use ids::{new_id, IdOptions};
pub use pack::{Packer, PendingWrite};
pub use pickle::{PickleJar, Pickled, PickledBacking};
pub use registry::TypeRegistry;
pub use unpack::{referenced_ids, Resolver, Unpacker};
