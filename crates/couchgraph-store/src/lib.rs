//! Document storage for couchgraph.
//!
//! This crate defines the contract couchgraph expects from a multi-version
//! document database (CouchDB-style: JSON documents with revision tokens,
//! binary attachments, optimistic concurrency) and ships an in-memory
//! backend for tests and embedding.
//!
//! # Document Model
//!
//! - [`RawDocument`] -- id, revision, JSON body, and `_attachments` entries
//! - [`AttachmentInfo`] -- inline (base64) or stub attachment metadata
//! - [`AttachmentBlob`] -- attachment payload plus content type
//! - [`Revision`] -- `<generation>-<hash>` revision token
//!
//! # Storage Backends
//!
//! All backends implement the [`DocumentStore`] trait:
//!
//! - [`InMemoryDocumentStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. A write must name the current revision, or none for a new document.
//! 2. Batched writes commit item by item; one conflict does not fail the rest.
//! 3. Fetched documents report attachments as stubs; payloads are fetched by name.
//! 4. All backend errors are propagated, never silently ignored.

pub mod document;
pub mod error;
pub mod memory;
pub mod revision;
pub mod traits;

pub use document::{
    AttachmentBlob, AttachmentInfo, BulkWriteResult, RawDocument, ATTACHMENTS_KEY, ID_KEY,
    REV_KEY,
};
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryDocumentStore, StoreStats};
pub use revision::Revision;
pub use traits::DocumentStore;
