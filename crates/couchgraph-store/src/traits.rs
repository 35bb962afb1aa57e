use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value as JsonValue};

use crate::document::{AttachmentBlob, BulkWriteResult, RawDocument};
use crate::error::StoreResult;

/// Multi-version document database.
///
/// All implementations must satisfy these invariants:
/// - A write carrying a revision succeeds only if that revision is the
///   document's current one; a write without a revision succeeds only if the
///   document does not exist.
/// - Every successful write produces a new revision token.
/// - Attachments not named by a write are dropped; attachments named by a
///   stub keep their stored content.
/// - All backend errors are propagated, never silently ignored.
pub trait DocumentStore: Send + Sync {
    /// Fetch the current revision of a document.
    ///
    /// Returns `Ok(None)` if the document does not exist. Attachments are
    /// reported as stubs.
    fn get(&self, id: &str) -> StoreResult<Option<RawDocument>>;

    /// Fetch several documents in one round trip.
    ///
    /// Missing ids are absent from the result. The default implementation
    /// calls `get()` for each id.
    fn multi_get(&self, ids: &[String]) -> StoreResult<HashMap<String, RawDocument>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.get(id)? {
                found.insert(id.clone(), doc);
            }
        }
        Ok(found)
    }

    /// Write a batch of documents.
    ///
    /// Items commit independently; the result has one entry per input
    /// document, in order.
    fn bulk_write(&self, documents: Vec<RawDocument>) -> StoreResult<Vec<BulkWriteResult>>;

    /// Create a document holding only `seed` and return its first revision.
    fn create_placeholder(&self, id: &str, seed: Map<String, JsonValue>) -> StoreResult<String>;

    /// Write one document together with its attachment payloads.
    ///
    /// Returns the `(id, revision)` written.
    fn multipart_write(
        &self,
        document: RawDocument,
        blobs: BTreeMap<String, AttachmentBlob>,
    ) -> StoreResult<(String, String)>;

    /// Fetch the payload of one attachment.
    fn get_attachment(&self, id: &str, name: &str) -> StoreResult<Vec<u8>>;

    /// Write a single document and return its new revision.
    fn put(&self, document: RawDocument) -> StoreResult<String>;

    /// Delete a document at revision `rev`.
    fn delete(&self, id: &str, rev: &str) -> StoreResult<()>;
}

impl<S: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<S> {
    fn get(&self, id: &str) -> StoreResult<Option<RawDocument>> {
        (**self).get(id)
    }

    fn multi_get(&self, ids: &[String]) -> StoreResult<HashMap<String, RawDocument>> {
        (**self).multi_get(ids)
    }

    fn bulk_write(&self, documents: Vec<RawDocument>) -> StoreResult<Vec<BulkWriteResult>> {
        (**self).bulk_write(documents)
    }

    fn create_placeholder(&self, id: &str, seed: Map<String, JsonValue>) -> StoreResult<String> {
        (**self).create_placeholder(id, seed)
    }

    fn multipart_write(
        &self,
        document: RawDocument,
        blobs: BTreeMap<String, AttachmentBlob>,
    ) -> StoreResult<(String, String)> {
        (**self).multipart_write(document, blobs)
    }

    fn get_attachment(&self, id: &str, name: &str) -> StoreResult<Vec<u8>> {
        (**self).get_attachment(id, name)
    }

    fn put(&self, document: RawDocument) -> StoreResult<String> {
        (**self).put(document)
    }

    fn delete(&self, id: &str, rev: &str) -> StoreResult<()> {
        (**self).delete(id, rev)
    }
}
