use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::document::{AttachmentBlob, BulkWriteResult, RawDocument};
use crate::error::{StoreError, StoreResult};
use crate::revision::Revision;
use crate::traits::DocumentStore;

struct StoredDocument {
    rev: Revision,
    body: Map<String, JsonValue>,
    attachments: BTreeMap<String, AttachmentBlob>,
}

impl StoredDocument {
    fn to_raw(&self, id: &str) -> RawDocument {
        RawDocument {
            id: id.to_string(),
            rev: Some(self.rev.to_string()),
            body: self.body.clone(),
            attachments: self
                .attachments
                .iter()
                .map(|(name, blob)| (name.clone(), blob.to_stub()))
                .collect(),
        }
    }
}

/// Snapshot of the call counters kept by [`InMemoryDocumentStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub gets: usize,
    pub multi_gets: usize,
    pub bulk_writes: usize,
    pub multipart_writes: usize,
    pub placeholders: usize,
    pub attachment_fetches: usize,
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    multi_gets: AtomicUsize,
    bulk_writes: AtomicUsize,
    multipart_writes: AtomicUsize,
    placeholders: AtomicUsize,
    attachment_fetches: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StoreStats {
        StoreStats {
            gets: self.gets.load(Ordering::Relaxed),
            multi_gets: self.multi_gets.load(Ordering::Relaxed),
            bulk_writes: self.bulk_writes.load(Ordering::Relaxed),
            multipart_writes: self.multipart_writes.load(Ordering::Relaxed),
            placeholders: self.placeholders.load(Ordering::Relaxed),
            attachment_fetches: self.attachment_fetches.load(Ordering::Relaxed),
        }
    }
}

/// In-memory, HashMap-based multi-version document store.
///
/// Intended for tests and embedding. Only the current revision of each
/// document is kept; revision checks follow the [`DocumentStore`] contract,
/// so concurrent writers see the same conflicts a real database reports.
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<String, StoredDocument>>,
    read_only: AtomicBool,
    counters: Counters,
}

impl InMemoryDocumentStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            read_only: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Number of documents currently stored.
    pub fn len(&self) -> usize {
        self.docs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of all document ids.
    pub fn all_ids(&self) -> Vec<String> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = docs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Names of the attachments held for `id`, sorted.
    pub fn attachment_names(&self, id: &str) -> Vec<String> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        docs.get(id)
            .map(|doc| doc.attachments.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Reject every write with [`StoreError::ReadOnly`] while set.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }

    /// Call counters since creation.
    pub fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.read_only.load(Ordering::Relaxed) {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    /// Apply one write under the map lock.
    ///
    /// `extra` carries multipart payloads, which override inline entries of
    /// the same name.
    fn write_locked(
        docs: &mut HashMap<String, StoredDocument>,
        document: RawDocument,
        extra: BTreeMap<String, AttachmentBlob>,
    ) -> StoreResult<Revision> {
        if document.id.is_empty() {
            return Err(StoreError::InvalidDocument("empty `_id`".into()));
        }
        let current = docs.get(&document.id);
        match (current, document.rev.as_deref()) {
            (None, None) => {}
            (Some(cur), Some(rev)) if cur.rev.to_string() == rev => {}
            _ => {
                debug!(id = %document.id, rev = ?document.rev, "revision conflict");
                return Err(StoreError::Conflict { id: document.id });
            }
        }

        let mut attachments = BTreeMap::new();
        for (name, info) in &document.attachments {
            let blob = match info.decode_data()? {
                Some(data) => AttachmentBlob::new(info.content_type.clone(), data),
                None => current
                    .and_then(|cur| cur.attachments.get(name))
                    .cloned()
                    .ok_or_else(|| StoreError::MissingAttachment {
                        id: document.id.clone(),
                        name: name.clone(),
                    })?,
            };
            attachments.insert(name.clone(), blob);
        }
        attachments.extend(extra);

        let mut content = serde_json::to_vec(&document.body)?;
        for (name, blob) in &attachments {
            content.extend_from_slice(name.as_bytes());
            content.extend_from_slice(blob.digest().as_bytes());
        }
        let rev = match current {
            Some(cur) => cur.rev.next(&content),
            None => Revision::first(&content),
        };

        debug!(id = %document.id, rev = %rev, attachments = attachments.len(), "document written");
        docs.insert(
            document.id,
            StoredDocument {
                rev: rev.clone(),
                body: document.body,
                attachments,
            },
        );
        Ok(rev)
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, id: &str) -> StoreResult<Option<RawDocument>> {
        Counters::bump(&self.counters.gets);
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(docs.get(id).map(|doc| doc.to_raw(id)))
    }

    fn multi_get(&self, ids: &[String]) -> StoreResult<HashMap<String, RawDocument>> {
        Counters::bump(&self.counters.multi_gets);
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids
            .iter()
            .filter_map(|id| docs.get(id).map(|doc| (id.clone(), doc.to_raw(id))))
            .collect())
    }

    fn bulk_write(&self, documents: Vec<RawDocument>) -> StoreResult<Vec<BulkWriteResult>> {
        self.check_writable()?;
        Counters::bump(&self.counters.bulk_writes);
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let results = documents
            .into_iter()
            .map(|document| {
                let id = document.id.clone();
                match Self::write_locked(&mut docs, document, BTreeMap::new()) {
                    Ok(rev) => BulkWriteResult::Written {
                        id,
                        rev: rev.to_string(),
                    },
                    Err(StoreError::Conflict { .. }) => BulkWriteResult::Conflict { id },
                    Err(e) => BulkWriteResult::Failed {
                        id,
                        reason: e.to_string(),
                    },
                }
            })
            .collect();
        Ok(results)
    }

    fn create_placeholder(&self, id: &str, seed: Map<String, JsonValue>) -> StoreResult<String> {
        self.check_writable()?;
        Counters::bump(&self.counters.placeholders);
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let rev = Self::write_locked(&mut docs, RawDocument::new(id).with_body(seed), BTreeMap::new())?;
        Ok(rev.to_string())
    }

    fn multipart_write(
        &self,
        document: RawDocument,
        blobs: BTreeMap<String, AttachmentBlob>,
    ) -> StoreResult<(String, String)> {
        self.check_writable()?;
        Counters::bump(&self.counters.multipart_writes);
        let id = document.id.clone();
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let rev = Self::write_locked(&mut docs, document, blobs)?;
        Ok((id, rev.to_string()))
    }

    fn get_attachment(&self, id: &str, name: &str) -> StoreResult<Vec<u8>> {
        Counters::bump(&self.counters.attachment_fetches);
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        let doc = docs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        doc.attachments
            .get(name)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| StoreError::MissingAttachment {
                id: id.to_string(),
                name: name.to_string(),
            })
    }

    fn put(&self, document: RawDocument) -> StoreResult<String> {
        self.check_writable()?;
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let rev = Self::write_locked(&mut docs, document, BTreeMap::new())?;
        Ok(rev.to_string())
    }

    fn delete(&self, id: &str, rev: &str) -> StoreResult<()> {
        self.check_writable()?;
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let current = docs.get(id).map(|doc| doc.rev.to_string());
        match current {
            None => Err(StoreError::NotFound(id.to_string())),
            Some(current) if current != rev => Err(StoreError::Conflict { id: id.to_string() }),
            Some(_) => {
                docs.remove(id);
                debug!(id, "document deleted");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for InMemoryDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDocumentStore")
            .field("document_count", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}
