//! Store/load orchestration over a [`DocumentStore`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use couchgraph_codec::{
    find_unstorable, referenced_ids, Codec, CodecError, CodecResult, Packer, PendingWrite, Resolver, Unpacker,
    INFO_KEY,
};
use couchgraph_store::{BulkWriteResult, DocumentStore, RawDocument, StoreError};
use couchgraph_types::ObjRef;
use rand::Rng;
use serde_json::Map;
use tracing::{debug, info, warn};

use crate::cache::IdentityCache;
use crate::config::CouchGraphConfig;
use crate::error::{Error, Result};
use crate::plan::plan;

/// First step of the conflict backoff; doubled per attempt up to the
/// configured maximum.
const BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Options for one store call.
#[derive(Clone, Debug, Default)]
pub struct StoreOptions {
    /// Persisted objects to reference without rewriting.
    pub skip: Vec<ObjRef>,
    /// Leave nested documents that are already persisted untouched.
    pub additive_only: bool,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, objects: impl IntoIterator<Item = ObjRef>) -> Self {
        self.skip.extend(objects);
        self
    }

    pub fn additive_only(mut self, additive_only: bool) -> Self {
        self.additive_only = additive_only;
        self
    }
}

/// Something [`CouchGraph::load`] can turn into a live object.
#[derive(Clone, Debug)]
pub enum LoadTarget {
    /// Document id, fetched unless preloaded.
    Id(String),
    /// Raw document already in hand.
    Document(RawDocument),
    /// Query row: an id with the document when it was included.
    Row { id: String, doc: Option<RawDocument> },
    /// A persisted object, refreshed in place.
    Object(ObjRef),
}

impl From<&str> for LoadTarget {
    fn from(id: &str) -> Self {
        LoadTarget::Id(id.to_string())
    }
}

impl From<String> for LoadTarget {
    fn from(id: String) -> Self {
        LoadTarget::Id(id)
    }
}

impl From<&String> for LoadTarget {
    fn from(id: &String) -> Self {
        LoadTarget::Id(id.clone())
    }
}

impl From<RawDocument> for LoadTarget {
    fn from(doc: RawDocument) -> Self {
        LoadTarget::Document(doc)
    }
}

impl From<ObjRef> for LoadTarget {
    fn from(obj: ObjRef) -> Self {
        LoadTarget::Object(obj)
    }
}

impl From<&ObjRef> for LoadTarget {
    fn from(obj: &ObjRef) -> Self {
        LoadTarget::Object(obj.clone())
    }
}

/// Where an object stands relative to the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectState {
    /// Never written.
    Transient,
    /// Has an id but no committed body: packed, or waiting on a multipart
    /// upload after its placeholder.
    Pending,
    /// Last written or loaded at this revision.
    Persisted(String),
}

impl ObjectState {
    pub fn of(obj: &ObjRef) -> Self {
        let meta = obj.meta();
        match (meta.id, meta.rev) {
            (None, _) => ObjectState::Transient,
            (Some(_), Some(_)) if meta.multipart_pending => ObjectState::Pending,
            (Some(_), Some(rev)) => ObjectState::Persisted(rev),
            (Some(_), None) => ObjectState::Pending,
        }
    }
}

/// Object-graph persistence over a document store.
///
/// Owns the codec and shares an [`IdentityCache`] with every other
/// `CouchGraph` opened on the same URL, so one document id maps to at most
/// one live object per process.
pub struct CouchGraph<S> {
    store: S,
    codec: Arc<Codec>,
    cache: Arc<IdentityCache>,
    config: CouchGraphConfig,
}

impl<S: DocumentStore> CouchGraph<S> {
    /// Open with `codec`, tuned by `config`'s text and compression limits.
    pub fn new(store: S, mut codec: Codec, config: CouchGraphConfig) -> Self {
        codec.set_config(config.codec_config());
        Self::with_codec(store, Arc::new(codec), config)
    }

    /// Open with a codec shared with other connections. The codec's limits
    /// win over `config`'s, which is updated to report them.
    pub fn with_codec(store: S, codec: Arc<Codec>, mut config: CouchGraphConfig) -> Self {
        let limits = codec.config();
        if config.codec_config() != *limits {
            warn!(
                max_inline_text = limits.max_inline_text,
                compression_level = limits.compression_level,
                "shared codec overrides configured codec limits"
            );
            config.max_inline_text = limits.max_inline_text;
            config.compression_level = limits.compression_level;
        }
        let cache = IdentityCache::for_url(&config.url);
        Self {
            store,
            codec,
            cache,
            config,
        }
    }

    pub fn backend(&self) -> &S {
        &self.store
    }

    pub fn codec(&self) -> &Arc<Codec> {
        &self.codec
    }

    pub fn config(&self) -> &CouchGraphConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    /// Number of live objects in the identity cache.
    pub fn live_objects(&self) -> usize {
        self.cache.live_count()
    }

    // -----------------------------------------------------------------------
    // Store
    // -----------------------------------------------------------------------

    /// Store each root as a document, along with every unsaved or modified
    /// document reachable from it. Returns the roots' ids in order.
    ///
    /// Documents whose attachments exceed the multipart threshold are
    /// written first, largest first; the rest go out in one batch. A batch
    /// item that conflicts is reported after the other items commit.
    pub fn store(&self, objects: &[ObjRef], options: &StoreOptions) -> Result<Vec<String>> {
        info!(roots = objects.len(), "storing objects");
        let mut packer = Packer::new(&self.codec)
            .skip(&options.skip)
            .additive_only(options.additive_only);
        let ids = match objects
            .iter()
            .map(|obj| packer.store_object(obj))
            .collect::<CodecResult<Vec<_>>>()
        {
            Ok(ids) => ids,
            Err(err) => {
                for obj in objects {
                    for problem in find_unstorable(&self.codec, obj) {
                        warn!(type_name = %obj.ty(), problem = %problem, "unstorable value");
                    }
                }
                return Err(err.into());
            }
        };

        let plan = plan(packer.finish(), self.config.multipart_threshold());
        debug!(
            multipart = plan.multipart.len(),
            batch = plan.batch.len(),
            "write plan"
        );
        for write in plan.multipart {
            self.write_multipart(write)?;
        }
        self.write_batch(plan.batch)?;
        Ok(ids)
    }

    /// Every value reachable from `obj` that would stop a store, each as the
    /// error packing it raises.
    pub fn find_unstorable(&self, obj: &ObjRef) -> Vec<Error> {
        find_unstorable(&self.codec, obj)
            .into_iter()
            .map(Error::from)
            .collect()
    }

    pub fn store_one(&self, obj: &ObjRef) -> Result<String> {
        let ids = self.store(std::slice::from_ref(obj), &StoreOptions::default())?;
        ids.into_iter()
            .next()
            .ok_or_else(|| Error::InvalidTarget(obj.ty().qualified_name()))
    }

    /// Apply `mutate` to `target` and store it. On a conflict, reload the
    /// target in place and try again after a randomized pause. Any other
    /// error ends the loop.
    pub fn store_retry_update<F>(
        &self,
        mut mutate: F,
        target: &ObjRef,
        options: &StoreOptions,
    ) -> Result<Vec<String>>
    where
        F: FnMut(&ObjRef) -> Result<()>,
    {
        let mut attempt = 0u32;
        loop {
            mutate(target)?;
            match self.store(std::slice::from_ref(target), options) {
                Err(Error::ConcurrencyConflict { id, type_name }) => {
                    warn!(id = %id, type_name = %type_name, attempt, "conflict, reloading");
                    self.reload_after_conflict(target, &id)?;
                    thread::sleep(self.backoff(attempt));
                    attempt = attempt.saturating_add(1);
                }
                other => return other,
            }
        }
    }

    fn reload_after_conflict(&self, target: &ObjRef, conflicted: &str) -> Result<()> {
        self.load([LoadTarget::Object(target.clone())])?;
        if target.id().as_deref() != Some(conflicted) && self.cache.get(conflicted).is_some() {
            self.load([LoadTarget::Id(conflicted.to_string())])?;
        }
        Ok(())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = BACKOFF_BASE
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.config.retry_backoff_max());
        let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }

    /// Placeholder first when the document has no revision yet, then one
    /// multipart upload carrying the body and every attachment.
    fn write_multipart(&self, write: PendingWrite) -> Result<()> {
        let PendingWrite {
            obj,
            mut document,
            blobs,
        } = write;
        let type_name = obj.ty().qualified_name();
        let conflict = |err: StoreError| match err {
            StoreError::Conflict { id } => Error::ConcurrencyConflict {
                id,
                type_name: type_name.clone(),
            },
            other => Error::from(other),
        };

        if document.rev.is_none() {
            let mut seed = Map::new();
            if let Some(meta) = document.body.get(INFO_KEY) {
                seed.insert(INFO_KEY.to_string(), meta.clone());
            }
            let rev = self
                .store
                .create_placeholder(&document.id, seed)
                .map_err(|e| {
                    warn!(id = %document.id, error = %e, "placeholder failed");
                    conflict(e)
                })?;
            debug!(id = %document.id, rev = %rev, "placeholder created");
            obj.set_rev(rev.clone());
            obj.set_multipart_pending(true);
            self.cache.insert(document.id.clone(), &obj);
            document.rev = Some(rev);
        }

        let bytes: usize = blobs.values().map(|b| b.len()).sum();
        let (id, rev) = self
            .store
            .multipart_write(document, blobs)
            .map_err(|e| {
                warn!(type_name = %type_name, error = %e, "multipart upload failed");
                conflict(e)
            })?;
        debug!(id = %id, rev = %rev, bytes, "multipart upload written");
        obj.set_rev(rev);
        obj.set_multipart_pending(false);
        self.cache.insert(id, &obj);
        Ok(())
    }

    /// One bulk write with attachments inline. Every item is attempted; the
    /// first failure is returned once the rest have been applied.
    fn write_batch(&self, writes: Vec<PendingWrite>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut objects = Vec::with_capacity(writes.len());
        let mut documents = Vec::with_capacity(writes.len());
        for write in writes {
            let mut document = write.document;
            for (name, blob) in &write.blobs {
                document.attachments.insert(name.clone(), blob.to_inline());
            }
            objects.push(write.obj);
            documents.push(document);
        }

        let results = self.store.bulk_write(documents)?;
        let mut first_error = None;
        for (obj, result) in objects.iter().zip(results) {
            match result {
                BulkWriteResult::Written { id, rev } => {
                    debug!(id = %id, rev = %rev, type_name = %obj.ty(), "document written");
                    obj.set_rev(rev);
                    obj.set_multipart_pending(false);
                    self.cache.insert(id, obj);
                }
                BulkWriteResult::Conflict { id } => {
                    let type_name = obj.ty().qualified_name();
                    warn!(id = %id, type_name = %type_name, "write conflict");
                    first_error.get_or_insert(Error::ConcurrencyConflict { id, type_name });
                }
                BulkWriteResult::Failed { id, reason } => {
                    warn!(id = %id, reason = %reason, "write failed");
                    first_error
                        .get_or_insert(Error::Transport(StoreError::Transport(format!("{id}: {reason}"))));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    /// Load each target, in order.
    ///
    /// Requested documents and every document they reference are read from
    /// the store, one bulk fetch per level of references. An instance
    /// already live whose revision matches is returned as is, otherwise it
    /// is refreshed in place.
    pub fn load<I>(&self, targets: I) -> Result<Vec<ObjRef>>
    where
        I: IntoIterator,
        I::Item: Into<LoadTarget>,
    {
        self.load_with(targets, HashMap::new())
    }

    /// [`load`](Self::load) with documents the caller already fetched.
    pub fn load_with<I>(
        &self,
        targets: I,
        preloaded: HashMap<String, RawDocument>,
    ) -> Result<Vec<ObjRef>>
    where
        I: IntoIterator,
        I::Item: Into<LoadTarget>,
    {
        let mut docs = preloaded;
        let mut requests = Vec::new();
        for target in targets {
            match target.into() {
                LoadTarget::Id(id) => requests.push((id, None)),
                LoadTarget::Document(doc) => {
                    requests.push((doc.id.clone(), None));
                    docs.insert(doc.id.clone(), doc);
                }
                LoadTarget::Row { id, doc } => {
                    if let Some(doc) = doc {
                        docs.insert(id.clone(), doc);
                    }
                    requests.push((id, None));
                }
                LoadTarget::Object(obj) => {
                    let id = obj.id().ok_or_else(|| {
                        Error::InvalidTarget(format!("{} has no document id", obj.ty()))
                    })?;
                    requests.push((id, Some(obj)));
                }
            }
        }
        info!(targets = requests.len(), preloaded = docs.len(), "loading objects");

        let mut seen: HashSet<String> = docs.keys().cloned().collect();
        let mut frontier = Vec::new();
        for (id, _) in &requests {
            if seen.insert(id.clone()) {
                frontier.push(id.clone());
            }
        }
        let mut referenced = Vec::new();
        for doc in docs.values() {
            for id in referenced_ids(doc) {
                if seen.insert(id.clone()) {
                    referenced.push(id.clone());
                    frontier.push(id);
                }
            }
        }

        let mut absent = HashSet::new();
        while !frontier.is_empty() {
            debug!(ids = frontier.len(), "fetching documents");
            let mut found = self.store.multi_get(&frontier)?;
            let mut next = Vec::new();
            for id in frontier {
                let Some(doc) = found.remove(&id) else {
                    absent.insert(id);
                    continue;
                };
                for id in referenced_ids(&doc) {
                    if seen.insert(id.clone()) {
                        referenced.push(id.clone());
                        next.push(id);
                    }
                }
                docs.insert(id, doc);
            }
            frontier = next;
        }

        let mut session = LoadSession {
            graph: self,
            docs,
            absent,
            loaded: HashMap::new(),
            unpacked: Vec::new(),
        };
        let objects = requests
            .into_iter()
            .map(|(id, existing)| session.load_doc(&id, existing))
            .collect::<CodecResult<Vec<_>>>()?;
        // A current parent is not unpacked, so its live references are
        // checked here.
        for id in referenced {
            if session.docs.contains_key(&id) && self.cache.get(&id).is_some() {
                session.load_doc(&id, None)?;
            }
        }
        session.run_post_load()?;
        Ok(objects)
    }

    pub fn load_one(&self, target: impl Into<LoadTarget>) -> Result<ObjRef> {
        let target = target.into();
        let label = match &target {
            LoadTarget::Id(id) | LoadTarget::Row { id, .. } => id.clone(),
            LoadTarget::Document(doc) => doc.id.clone(),
            LoadTarget::Object(obj) => obj.ty().qualified_name(),
        };
        self.load([target])?
            .into_iter()
            .next()
            .ok_or(Error::NotFound(label))
    }

    // -----------------------------------------------------------------------
    // Raw access
    // -----------------------------------------------------------------------

    pub fn raw_get(&self, id: &str) -> Result<Option<RawDocument>> {
        Ok(self.store.get(id)?)
    }

    /// Write a document as is, bypassing the codec. Live objects are not
    /// touched; load them to pick up the change.
    pub fn raw_put(&self, document: RawDocument) -> Result<String> {
        let id = document.id.clone();
        let rev = self.store.put(document).map_err(|e| match e {
            StoreError::Conflict { id } => Error::ConcurrencyConflict {
                id,
                type_name: String::new(),
            },
            other => other.into(),
        })?;
        debug!(id = %id, rev = %rev, "raw put");
        Ok(rev)
    }

    pub fn raw_delete(&self, id: &str, rev: &str) -> Result<()> {
        self.store.delete(id, rev)?;
        self.cache.remove(id);
        Ok(())
    }
}

impl<S> fmt::Debug for CouchGraph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CouchGraph")
            .field("url", &self.config.url)
            .field("codec", &self.codec)
            .field("cache", &self.cache)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LoadSession
// ---------------------------------------------------------------------------

/// State of one load call.
struct LoadSession<'g, S> {
    graph: &'g CouchGraph<S>,
    /// Documents fetched or handed in, consumed as they are unpacked.
    docs: HashMap<String, RawDocument>,
    /// Ids the bulk fetches reported missing.
    absent: HashSet<String>,
    /// Instances resolved by this call.
    loaded: HashMap<String, ObjRef>,
    /// Instances decoded by this call, in order, for `post_load`.
    unpacked: Vec<ObjRef>,
}

impl<S: DocumentStore> LoadSession<'_, S> {
    /// Resolve `id` once per call, reusing `existing` or the live instance
    /// when its revision matches the stored one.
    fn load_doc(&mut self, id: &str, existing: Option<ObjRef>) -> CodecResult<ObjRef> {
        if let Some(obj) = self.loaded.get(id) {
            return Ok(obj.clone());
        }

        let doc = match self.docs.remove(id) {
            Some(doc) => doc,
            None if self.absent.contains(id) => {
                return Err(StoreError::NotFound(id.to_string()).into())
            }
            None => self
                .graph
                .store
                .get(id)?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?,
        };

        let existing = existing.or_else(|| self.graph.cache.get(id));
        if let Some(obj) = &existing {
            if doc.rev.is_some() && obj.rev() == doc.rev {
                debug!(id, "live instance is current");
                self.loaded.insert(id.to_string(), obj.clone());
                return Ok(obj.clone());
            }
        }

        let graph = self.graph;
        let obj = Unpacker::new(&graph.codec, self).unpack_document(&doc, existing)?;
        self.unpacked.push(obj.clone());
        Ok(obj)
    }

    fn run_post_load(&self) -> CodecResult<()> {
        for obj in &self.unpacked {
            if let Some(hook) = self.graph.codec.doc_hooks(obj.ty()).and_then(|h| h.post_load) {
                hook(obj)?;
            }
        }
        Ok(())
    }
}

impl<S: DocumentStore> Resolver for LoadSession<'_, S> {
    fn resolve_id(&mut self, id: &str) -> CodecResult<ObjRef> {
        self.load_doc(id, None)
    }

    fn fetch_attachment(&mut self, doc_id: &str, name: &str) -> CodecResult<Vec<u8>> {
        self.graph
            .store
            .get_attachment(doc_id, name)
            .map_err(CodecError::from)
    }

    fn register(&mut self, id: &str, rev: Option<&str>, obj: &ObjRef) {
        debug!(id, rev = ?rev, type_name = %obj.ty(), "instance registered");
        self.loaded.insert(id.to_string(), obj.clone());
        self.graph.cache.insert(id, obj);
    }
}
