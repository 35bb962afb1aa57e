use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, Weak};

use couchgraph_types::{ObjRef, WeakObjRef};

/// Entry count below which inserts never sweep.
const MIN_PRUNE_AT: usize = 64;

/// Document id → live object, held weakly.
///
/// Entries vanish once nothing else holds the object, so at most one live
/// instance exists per id and the cache never keeps an object alive. Dead
/// entries are swept on insert whenever the table has doubled since the
/// last sweep.
#[derive(Default)]
pub struct IdentityCache {
    entries: RwLock<Entries>,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, WeakObjRef>,
    /// Size at which the next insert sweeps dead entries.
    prune_at: usize,
}

static BY_URL: OnceLock<RwLock<HashMap<String, Weak<IdentityCache>>>> = OnceLock::new();

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every connection to `url` in this process.
    pub fn for_url(url: &str) -> Arc<IdentityCache> {
        let registry = BY_URL.get_or_init(|| RwLock::new(HashMap::new()));
        if let Some(cache) = registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .and_then(Weak::upgrade)
        {
            return cache;
        }

        let mut caches = registry.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(cache) = caches.get(url).and_then(Weak::upgrade) {
            return cache;
        }
        let cache = Arc::new(IdentityCache::new());
        caches.retain(|_, weak| weak.strong_count() > 0);
        caches.insert(url.to_string(), Arc::downgrade(&cache));
        cache
    }

    /// The live object for `id`, if any.
    pub fn get(&self, id: &str) -> Option<ObjRef> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .get(id)
            .and_then(WeakObjRef::upgrade)
    }

    pub fn insert(&self, id: impl Into<String>, obj: &ObjRef) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.map.len() >= entries.prune_at.max(MIN_PRUNE_AT) {
            entries.map.retain(|_, weak| weak.is_alive());
            entries.prune_at = entries.map.len().saturating_mul(2);
        }
        entries.map.insert(id.into(), obj.downgrade());
    }

    pub fn remove(&self, id: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .remove(id);
    }

    /// Number of entries held, dead ones included.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ids whose object is still alive.
    pub fn live_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .values()
            .filter(|weak| weak.is_alive())
            .count()
    }

    /// Drop entries whose object is gone. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.map.len();
        entries.map.retain(|_, weak| weak.is_alive());
        before - entries.map.len()
    }
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("live", &self.live_count())
            .finish()
    }
}
