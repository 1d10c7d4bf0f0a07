use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use crate::logger::log_arg;

use super::adapter::Store;
use super::LOGGER;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct CacheKey {
    key: String,
    value_type: TypeId,
}

struct CacheEntry {
    store_id: u64,
    handle: Arc<dyn Any + Send + Sync>,
}

type Entries = Mutex<BTreeMap<CacheKey, CacheEntry>>;

/// A handle the cache can register: a [`Store`] or a wrapper built around one.
pub trait CachedStore: Clone + Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    fn store(&self) -> &Store<Self::Value>;
}

impl<T> CachedStore for Store<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn store(&self) -> &Store<T> {
        self
    }
}

/// Registry of live stores keyed by normalized descriptor key.
///
/// Entries are discriminated by the handle type as well, so a document store and a
/// collection store built from the same key never alias. Clones share the registry.
#[derive(Clone, Default)]
pub struct QueryStoreCache {
    entries: Arc<Entries>,
}

impl QueryStoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle registered under `key`, or registers the one built by `factory`.
    ///
    /// `factory` runs under the registry lock and must not call back into the cache. The
    /// new store is registered before anyone can attach to it, and its teardown evicts it.
    pub fn get_or_create<H, F>(&self, key: &str, factory: F) -> H
    where
        H: CachedStore,
        F: FnOnce() -> H,
    {
        let cache_key = CacheKey {
            key: key.to_owned(),
            value_type: TypeId::of::<H>(),
        };

        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries
            .get(&cache_key)
            .and_then(|entry| entry.handle.downcast_ref::<H>())
        {
            return existing.clone();
        }

        let handle = factory();
        let registry: Weak<Entries> = Arc::downgrade(&self.entries);
        let evicted_key = cache_key.clone();
        let store_id = handle.store().id();
        handle
            .store()
            .on_teardown(move || evict(&registry, &evicted_key, store_id));

        entries.insert(
            cache_key,
            CacheEntry {
                store_id,
                handle: Arc::new(handle.clone()),
            },
        );
        LOGGER.debug_with([log_arg("cache insert"), log_arg(key)]);
        handle
    }

    /// The handle registered under `key` for `handle`'s type, re-registering `handle` when
    /// the key is free.
    ///
    /// An evicted store that is attached again thereby becomes the shared store for its key
    /// again, and a store replaced by a newer one defers to it. `handle` must come from
    /// [`QueryStoreCache::get_or_create`] on this cache, which installed its eviction hook.
    pub fn reattach<H: CachedStore>(&self, key: &str, handle: &H) -> H {
        let cache_key = CacheKey {
            key: key.to_owned(),
            value_type: TypeId::of::<H>(),
        };

        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries
            .get(&cache_key)
            .and_then(|entry| entry.handle.downcast_ref::<H>())
        {
            return existing.clone();
        }

        entries.insert(
            cache_key,
            CacheEntry {
                store_id: handle.store().id(),
                handle: Arc::new(handle.clone()),
            },
        );
        LOGGER.debug_with([log_arg("cache reinsert"), log_arg(key)]);
        handle.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any store, of any value type, is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        entries.keys().any(|entry| entry.key == key)
    }

    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap();
        entries.keys().map(|entry| entry.key.clone()).collect()
    }
}

fn evict(registry: &Weak<Entries>, key: &CacheKey, store_id: u64) {
    let Some(entries) = registry.upgrade() else {
        return;
    };
    let mut entries = entries.lock().unwrap();
    if entries.get(key).is_some_and(|entry| entry.store_id == store_id) {
        entries.remove(key);
        LOGGER.debug_with([log_arg("cache evict"), log_arg(key.key.as_str())]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::adapter::{Emitter, Source};
    use crate::util::{PartialObserver, Unsubscribe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_store(created: &Arc<AtomicUsize>) -> Store<String> {
        created.fetch_add(1, Ordering::SeqCst);
        let source: Source<String> = Arc::new(|emitter: Emitter<String>| -> Unsubscribe {
            emitter.next("value".to_string());
            Box::new(|| {})
        });
        Store::new("test", Duration::from_millis(100), source)
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_returns_same_store() {
        let cache = QueryStoreCache::new();
        let created = Arc::new(AtomicUsize::new(0));

        let first = cache.get_or_create("users/u1", || counting_store(&created));
        let second = cache.get_or_create("users/u1", || counting_store(&created));

        assert_eq!(first.id(), second.id());
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(cache.contains("users/u1"));
        assert_eq!(cache.keys(), vec!["users/u1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn value_types_do_not_alias() {
        let cache = QueryStoreCache::new();
        let text: Store<String> = cache.get_or_create("k", || Store::from_value("k", "a".into()));
        let number: Store<i64> = cache.get_or_create("k", || Store::from_value("k", 1));
        assert_ne!(text.id(), number.id());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_evicts_entry() {
        let cache = QueryStoreCache::new();
        let created = Arc::new(AtomicUsize::new(0));
        let store = cache.get_or_create("users/u1", || counting_store(&created));

        store.subscribe(PartialObserver::new()).detach();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cache.is_empty());
        let fresh = cache.get_or_create("users/u1", || counting_store(&created));
        assert_ne!(fresh.id(), store.id());
    }

    #[tokio::test(start_paused = true)]
    async fn evicted_store_registers_again_on_reattach() {
        let cache = QueryStoreCache::new();
        let created = Arc::new(AtomicUsize::new(0));
        let held = cache.get_or_create("users/u1", || counting_store(&created));
        held.subscribe(PartialObserver::new()).detach();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.is_empty());

        let live = cache.reattach("users/u1", &held);
        assert_eq!(live.id(), held.id());
        let found = cache.get_or_create("users/u1", || counting_store(&created));
        assert_eq!(found.id(), held.id());
        assert_eq!(created.load(Ordering::SeqCst), 1);

        // Its eviction hook still applies.
        live.subscribe(PartialObserver::new()).detach();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_store_defers_to_its_successor() {
        let cache = QueryStoreCache::new();
        let created = Arc::new(AtomicUsize::new(0));
        let stale = cache.get_or_create("users/u1", || counting_store(&created));
        stale.unsubscribe();
        let replacement = cache.get_or_create("users/u1", || counting_store(&created));

        let live = cache.reattach("users/u1", &stale);
        assert_eq!(live.id(), replacement.id());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_store_teardown_keeps_replacement() {
        let cache = QueryStoreCache::new();
        let created = Arc::new(AtomicUsize::new(0));
        let stale = cache.get_or_create("users/u1", || counting_store(&created));
        stale.unsubscribe();
        let replacement = cache.get_or_create("users/u1", || counting_store(&created));

        // A second teardown of the evicted instance must not remove its successor.
        stale.unsubscribe();
        assert!(cache.contains("users/u1"));
        assert_ne!(replacement.id(), stale.id());
    }
}
