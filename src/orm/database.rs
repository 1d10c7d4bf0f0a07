use std::fmt;
use std::sync::{Arc, Weak};

use crate::firestore::api::{CollectionReference, DocumentReference, Query};
use crate::firestore::backend::Backend;
use crate::firestore::error::{internal_error, FirestoreResult};
use crate::store::{
    document_key, query_key, MetricsSink, NoopMetrics, QueryStoreCache, StoreSettings,
};

use super::collection_store::CollectionStore;
use super::model::Model;
use super::model_store::ModelStore;

/// Entry point of the ORM: a backend plus the store cache built over it.
///
/// Clones share the backend, the cache and the settings.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    backend: Arc<dyn Backend>,
    cache: QueryStoreCache,
    settings: StoreSettings,
    metrics: Arc<dyn MetricsSink>,
}

impl Database {
    pub fn new(backend: Arc<dyn Backend>, settings: StoreSettings) -> Self {
        Self::with_metrics(backend, settings, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(
        backend: Arc<dyn Backend>,
        settings: StoreSettings,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                backend,
                cache: QueryStoreCache::new(),
                settings,
                metrics,
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn cache(&self) -> &QueryStoreCache {
        &self.inner.cache
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.inner.settings
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.inner.metrics
    }

    /// Live store over the `M` document with `id` in `M::COLLECTION`.
    ///
    /// The store rejects with `NotFound` while the document is absent and recovers once it
    /// is created.
    pub fn find<M: Model>(&self, id: &str) -> FirestoreResult<ModelStore<M>> {
        let reference = CollectionReference::from_string(M::COLLECTION)?.doc(Some(id))?;
        Ok(self.find_reference(reference))
    }

    /// Live store over the document at `reference`.
    pub fn find_reference<M: Model>(&self, reference: DocumentReference) -> ModelStore<M> {
        let key = document_key(&reference);
        self.cache()
            .get_or_create(&key, || ModelStore::for_document(self, reference))
    }

    /// Live store over every `M` in `M::COLLECTION`.
    pub fn query<M: Model>(&self) -> FirestoreResult<CollectionStore<M>> {
        self.query_collection(CollectionReference::from_string(M::COLLECTION)?)
    }

    pub fn query_collection<M: Model>(
        &self,
        collection: CollectionReference,
    ) -> FirestoreResult<CollectionStore<M>> {
        self.collection_store(collection.query())
    }

    /// Live store over the results of `query`.
    pub fn collection_store<M: Model>(&self, query: Query) -> FirestoreResult<CollectionStore<M>> {
        let key = query_key(&query)?;
        Ok(self
            .cache()
            .get_or_create(&key, || CollectionStore::new(self, key.clone(), query)))
    }

    /// Live store over the first result of `base`.
    pub fn first_of<M: Model>(&self, base: Query) -> FirestoreResult<ModelStore<M>> {
        let query = base.limit(1)?;
        let key = query_key(&query)?;
        Ok(self
            .cache()
            .get_or_create(&key, || ModelStore::for_first(self, key.clone(), base, query)))
    }

    pub(crate) fn downgrade(&self) -> WeakDatabase {
        WeakDatabase {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("settings", &self.inner.settings)
            .field("cached_stores", &self.inner.cache.len())
            .finish()
    }
}

/// Non-owning handle held by cached stores, so the cache does not keep its database alive.
#[derive(Clone)]
pub(crate) struct WeakDatabase {
    inner: Weak<DatabaseInner>,
}

impl WeakDatabase {
    pub(crate) fn upgrade(&self) -> FirestoreResult<Database> {
        self.inner
            .upgrade()
            .map(|inner| Database { inner })
            .ok_or_else(|| internal_error("The database behind this store was dropped"))
    }
}
