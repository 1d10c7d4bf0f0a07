use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::firestore::api::{Query, QueryConstraint, QuerySnapshot};
use crate::firestore::backend::QueryCallback;
use crate::firestore::error::FirestoreResult;
use crate::store::metrics::SUBSCRIPTIONS;
use crate::store::{CachedStore, Emitter, Source, Store, StoreStream, StoreSubscription};
use crate::util::{PartialObserver, Unsubscribe};

use super::database::{Database, WeakDatabase};
use super::model::{load_model, model_name, Model};
use super::model_store::ModelStore;
use super::query_proxy::QueryProxy;
use super::save::SaveMode;

/// Live store over the ordered results of a query.
pub struct CollectionStore<M: Model> {
    db: WeakDatabase,
    key: String,
    query: Query,
    store: Store<Vec<M>>,
}

impl<M: Model> CollectionStore<M> {
    pub(crate) fn new(db: &Database, key: String, query: Query) -> Self {
        let label = format!("query:{}", query.collection_path());
        let source = query_source::<M>(db.downgrade(), query.clone());
        Self {
            db: db.downgrade(),
            key,
            query,
            store: Store::new(label, db.settings().idle_ttl, source),
        }
    }

    /// The handle the cache currently shares for this query; see [`ModelStore`].
    fn live(&self) -> Self {
        match self.db.upgrade() {
            Ok(db) => db.cache().reattach(&self.key, self),
            Err(_) => self.clone(),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn store(&self) -> &Store<Vec<M>> {
        &self.store
    }

    pub async fn get(&self) -> FirestoreResult<Vec<M>> {
        let live = self.live();
        live.store.get().await
    }

    pub fn current_value(&self) -> Option<Vec<M>> {
        self.live().store.current_value()
    }

    pub fn subscribe(&self, observer: PartialObserver<Vec<M>>) -> StoreSubscription<Vec<M>> {
        self.live().store.subscribe(observer)
    }

    pub fn stream(&self) -> StoreStream<Vec<M>> {
        self.live().store.stream()
    }

    pub fn unsubscribe(&self) {
        self.store.unsubscribe();
    }

    /// Store over the first result of this query. Rejects with `NotFound` while it is empty.
    pub fn first(&self) -> FirestoreResult<ModelStore<M>> {
        self.db.upgrade()?.first_of(self.query.clone())
    }

    /// Saves `model` as a new entity of this store's collection and returns it.
    ///
    /// The entity gets a fresh id; its relations are kept.
    pub async fn add(&self, model: M) -> FirestoreResult<M> {
        let db = self.db.upgrade()?;
        let meta = model
            .meta()
            .renewed(self.query.collection_path().canonical_string());
        let mut entity = M::from_fields(meta, &model.to_fields())?;
        db.save(&mut entity, SaveMode::Replace).await?;
        Ok(entity)
    }
}

fn query_source<M: Model>(db: WeakDatabase, query: Query) -> Source<Vec<M>> {
    Arc::new(move |emitter: Emitter<Vec<M>>| -> Unsubscribe {
        let db = match db.upgrade() {
            Ok(db) => db,
            Err(error) => {
                emitter.error(error);
                return Box::new(|| {});
            }
        };
        let metrics = Arc::clone(db.metrics());
        metrics.increment(SUBSCRIPTIONS, model_name::<M>(), 1);

        let callback: QueryCallback = Arc::new(move |result: FirestoreResult<QuerySnapshot>| {
            let models = result.and_then(|snapshot| {
                snapshot
                    .documents()
                    .iter()
                    .map(load_model::<M>)
                    .collect::<FirestoreResult<Vec<M>>>()
            });
            match models {
                Ok(models) => emitter.next(models),
                Err(error) => emitter.error(error),
            }
        });
        let unsubscribe = db.backend().subscribe_query(&query, callback);
        Box::new(move || {
            unsubscribe();
            metrics.increment(SUBSCRIPTIONS, model_name::<M>(), -1);
        })
    })
}

impl<M: Model> QueryProxy for CollectionStore<M> {
    type Descriptor = Query;

    fn descriptor(&self) -> &Query {
        &self.query
    }

    fn with_constraint(&self, constraint: QueryConstraint) -> FirestoreResult<Self> {
        let db = self.db.upgrade()?;
        db.collection_store(self.query.with_constraint(constraint)?)
    }
}

impl<M: Model> CachedStore for CollectionStore<M> {
    type Value = Vec<M>;

    fn store(&self) -> &Store<Vec<M>> {
        &self.store
    }
}

impl<M: Model> Clone for CollectionStore<M> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            key: self.key.clone(),
            query: self.query.clone(),
            store: self.store.clone(),
        }
    }
}

impl<M: Model> fmt::Debug for CollectionStore<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionStore")
            .field("collection", &self.query.collection_path().canonical_string())
            .field("store", &self.store)
            .finish()
    }
}

impl<'a, M: Model> IntoFuture for &'a CollectionStore<M> {
    type Output = FirestoreResult<Vec<M>>;
    type IntoFuture = BoxFuture<'a, FirestoreResult<Vec<M>>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.get())
    }
}
