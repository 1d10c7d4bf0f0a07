use std::fmt;
use std::future::IntoFuture;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;

use crate::firestore::api::{
    DocumentReference, DocumentSnapshot, Query, QueryConstraint, QuerySnapshot,
};
use crate::firestore::backend::{DocumentCallback, QueryCallback};
use crate::firestore::error::{invalid_argument, not_found, FirestoreResult};
use crate::platform::runtime::PlatformFuture;
use crate::store::metrics::{SNAPSHOTS, SUBSCRIPTIONS};
use crate::store::{
    document_key, CachedStore, Emitter, MetricsSink, Reconciler, ReconcilerState, RecordWriter,
    Source, Store, StoreStream, StoreSubscription,
};
use crate::util::{PartialObserver, Unsubscribe};

use super::database::{Database, WeakDatabase};
use super::model::{load_model, model_name, Model};
use super::query_proxy::QueryProxy;
use super::save::SaveMode;

/// What a [`ModelStore`] follows.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelTarget {
    Document(DocumentReference),
    /// The first result of `base`; `query` is `base` limited to one result.
    First { base: Query, query: Query },
}

/// Live store over a single entity.
///
/// Await it for the current entity, subscribe to it for every later one, and write to it
/// with [`ModelStore::set`]: the edit is echoed at once and saved after a short debounce.
pub struct ModelStore<M: Model> {
    db: WeakDatabase,
    key: String,
    target: ModelTarget,
    store: Store<M>,
    reconciler: Reconciler<M>,
}

impl<M: Model> ModelStore<M> {
    pub(crate) fn for_document(db: &Database, reference: DocumentReference) -> Self {
        let key = document_key(&reference);
        let slot = Arc::new(OnceLock::new());
        let source = document_source::<M>(db.downgrade(), reference.clone(), Arc::clone(&slot));
        Self::build(
            db,
            key.clone(),
            key,
            ModelTarget::Document(reference),
            source,
            slot,
        )
    }

    pub(crate) fn for_first(db: &Database, key: String, base: Query, query: Query) -> Self {
        let label = format!("first:{}", query.collection_path());
        let slot = Arc::new(OnceLock::new());
        let source = first_source::<M>(db.downgrade(), query.clone(), Arc::clone(&slot));
        Self::build(
            db,
            key,
            label,
            ModelTarget::First { base, query },
            source,
            slot,
        )
    }

    fn build(
        db: &Database,
        key: String,
        label: String,
        target: ModelTarget,
        source: Source<M>,
        slot: Arc<OnceLock<Reconciler<M>>>,
    ) -> Self {
        let settings = db.settings();
        let store = Store::new(label.clone(), settings.idle_ttl, source);
        let reconciler = Reconciler::new(
            label,
            store.emitter(),
            settings,
            record_writer::<M>(db.downgrade()),
        );
        let _ = slot.set(reconciler.clone());
        Self {
            db: db.downgrade(),
            key,
            target,
            store,
            reconciler,
        }
    }

    /// The handle the cache currently shares for this target.
    ///
    /// A store evicted after its idle TTL registers itself again when used, so two live
    /// subscriptions never exist for one key.
    fn live(&self) -> Self {
        match self.db.upgrade() {
            Ok(db) => db.cache().reattach(&self.key, self),
            Err(_) => self.clone(),
        }
    }

    pub fn target(&self) -> &ModelTarget {
        &self.target
    }

    /// Document id, for stores over a single document reference.
    pub fn id(&self) -> Option<&str> {
        match &self.target {
            ModelTarget::Document(reference) => Some(reference.id()),
            ModelTarget::First { .. } => None,
        }
    }

    pub fn store(&self) -> &Store<M> {
        &self.store
    }

    pub fn reconciler(&self) -> &Reconciler<M> {
        &self.reconciler
    }

    pub fn state(&self) -> ReconcilerState {
        self.live().reconciler.state()
    }

    pub async fn get(&self) -> FirestoreResult<M> {
        let live = self.live();
        live.store.get().await
    }

    pub fn current_value(&self) -> Option<M> {
        self.live().store.current_value()
    }

    pub fn subscribe(&self, observer: PartialObserver<M>) -> StoreSubscription<M> {
        self.live().store.subscribe(observer)
    }

    pub fn stream(&self) -> StoreStream<M> {
        self.live().store.stream()
    }

    /// Publishes `value` to every listener and saves it after the debounce window.
    pub fn set(&self, value: M) {
        self.live().reconciler.set(value);
    }

    pub fn unsubscribe(&self) {
        self.store.unsubscribe();
    }
}

fn document_source<M: Model>(
    db: WeakDatabase,
    reference: DocumentReference,
    reconciler: Arc<OnceLock<Reconciler<M>>>,
) -> Source<M> {
    Arc::new(move |emitter: Emitter<M>| -> Unsubscribe {
        let db = match db.upgrade() {
            Ok(db) => db,
            Err(error) => {
                emitter.error(error);
                return Box::new(|| {});
            }
        };
        let metrics = Arc::clone(db.metrics());
        metrics.increment(SUBSCRIPTIONS, model_name::<M>(), 1);

        let sink = Arc::clone(&metrics);
        let reconciler = Arc::clone(&reconciler);
        let callback: DocumentCallback =
            Arc::new(move |result: FirestoreResult<DocumentSnapshot>| match result {
                Ok(snapshot) => deliver(&emitter, &reconciler, sink.as_ref(), Some(&snapshot)),
                Err(error) => emitter.error(error),
            });
        let unsubscribe = db.backend().subscribe_document(&reference, callback);
        Box::new(move || {
            unsubscribe();
            metrics.increment(SUBSCRIPTIONS, model_name::<M>(), -1);
        })
    })
}

fn first_source<M: Model>(
    db: WeakDatabase,
    query: Query,
    reconciler: Arc<OnceLock<Reconciler<M>>>,
) -> Source<M> {
    Arc::new(move |emitter: Emitter<M>| -> Unsubscribe {
        let db = match db.upgrade() {
            Ok(db) => db,
            Err(error) => {
                emitter.error(error);
                return Box::new(|| {});
            }
        };
        let metrics = Arc::clone(db.metrics());
        metrics.increment(SUBSCRIPTIONS, model_name::<M>(), 1);

        let sink = Arc::clone(&metrics);
        let reconciler = Arc::clone(&reconciler);
        let callback: QueryCallback =
            Arc::new(move |result: FirestoreResult<QuerySnapshot>| match result {
                Ok(snapshot) => deliver(
                    &emitter,
                    &reconciler,
                    sink.as_ref(),
                    snapshot.documents().first(),
                ),
                Err(error) => emitter.error(error),
            });
        let unsubscribe = db.backend().subscribe_query(&query, callback);
        Box::new(move || {
            unsubscribe();
            metrics.increment(SUBSCRIPTIONS, model_name::<M>(), -1);
        })
    })
}

fn deliver<M: Model>(
    emitter: &Emitter<M>,
    reconciler: &OnceLock<Reconciler<M>>,
    metrics: &dyn MetricsSink,
    snapshot: Option<&DocumentSnapshot>,
) {
    let Some(snapshot) = snapshot.filter(|snapshot| snapshot.exists()) else {
        emitter.error(not_found(format!("{} not found.", model_name::<M>())));
        return;
    };
    metrics.increment(SNAPSHOTS, &snapshot.reference().path().canonical_string(), 1);

    match load_model::<M>(snapshot) {
        Ok(model) => match reconciler.get() {
            Some(reconciler) => {
                reconciler.on_snapshot(model);
            }
            None => emitter.next(model),
        },
        Err(error) => emitter.error(error),
    }
}

fn record_writer<M: Model>(db: WeakDatabase) -> RecordWriter<M> {
    Arc::new(
        move |mut value: M| -> PlatformFuture<'static, FirestoreResult<()>> {
            let db = db.clone();
            Box::pin(async move {
                let db = db.upgrade()?;
                db.save(&mut value, SaveMode::Update).await.map(|_| ())
            })
        },
    )
}

impl<M: Model> QueryProxy for ModelStore<M> {
    type Descriptor = ModelTarget;

    fn descriptor(&self) -> &ModelTarget {
        &self.target
    }

    fn with_constraint(&self, constraint: QueryConstraint) -> FirestoreResult<Self> {
        match &self.target {
            ModelTarget::Document(reference) => Err(invalid_argument(format!(
                "Query constraints cannot be applied to the document store {}",
                reference.path()
            ))),
            ModelTarget::First { base, .. } => {
                let db = self.db.upgrade()?;
                db.first_of(base.with_constraint(constraint)?)
            }
        }
    }
}

impl<M: Model> CachedStore for ModelStore<M> {
    type Value = M;

    fn store(&self) -> &Store<M> {
        &self.store
    }
}

impl<M: Model> Clone for ModelStore<M> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            key: self.key.clone(),
            target: self.target.clone(),
            store: self.store.clone(),
            reconciler: self.reconciler.clone(),
        }
    }
}

impl<M: Model> fmt::Debug for ModelStore<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelStore")
            .field("target", &self.target)
            .field("store", &self.store)
            .field("state", &self.reconciler.state())
            .finish()
    }
}

impl<'a, M: Model> IntoFuture for &'a ModelStore<M> {
    type Output = FirestoreResult<M>;
    type IntoFuture = BoxFuture<'a, FirestoreResult<M>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.get())
    }
}
