//! Belongs-to, has-many and sub-collection relations.
//!
//! Relations are declared as typed accessors next to the model and listed in
//! [`Model::relations`](super::Model::relations). Belongs-to targets are tracked in a
//! side-table held by [`ModelMeta`](super::ModelMeta), never in the persisted fields.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::firestore::api::{CollectionReference, DocumentReference, FilterOperator};
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::platform::runtime::PlatformFuture;
use crate::store::Store;

use super::collection_store::CollectionStore;
use super::database::Database;
use super::model::Model;
use super::model_store::ModelStore;
use super::query_proxy::QueryProxy;
use super::save::SaveMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo,
    HasMany,
    SubCollection,
}

/// Schema entry describing one relation of a model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationDescriptor {
    pub kind: RelationKind,
    pub field: &'static str,
    pub target_collection: &'static str,
    pub foreign_key: Option<&'static str>,
}

impl RelationDescriptor {
    pub const fn belongs_to(field: &'static str, target_collection: &'static str) -> Self {
        Self {
            kind: RelationKind::BelongsTo,
            field,
            target_collection,
            foreign_key: None,
        }
    }

    pub const fn has_many(
        field: &'static str,
        target_collection: &'static str,
        foreign_key: &'static str,
    ) -> Self {
        Self {
            kind: RelationKind::HasMany,
            field,
            target_collection,
            foreign_key: Some(foreign_key),
        }
    }

    pub const fn sub_collection(field: &'static str, target_collection: &'static str) -> Self {
        Self {
            kind: RelationKind::SubCollection,
            field,
            target_collection,
            foreign_key: None,
        }
    }
}

type DraftResolver = Arc<
    dyn Fn(Database) -> PlatformFuture<'static, FirestoreResult<DocumentReference>>
        + Send
        + Sync
        + 'static,
>;

#[derive(Clone)]
pub(crate) struct Draft {
    store: Arc<dyn Any + Send + Sync>,
    resolve: DraftResolver,
}

impl Draft {
    /// Saves the draft entity and returns its document reference.
    pub(crate) fn resolve(
        &self,
        db: Database,
    ) -> PlatformFuture<'static, FirestoreResult<DocumentReference>> {
        (self.resolve)(db)
    }
}

#[derive(Clone)]
pub(crate) enum RelationSlot {
    Linked(DocumentReference),
    Draft(Draft),
}

/// Belongs-to targets of one entity, keyed by field.
#[derive(Clone, Default)]
pub struct RelationLinks {
    slots: Arc<Mutex<BTreeMap<String, RelationSlot>>>,
}

impl RelationLinks {
    /// The reference stored for `field`, once the target is persisted.
    pub fn linked(&self, field: &str) -> Option<DocumentReference> {
        match self.slots.lock().unwrap().get(field) {
            Some(RelationSlot::Linked(reference)) => Some(reference.clone()),
            _ => None,
        }
    }

    /// Whether `field` points at an entity that has not been saved yet.
    pub fn is_draft(&self, field: &str) -> bool {
        matches!(
            self.slots.lock().unwrap().get(field),
            Some(RelationSlot::Draft(_))
        )
    }

    pub fn fields(&self) -> Vec<String> {
        self.slots.lock().unwrap().keys().cloned().collect()
    }

    pub(crate) fn link(&self, field: &str, reference: DocumentReference) {
        self.slots
            .lock()
            .unwrap()
            .insert(field.to_string(), RelationSlot::Linked(reference));
    }

    pub(crate) fn unlink(&self, field: &str) {
        self.slots.lock().unwrap().remove(field);
    }

    pub(crate) fn entries(&self) -> Vec<(String, RelationSlot)> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .map(|(field, slot)| (field.clone(), slot.clone()))
            .collect()
    }

    fn slot(&self, field: &str) -> Option<RelationSlot> {
        self.slots.lock().unwrap().get(field).cloned()
    }

    fn set_draft(&self, field: &str, draft: Draft) {
        self.slots
            .lock()
            .unwrap()
            .insert(field.to_string(), RelationSlot::Draft(draft));
    }

    /// An unshared copy of the current slots.
    pub(crate) fn detached_copy(&self) -> Self {
        let slots = self.slots.lock().unwrap().clone();
        Self {
            slots: Arc::new(Mutex::new(slots)),
        }
    }
}

impl fmt::Debug for RelationLinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock().unwrap();
        f.debug_map()
            .entries(slots.iter().map(|(field, slot)| {
                let target = match slot {
                    RelationSlot::Linked(reference) => reference.path().canonical_string(),
                    RelationSlot::Draft(_) => "<unsaved>".to_string(),
                };
                (field.clone(), target)
            }))
            .finish()
    }
}

/// What a belongs-to relation is pointed at.
#[derive(Clone, Debug)]
pub enum RelationTarget<T> {
    Id(String),
    Entity(T),
}

impl<T> RelationTarget<T> {
    pub fn id(id: impl Into<String>) -> Self {
        RelationTarget::Id(id.into())
    }
}

/// The store behind a belongs-to relation.
pub enum Related<T: Model> {
    /// Live store over the persisted target.
    Stored(ModelStore<T>),
    /// Value store over a target that is saved with its owner.
    Draft(Store<T>),
}

impl<T: Model> Related<T> {
    pub async fn get(&self) -> FirestoreResult<T> {
        self.store().get().await
    }

    pub fn store(&self) -> &Store<T> {
        match self {
            Related::Stored(store) => store.store(),
            Related::Draft(store) => store,
        }
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, Related::Draft(_))
    }
}

/// Belongs-to relation persisted as a reference in `field`.
pub struct BelongsTo<T> {
    field: &'static str,
    _target: PhantomData<fn() -> T>,
}

impl<T: Model> BelongsTo<T> {
    pub const fn new(field: &'static str) -> Self {
        Self {
            field,
            _target: PhantomData,
        }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn descriptor(&self) -> RelationDescriptor {
        RelationDescriptor::belongs_to(self.field, T::COLLECTION)
    }

    /// Points the relation of `owner` at `target`.
    ///
    /// Ids and persisted entities are linked directly. An unsaved entity is kept in a value
    /// store and saved first when the owner is saved.
    pub fn set<O: Model>(&self, owner: &O, target: RelationTarget<T>) -> FirestoreResult<()> {
        let links = owner.meta().relations();
        match target {
            RelationTarget::Id(id) => {
                let reference = CollectionReference::from_string(T::COLLECTION)?.doc(Some(&id))?;
                links.link(self.field, reference);
            }
            RelationTarget::Entity(entity) if entity.meta().is_persisted() => {
                links.link(self.field, entity.reference()?);
            }
            RelationTarget::Entity(entity) => {
                let label = format!("{}:{}", self.field, entity.id());
                let store = Store::from_value(label, entity);
                links.set_draft(self.field, draft_for(store));
            }
        }
        Ok(())
    }

    /// The related store, if the relation is set.
    pub fn get<O: Model>(&self, db: &Database, owner: &O) -> FirestoreResult<Option<Related<T>>> {
        match owner.meta().relations().slot(self.field) {
            None => Ok(None),
            Some(RelationSlot::Linked(reference)) => {
                Ok(Some(Related::Stored(db.find_reference::<T>(reference))))
            }
            Some(RelationSlot::Draft(draft)) => draft
                .store
                .downcast_ref::<Store<T>>()
                .map(|store| Some(Related::Draft(store.clone())))
                .ok_or_else(|| {
                    invalid_argument(format!(
                        "Relation {} does not hold a {}",
                        self.field,
                        T::COLLECTION
                    ))
                }),
        }
    }

    pub fn clear<O: Model>(&self, owner: &O) {
        owner.meta().relations().unlink(self.field);
    }
}

fn draft_for<T: Model>(store: Store<T>) -> Draft {
    let pending = store.clone();
    let resolve: DraftResolver = Arc::new(
        move |db: Database| -> PlatformFuture<'static, FirestoreResult<DocumentReference>> {
            let pending = pending.clone();
            Box::pin(async move {
                let mut target = pending.get().await?;
                db.save_without_relations(&mut target, SaveMode::Update)
                    .await?;
                let reference = target.reference()?;
                pending.publish(target);
                Ok(reference)
            })
        },
    );
    Draft {
        store: Arc::new(store),
        resolve,
    }
}

/// Collection of `T` whose `foreign_key` field references the owner.
pub struct HasMany<T> {
    field: &'static str,
    foreign_key: &'static str,
    _target: PhantomData<fn() -> T>,
}

impl<T: Model> HasMany<T> {
    pub const fn new(field: &'static str, foreign_key: &'static str) -> Self {
        Self {
            field,
            foreign_key,
            _target: PhantomData,
        }
    }

    pub fn descriptor(&self) -> RelationDescriptor {
        RelationDescriptor::has_many(self.field, T::COLLECTION, self.foreign_key)
    }

    pub fn get<O: Model>(&self, db: &Database, owner: &O) -> FirestoreResult<CollectionStore<T>> {
        db.query::<T>()?.where_field(
            self.foreign_key,
            FilterOperator::Equal,
            owner.reference()?.to_value(),
        )
    }
}

/// Collection of `T` nested under the owner's document.
pub struct SubCollection<T> {
    field: &'static str,
    _target: PhantomData<fn() -> T>,
}

impl<T: Model> SubCollection<T> {
    pub const fn new(field: &'static str) -> Self {
        Self {
            field,
            _target: PhantomData,
        }
    }

    pub fn descriptor(&self) -> RelationDescriptor {
        RelationDescriptor::sub_collection(self.field, T::COLLECTION)
    }

    /// `{owner collection}/{owner id}/{field}`.
    pub fn collection_path<O: Model>(&self, owner: &O) -> String {
        format!("{}/{}/{}", owner.collection_path(), owner.id(), self.field)
    }

    pub fn get<O: Model>(&self, db: &Database, owner: &O) -> FirestoreResult<CollectionStore<T>> {
        let collection = owner.reference()?.collection(self.field)?;
        db.query_collection::<T>(collection)
    }
}
