use std::collections::BTreeMap;

use serde_json::{json, Map, Value as JsonValue};

use crate::firestore::api::{CollectionReference, DocumentReference, DocumentSnapshot};
use crate::firestore::error::{not_found, FirestoreResult};
use crate::firestore::model::Timestamp;
use crate::firestore::value::FirestoreValue;
use crate::firestore::generate_auto_id;
use crate::store::FieldRecord;

use super::relations::{RelationDescriptor, RelationKind, RelationLinks};

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Fields the ORM manages itself and never takes from [`Model::to_fields`].
pub(crate) const BOOKKEEPING_FIELDS: [&str; 3] = [ID_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD];

/// Identity and bookkeeping carried by every entity.
///
/// Clones share the relation side-table, so a relation set on one clone is visible through
/// every other clone of the same entity.
#[derive(Clone, Debug)]
pub struct ModelMeta {
    id: String,
    collection: Option<String>,
    created_at: Timestamp,
    updated_at: Option<Timestamp>,
    persisted: bool,
    relations: RelationLinks,
}

impl ModelMeta {
    /// Metadata for a new entity with a fresh auto id.
    pub fn new() -> Self {
        Self::with_id(generate_auto_id())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            collection: None,
            created_at: Timestamp::now(),
            updated_at: None,
            persisted: false,
            relations: RelationLinks::default(),
        }
    }

    /// Places the entity in `collection` instead of its model's default collection.
    pub fn in_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }

    /// Whether the entity was loaded from or written to the backend.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn relations(&self) -> &RelationLinks {
        &self.relations
    }

    /// Same relations under a new identity, as an unsaved entity in `collection`.
    pub(crate) fn renewed(&self, collection: impl Into<String>) -> Self {
        let mut meta = Self::new().in_collection(collection);
        meta.relations = self.relations.detached_copy();
        meta
    }

    pub(crate) fn mark_created(&mut self) {
        self.persisted = true;
        self.created_at = Timestamp::now();
        self.updated_at = None;
    }

    pub(crate) fn mark_updated(&mut self) {
        self.persisted = true;
        self.updated_at = Some(Timestamp::now());
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }
}

impl Default for ModelMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// An entity persisted as one document.
///
/// ```
/// use std::collections::BTreeMap;
/// use firestore_orm::firestore::{FirestoreResult, FirestoreValue};
/// use firestore_orm::orm::{Model, ModelMeta};
///
/// #[derive(Clone, Debug)]
/// struct Tag {
///     meta: ModelMeta,
///     label: String,
/// }
///
/// impl Model for Tag {
///     const COLLECTION: &'static str = "tags";
///
///     fn meta(&self) -> &ModelMeta {
///         &self.meta
///     }
///
///     fn meta_mut(&mut self) -> &mut ModelMeta {
///         &mut self.meta
///     }
///
///     fn to_fields(&self) -> BTreeMap<String, FirestoreValue> {
///         BTreeMap::from([("label".to_string(), FirestoreValue::from(self.label.as_str()))])
///     }
///
///     fn from_fields(
///         meta: ModelMeta,
///         fields: &BTreeMap<String, FirestoreValue>,
///     ) -> FirestoreResult<Self> {
///         let label = fields
///             .get("label")
///             .and_then(FirestoreValue::as_str)
///             .unwrap_or_default()
///             .to_string();
///         Ok(Tag { meta, label })
///     }
/// }
///
/// let tag = Tag { meta: ModelMeta::with_id("t1"), label: "rust".into() };
/// assert_eq!(tag.reference().unwrap().path().canonical_string(), "tags/t1");
/// assert_eq!(tag.to_json()["label"], "rust");
/// ```
pub trait Model: Clone + Send + Sync + 'static {
    /// Default collection of this model.
    const COLLECTION: &'static str;

    fn meta(&self) -> &ModelMeta;

    fn meta_mut(&mut self) -> &mut ModelMeta;

    /// Persisted fields, without `id`, `createdAt`, `updatedAt` or relation fields.
    fn to_fields(&self) -> BTreeMap<String, FirestoreValue>;

    fn from_fields(meta: ModelMeta, fields: &BTreeMap<String, FirestoreValue>)
        -> FirestoreResult<Self>;

    fn relations() -> Vec<RelationDescriptor> {
        Vec::new()
    }

    fn id(&self) -> &str {
        self.meta().id()
    }

    /// The collection this entity lives in.
    fn collection_path(&self) -> String {
        self.meta()
            .collection()
            .unwrap_or(Self::COLLECTION)
            .to_string()
    }

    fn reference(&self) -> FirestoreResult<DocumentReference> {
        CollectionReference::from_string(&self.collection_path())?.doc(Some(self.id()))
    }

    /// Display projection of the entity, bookkeeping fields included.
    fn to_json(&self) -> JsonValue {
        let meta = self.meta();
        let mut object = Map::new();
        object.insert(ID_FIELD.to_string(), json!(meta.id()));
        object.insert(
            CREATED_AT_FIELD.to_string(),
            json!(meta.created_at().to_rfc3339()),
        );
        object.insert(
            UPDATED_AT_FIELD.to_string(),
            meta.updated_at()
                .map(|updated| json!(updated.to_rfc3339()))
                .unwrap_or(JsonValue::Null),
        );
        for (field, value) in self.to_fields() {
            object.insert(field, value.to_json());
        }
        JsonValue::Object(object)
    }
}

impl<M: Model> FieldRecord for M {
    fn record_fields(&self) -> BTreeMap<String, FirestoreValue> {
        self.to_fields()
    }

    fn with_record_fields(&self, fields: BTreeMap<String, FirestoreValue>) -> Self {
        M::from_fields(self.meta().clone(), &fields).unwrap_or_else(|_| self.clone())
    }
}

/// Builds an entity from a snapshot, linking belongs-to fields that hold references.
pub(crate) fn load_model<M: Model>(snapshot: &DocumentSnapshot) -> FirestoreResult<M> {
    let Some(data) = snapshot.data() else {
        return Err(not_found(format!("{} not found.", model_name::<M>())));
    };

    let reference = snapshot.reference();
    let mut meta = ModelMeta::with_id(snapshot.id())
        .in_collection(reference.parent().path().canonical_string());
    if let Some(created_at) = data.get(CREATED_AT_FIELD).and_then(FirestoreValue::as_timestamp) {
        meta.created_at = created_at;
    }
    meta.updated_at = data
        .get(UPDATED_AT_FIELD)
        .and_then(FirestoreValue::as_timestamp);
    meta.mark_persisted();

    for relation in M::relations() {
        if relation.kind != RelationKind::BelongsTo {
            continue;
        }
        if let Some(path) = data.get(relation.field).and_then(FirestoreValue::as_reference) {
            let target = DocumentReference::from_string(path.trim_matches('/'))?;
            meta.relations.link(relation.field, target);
        }
    }

    let mut fields = data.clone();
    for field in BOOKKEEPING_FIELDS {
        fields.remove(field);
    }
    M::from_fields(meta, &fields)
}

/// Short type name used in messages and metrics.
pub(crate) fn model_name<M: Model>() -> &'static str {
    let full = std::any::type_name::<M>();
    full.rsplit("::").next().unwrap_or(full)
}
