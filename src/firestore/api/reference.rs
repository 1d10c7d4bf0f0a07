use std::fmt::{Display, Formatter};

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, ResourcePath};
use crate::firestore::value::FirestoreValue;

use super::query::Query;

const AUTO_ID_LENGTH: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CollectionReference {
    path: ResourcePath,
}

impl CollectionReference {
    pub fn new(path: ResourcePath) -> FirestoreResult<Self> {
        if !path.is_collection() {
            return Err(invalid_argument(format!(
                "Collection references need an odd number of segments, got '{path}'"
            )));
        }
        Ok(Self { path })
    }

    pub fn from_string(path: &str) -> FirestoreResult<Self> {
        Self::new(ResourcePath::from_string(path)?)
    }

    /// The full resource path of the collection (e.g. `articles/a1/comments`).
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The last segment of the collection path.
    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    /// Returns the document that logically contains this collection, if any.
    pub fn parent(&self) -> Option<DocumentReference> {
        let parent = self.path.without_last();
        if parent.is_empty() {
            return None;
        }
        DocumentReference::new(parent).ok()
    }

    /// Returns a reference to the document identified by `document_id`.
    ///
    /// When `document_id` is `None`, an auto-ID is generated.
    pub fn doc(&self, document_id: Option<&str>) -> FirestoreResult<DocumentReference> {
        let id = document_id
            .map(str::to_string)
            .unwrap_or_else(generate_auto_id);
        if id.is_empty() || id.contains('/') {
            return Err(invalid_argument(format!("Invalid document ID '{id}'")));
        }
        DocumentReference::new(self.path.child([id]))
    }

    /// Creates an unconstrained query over this collection.
    pub fn query(&self) -> Query {
        Query::from_collection(self.clone())
    }
}

impl Display for CollectionReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CollectionReference({})", self.path)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentReference {
    key: DocumentKey,
}

impl DocumentReference {
    pub fn new(path: ResourcePath) -> FirestoreResult<Self> {
        Ok(Self {
            key: DocumentKey::from_path(path)?,
        })
    }

    pub fn from_string(path: &str) -> FirestoreResult<Self> {
        Self::new(ResourcePath::from_string(path)?)
    }

    pub(crate) fn from_key(key: DocumentKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// The document identifier (the last segment of its path).
    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn path(&self) -> &ResourcePath {
        self.key.path()
    }

    /// The parent collection containing this document.
    pub fn parent(&self) -> CollectionReference {
        CollectionReference {
            path: self.key.collection_path(),
        }
    }

    /// Returns a reference to a sub-collection rooted at this document.
    pub fn collection(&self, path: &str) -> FirestoreResult<CollectionReference> {
        let sub_path = ResourcePath::from_string(path)?;
        CollectionReference::new(self.path().child(sub_path.segments().to_vec()))
    }

    /// The value stored in another document to point at this one.
    pub fn to_value(&self) -> FirestoreValue {
        FirestoreValue::from_reference(self.path().canonical_string())
    }
}

impl Display for DocumentReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DocumentReference({})", self.path())
    }
}

/// Generates a random document identifier.
pub fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(AUTO_ID_LENGTH)
        .collect()
}
