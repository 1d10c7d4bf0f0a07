use std::collections::BTreeMap;

use crate::firestore::model::DocumentKey;
use crate::firestore::value::{FirestoreValue, MapValue};

use super::query::Query;
use super::reference::DocumentReference;

#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    key: DocumentKey,
    data: Option<MapValue>,
}

impl DocumentSnapshot {
    pub fn new(key: DocumentKey, data: Option<MapValue>) -> Self {
        Self { key, data }
    }

    /// Returns whether the document exists on the backend.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Returns the decoded document fields if the snapshot contains data.
    pub fn data(&self) -> Option<&BTreeMap<String, FirestoreValue>> {
        self.data.as_ref().map(|map| map.fields())
    }

    pub(crate) fn map_value(&self) -> Option<&MapValue> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<BTreeMap<String, FirestoreValue>> {
        self.data.map(MapValue::into_fields)
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn document_key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn reference(&self) -> DocumentReference {
        DocumentReference::from_key(self.key.clone())
    }
}

/// The results of evaluating a query, in query order.
#[derive(Clone, Debug)]
pub struct QuerySnapshot {
    query: Query,
    documents: Vec<DocumentSnapshot>,
}

impl QuerySnapshot {
    pub fn new(query: Query, documents: Vec<DocumentSnapshot>) -> Self {
        Self { query, documents }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn documents(&self) -> &[DocumentSnapshot] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn into_documents(self) -> Vec<DocumentSnapshot> {
        self.documents
    }
}

impl IntoIterator for QuerySnapshot {
    type Item = DocumentSnapshot;
    type IntoIter = std::vec::IntoIter<DocumentSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}
