use std::collections::BTreeMap;

use serde::Serialize;

use crate::firestore::value::FirestoreValue;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MapValue {
    fields: BTreeMap<String, FirestoreValue>,
}

impl MapValue {
    pub fn new(fields: BTreeMap<String, FirestoreValue>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &BTreeMap<String, FirestoreValue> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut BTreeMap<String, FirestoreValue> {
        &mut self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, FirestoreValue> {
        self.fields
    }

    pub fn get(&self, field: &str) -> Option<&FirestoreValue> {
        self.fields.get(field)
    }
}

impl From<BTreeMap<String, FirestoreValue>> for MapValue {
    fn from(fields: BTreeMap<String, FirestoreValue>) -> Self {
        Self::new(fields)
    }
}
