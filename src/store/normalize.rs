//! Canonical cache keys for query descriptors.
//!
//! Keys follow constraint call order: `where(a).where(b)` and `where(b).where(a)` produce
//! different keys even though they select the same documents.

use serde::Serialize;
use serde_json::Value;

use crate::firestore::api::DocumentReference;
use crate::firestore::error::{unrecognized_descriptor, FirestoreResult};

/// Fields under which a serialised descriptor may expose its constraint list.
pub const CONSTRAINT_FIELDS: [&str; 2] = ["query", "constraints"];

/// Key of a single-document descriptor: `"{collectionPath}/{documentId}"`.
pub fn document_key(reference: &DocumentReference) -> String {
    format!(
        "{}/{}",
        reference.parent().path().canonical_string(),
        reference.id()
    )
}

/// Key of a collection query: the canonical JSON of its constraint list.
pub fn query_key<D>(descriptor: &D) -> FirestoreResult<String>
where
    D: Serialize + ?Sized,
{
    let value = serde_json::to_value(descriptor).map_err(|err| {
        unrecognized_descriptor(format!("Query descriptor cannot be serialised: {err}"))
    })?;
    let constraints = match &value {
        Value::Object(map) => CONSTRAINT_FIELDS.iter().find_map(|field| map.get(*field)),
        _ => None,
    };
    match constraints {
        Some(constraints) => Ok(constraints.to_string()),
        None => Err(unrecognized_descriptor(format!(
            "Query descriptor exposes none of the fields {CONSTRAINT_FIELDS:?}"
        ))),
    }
}
