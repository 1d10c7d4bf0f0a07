//! Minimal update patches between two field maps.
//!
//! Equality is deep, with two relaxations: arrays compare as multisets and references
//! compare by document path. A field that differs is emitted whole; nested maps are never
//! partially diffed.

use std::collections::BTreeMap;

use crate::firestore::value::{FirestoreValue, ValueKind};

pub type PatchObject = BTreeMap<String, FirestoreValue>;

/// Fields that identify a document rather than describe it. They are never patched.
pub const IMMUTABLE_FIELDS: [&str; 2] = ["id", "createdAt"];

/// Returns the fields of `candidate` that differ from `base`.
///
/// Fields present only in `base` are ignored; a missing base field counts as a difference.
pub fn difference(
    candidate: &BTreeMap<String, FirestoreValue>,
    base: &BTreeMap<String, FirestoreValue>,
) -> PatchObject {
    candidate
        .iter()
        .filter(|(field, _)| !IMMUTABLE_FIELDS.contains(&field.as_str()))
        .filter(|(field, value)| match base.get(*field) {
            Some(existing) => !values_equal(value, existing),
            None => true,
        })
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

pub fn values_equal(left: &FirestoreValue, right: &FirestoreValue) -> bool {
    match (left.kind(), right.kind()) {
        (ValueKind::Array(left), ValueKind::Array(right)) => {
            same_multiset(left.values(), right.values())
        }
        (ValueKind::Map(left), ValueKind::Map(right)) => {
            fields_equal(left.fields(), right.fields())
        }
        (ValueKind::Reference(left), ValueKind::Reference(right)) => {
            left.trim_matches('/') == right.trim_matches('/')
        }
        (ValueKind::Double(left), ValueKind::Double(right)) => {
            left == right || (left.is_nan() && right.is_nan())
        }
        _ => left == right,
    }
}

/// Same field names, and every field equal under [`values_equal`].
pub fn fields_equal(
    left: &BTreeMap<String, FirestoreValue>,
    right: &BTreeMap<String, FirestoreValue>,
) -> bool {
    left.len() == right.len()
        && left.iter().all(|(field, value)| {
            right
                .get(field)
                .is_some_and(|other| values_equal(value, other))
        })
}

// Quadratic match-and-remove so nested arrays and maps use the same equality rule.
fn same_multiset(left: &[FirestoreValue], right: &[FirestoreValue]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut unmatched: Vec<&FirestoreValue> = right.iter().collect();
    for value in left {
        match unmatched
            .iter()
            .position(|candidate| values_equal(value, candidate))
        {
            Some(index) => {
                unmatched.swap_remove(index);
            }
            None => return false,
        }
    }
    true
}
