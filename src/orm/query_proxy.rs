use crate::firestore::api::{FilterOperator, OrderDirection, QueryConstraint};
use crate::firestore::error::FirestoreResult;
use crate::firestore::model::IntoFieldPath;
use crate::firestore::value::FirestoreValue;

/// Query builder calls on a store.
///
/// Every builder returns a new cached store for the descriptor with the constraint
/// appended; the receiver is left as it was. Methods the store types define themselves
/// (`first`, `add`, `set`, `get`, `subscribe`, `unsubscribe`) are inherent and win over
/// anything here.
pub trait QueryProxy: Sized {
    type Descriptor;

    /// The query or document reference behind the store.
    fn descriptor(&self) -> &Self::Descriptor;

    fn with_constraint(&self, constraint: QueryConstraint) -> FirestoreResult<Self>;

    fn where_field(
        &self,
        field: impl IntoFieldPath,
        op: FilterOperator,
        value: impl Into<FirestoreValue>,
    ) -> FirestoreResult<Self> {
        self.with_constraint(QueryConstraint::where_field(field, op, value)?)
    }

    fn order_by(
        &self,
        field: impl IntoFieldPath,
        direction: OrderDirection,
    ) -> FirestoreResult<Self> {
        self.with_constraint(QueryConstraint::order_by(field, direction)?)
    }

    fn limit(&self, limit: u32) -> FirestoreResult<Self> {
        self.with_constraint(QueryConstraint::Limit(limit))
    }

    fn limit_to_last(&self, limit: u32) -> FirestoreResult<Self> {
        self.with_constraint(QueryConstraint::LimitToLast(limit))
    }

    fn start_at(&self, values: Vec<FirestoreValue>) -> FirestoreResult<Self> {
        self.with_constraint(QueryConstraint::StartAt(values))
    }

    fn start_after(&self, values: Vec<FirestoreValue>) -> FirestoreResult<Self> {
        self.with_constraint(QueryConstraint::StartAfter(values))
    }

    fn end_at(&self, values: Vec<FirestoreValue>) -> FirestoreResult<Self> {
        self.with_constraint(QueryConstraint::EndAt(values))
    }

    fn end_before(&self, values: Vec<FirestoreValue>) -> FirestoreResult<Self> {
        self.with_constraint(QueryConstraint::EndBefore(values))
    }
}
