mod query;
mod reference;
mod snapshot;

pub use query::{
    Bound, FieldFilter, FilterOperator, LimitType, OrderBy, OrderDirection, Query, QueryConstraint,
    QueryDefinition,
};
pub use reference::{generate_auto_id, CollectionReference, DocumentReference};
pub use snapshot::{DocumentSnapshot, QuerySnapshot};
