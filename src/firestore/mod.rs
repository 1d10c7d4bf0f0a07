pub mod api;
pub mod backend;
pub mod error;
pub mod model;
mod query_evaluator;
pub mod value;

pub use api::{
    generate_auto_id, Bound, CollectionReference, DocumentReference, DocumentSnapshot,
    FieldFilter, FilterOperator, LimitType, OrderBy, OrderDirection, Query, QueryConstraint,
    QueryDefinition, QuerySnapshot,
};
pub use backend::{
    run_transaction, Backend, DocumentCallback, InMemoryBackend, QueryCallback, Transaction,
    TransactionFuture, MAX_TRANSACTION_ATTEMPTS,
};
pub use error::{FirestoreError, FirestoreErrorCode, FirestoreResult};
pub use model::{FieldPath, ResourcePath, Timestamp};
pub use value::{FirestoreValue, MapValue};
