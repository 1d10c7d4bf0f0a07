//! The document database the store engine talks to.
//!
//! Only the operations the engine needs are modelled: snapshot listeners, one-shot
//! reads and writes, and read-modify-write transactions.

mod in_memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::firestore::api::{DocumentReference, DocumentSnapshot, Query, QuerySnapshot};
use crate::firestore::error::{FirestoreErrorCode, FirestoreResult};
use crate::firestore::value::{FirestoreValue, MapValue};
use crate::platform::runtime::PlatformFuture;
use crate::util::Unsubscribe;

pub use in_memory::InMemoryBackend;

/// Attempts made by [`run_transaction`] before an `Aborted` error is surfaced.
pub const MAX_TRANSACTION_ATTEMPTS: usize = 5;

pub type DocumentCallback = Arc<dyn Fn(FirestoreResult<DocumentSnapshot>) + Send + Sync + 'static>;
pub type QueryCallback = Arc<dyn Fn(FirestoreResult<QuerySnapshot>) + Send + Sync + 'static>;

pub type TransactionFuture<'a, R> = PlatformFuture<'a, FirestoreResult<R>>;

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Backend: Send + Sync + 'static {
    /// Starts listening to one document. The callback receives the current state first.
    fn subscribe_document(
        &self,
        reference: &DocumentReference,
        callback: DocumentCallback,
    ) -> Unsubscribe;

    /// Starts listening to a query. The callback receives the current result first.
    fn subscribe_query(&self, query: &Query, callback: QueryCallback) -> Unsubscribe;

    async fn get_document(&self, reference: &DocumentReference)
        -> FirestoreResult<DocumentSnapshot>;

    async fn run_query(&self, query: &Query) -> FirestoreResult<QuerySnapshot>;

    /// Replaces the whole document.
    async fn set_document(&self, reference: &DocumentReference, data: MapValue)
        -> FirestoreResult<()>;

    /// Overwrites the given top-level fields of an existing document.
    async fn update_document(
        &self,
        reference: &DocumentReference,
        data: MapValue,
    ) -> FirestoreResult<()>;

    async fn delete_document(&self, reference: &DocumentReference) -> FirestoreResult<()>;

    async fn begin_transaction(&self) -> FirestoreResult<Box<dyn Transaction>>;

    /// Placeholder the backend replaces with its commit time.
    fn server_timestamp(&self) -> FirestoreValue {
        FirestoreValue::server_timestamp()
    }
}

/// Buffered read-modify-write unit. Writes become visible on [`Transaction::commit`].
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Transaction: Send {
    async fn get(&mut self, reference: &DocumentReference) -> FirestoreResult<DocumentSnapshot>;

    fn set(&mut self, reference: &DocumentReference, data: MapValue);

    fn update(&mut self, reference: &DocumentReference, data: MapValue);

    fn delete(&mut self, reference: &DocumentReference);

    /// Fails with `Aborted` when a document read by this transaction changed meanwhile.
    async fn commit(self: Box<Self>) -> FirestoreResult<()>;
}

/// Runs `update` inside a transaction, retrying on `Aborted`.
///
/// The closure may run several times, so it should clone whatever it needs into the
/// returned future:
///
/// ```
/// # use firestore_orm::firestore::{run_transaction, Backend, DocumentReference, InMemoryBackend};
/// # use firestore_orm::firestore::value::MapValue;
/// # use firestore_orm::firestore::FirestoreError;
/// # futures::executor::block_on(async {
/// let backend = InMemoryBackend::new();
/// let reference = DocumentReference::from_string("counters/c1").unwrap();
/// let existed = run_transaction(&backend, |transaction| {
///     let reference = reference.clone();
///     Box::pin(async move {
///         let snapshot = transaction.get(&reference).await?;
///         transaction.set(&reference, MapValue::default());
///         Ok::<_, FirestoreError>(snapshot.exists())
///     })
/// })
/// .await
/// .unwrap();
/// assert!(!existed);
/// # });
/// ```
pub async fn run_transaction<R, F>(backend: &dyn Backend, mut update: F) -> FirestoreResult<R>
where
    F: for<'t> FnMut(&'t mut dyn Transaction) -> TransactionFuture<'t, R>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut transaction = backend.begin_transaction().await?;
        let result = update(transaction.as_mut()).await;
        let outcome = match result {
            Ok(value) => transaction.commit().await.map(|()| value),
            Err(err) => Err(err),
        };
        match outcome {
            Err(err)
                if err.code == FirestoreErrorCode::Aborted
                    && attempt < MAX_TRANSACTION_ATTEMPTS =>
            {
                continue;
            }
            other => return other,
        }
    }
}
