//! # firestore-orm
//!
//! A reactive object-document mapper over a document database.
//!
//! Documents and queries are exposed as live, cached stores. A store can be awaited once
//! for its current value or observed for every later value. Equivalent queries share one
//! store and one backend subscription, and a subscription is closed only after its last
//! listener has been gone for a grace period.
//!
//! - [`store`]: the store engine. Query key normalization, the store adapter, the store
//!   cache, the diff engine and the optimistic write reconciler.
//! - [`orm`]: models, the [`orm::Database`] context, model and collection stores, saving
//!   and relations.
//! - [`firestore`]: the backend interface, query descriptors, values, and an in-memory
//!   backend.
//!
//! ## Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use firestore_orm::firestore::{FirestoreResult, FirestoreValue, InMemoryBackend};
//! use firestore_orm::orm::{Database, Model, ModelMeta, SaveMode};
//! use firestore_orm::store::StoreSettings;
//!
//! #[derive(Clone, Debug)]
//! struct User {
//!     meta: ModelMeta,
//!     name: String,
//! }
//!
//! impl Model for User {
//!     const COLLECTION: &'static str = "users";
//!
//!     fn meta(&self) -> &ModelMeta {
//!         &self.meta
//!     }
//!
//!     fn meta_mut(&mut self) -> &mut ModelMeta {
//!         &mut self.meta
//!     }
//!
//!     fn to_fields(&self) -> BTreeMap<String, FirestoreValue> {
//!         BTreeMap::from([("name".to_string(), FirestoreValue::from(self.name.as_str()))])
//!     }
//!
//!     fn from_fields(
//!         meta: ModelMeta,
//!         fields: &BTreeMap<String, FirestoreValue>,
//!     ) -> FirestoreResult<Self> {
//!         let name = fields.get("name").and_then(FirestoreValue::as_str).unwrap_or_default();
//!         Ok(User { meta, name: name.to_string() })
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> FirestoreResult<()> {
//! let db = Database::new(Arc::new(InMemoryBackend::new()), StoreSettings::default());
//! let mut user = User { meta: ModelMeta::new(), name: "John Doe".into() };
//! db.save(&mut user, SaveMode::Replace).await?;
//!
//! let loaded = db.find::<User>(user.id())?.get().await?;
//! assert_eq!(loaded.name, "John Doe");
//! # Ok(())
//! # }
//! ```

pub mod firestore;
pub mod logger;
pub mod orm;
pub mod platform;
pub mod store;
pub mod util;
