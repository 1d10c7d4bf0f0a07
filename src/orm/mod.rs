//! Models, live model stores and relations built on the store engine.
//!
//! ```
//! # use std::sync::Arc;
//! # use firestore_orm::firestore::InMemoryBackend;
//! # use firestore_orm::orm;
//! # use firestore_orm::store::StoreSettings;
//! let db = orm::init(Arc::new(InMemoryBackend::new()), StoreSettings::default());
//! assert!(db.cache().is_empty());
//! assert!(orm::database().is_ok());
//! ```

mod collection_store;
mod database;
mod model;
mod model_store;
mod query_proxy;
mod relations;
mod save;

use std::sync::{Arc, LazyLock, Mutex};

use crate::firestore::backend::Backend;
use crate::firestore::error::{internal_error, FirestoreResult};
use crate::logger::Logger;
use crate::store::StoreSettings;

pub use collection_store::CollectionStore;
pub use database::Database;
pub use model::{Model, ModelMeta, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD};
pub use model_store::{ModelStore, ModelTarget};
pub use query_proxy::QueryProxy;
pub use relations::{
    BelongsTo, HasMany, Related, RelationDescriptor, RelationKind, RelationLinks, RelationTarget,
    SubCollection,
};
pub use save::{SaveMode, SaveOutcome};

pub(crate) static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firestore-orm/model"));

static DEFAULT_DATABASE: LazyLock<Mutex<Option<Database>>> = LazyLock::new(|| Mutex::new(None));

/// Installs the process-wide default database and returns it.
///
/// Calling it again replaces the default; stores handed out earlier keep their database.
pub fn init(backend: Arc<dyn Backend>, settings: StoreSettings) -> Database {
    let db = Database::new(backend, settings);
    *DEFAULT_DATABASE.lock().unwrap() = Some(db.clone());
    LOGGER.debug("default database installed");
    db
}

/// The database installed by [`init`].
pub fn database() -> FirestoreResult<Database> {
    DEFAULT_DATABASE
        .lock()
        .unwrap()
        .clone()
        .ok_or_else(|| internal_error("orm::init must be called before orm::database"))
}
