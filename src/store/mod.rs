//! The query store engine: normalized keys, cached live stores, diffing and optimistic
//! write reconciliation.

pub mod adapter;
pub mod cache;
pub mod diff;
pub mod metrics;
pub mod normalize;
pub mod reconciler;
pub mod settings;
pub mod throttle;

use std::sync::LazyLock;

use crate::logger::Logger;

pub use adapter::{Emitter, Source, Store, StoreStream, StoreSubscription};
pub use cache::{CachedStore, QueryStoreCache};
pub use diff::{difference, fields_equal, values_equal, PatchObject};
pub use metrics::{CountingMetrics, MetricsSink, NoopMetrics};
pub use normalize::{document_key, query_key};
pub use reconciler::{FieldRecord, Reconciler, ReconcilerState, RecordWriter};
pub use settings::StoreSettings;
pub use throttle::Throttle;

pub(crate) static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firestore-orm/store"));
