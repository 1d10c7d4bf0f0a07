#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use firestore_orm::firestore::{FirestoreResult, FirestoreValue, InMemoryBackend};
use firestore_orm::orm::{
    BelongsTo, Database, HasMany, Model, ModelMeta, RelationDescriptor, SubCollection,
};
use firestore_orm::store::{CountingMetrics, StoreSettings};

pub const IDLE_TTL: Duration = Duration::from_secs(1);

pub struct Harness {
    pub db: Database,
    pub backend: InMemoryBackend,
    pub metrics: Arc<CountingMetrics>,
}

pub fn harness() -> Harness {
    let backend = InMemoryBackend::new();
    let metrics = Arc::new(CountingMetrics::new());
    let settings = StoreSettings::default()
        .with_idle_ttl(IDLE_TTL)
        .with_save_delays(vec![Duration::from_millis(50), Duration::from_millis(1000)]);
    let db = Database::with_metrics(Arc::new(backend.clone()), settings, metrics.clone());
    Harness {
        db,
        backend,
        metrics,
    }
}

fn text(fields: &BTreeMap<String, FirestoreValue>, name: &str) -> String {
    fields
        .get(name)
        .and_then(FirestoreValue::as_str)
        .unwrap_or_default()
        .to_string()
}

#[derive(Clone, Debug)]
pub struct User {
    pub meta: ModelMeta,
    pub name: String,
    pub email: String,
}

impl User {
    pub const ARTICLES: HasMany<Article> = HasMany::new("articles", "author");

    pub fn new(name: &str, email: &str) -> Self {
        Self {
            meta: ModelMeta::new(),
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    pub fn with_name(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }
}

impl Model for User {
    const COLLECTION: &'static str = "users";

    fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ModelMeta {
        &mut self.meta
    }

    fn to_fields(&self) -> BTreeMap<String, FirestoreValue> {
        BTreeMap::from([
            ("name".to_string(), FirestoreValue::from(self.name.as_str())),
            ("email".to_string(), FirestoreValue::from(self.email.as_str())),
        ])
    }

    fn from_fields(
        meta: ModelMeta,
        fields: &BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<Self> {
        Ok(Self {
            meta,
            name: text(fields, "name"),
            email: text(fields, "email"),
        })
    }

    fn relations() -> Vec<RelationDescriptor> {
        vec![Self::ARTICLES.descriptor()]
    }
}

#[derive(Clone, Debug)]
pub struct Article {
    pub meta: ModelMeta,
    pub title: String,
    pub body: String,
}

impl Article {
    pub const AUTHOR: BelongsTo<User> = BelongsTo::new("author");
    pub const COMMENTS: SubCollection<Comment> = SubCollection::new("comments");

    pub fn new(title: &str, body: &str) -> Self {
        Self {
            meta: ModelMeta::new(),
            title: title.to_string(),
            body: body.to_string(),
        }
    }
}

impl Model for Article {
    const COLLECTION: &'static str = "articles";

    fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ModelMeta {
        &mut self.meta
    }

    fn to_fields(&self) -> BTreeMap<String, FirestoreValue> {
        BTreeMap::from([
            ("title".to_string(), FirestoreValue::from(self.title.as_str())),
            ("body".to_string(), FirestoreValue::from(self.body.as_str())),
        ])
    }

    fn from_fields(
        meta: ModelMeta,
        fields: &BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<Self> {
        Ok(Self {
            meta,
            title: text(fields, "title"),
            body: text(fields, "body"),
        })
    }

    fn relations() -> Vec<RelationDescriptor> {
        vec![Self::AUTHOR.descriptor(), Self::COMMENTS.descriptor()]
    }
}

#[derive(Clone, Debug)]
pub struct Comment {
    pub meta: ModelMeta,
    pub body: String,
}

impl Comment {
    pub const AUTHOR: BelongsTo<User> = BelongsTo::new("author");

    pub fn new(body: &str) -> Self {
        Self {
            meta: ModelMeta::new(),
            body: body.to_string(),
        }
    }
}

impl Model for Comment {
    const COLLECTION: &'static str = "comments";

    fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ModelMeta {
        &mut self.meta
    }

    fn to_fields(&self) -> BTreeMap<String, FirestoreValue> {
        BTreeMap::from([("body".to_string(), FirestoreValue::from(self.body.as_str()))])
    }

    fn from_fields(
        meta: ModelMeta,
        fields: &BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<Self> {
        Ok(Self {
            meta,
            body: text(fields, "body"),
        })
    }

    fn relations() -> Vec<RelationDescriptor> {
        vec![Self::AUTHOR.descriptor()]
    }
}
