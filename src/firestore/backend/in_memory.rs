use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::firestore::api::{DocumentReference, DocumentSnapshot, Query, QuerySnapshot};
use crate::firestore::error::{aborted, not_found, FirestoreError, FirestoreResult};
use crate::firestore::model::{DocumentKey, Timestamp};
use crate::firestore::query_evaluator::apply_query_to_documents;
use crate::firestore::value::{FirestoreValue, MapValue, ValueKind};
use crate::util::Unsubscribe;

use super::{Backend, DocumentCallback, QueryCallback, Transaction};

/// Process-local document database.
///
/// Writes are applied synchronously and every affected listener is notified before the
/// write call returns. Clones share the same documents.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<BackendState>>,
}

#[derive(Default)]
struct BackendState {
    documents: BTreeMap<String, MapValue>,
    // Bumped on every write to a path, including deletes; absent paths read as 0.
    versions: BTreeMap<String, u64>,
    next_listener_id: u64,
    document_listeners: BTreeMap<u64, (DocumentKey, DocumentCallback)>,
    query_listeners: BTreeMap<u64, (Query, QueryCallback)>,
    subscribe_counts: BTreeMap<String, usize>,
    write_counts: BTreeMap<String, usize>,
    write_failure: Option<FirestoreError>,
}

#[derive(Clone, Debug)]
enum WriteOperation {
    Set(DocumentKey, MapValue),
    Update(DocumentKey, MapValue),
    Delete(DocumentKey),
}

impl WriteOperation {
    fn key(&self) -> &DocumentKey {
        match self {
            WriteOperation::Set(key, _)
            | WriteOperation::Update(key, _)
            | WriteOperation::Delete(key) => key,
        }
    }
}

type Notification = Box<dyn FnOnce() + Send>;

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `subscribe_*` calls made for a document path or a query's collection path.
    pub fn subscribe_count(&self, path: &str) -> usize {
        let state = self.inner.lock().unwrap();
        state.subscribe_counts.get(path).copied().unwrap_or(0)
    }

    /// Number of committed writes (one-shot or transactional) that touched a document path.
    pub fn write_count(&self, path: &str) -> usize {
        let state = self.inner.lock().unwrap();
        state.write_counts.get(path).copied().unwrap_or(0)
    }

    pub fn total_write_count(&self) -> usize {
        let state = self.inner.lock().unwrap();
        state.write_counts.values().sum()
    }

    /// Listeners currently registered, documents and queries combined.
    pub fn active_listener_count(&self) -> usize {
        let state = self.inner.lock().unwrap();
        state.document_listeners.len() + state.query_listeners.len()
    }

    /// Makes every following write fail with `error` until cleared with `None`.
    pub fn set_write_failure(&self, error: Option<FirestoreError>) {
        self.inner.lock().unwrap().write_failure = error;
    }

    /// Raw stored fields of a document, for assertions.
    pub fn document(&self, path: &str) -> Option<MapValue> {
        let state = self.inner.lock().unwrap();
        state.documents.get(path).cloned()
    }

    fn commit_writes(
        &self,
        reads: &BTreeMap<String, u64>,
        writes: Vec<WriteOperation>,
    ) -> FirestoreResult<()> {
        let notifications = {
            let mut state = self.inner.lock().unwrap();
            if let Some(error) = state.write_failure.clone() {
                log::debug!("rejecting {} writes: {error}", writes.len());
                return Err(error);
            }
            for (path, version) in reads {
                if state.version_of(path) != *version {
                    log::debug!("transaction read of {path} is stale");
                    return Err(aborted(format!(
                        "Document {path} changed since it was read in this transaction"
                    )));
                }
            }

            let now = Timestamp::now();
            let mut documents = state.documents.clone();
            for write in &writes {
                apply_write(&mut documents, write, now)?;
            }
            state.documents = documents;

            let mut touched = Vec::new();
            for write in &writes {
                let path = write.key().path().canonical_string();
                *state.versions.entry(path.clone()).or_insert(0) += 1;
                *state.write_counts.entry(path).or_insert(0) += 1;
                if !touched.contains(write.key()) {
                    touched.push(write.key().clone());
                }
            }
            state.collect_notifications(&touched)
        };

        log::debug!(
            "committed {} writes, notifying {} listeners",
            writes.len(),
            notifications.len()
        );
        for notify in notifications {
            notify();
        }
        Ok(())
    }

    fn detach(weak: &Weak<Mutex<BackendState>>, id: u64) {
        if let Some(inner) = weak.upgrade() {
            let mut state = inner.lock().unwrap();
            state.document_listeners.remove(&id);
            state.query_listeners.remove(&id);
            log::debug!("listener {id} detached");
        }
    }
}

impl BackendState {
    fn version_of(&self, path: &str) -> u64 {
        self.versions.get(path).copied().unwrap_or(0)
    }

    fn next_id(&mut self) -> u64 {
        self.next_listener_id += 1;
        self.next_listener_id
    }

    fn document_snapshot(&self, key: &DocumentKey) -> DocumentSnapshot {
        let data = self.documents.get(&key.path().canonical_string()).cloned();
        DocumentSnapshot::new(key.clone(), data)
    }

    fn query_snapshot(&self, query: &Query) -> FirestoreResult<QuerySnapshot> {
        let mut candidates = Vec::new();
        for (path, data) in &self.documents {
            let key = DocumentKey::from_string(path)?;
            candidates.push(DocumentSnapshot::new(key, Some(data.clone())));
        }
        let documents = apply_query_to_documents(candidates, query.definition());
        Ok(QuerySnapshot::new(query.clone(), documents))
    }

    // Snapshots are computed under the lock; the returned closures run after it is released.
    fn collect_notifications(&self, touched: &[DocumentKey]) -> Vec<Notification> {
        let mut notifications: Vec<Notification> = Vec::new();

        for (key, callback) in self.document_listeners.values() {
            if touched.contains(key) {
                let snapshot = self.document_snapshot(key);
                let callback = Arc::clone(callback);
                notifications.push(Box::new(move || callback(Ok(snapshot))));
            }
        }

        for (query, callback) in self.query_listeners.values() {
            let affected = touched
                .iter()
                .any(|key| query.definition().matches_collection(key));
            if affected {
                let result = self.query_snapshot(query);
                let callback = Arc::clone(callback);
                notifications.push(Box::new(move || callback(result)));
            }
        }

        notifications
    }
}

fn apply_write(
    documents: &mut BTreeMap<String, MapValue>,
    write: &WriteOperation,
    now: Timestamp,
) -> FirestoreResult<()> {
    match write {
        WriteOperation::Set(key, data) => {
            documents.insert(key.path().canonical_string(), resolve_sentinels(data, now));
        }
        WriteOperation::Update(key, data) => {
            let path = key.path().canonical_string();
            let existing = documents
                .get_mut(&path)
                .ok_or_else(|| not_found(format!("No document to update: {path}")))?;
            for (field, value) in resolve_sentinels(data, now).into_fields() {
                existing.fields_mut().insert(field, value);
            }
        }
        WriteOperation::Delete(key) => {
            documents.remove(&key.path().canonical_string());
        }
    }
    Ok(())
}

fn resolve_sentinels(data: &MapValue, now: Timestamp) -> MapValue {
    let fields = data
        .fields()
        .iter()
        .map(|(field, value)| (field.clone(), resolve_value(value, now)))
        .collect::<BTreeMap<_, _>>();
    MapValue::new(fields)
}

fn resolve_value(value: &FirestoreValue, now: Timestamp) -> FirestoreValue {
    match value.kind() {
        ValueKind::Sentinel(_) => FirestoreValue::from_timestamp(now),
        ValueKind::Map(map) => FirestoreValue::from_map(resolve_sentinels(map, now).into_fields()),
        ValueKind::Array(array) => FirestoreValue::from_array(
            array
                .values()
                .iter()
                .map(|value| resolve_value(value, now))
                .collect(),
        ),
        _ => value.clone(),
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Backend for InMemoryBackend {
    fn subscribe_document(
        &self,
        reference: &DocumentReference,
        callback: DocumentCallback,
    ) -> Unsubscribe {
        let key = reference.key().clone();
        let (id, initial) = {
            let mut state = self.inner.lock().unwrap();
            let id = state.next_id();
            *state
                .subscribe_counts
                .entry(key.path().canonical_string())
                .or_insert(0) += 1;
            state
                .document_listeners
                .insert(id, (key.clone(), Arc::clone(&callback)));
            (id, state.document_snapshot(&key))
        };
        callback(Ok(initial));

        let weak = Arc::downgrade(&self.inner);
        Box::new(move || InMemoryBackend::detach(&weak, id))
    }

    fn subscribe_query(&self, query: &Query, callback: QueryCallback) -> Unsubscribe {
        let (id, initial) = {
            let mut state = self.inner.lock().unwrap();
            let id = state.next_id();
            *state
                .subscribe_counts
                .entry(query.collection_path().canonical_string())
                .or_insert(0) += 1;
            state
                .query_listeners
                .insert(id, (query.clone(), Arc::clone(&callback)));
            (id, state.query_snapshot(query))
        };
        callback(initial);

        let weak = Arc::downgrade(&self.inner);
        Box::new(move || InMemoryBackend::detach(&weak, id))
    }

    async fn get_document(
        &self,
        reference: &DocumentReference,
    ) -> FirestoreResult<DocumentSnapshot> {
        let state = self.inner.lock().unwrap();
        Ok(state.document_snapshot(reference.key()))
    }

    async fn run_query(&self, query: &Query) -> FirestoreResult<QuerySnapshot> {
        let state = self.inner.lock().unwrap();
        state.query_snapshot(query)
    }

    async fn set_document(
        &self,
        reference: &DocumentReference,
        data: MapValue,
    ) -> FirestoreResult<()> {
        let write = WriteOperation::Set(reference.key().clone(), data);
        self.commit_writes(&BTreeMap::new(), vec![write])
    }

    async fn update_document(
        &self,
        reference: &DocumentReference,
        data: MapValue,
    ) -> FirestoreResult<()> {
        let write = WriteOperation::Update(reference.key().clone(), data);
        self.commit_writes(&BTreeMap::new(), vec![write])
    }

    async fn delete_document(&self, reference: &DocumentReference) -> FirestoreResult<()> {
        let write = WriteOperation::Delete(reference.key().clone());
        self.commit_writes(&BTreeMap::new(), vec![write])
    }

    async fn begin_transaction(&self) -> FirestoreResult<Box<dyn Transaction>> {
        Ok(Box::new(InMemoryTransaction {
            backend: self.clone(),
            reads: BTreeMap::new(),
            writes: Vec::new(),
        }))
    }
}

struct InMemoryTransaction {
    backend: InMemoryBackend,
    reads: BTreeMap<String, u64>,
    writes: Vec<WriteOperation>,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Transaction for InMemoryTransaction {
    async fn get(&mut self, reference: &DocumentReference) -> FirestoreResult<DocumentSnapshot> {
        let state = self.backend.inner.lock().unwrap();
        let path = reference.path().canonical_string();
        let version = state.version_of(&path);
        self.reads.entry(path).or_insert(version);
        Ok(state.document_snapshot(reference.key()))
    }

    fn set(&mut self, reference: &DocumentReference, data: MapValue) {
        self.writes
            .push(WriteOperation::Set(reference.key().clone(), data));
    }

    fn update(&mut self, reference: &DocumentReference, data: MapValue) {
        self.writes
            .push(WriteOperation::Update(reference.key().clone(), data));
    }

    fn delete(&mut self, reference: &DocumentReference) {
        self.writes
            .push(WriteOperation::Delete(reference.key().clone()));
    }

    async fn commit(self: Box<Self>) -> FirestoreResult<()> {
        let InMemoryTransaction {
            backend,
            reads,
            writes,
        } = *self;
        if writes.is_empty() {
            return Ok(());
        }
        backend.commit_writes(&reads, writes)
    }
}
