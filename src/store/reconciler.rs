//! Optimistic write reconciliation for single-document stores.
//!
//! Local edits are echoed to listeners at once and written to the backend through a
//! [`Throttle`]. Until the backend reflects the edit, incoming snapshots are merged with
//! the pending fields instead of replacing the local view.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::firestore::error::FirestoreResult;
use crate::firestore::value::FirestoreValue;
use crate::logger::log_arg;
use crate::platform::runtime::PlatformFuture;

use super::adapter::Emitter;
use super::diff::{difference, values_equal};
use super::settings::StoreSettings;
use super::throttle::{Throttle, ThrottledAction};
use super::LOGGER;

/// A value whose persisted fields can be read and replaced.
pub trait FieldRecord: Clone + Send + Sync + 'static {
    /// Persisted fields, without identity or bookkeeping timestamps.
    fn record_fields(&self) -> BTreeMap<String, FirestoreValue>;

    /// A copy of `self` carrying `fields` instead of its own.
    fn with_record_fields(&self, fields: BTreeMap<String, FirestoreValue>) -> Self;
}

/// Performs the backend write for a value.
pub type RecordWriter<T> =
    Arc<dyn Fn(T) -> PlatformFuture<'static, FirestoreResult<()>> + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcilerState {
    Idle,
    /// A local edit is waiting for its debounced write.
    PendingUnknown,
    /// A write is in flight.
    Saving,
}

pub struct Reconciler<T: FieldRecord> {
    inner: Arc<ReconcilerInner<T>>,
}

struct ReconcilerInner<T: FieldRecord> {
    label: String,
    emitter: Emitter<T>,
    state: Mutex<ReconcilerData<T>>,
    throttle: Mutex<Option<Throttle<T>>>,
}

struct ReconcilerData<T> {
    state: ReconcilerState,
    server: Option<T>,
    local: Option<T>,
    pending: BTreeMap<String, FirestoreValue>,
    // A write landed for the current edit but the backend has not echoed it yet.
    write_completed: bool,
    superseded: bool,
}

impl<T: FieldRecord> Reconciler<T> {
    pub fn new(
        label: impl Into<String>,
        emitter: Emitter<T>,
        settings: &StoreSettings,
        writer: RecordWriter<T>,
    ) -> Self {
        let inner = Arc::new(ReconcilerInner {
            label: label.into(),
            emitter,
            state: Mutex::new(ReconcilerData {
                state: ReconcilerState::Idle,
                server: None,
                local: None,
                pending: BTreeMap::new(),
                write_completed: false,
                superseded: false,
            }),
            throttle: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let action: ThrottledAction<T> =
            Arc::new(move |value: T| -> PlatformFuture<'static, ()> {
                let weak = weak.clone();
                let writer = Arc::clone(&writer);
                Box::pin(async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let value = inner.begin_write(value);
                    let result = writer(value).await;
                    inner.finish_write(result);
                })
            });
        let throttle = Throttle::new(settings.save_delays.clone(), action);
        *inner.throttle.lock().unwrap() = Some(throttle);

        Self { inner }
    }

    pub fn state(&self) -> ReconcilerState {
        self.inner.state.lock().unwrap().state
    }

    /// Fields edited locally that the backend has not confirmed yet.
    pub fn pending_fields(&self) -> BTreeMap<String, FirestoreValue> {
        self.inner.state.lock().unwrap().pending.clone()
    }

    pub fn server_value(&self) -> Option<T> {
        self.inner.state.lock().unwrap().server.clone()
    }

    /// Publishes `value` at once and schedules a debounced backend write.
    pub fn set(&self, value: T) {
        {
            let mut data = self.inner.state.lock().unwrap();
            let base = data
                .server
                .as_ref()
                .map(FieldRecord::record_fields)
                .unwrap_or_default();
            let edited = value.record_fields();
            for (field, new_value) in &edited {
                let unchanged = base
                    .get(field)
                    .is_some_and(|existing| values_equal(existing, new_value));
                if unchanged {
                    data.pending.remove(field);
                } else {
                    data.pending.insert(field.clone(), new_value.clone());
                }
            }
            match data.state {
                ReconcilerState::Idle => data.state = ReconcilerState::PendingUnknown,
                ReconcilerState::Saving => data.superseded = true,
                ReconcilerState::PendingUnknown => {}
            }
            data.write_completed = false;
            data.local = Some(value.clone());
        }
        self.inner.log_state("set");

        self.inner.emitter.next(value.clone());
        self.inner.schedule(value);
    }

    /// Routes a server snapshot. Returns the value that was published.
    pub fn on_snapshot(&self, server: T) -> T {
        let (published, reschedule) = {
            let mut data = self.inner.state.lock().unwrap();
            data.server = Some(server.clone());
            match (data.state, data.local.clone()) {
                (ReconcilerState::Idle, _) | (_, None) => {
                    data.state = ReconcilerState::Idle;
                    (server, None)
                }
                (state, Some(_)) => {
                    let server_fields = server.record_fields();
                    if difference(&data.pending, &server_fields).is_empty() {
                        data.state = ReconcilerState::Idle;
                        data.pending.clear();
                        data.local = None;
                        data.write_completed = false;
                        (server, None)
                    } else {
                        let merged = overlay(&server, &data.pending);
                        data.local = Some(merged.clone());
                        let retry =
                            state == ReconcilerState::PendingUnknown && data.write_completed;
                        (merged.clone(), retry.then_some(merged))
                    }
                }
            }
        };
        self.inner.log_state("snapshot");

        self.inner.emitter.next(published.clone());
        if let Some(local) = reschedule {
            self.inner.schedule(local);
        }
        published
    }
}

impl<T: FieldRecord> ReconcilerInner<T> {
    fn schedule(&self, value: T) {
        let throttle = self.throttle.lock().unwrap().clone();
        if let Some(throttle) = throttle {
            throttle.call(value);
        }
    }

    /// Marks the write in flight and returns what to write: the latest server value with
    /// the pending fields laid over it, or `scheduled` before any snapshot arrived.
    fn begin_write(&self, scheduled: T) -> T {
        let value = {
            let mut data = self.state.lock().unwrap();
            if data.state != ReconcilerState::Idle {
                data.state = ReconcilerState::Saving;
            }
            data.superseded = false;
            match &data.server {
                Some(server) => overlay(server, &data.pending),
                None => scheduled,
            }
        };
        self.log_state("write started");
        value
    }

    fn finish_write(&self, result: FirestoreResult<()>) {
        match result {
            Ok(()) => {
                {
                    let mut data = self.state.lock().unwrap();
                    if data.superseded {
                        data.state = ReconcilerState::PendingUnknown;
                        data.write_completed = true;
                    } else if data.state == ReconcilerState::Saving {
                        data.state = ReconcilerState::Idle;
                        data.pending.clear();
                        data.local = None;
                    }
                }
                self.log_state("write finished");
            }
            Err(error) => {
                let server = {
                    let mut data = self.state.lock().unwrap();
                    data.state = ReconcilerState::Idle;
                    data.pending.clear();
                    data.local = None;
                    data.write_completed = false;
                    data.superseded = false;
                    data.server.clone()
                };
                LOGGER.warn_with([
                    log_arg("debounced write failed"),
                    log_arg(self.label.as_str()),
                    log_arg(error.to_string()),
                ]);
                self.emitter.report_error(error);
                if let Some(server) = server {
                    self.emitter.next(server);
                }
            }
        }
    }

    fn log_state(&self, event: &str) {
        let state = self.state.lock().unwrap().state;
        LOGGER.debug_with([
            log_arg("reconciler"),
            log_arg(self.label.as_str()),
            log_arg(event),
            log_arg(format!("{state:?}")),
        ]);
    }
}

fn overlay<T: FieldRecord>(server: &T, pending: &BTreeMap<String, FirestoreValue>) -> T {
    let mut fields = server.record_fields();
    fields.extend(pending.clone());
    server.with_record_fields(fields)
}

impl<T: FieldRecord> Clone for Reconciler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::error::unavailable;
    use crate::store::adapter::{Source, Store};
    use crate::util::{PartialObserver, Unsubscribe};
    use futures::channel::oneshot;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    struct Profile {
        fields: BTreeMap<String, FirestoreValue>,
    }

    impl Profile {
        fn named(name: &str) -> Self {
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), FirestoreValue::from(name));
            Self { fields }
        }

        fn with(mut self, field: &str, value: &str) -> Self {
            self.fields
                .insert(field.to_string(), FirestoreValue::from(value));
            self
        }

        fn name(&self) -> &str {
            self.text("name")
        }

        fn text(&self, field: &str) -> &str {
            self.fields
                .get(field)
                .and_then(FirestoreValue::as_str)
                .unwrap_or_default()
        }
    }

    impl FieldRecord for Profile {
        fn record_fields(&self) -> BTreeMap<String, FirestoreValue> {
            self.fields.clone()
        }

        fn with_record_fields(&self, fields: BTreeMap<String, FirestoreValue>) -> Self {
            Self { fields }
        }
    }

    type Gates = Arc<Mutex<VecDeque<oneshot::Receiver<()>>>>;

    struct Harness {
        store: Store<Profile>,
        reconciler: Reconciler<Profile>,
        writes: Arc<Mutex<Vec<Profile>>>,
        fail: Arc<AtomicUsize>,
        gates: Gates,
    }

    impl Harness {
        fn written_names(&self) -> Vec<String> {
            let writes = self.writes.lock().unwrap();
            writes.iter().map(|value| value.name().to_string()).collect()
        }

        fn last_write(&self) -> Profile {
            self.writes.lock().unwrap().last().cloned().unwrap()
        }

        /// Keeps the next write in flight until the returned sender fires.
        fn hold_next_write(&self) -> oneshot::Sender<()> {
            let (release, gate) = oneshot::channel();
            self.gates.lock().unwrap().push_back(gate);
            release
        }
    }

    fn harness() -> Harness {
        let source: Source<Profile> =
            Arc::new(|_emitter: Emitter<Profile>| -> Unsubscribe { Box::new(|| {}) });
        let store = Store::new("profiles/p1", Duration::from_secs(60), source);
        let writes = Arc::new(Mutex::new(Vec::new()));
        let fail = Arc::new(AtomicUsize::new(0));
        let gates: Gates = Arc::new(Mutex::new(VecDeque::new()));
        let sink = Arc::clone(&writes);
        let failures = Arc::clone(&fail);
        let pending_gates = Arc::clone(&gates);
        let writer: RecordWriter<Profile> = Arc::new(
            move |value: Profile| -> PlatformFuture<'static, FirestoreResult<()>> {
                sink.lock().unwrap().push(value);
                let failed = failures.load(Ordering::SeqCst) > 0;
                let gate = pending_gates.lock().unwrap().pop_front();
                Box::pin(async move {
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                    if failed {
                        Err(unavailable("offline"))
                    } else {
                        Ok(())
                    }
                })
            },
        );
        let settings = StoreSettings::default()
            .with_save_delays(vec![Duration::from_millis(50), Duration::from_millis(1000)]);
        let reconciler = Reconciler::new("profiles/p1", store.emitter(), &settings, writer);
        Harness {
            store,
            reconciler,
            writes,
            fail,
            gates,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn set_echoes_before_write_and_coalesces_burst() {
        let h = harness();
        let _listener = h.store.subscribe(PartialObserver::new());
        h.reconciler.on_snapshot(Profile::named("John"));

        for name in ["J", "Ja", "Jan", "Jane"] {
            h.reconciler.set(Profile::named(name));
        }
        assert_eq!(h.store.current_value().unwrap().name(), "Jane");
        assert_eq!(h.reconciler.state(), ReconcilerState::PendingUnknown);
        assert!(h.writes.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(h.written_names(), vec!["Jane".to_string()]);
        assert_eq!(h.reconciler.state(), ReconcilerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_snapshot_is_merged_with_pending_fields() {
        let h = harness();
        h.reconciler.on_snapshot(Profile::named("John"));
        h.reconciler.set(Profile::named("Jane"));

        let stale = Profile::named("John").with("city", "Paris");
        let published = h.reconciler.on_snapshot(stale);

        assert_eq!(published.name(), "Jane");
        assert_eq!(published.text("city"), "Paris");
        assert_eq!(h.reconciler.state(), ReconcilerState::PendingUnknown);
    }

    #[tokio::test(start_paused = true)]
    async fn write_keeps_backend_changes_to_unedited_fields() {
        let h = harness();
        h.reconciler
            .on_snapshot(Profile::named("John").with("email", "john@example.com"));
        h.reconciler
            .set(Profile::named("Jane").with("email", "john@example.com"));

        let published = h
            .reconciler
            .on_snapshot(Profile::named("John").with("email", "other@client.io"));
        assert_eq!(published.name(), "Jane");
        assert_eq!(published.text("email"), "other@client.io");

        tokio::time::sleep(Duration::from_millis(60)).await;
        let written = h.last_write();
        assert_eq!(written.name(), "Jane");
        assert_eq!(written.text("email"), "other@client.io");
    }

    #[tokio::test(start_paused = true)]
    async fn matching_snapshot_returns_to_idle() {
        let h = harness();
        h.reconciler.on_snapshot(Profile::named("John"));
        h.reconciler.set(Profile::named("Jane"));

        h.reconciler.on_snapshot(Profile::named("Jane"));
        assert_eq!(h.reconciler.state(), ReconcilerState::Idle);
        assert!(h.reconciler.pending_fields().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn set_during_write_queues_one_follow_up() {
        let h = harness();
        h.reconciler.on_snapshot(Profile::named("John"));
        let release = h.hold_next_write();

        h.reconciler.set(Profile::named("Jane"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(h.reconciler.state(), ReconcilerState::Saving);
        assert_eq!(h.written_names(), vec!["Jane".to_string()]);

        h.reconciler.set(Profile::named("Janet"));
        assert_eq!(h.reconciler.state(), ReconcilerState::Saving);
        assert_eq!(h.store.current_value().unwrap().name(), "Janet");

        release.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.reconciler.state(), ReconcilerState::PendingUnknown);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(
            h.written_names(),
            vec!["Jane".to_string(), "Janet".to_string()]
        );
        assert_eq!(h.reconciler.state(), ReconcilerState::Idle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.writes.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_echo_after_completed_write_is_retried_once() {
        let h = harness();
        h.reconciler.on_snapshot(Profile::named("John"));
        let release = h.hold_next_write();

        h.reconciler.set(Profile::named("Jane"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        h.reconciler.set(Profile::named("Janet"));
        release.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.reconciler.state(), ReconcilerState::PendingUnknown);

        // Echo of the first write, with a field changed elsewhere.
        let published = h
            .reconciler
            .on_snapshot(Profile::named("Jane").with("city", "Paris"));
        assert_eq!(published.name(), "Janet");
        assert_eq!(published.text("city"), "Paris");
        assert_eq!(h.reconciler.state(), ReconcilerState::PendingUnknown);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(h.writes.lock().unwrap().len(), 2);
        let follow_up = h.last_write();
        assert_eq!(follow_up.name(), "Janet");
        assert_eq!(follow_up.text("city"), "Paris");

        h.reconciler
            .on_snapshot(Profile::named("Janet").with("city", "Paris"));
        assert_eq!(h.reconciler.state(), ReconcilerState::Idle);
        assert!(h.reconciler.pending_fields().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_reverts_to_server_value() {
        let h = harness();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        let _listener = h.store.subscribe(PartialObserver::new().with_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        h.reconciler.on_snapshot(Profile::named("John"));
        h.fail.store(1, Ordering::SeqCst);

        h.reconciler.set(Profile::named("Jane"));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(h.reconciler.state(), ReconcilerState::Idle);
        assert_eq!(h.store.current_value().unwrap().name(), "John");
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reverting_a_field_drops_it_from_pending() {
        let h = harness();
        h.reconciler.on_snapshot(Profile::named("John"));
        h.reconciler.set(Profile::named("Jane"));
        assert_eq!(h.reconciler.pending_fields().len(), 1);

        h.reconciler.set(Profile::named("John"));
        assert!(h.reconciler.pending_fields().is_empty());
    }
}
