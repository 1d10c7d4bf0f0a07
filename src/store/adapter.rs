use std::collections::BTreeMap;
use std::fmt;
use std::future::IntoFuture;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::Stream;

use crate::firestore::error::{aborted, FirestoreError, FirestoreResult};
use crate::logger::log_arg;
use crate::platform::runtime::{sleep, spawn_detached};
use crate::util::{PartialObserver, Unsubscribe};

use super::LOGGER;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Starts a push source and returns its teardown.
pub type Source<T> = Arc<dyn Fn(Emitter<T>) -> Unsubscribe + Send + Sync + 'static>;

type TeardownHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// Shared live handle over one push source.
///
/// A store can be awaited for its current value, observed for every later value, and
/// written to locally with [`Store::publish`]. The source is started on the first attach
/// and stopped once the last listener has been gone for the idle TTL.
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

struct StoreInner<T> {
    id: u64,
    label: String,
    idle_ttl: Duration,
    source: Source<T>,
    teardown_hooks: Mutex<Vec<TeardownHook>>,
    state: Mutex<StoreState<T>>,
}

struct StoreState<T> {
    latest: Option<FirestoreResult<T>>,
    listeners: BTreeMap<u64, PartialObserver<T>>,
    next_listener_id: u64,
    connection: Connection,
    // Bumped on every attach and teardown so a stale idle timer does nothing.
    generation: u64,
}

enum Connection {
    Closed,
    Opening,
    Open(Unsubscribe),
}

impl<T> Store<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(label: impl Into<String>, idle_ttl: Duration, source: Source<T>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
                idle_ttl,
                source,
                teardown_hooks: Mutex::new(Vec::new()),
                state: Mutex::new(StoreState {
                    latest: None,
                    listeners: BTreeMap::new(),
                    next_listener_id: 0,
                    connection: Connection::Closed,
                    generation: 0,
                }),
            }),
        }
    }

    /// A store over a fixed value, available without any backend round trip.
    pub fn from_value(label: impl Into<String>, value: T) -> Self {
        let seed = value.clone();
        let source: Source<T> = Arc::new(move |emitter: Emitter<T>| -> Unsubscribe {
            emitter.next(seed.clone());
            Box::new(|| {})
        });
        let store = Self::new(label, Duration::ZERO, source);
        store.inner.state.lock().unwrap().latest = Some(Ok(value));
        store
    }

    /// Unique per store instance; used to tell instances apart after eviction.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn emitter(&self) -> Emitter<T> {
        Emitter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The cached value or error, if the source delivered anything yet.
    pub fn latest(&self) -> Option<FirestoreResult<T>> {
        self.inner.state.lock().unwrap().latest.clone()
    }

    pub fn current_value(&self) -> Option<T> {
        match self.latest() {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().unwrap().listeners.len()
    }

    /// Whether the backend subscription is currently open.
    pub fn is_connected(&self) -> bool {
        !matches!(
            self.inner.state.lock().unwrap().connection,
            Connection::Closed
        )
    }

    /// Resolves with the cached value, or with the first value or error delivered after
    /// attaching.
    pub async fn get(&self) -> FirestoreResult<T> {
        if let Some(latest) = self.latest() {
            return latest;
        }

        let (sender, receiver) = oneshot::channel::<FirestoreResult<T>>();
        let sender = Arc::new(Mutex::new(Some(sender)));
        let resolve = move |outcome: FirestoreResult<T>| {
            if let Some(sender) = sender.lock().unwrap().take() {
                let _ = sender.send(outcome);
            }
        };
        let resolve = Arc::new(resolve);
        let on_next = Arc::clone(&resolve);
        let on_error = Arc::clone(&resolve);
        let on_complete = resolve;
        let label = self.inner.label.clone();
        let observer = PartialObserver::new()
            .with_next(move |value: &T| on_next(Ok(value.clone())))
            .with_error(move |error: &FirestoreError| on_error(Err(error.clone())))
            .with_complete(move || {
                on_complete(Err(aborted(format!(
                    "Store {label} was disposed before delivering a value"
                ))))
            });

        let subscription = self.subscribe(observer);
        let outcome = receiver
            .await
            .unwrap_or_else(|_| Err(aborted("Store dropped its pending request")));
        subscription.detach();
        outcome
    }

    /// Attaches a listener. A cached value or error is replayed to it immediately.
    pub fn subscribe(&self, observer: PartialObserver<T>) -> StoreSubscription<T> {
        let (id, replay, connect) = {
            let mut state = self.inner.state.lock().unwrap();
            state.next_listener_id += 1;
            let id = state.next_listener_id;
            state.listeners.insert(id, observer.clone());
            state.generation += 1;
            let connect = matches!(state.connection, Connection::Closed);
            if connect {
                state.connection = Connection::Opening;
            }
            (id, state.latest.clone(), connect)
        };

        match replay {
            Some(Ok(value)) => observer.notify_next(&value),
            Some(Err(error)) => observer.notify_error(&error),
            None => {}
        }

        if connect {
            self.inner.connect(self.emitter());
        }

        StoreSubscription {
            inner: Arc::clone(&self.inner),
            id,
            active: true,
        }
    }

    /// Every later value as a stream. Dropping the stream detaches its listener.
    pub fn stream(&self) -> StoreStream<T> {
        let (sender, receiver) = async_channel::unbounded::<FirestoreResult<T>>();
        let on_next = sender.clone();
        let on_error = sender.clone();
        let observer = PartialObserver::new()
            .with_next(move |value: &T| {
                let _ = on_next.try_send(Ok(value.clone()));
            })
            .with_error(move |error: &FirestoreError| {
                let _ = on_error.try_send(Err(error.clone()));
            })
            .with_complete(move || {
                sender.close();
            });
        let subscription = self.subscribe(observer);
        StoreStream {
            receiver: Box::pin(receiver),
            _subscription: subscription,
        }
    }

    /// Pushes a value to every listener and the cache without waiting for the backend.
    pub fn publish(&self, value: T) {
        self.inner.emit_value(value);
    }

    /// Completes every listener and tears the backend subscription down at once.
    pub fn unsubscribe(&self) {
        let listeners = {
            let mut state = self.inner.state.lock().unwrap();
            std::mem::take(&mut state.listeners)
        };
        for observer in listeners.values() {
            observer.notify_complete();
        }
        self.inner.teardown(None);
    }

    /// Registers a callback run every time the store tears its subscription down.
    pub(crate) fn on_teardown<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.teardown_hooks.lock().unwrap().push(Arc::new(hook));
    }
}

impl<T> StoreInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn connect(self: &Arc<Self>, emitter: Emitter<T>) {
        LOGGER.debug_with([log_arg("opening subscription"), log_arg(self.label.as_str())]);
        let unsubscribe = (self.source)(emitter);
        let mut state = self.state.lock().unwrap();
        if matches!(state.connection, Connection::Opening) {
            state.connection = Connection::Open(unsubscribe);
        } else {
            // Torn down while the source was starting.
            drop(state);
            unsubscribe();
        }
    }

    fn emit_value(&self, value: T) {
        let listeners = {
            let mut state = self.state.lock().unwrap();
            state.latest = Some(Ok(value.clone()));
            state.listeners.values().cloned().collect::<Vec<_>>()
        };
        for observer in listeners {
            observer.notify_next(&value);
        }
    }

    fn emit_error(&self, error: FirestoreError, cache: bool) {
        let listeners = {
            let mut state = self.state.lock().unwrap();
            if cache {
                state.latest = Some(Err(error.clone()));
            }
            state.listeners.values().cloned().collect::<Vec<_>>()
        };
        for observer in listeners {
            observer.notify_error(&error);
        }
    }

    fn detach(self: &Arc<Self>, id: u64) {
        let generation = {
            let mut state = self.state.lock().unwrap();
            if state.listeners.remove(&id).is_none() || !state.listeners.is_empty() {
                return;
            }
            if matches!(state.connection, Connection::Closed) {
                return;
            }
            state.generation += 1;
            state.generation
        };

        let inner = Arc::clone(self);
        spawn_detached(async move {
            sleep(inner.idle_ttl).await;
            inner.teardown(Some(generation));
        });
    }

    /// Closes the subscription. With `Some(generation)`, only if nothing attached since.
    fn teardown(&self, expected_generation: Option<u64>) {
        let connection = {
            let mut state = self.state.lock().unwrap();
            if let Some(generation) = expected_generation {
                if state.generation != generation || !state.listeners.is_empty() {
                    return;
                }
            }
            state.generation += 1;
            state.latest = None;
            std::mem::replace(&mut state.connection, Connection::Closed)
        };

        match connection {
            Connection::Open(unsubscribe) => unsubscribe(),
            Connection::Opening | Connection::Closed => {}
        }
        LOGGER.debug_with([log_arg("closed subscription"), log_arg(self.label.as_str())]);

        let hooks = self.teardown_hooks.lock().unwrap().clone();
        for hook in hooks {
            hook();
        }
    }
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish()
    }
}

impl<'a, T> IntoFuture for &'a Store<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = FirestoreResult<T>;
    type IntoFuture = BoxFuture<'a, FirestoreResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.get())
    }
}

/// Write side of a store, handed to its source. Does not keep the store alive.
pub struct Emitter<T> {
    inner: Weak<StoreInner<T>>,
}

impl<T> Emitter<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn next(&self, value: T) {
        if let Some(inner) = self.inner.upgrade() {
            inner.emit_value(value);
        }
    }

    /// Delivers an error and caches it as the store's latest state.
    pub fn error(&self, error: FirestoreError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.emit_error(error, true);
        }
    }

    /// Delivers an error to current listeners without replacing the cached value.
    pub fn report_error(&self, error: FirestoreError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.emit_error(error, false);
        }
    }
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

/// Listener handle. Dropping it detaches the listener.
pub struct StoreSubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<StoreInner<T>>,
    id: u64,
    active: bool,
}

impl<T> StoreSubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn detach(mut self) {
        self.detach_internal();
    }

    fn detach_internal(&mut self) {
        if self.active {
            self.inner.detach(self.id);
            self.active = false;
        }
    }
}

impl<T> Drop for StoreSubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.detach_internal();
    }
}

/// Stream of store values; see [`Store::stream`].
pub struct StoreStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    receiver: Pin<Box<async_channel::Receiver<FirestoreResult<T>>>>,
    _subscription: StoreSubscription<T>,
}

impl<T> Stream for StoreStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Item = FirestoreResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.as_mut().poll_next(cx)
    }
}
