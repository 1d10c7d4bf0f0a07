#![cfg(not(target_arch = "wasm32"))]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{harness, User, IDLE_TTL};
use firestore_orm::firestore::{
    Backend, FilterOperator, FirestoreErrorCode, FirestoreValue, MapValue,
};
use firestore_orm::orm::{Model, ModelMeta, QueryProxy, SaveMode, SaveOutcome};
use firestore_orm::store::metrics::{SNAPSHOTS, SUBSCRIPTIONS};
use firestore_orm::store::ReconcilerState;
use firestore_orm::util::PartialObserver;

fn field(document: &firestore_orm::firestore::MapValue, name: &str) -> Option<FirestoreValue> {
    document.get(name).cloned()
}

#[tokio::test(start_paused = true)]
async fn equivalent_descriptors_share_one_store() {
    let h = harness();

    let first = h
        .db
        .query::<User>()
        .unwrap()
        .where_field("name", FilterOperator::Equal, "John")
        .unwrap();
    let second = h
        .db
        .query::<User>()
        .unwrap()
        .where_field("name", FilterOperator::Equal, "John")
        .unwrap();
    assert_eq!(first.store().id(), second.store().id());

    let other = h
        .db
        .query::<User>()
        .unwrap()
        .where_field("name", FilterOperator::Equal, "Jane")
        .unwrap();
    assert_ne!(first.store().id(), other.store().id());

    let found = h.db.find::<User>("u1").unwrap();
    let again = h.db.find::<User>("u1").unwrap();
    assert_eq!(found.store().id(), again.store().id());
    assert!(h.db.cache().contains("users/u1"));
}

#[tokio::test(start_paused = true)]
async fn create_and_fetch_through_first() {
    let h = harness();
    let mut user = User::new("John Doe", "john@example.com");

    let outcome = h.db.save(&mut user, SaveMode::Replace).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Created);
    assert!(user.meta().is_persisted());

    let stored = h
        .backend
        .document(&format!("users/{}", user.id()))
        .unwrap();
    assert!(field(&stored, "createdAt").unwrap().as_timestamp().is_some());
    assert!(field(&stored, "updatedAt").unwrap().is_null());

    let first = h.db.query::<User>().unwrap().first().unwrap();
    let loaded = first.get().await.unwrap();
    assert_eq!(loaded.name, "John Doe");
    assert_eq!(loaded.id(), user.id());
}

#[tokio::test(start_paused = true)]
async fn first_rejects_on_empty_results() {
    let h = harness();
    let first = h.db.query::<User>().unwrap().first().unwrap();
    let error = first.get().await.unwrap_err();
    assert!(error.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn rapid_sets_coalesce_into_one_write() {
    let h = harness();
    let mut user = User::new("John", "john@example.com");
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();
    let path = format!("users/{}", user.id());
    assert_eq!(h.backend.write_count(&path), 1);

    let store = h.db.find::<User>(user.id()).unwrap();
    let _listener = store.subscribe(PartialObserver::new());
    let current = store.get().await.unwrap();

    let renamed = current.with_name("Jane");
    store.set(current.with_name("J"));
    store.set(current.with_name("Ja"));
    store.set(renamed.clone());
    store.set(User {
        email: "jane@example.com".into(),
        ..renamed
    });
    assert_eq!(h.backend.write_count(&path), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.backend.write_count(&path), 2);

    let stored = h.backend.document(&path).unwrap();
    assert_eq!(field(&stored, "name").unwrap().as_str(), Some("Jane"));
    assert_eq!(
        field(&stored, "email").unwrap().as_str(),
        Some("jane@example.com")
    );
    assert!(field(&stored, "updatedAt").unwrap().as_timestamp().is_some());
}

#[tokio::test(start_paused = true)]
async fn set_echoes_immediately_then_converges() {
    let h = harness();
    let mut user = User::new("John", "john@example.com");
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();

    let store = h.db.find::<User>(user.id()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _listener = store.subscribe(
        PartialObserver::new()
            .with_next(move |user: &User| sink.lock().unwrap().push(user.name.clone())),
    );
    let current = store.get().await.unwrap();

    store.set(current.with_name("Jane"));
    assert_eq!(seen.lock().unwrap().last().map(String::as_str), Some("Jane"));
    assert_eq!(store.state(), ReconcilerState::PendingUnknown);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.state(), ReconcilerState::Idle);
    assert!(store.reconciler().pending_fields().is_empty());
    assert_eq!(store.current_value().unwrap().name, "Jane");
    assert!(seen.lock().unwrap().iter().skip(1).all(|name| name == "Jane"));
}

#[tokio::test(start_paused = true)]
async fn failed_debounced_write_reverts_to_server_value() {
    let h = harness();
    let mut user = User::new("John", "john@example.com");
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();

    let store = h.db.find::<User>(user.id()).unwrap();
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    let _listener = store.subscribe(PartialObserver::new().with_error(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let current = store.get().await.unwrap();

    h.backend.set_write_failure(Some(
        firestore_orm::firestore::FirestoreError::new(FirestoreErrorCode::Unavailable, "offline"),
    ));
    store.set(current.with_name("Jane"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(store.state(), ReconcilerState::Idle);
    assert_eq!(store.current_value().unwrap().name, "John");
}

#[tokio::test(start_paused = true)]
async fn reattach_within_grace_period_reuses_subscription() {
    let h = harness();
    let mut user = User::new("John", "john@example.com");
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();
    let path = format!("users/{}", user.id());

    let store = h.db.find::<User>(user.id()).unwrap();
    let listener = store.subscribe(PartialObserver::new());
    assert_eq!(h.metrics.get(SUBSCRIPTIONS, "User"), 1);
    drop(listener);

    tokio::time::sleep(IDLE_TTL / 2).await;
    let listener = store.subscribe(PartialObserver::new());
    assert_eq!(store.get().await.unwrap().name, "John");
    assert_eq!(h.backend.subscribe_count(&path), 1);
    drop(listener);

    tokio::time::sleep(IDLE_TTL * 2).await;
    assert!(!store.store().is_connected());
    assert!(!h.db.cache().contains(&path));
    assert_eq!(h.metrics.get(SUBSCRIPTIONS, "User"), 0);
    assert_eq!(h.backend.active_listener_count(), 0);

    let fresh = h.db.find::<User>(user.id()).unwrap();
    assert_ne!(fresh.store().id(), store.store().id());
    assert_eq!(fresh.get().await.unwrap().name, "John");
    assert_eq!(h.backend.subscribe_count(&path), 2);
}

#[tokio::test(start_paused = true)]
async fn held_store_reconnecting_after_eviction_stays_shared() {
    let h = harness();
    let mut user = User::new("John", "john@example.com");
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();
    let path = format!("users/{}", user.id());

    let held = h.db.find::<User>(user.id()).unwrap();
    assert_eq!(held.get().await.unwrap().name, "John");
    tokio::time::sleep(IDLE_TTL * 2).await;
    assert!(!h.db.cache().contains(&path));

    let _held_listener = held.subscribe(PartialObserver::new());
    let found = h.db.find::<User>(user.id()).unwrap();
    let _found_listener = found.subscribe(PartialObserver::new());

    assert_eq!(found.store().id(), held.store().id());
    assert!(h.db.cache().contains(&path));
    assert_eq!(h.backend.active_listener_count(), 1);
    assert_eq!(h.metrics.get(SUBSCRIPTIONS, "User"), 1);
}

#[tokio::test(start_paused = true)]
async fn replaced_store_defers_to_the_shared_one() {
    let h = harness();
    let mut user = User::new("John", "john@example.com");
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();

    let held = h.db.find::<User>(user.id()).unwrap();
    let current = held.get().await.unwrap();
    tokio::time::sleep(IDLE_TTL * 2).await;

    let fresh = h.db.find::<User>(user.id()).unwrap();
    assert_ne!(fresh.store().id(), held.store().id());
    let _fresh_listener = fresh.subscribe(PartialObserver::new());
    let _held_listener = held.subscribe(PartialObserver::new());
    assert_eq!(h.backend.active_listener_count(), 1);

    held.set(current.with_name("Jane"));
    assert_eq!(fresh.state(), ReconcilerState::PendingUnknown);
    assert_eq!(fresh.current_value().unwrap().name, "Jane");
}

#[tokio::test(start_paused = true)]
async fn pending_write_keeps_remote_change_to_other_field() {
    let h = harness();
    let mut user = User::new("John", "john@example.com");
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();
    let path = format!("users/{}", user.id());

    let store = h.db.find::<User>(user.id()).unwrap();
    let _listener = store.subscribe(PartialObserver::new());
    let current = store.get().await.unwrap();
    store.set(current.with_name("Jane"));

    let remote = MapValue::new(
        [(
            "email".to_string(),
            FirestoreValue::from("other@client.io"),
        )]
        .into_iter()
        .collect(),
    );
    h.backend
        .update_document(&user.reference().unwrap(), remote)
        .await
        .unwrap();
    let merged = store.current_value().unwrap();
    assert_eq!(merged.name, "Jane");
    assert_eq!(merged.email, "other@client.io");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = h.backend.document(&path).unwrap();
    assert_eq!(field(&stored, "name").unwrap().as_str(), Some("Jane"));
    assert_eq!(
        field(&stored, "email").unwrap().as_str(),
        Some("other@client.io")
    );
    assert_eq!(store.state(), ReconcilerState::Idle);
    assert_eq!(store.current_value().unwrap().email, "other@client.io");
}

#[tokio::test(start_paused = true)]
async fn missing_document_rejects_then_resolves() {
    let h = harness();
    let store = h.db.find::<User>("nonexistent-id").unwrap();

    let error = store.get().await.unwrap_err();
    assert_eq!(error.code, FirestoreErrorCode::NotFound);
    assert_eq!(error.message(), "User not found.");

    let mut user = User {
        meta: ModelMeta::with_id("nonexistent-id"),
        name: "Late".into(),
        email: "late@example.com".into(),
    };
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();

    assert_eq!(store.get().await.unwrap().name, "Late");
    assert_eq!(h.metrics.get(SNAPSHOTS, "users/nonexistent-id"), 1);
}

#[tokio::test(start_paused = true)]
async fn update_mode_writes_only_changes() {
    let h = harness();
    let mut user = User::new("John", "john@example.com");
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();
    let path = format!("users/{}", user.id());

    let outcome = h.db.update_or_create(&mut user).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Unchanged);
    assert_eq!(h.backend.write_count(&path), 1);

    user.email = "john@elsewhere.com".into();
    let outcome = h.db.save(&mut user, SaveMode::Update).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Updated);
    assert!(user.meta().updated_at().is_some());

    let stored = h.backend.document(&path).unwrap();
    assert_eq!(
        field(&stored, "email").unwrap().as_str(),
        Some("john@elsewhere.com")
    );
    assert!(field(&stored, "createdAt").unwrap().as_timestamp().is_some());
}

#[tokio::test(start_paused = true)]
async fn replace_keeps_created_at() {
    let h = harness();
    let mut user = User::new("John", "john@example.com");
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();
    let path = format!("users/{}", user.id());
    let created = field(&h.backend.document(&path).unwrap(), "createdAt");

    user.name = "Johnny".into();
    let outcome = h.db.save(&mut user, SaveMode::Replace).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Replaced);

    let stored = h.backend.document(&path).unwrap();
    assert_eq!(field(&stored, "createdAt"), created);
    assert!(field(&stored, "updatedAt").unwrap().as_timestamp().is_some());
}

#[tokio::test(start_paused = true)]
async fn delete_ignores_backend_errors() {
    let h = harness();
    let mut user = User::new("John", "john@example.com");
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();
    let path = format!("users/{}", user.id());

    h.backend.set_write_failure(Some(
        firestore_orm::firestore::FirestoreError::new(FirestoreErrorCode::Unavailable, "offline"),
    ));
    h.db.delete(&user).await;
    assert!(h.backend.document(&path).is_some());

    h.backend.set_write_failure(None);
    h.db.delete(&user).await;
    assert!(h.backend.document(&path).is_none());
}

#[tokio::test(start_paused = true)]
async fn builders_derive_new_stores() {
    let h = harness();
    for (name, email) in [("Ann", "a@x.io"), ("Bob", "b@x.io"), ("Cid", "c@x.io")] {
        let mut user = User::new(name, email);
        h.db.save(&mut user, SaveMode::Replace).await.unwrap();
    }

    let all = h.db.query::<User>().unwrap();
    let ordered = all
        .order_by("name", firestore_orm::firestore::OrderDirection::Descending)
        .unwrap()
        .limit(2)
        .unwrap();
    let names: Vec<String> = ordered
        .get()
        .await
        .unwrap()
        .into_iter()
        .map(|user| user.name)
        .collect();
    assert_eq!(names, vec!["Cid".to_string(), "Bob".to_string()]);
    assert_eq!(all.get().await.unwrap().len(), 3);
    assert!(all.descriptor().definition().limit().is_none());

    let bob = all
        .where_field("name", FilterOperator::Equal, "Bob")
        .unwrap()
        .first()
        .unwrap();
    assert_eq!(bob.get().await.unwrap().email, "b@x.io");

    let document = h.db.find::<User>("u1").unwrap();
    let error = document.limit(1).unwrap_err();
    assert_eq!(error.code, FirestoreErrorCode::InvalidArgument);
}

#[tokio::test(start_paused = true)]
async fn collection_store_follows_writes() {
    let h = harness();
    let store = h.db.query::<User>().unwrap();
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sizes);
    let _listener = store.subscribe(
        PartialObserver::new()
            .with_next(move |users: &Vec<User>| sink.lock().unwrap().push(users.len())),
    );

    let added = store.add(User::new("Ann", "a@x.io")).await.unwrap();
    assert!(added.meta().is_persisted());
    store.add(User::new("Bob", "b@x.io")).await.unwrap();

    assert_eq!(*sizes.lock().unwrap(), vec![0, 1, 2]);
}
